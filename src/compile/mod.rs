//! Compiling a source file into a [`Program`].
//!
//! A program is the catalog of every relation a session needs (base
//! relations, query results, demand sets, tags and filters), the indices the
//! generated code looks rows up with, and the maintenance handlers keyed by
//! the relation whose changes trigger them.

mod error;
pub mod lower;

use std::collections::BTreeSet;
use std::fmt::Write as _;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::ast::{File, QueryDecl};
use crate::config::{CompileOptions, ImplMode, QueryOptions, RcMode, ResolvedOptions};
use crate::expr::Var;
use crate::ivm::demand::{self, uset_name};
use crate::ivm::maint::incrementalize;
use crate::ivm::order::order;
use crate::ivm::{Clause, CompSpec, CostEstimator, MaintFn, Structure, StructureKind};
use crate::store::{Mask, Origin, RelationInfo};

pub use error::CompileError;
pub use lower::{Declarations, QuerySig, Scope};

/// One compiled query.
#[derive(Clone, Debug)]
pub struct CompiledQuery {
    pub name: String,
    pub params: Vec<Var>,
    /// The comprehension as written, used for batch evaluation.
    pub spec: CompSpec,
    /// The comprehension the result relation maintains: restricted to the
    /// demand set and rewritten to read filters. `None` for batch queries.
    pub maintained: Option<CompSpec>,
    pub options: ResolvedOptions,
    /// Result relation, absent for batch queries.
    pub result: Option<String>,
    pub demand_set: Option<String>,
    /// Whether the result relation keeps reference counts.
    pub counted: bool,
    pub structures: Vec<Structure>,
    /// Handlers this query installed, in registration order.
    pub handlers: Vec<MaintFn>,
    /// Indexed lookups batch evaluation performs, with and without the
    /// parameters bound. Empty for maintained queries.
    pub lookups: Vec<(String, Mask)>,
    pub result_arity: usize,
}

impl CompiledQuery {
    pub fn impl_mode(&self) -> ImplMode {
        self.options.impl_mode
    }

    fn signature(&self) -> QuerySig {
        QuerySig {
            params: self.params.len(),
            result_arity: self.result_arity,
            impl_mode: self.options.impl_mode,
            enumerable: self.spec.uncon_params().is_empty(),
        }
    }

    /// Mask selecting the parameter positions of the result relation.
    pub fn param_mask(&self) -> Mask {
        Mask::prefix(self.params.len(), self.result_arity)
    }
}

/// A compiled source file.
#[derive(Clone, Debug, Default)]
pub struct Program {
    catalog: IndexMap<String, RelationInfo>,
    indices: Vec<(String, Mask)>,
    queries: IndexMap<String, CompiledQuery>,
    handlers: IndexMap<String, Vec<MaintFn>>,
}

impl Program {
    /// Every relation of the program in declaration order.
    pub fn catalog(&self) -> impl Iterator<Item = &RelationInfo> {
        self.catalog.values()
    }

    pub fn relation(&self, name: &str) -> Option<&RelationInfo> {
        self.catalog.get(name)
    }

    pub fn indices(&self) -> &[(String, Mask)] {
        &self.indices
    }

    pub fn queries(&self) -> impl Iterator<Item = &CompiledQuery> {
        self.queries.values()
    }

    pub fn query(&self, name: &str) -> Option<&CompiledQuery> {
        self.queries.get(name)
    }

    /// Handlers triggered by changes to `rel`, in registration order.
    pub fn handlers_for(&self, rel: &str) -> &[MaintFn] {
        self.handlers.get(rel).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    /// Human-readable description of `query`: its comprehensions, auxiliary
    /// structures and generated handlers.
    pub fn explain(&self, query: &str) -> Option<String> {
        let q = self.queries.get(query)?;
        let mut out = String::new();
        let o = &q.options;
        let _ = writeln!(
            out,
            "query {} [impl = {}, selfjoin = {}, rc = {}, filters = {}, instrument = {}]",
            q.name,
            o.impl_mode,
            o.selfjoin,
            match o.rc {
                RcMode::Yes => "yes",
                RcMode::No => "no",
                RcMode::Safe => "safe",
            },
            if o.filters { "on" } else { "off" },
            if o.instrument { "on" } else { "off" },
        );
        let _ = writeln!(out, "  spec: {}", q.spec);
        if let Some(m) = &q.maintained {
            let _ = writeln!(out, "  maintained: {}", m);
        }
        if let Some(result) = &q.result {
            let counted = if q.counted { "counted" } else { "plain" };
            let _ = writeln!(out, "  result: {} ({}, arity {})", result, counted, q.result_arity);
        }
        if let Some(uset) = &q.demand_set {
            let _ = writeln!(out, "  demand set: {}", uset);
        }
        for s in &q.structures {
            let _ = writeln!(out, "  {}", s);
        }
        for h in &q.handlers {
            let _ = write!(out, "{}", h);
        }
        Some(out)
    }
}

/// Turns declarations into a [`Program`].
pub struct Compiler<'a> {
    options: CompileOptions,
    estimator: Option<&'a dyn CostEstimator>,
}

impl<'a> Compiler<'a> {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            estimator: None,
        }
    }

    /// Break planner ties with `estimator`.
    pub fn with_estimator(mut self, estimator: &'a dyn CostEstimator) -> Self {
        self.estimator = Some(estimator);
        self
    }

    /// Compile every declaration of `file`. Commands are ignored.
    ///
    /// # Errors
    ///
    /// Returns the first error; nothing is compiled in that case.
    pub fn compile(&self, file: &File) -> Result<Program, CompileError> {
        let (program, mut errors) = self.compile_inner(file, false)?;
        if errors.is_empty() {
            Ok(program)
        } else {
            Err(errors.remove(0))
        }
    }

    /// Compile every query that can be compiled, skipping failing queries
    /// and the queries reading them.
    pub fn compile_lenient(&self, file: &File) -> (Program, Vec<CompileError>) {
        match self.compile_inner(file, true) {
            Ok(result) => result,
            Err(e) => (Program::default(), vec![e]),
        }
    }

    fn compile_inner(&self, file: &File, lenient: bool) -> Result<(Program, Vec<CompileError>), CompileError> {
        let decls = lower::collect(file)?;
        let order = lower::topological_order(&decls.queries)?;

        let mut program = Program {
            catalog: decls.relations.clone(),
            ..Program::default()
        };
        let mut sigs: IndexMap<String, QuerySig> = IndexMap::new();
        let mut failed: BTreeSet<String> = BTreeSet::new();
        let mut errors = Vec::new();

        for name in &order {
            let Some(decl) = decls.queries.get(name) else {
                continue;
            };
            if lower::dependencies(decl).iter().any(|d| failed.contains(d)) {
                failed.insert(name.clone());
                continue;
            }
            let scope = Scope {
                relations: &decls.relations,
                queries: &sigs,
            };
            match self.compile_query(decl, &scope, &program.catalog) {
                Ok(compiled) => {
                    sigs.insert(name.clone(), compiled.signature());
                    program.install(compiled);
                }
                Err(e) if lenient => {
                    failed.insert(name.clone());
                    errors.push(e);
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            queries = program.queries.len(),
            relations = program.catalog.len(),
            handlers = program.handler_count(),
            "compiled program"
        );
        Ok((program, errors))
    }

    fn compile_query(
        &self,
        decl: &QueryDecl,
        scope: &Scope<'_>,
        catalog: &IndexMap<String, RelationInfo>,
    ) -> Result<CompiledQuery, CompileError> {
        let name = decl.name.as_str();
        let mut overrides = QueryOptions::default();
        for (option, value) in &decl.options {
            overrides
                .set(option, value)
                .map_err(|error| CompileError::InvalidOption {
                    query: name.to_string(),
                    error,
                })?;
        }
        let options = self.options.resolve(&overrides, !decl.params.is_empty());
        let spec = lower::lower_query(decl, options.impl_mode, scope)?;

        if let Some(v) = spec.unbound_result_vars().first() {
            return Err(CompileError::UnboundResultVar {
                query: name.to_string(),
                var: v.name().to_string(),
            });
        }

        let duplicate_safe = spec.is_duplicate_safe();
        let counted = match options.rc {
            RcMode::No if !duplicate_safe => {
                return Err(CompileError::CountingRequired {
                    query: name.to_string(),
                })
            }
            RcMode::No => false,
            RcMode::Yes => true,
            RcMode::Safe => !duplicate_safe,
        };
        let params_bound: BTreeSet<Var> = spec.params.iter().cloned().collect();
        let result_arity = spec.result_arity();

        let mut compiled = CompiledQuery {
            name: name.to_string(),
            params: spec.params.clone(),
            spec: spec.clone(),
            maintained: None,
            options,
            result: None,
            demand_set: None,
            counted,
            structures: Vec::new(),
            handlers: Vec::new(),
            lookups: Vec::new(),
            result_arity,
        };

        let plan = match options.impl_mode {
            ImplMode::Batch => {
                self.check_order(name, &spec, params_bound.clone())?;
                compiled.lookups = batch_lookups(&spec, &params_bound, scope);
                debug!(
                    query = name,
                    impl_mode = %options.impl_mode,
                    lookups = compiled.lookups.len(),
                    "compiled query"
                );
                return Ok(compiled);
            }
            ImplMode::Inc => {
                if let Some(p) = spec.uncon_params().first() {
                    return Err(CompileError::UnconstrainedParameter {
                        query: name.to_string(),
                        param: p.name().to_string(),
                    });
                }
                self.check_order(name, &spec, BTreeSet::new())?;
                demand::transform(name, &spec.join, false, self.estimator)?
            }
            ImplMode::Dem => {
                self.check_order(name, &spec, params_bound)?;
                let uset = uset_name(name);
                compiled.demand_set = Some(uset.clone());
                let restricted = spec.with_uset(&uset);
                demand::transform(name, &restricted.join, options.filters, self.estimator)?
            }
        };

        let maintained = CompSpec::new(plan.join, spec.resexp.clone(), spec.params.clone());
        for s in &plan.structures {
            if let StructureKind::Demand { subquery } = &s.kind {
                if !catalog.contains_key(&s.target) {
                    return Err(CompileError::Internal(format!(
                        "{} reads {} before its demand set exists",
                        name, subquery
                    )));
                }
            }
            let fns = incrementalize(&s.spec, &s.target, options.selfjoin, self.estimator)?;
            compiled.handlers.extend(fns);
        }
        let fns = incrementalize(&maintained, name, options.selfjoin, self.estimator)?;
        compiled.handlers.extend(fns);

        compiled.result = Some(name.to_string());
        compiled.maintained = Some(maintained);
        compiled.structures = plan.structures;
        debug!(
            query = name,
            impl_mode = %options.impl_mode,
            counted,
            structures = compiled.structures.len(),
            handlers = compiled.handlers.len(),
            "compiled query"
        );
        Ok(compiled)
    }

    fn check_order(&self, query: &str, spec: &CompSpec, bound: BTreeSet<Var>) -> Result<(), CompileError> {
        order(&spec.join, bound, self.estimator)
            .map(|_| ())
            .map_err(|e| CompileError::UnorderableJoin {
                query: query.to_string(),
                stuck: e.stuck.iter().map(ToString::to_string).collect(),
            })
    }
}

/// Lookups of the plans batch evaluation runs for `spec`: one with the
/// parameters bound and, if it orders, one with nothing bound. Relations of
/// other queries are evaluated rather than read and get none.
fn batch_lookups(spec: &CompSpec, params: &BTreeSet<Var>, scope: &Scope<'_>) -> Vec<(String, Mask)> {
    let mut bounds = vec![params.clone()];
    if !params.is_empty() {
        bounds.push(BTreeSet::new());
    }
    let mut out: Vec<(String, Mask)> = Vec::new();
    for bound in bounds {
        let Ok(plan) = order(&spec.join, bound, None) else {
            continue;
        };
        for p in plan {
            let (Clause::Member { lhs, rel } | Clause::MapMember { lhs, rel, .. }) = &p.clause else {
                continue;
            };
            if scope.queries.contains_key(rel) {
                continue;
            }
            let mask = Mask::from_pattern(lhs, &p.bound_before);
            if mask.is_all_bound() || mask.is_all_unbound() {
                continue;
            }
            if !out.iter().any(|(r, m)| r == rel && *m == mask) {
                out.push((rel.clone(), mask));
            }
        }
    }
    out
}

impl Program {
    /// Declare a compiled query's relations and register its handlers.
    fn install(&mut self, q: CompiledQuery) {
        let name = q.name.clone();
        if let Some(result) = &q.result {
            self.catalog.insert(
                result.clone(),
                RelationInfo::derived(
                    result.clone(),
                    q.result_arity,
                    Origin::Result { query: name.clone() },
                    q.counted,
                ),
            );
            if !q.params.is_empty() {
                self.add_index(result, q.param_mask());
            }
        }
        if let Some(uset) = &q.demand_set {
            self.catalog.insert(
                uset.clone(),
                RelationInfo::derived(
                    uset.clone(),
                    q.params.len(),
                    Origin::DemandSet { query: name.clone() },
                    true,
                ),
            );
        }
        for s in &q.structures {
            let origin = match &s.kind {
                StructureKind::Tag { var } => Origin::Tag {
                    query: name.clone(),
                    var: var.clone(),
                },
                StructureKind::Filter => Origin::Filter {
                    query: name.clone(),
                    clause: s.clause,
                },
                StructureKind::Demand { .. } => continue,
            };
            self.catalog.insert(
                s.target.clone(),
                RelationInfo::derived(s.target.clone(), s.spec.result_arity(), origin, s.counted()),
            );
        }
        for (rel, mask) in &q.lookups {
            self.add_index(rel, mask.clone());
        }
        for h in &q.handlers {
            for (rel, mask) in h.code.lookups() {
                self.add_index(&rel, mask);
            }
            self.handlers.entry(h.rel.clone()).or_default().push(h.clone());
        }
        self.queries.insert(name, q);
    }

    fn add_index(&mut self, rel: &str, mask: Mask) {
        if !self.indices.iter().any(|(r, m)| r == rel && *m == mask) {
            self.indices.push((rel.to_string(), mask));
        }
    }
}
