//! Lowering from the surface syntax to comprehensions.
//!
//! Declarations are collected first, queries are sorted so that every query
//! comes after the queries it reads, and each query is then lowered against
//! the signatures of the queries before it.

use std::collections::{BTreeSet, VecDeque};

use indexmap::IndexMap;

use crate::ast::{self, ClauseExpr, File, QueryDecl, Source, Statement, UnaryOp};
use crate::compile::CompileError;
use crate::config::ImplMode;
use crate::expr::{Expr, Var};
use crate::ivm::{Clause, CompSpec, Join};
use crate::store::{RelationInfo, RelationKind};
use crate::value::Value;

/// Declarations of a source file, in source order.
#[derive(Clone, Debug, Default)]
pub struct Declarations {
    pub relations: IndexMap<String, RelationInfo>,
    pub queries: IndexMap<String, QueryDecl>,
}

/// Gather the declarations of `file`, ignoring commands.
pub fn collect(file: &File) -> Result<Declarations, CompileError> {
    let mut decls = Declarations::default();
    for stmt in &file.statements {
        let Some(name) = stmt.node.declared_name() else {
            continue;
        };
        if decls.relations.contains_key(name) || decls.queries.contains_key(name) {
            return Err(CompileError::DuplicateDefinition {
                name: name.to_string(),
            });
        }
        match &stmt.node {
            Statement::Relation { name, arity } => {
                decls
                    .relations
                    .insert(name.clone(), RelationInfo::base(name.clone(), *arity, RelationKind::Set));
            }
            Statement::Map { name, key_arity } => {
                decls.relations.insert(
                    name.clone(),
                    RelationInfo::base(
                        name.clone(),
                        key_arity + 1,
                        RelationKind::Map {
                            key_arity: *key_arity,
                        },
                    ),
                );
            }
            Statement::Query(q) => {
                decls.queries.insert(q.name.clone(), q.clone());
            }
            _ => {}
        }
    }
    Ok(decls)
}

/// Names a query ranges over, in order of first mention.
pub fn dependencies(decl: &QueryDecl) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for clause in &decl.clauses {
        if let ClauseExpr::In {
            source: Source::Named { name, .. },
            ..
        } = &clause.node
        {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
    }
    out
}

/// Order queries so that each follows every query it reads.
///
/// Ties keep declaration order. Queries left over when no query is ready
/// form or depend on a cycle.
pub fn topological_order(queries: &IndexMap<String, QueryDecl>) -> Result<Vec<String>, CompileError> {
    let deps: IndexMap<&str, Vec<String>> = queries
        .iter()
        .map(|(name, decl)| {
            let ds = dependencies(decl)
                .into_iter()
                .filter(|d| queries.contains_key(d))
                .collect();
            (name.as_str(), ds)
        })
        .collect();

    let mut waiting: IndexMap<&str, usize> = deps.iter().map(|(name, ds)| (*name, ds.len())).collect();
    let mut ready: VecDeque<&str> = waiting
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(queries.len());

    while let Some(name) = ready.pop_front() {
        order.push(name.to_string());
        for (dependent, ds) in &deps {
            // A query may mention the same dependency once only.
            if ds.iter().any(|d| d == name) {
                if let Some(n) = waiting.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.push_back(*dependent);
                    }
                }
            }
        }
    }

    if order.len() < queries.len() {
        let queries = waiting
            .into_iter()
            .filter(|(_, n)| *n > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        return Err(CompileError::RecursiveQuery { queries });
    }
    Ok(order)
}

/// What lowering needs to know about an already compiled query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuerySig {
    pub params: usize,
    pub result_arity: usize,
    pub impl_mode: ImplMode,
    /// Whether the full result can be enumerated without bound arguments.
    pub enumerable: bool,
}

/// Relations and compiled queries visible to the query being lowered.
pub struct Scope<'a> {
    pub relations: &'a IndexMap<String, RelationInfo>,
    pub queries: &'a IndexMap<String, QuerySig>,
}

struct Lowering<'a> {
    query: &'a str,
    impl_mode: ImplMode,
    scope: &'a Scope<'a>,
    anonymous: usize,
}

/// Lower `decl` into a comprehension, given how it will be implemented.
pub fn lower_query(decl: &QueryDecl, impl_mode: ImplMode, scope: &Scope<'_>) -> Result<CompSpec, CompileError> {
    let mut lowering = Lowering {
        query: &decl.name,
        impl_mode,
        scope,
        anonymous: 0,
    };

    let mut seen = BTreeSet::new();
    for p in &decl.params {
        if !seen.insert(p) {
            return Err(lowering.malformed(format!("parameter {} is repeated", p)));
        }
    }
    let params: Vec<Var> = decl.params.iter().map(Var::new).collect();

    let resexp = lowering.expr(&decl.result.node)?;
    let clauses = decl
        .clauses
        .iter()
        .map(|c| lowering.clause(&c.node))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CompSpec::new(Join::new(clauses), resexp, params))
}

impl Lowering<'_> {
    fn malformed(&self, message: String) -> CompileError {
        CompileError::MalformedQuery {
            query: self.query.to_string(),
            message,
        }
    }

    fn arity_mismatch(&self, name: &str, expected: usize, found: usize) -> CompileError {
        CompileError::ArityMismatch {
            query: self.query.to_string(),
            name: name.to_string(),
            expected,
            found,
        }
    }

    fn expr(&self, e: &ast::Expr) -> Result<Expr, CompileError> {
        Ok(match e {
            ast::Expr::Var(name) => Expr::var(name.clone()),
            ast::Expr::Wildcard => {
                return Err(self.malformed("'_' may only appear in a membership pattern".to_string()))
            }
            ast::Expr::Int(n) => Expr::Const(Value::Int(*n)),
            ast::Expr::Str(s) => Expr::Const(Value::Str(s.clone())),
            ast::Expr::Bool(b) => Expr::Const(Value::Bool(*b)),
            ast::Expr::Tuple(items) => {
                Expr::Tuple(items.iter().map(|i| self.expr(i)).collect::<Result<_, _>>()?)
            }
            ast::Expr::Unary(UnaryOp::Not, inner) => Expr::Not(Box::new(self.expr(inner)?)),
            ast::Expr::Unary(UnaryOp::Neg, inner) => match self.expr(inner)? {
                Expr::Const(Value::Int(n)) if n != i64::MIN => Expr::Const(Value::Int(-n)),
                other => Expr::Neg(Box::new(other)),
            },
            ast::Expr::Binary(op, l, r) => Expr::binary(*op, self.expr(l)?, self.expr(r)?),
        })
    }

    fn pattern_var(&mut self, e: &ast::Expr) -> Result<Var, CompileError> {
        match e {
            ast::Expr::Var(name) => Ok(Var::new(name.clone())),
            ast::Expr::Wildcard => {
                let v = Var::anonymous(self.anonymous);
                self.anonymous += 1;
                Ok(v)
            }
            other => Err(self.malformed(format!("pattern element {} is not a variable", other))),
        }
    }

    /// Variables of a pattern, and whether it was written as a tuple.
    fn pattern(&mut self, e: &ast::Expr) -> Result<(Vec<Var>, bool), CompileError> {
        match e {
            ast::Expr::Tuple(items) => {
                let vars = items
                    .iter()
                    .map(|i| self.pattern_var(i))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((vars, true))
            }
            other => Ok((vec![self.pattern_var(other)?], false)),
        }
    }

    fn clause(&mut self, c: &ClauseExpr) -> Result<Clause, CompileError> {
        match c {
            ClauseExpr::Cond(e) => Ok(Clause::Cond(self.expr(e)?)),
            ClauseExpr::In {
                pattern,
                source: Source::Singleton(e),
            } => {
                let (lhs, tuple) = self.pattern(pattern)?;
                let value = self.expr(e)?;
                let expr = if tuple { value } else { Expr::Tuple(vec![value]) };
                Ok(Clause::Singleton { lhs, expr })
            }
            ClauseExpr::In {
                pattern,
                source: Source::Named { name, args: None },
            } => {
                let (lhs, _) = self.pattern(pattern)?;
                self.named(name, lhs)
            }
            ClauseExpr::In {
                pattern,
                source: Source::Named { name, args: Some(args) },
            } => {
                let (lhs, _) = self.pattern(pattern)?;
                self.applied(name, args, lhs)
            }
        }
    }

    /// `lhs in name`
    fn named(&self, name: &str, lhs: Vec<Var>) -> Result<Clause, CompileError> {
        if let Some(info) = self.scope.relations.get(name) {
            if lhs.len() != info.arity {
                return Err(self.arity_mismatch(name, info.arity, lhs.len()));
            }
            return Ok(match info.kind {
                RelationKind::Set => Clause::member(lhs, name),
                RelationKind::Map { key_arity } => Clause::MapMember {
                    lhs,
                    rel: name.to_string(),
                    key_arity,
                },
            });
        }
        let Some(sig) = self.scope.queries.get(name) else {
            return Err(CompileError::UnknownRelation {
                query: self.query.to_string(),
                name: name.to_string(),
            });
        };
        match sig.impl_mode {
            ImplMode::Dem => {
                return Err(self.malformed(format!(
                    "{} is demand driven and must be applied to its {} arguments",
                    name, sig.params
                )))
            }
            ImplMode::Batch if self.impl_mode != ImplMode::Batch => {
                return Err(CompileError::UnmaintainedDependency {
                    query: self.query.to_string(),
                    dependency: name.to_string(),
                })
            }
            ImplMode::Batch if !sig.enumerable => {
                return Err(self.malformed(format!(
                    "{} has parameters no clause enumerates and must be applied to arguments",
                    name
                )))
            }
            ImplMode::Batch | ImplMode::Inc => {}
        }
        if lhs.len() != sig.result_arity {
            return Err(self.arity_mismatch(name, sig.result_arity, lhs.len()));
        }
        Ok(Clause::member(lhs, name))
    }

    /// `lhs in name(args)`
    fn applied(&self, name: &str, args: &[ast::Expr], lhs: Vec<Var>) -> Result<Clause, CompileError> {
        if self.scope.relations.contains_key(name) {
            return Err(self.malformed(format!("{} is a relation and takes no arguments", name)));
        }
        let Some(sig) = self.scope.queries.get(name) else {
            return Err(CompileError::UnknownRelation {
                query: self.query.to_string(),
                name: name.to_string(),
            });
        };
        let params = args
            .iter()
            .map(|a| match a {
                ast::Expr::Var(v) => Ok(Var::new(v.clone())),
                other => Err(self.malformed(format!(
                    "argument {} of {} must be a variable",
                    other, name
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        if params.len() != sig.params {
            return Err(self.arity_mismatch(name, sig.params, params.len()));
        }
        let suffix = sig.result_arity - sig.params;
        if lhs.len() != suffix {
            return Err(self.arity_mismatch(name, suffix, lhs.len()));
        }

        let mut full = params.clone();
        full.extend(lhs);
        let inner = Clause::member(full, name);
        let demand = match sig.impl_mode {
            ImplMode::Dem => true,
            ImplMode::Inc => false,
            ImplMode::Batch if self.impl_mode == ImplMode::Batch => true,
            ImplMode::Batch => {
                return Err(CompileError::UnmaintainedDependency {
                    query: self.query.to_string(),
                    dependency: name.to_string(),
                })
            }
        };
        Ok(if demand {
            Clause::Demand {
                inner: Box::new(inner),
                query: name.to_string(),
                params,
            }
        } else {
            inner
        })
    }
}
