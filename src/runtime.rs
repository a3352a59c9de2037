//! Sessions: a compiled program running against a store.
//!
//! Every change, to a base or a derived relation, is applied the same way:
//!
//! 1. run the relation's `before` handlers against the current state;
//! 2. apply the physical change;
//! 3. run its `after` handlers, last registered first.
//!
//! Handlers never write to the store. The updates they return go on a
//! worklist and are applied one at a time by the same protocol, depth first
//! in the order they were produced. Counted relations run handlers only
//! when a row appears or disappears.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, trace, warn};

use crate::compile::{CompiledQuery, Program};
use crate::config::ImplMode;
use crate::eval::Evaluator;
use crate::expr::EvalError;
use crate::ivm::exec::run;
use crate::ivm::{ExecError, Placement, Update, UpdateOp};
use crate::store::{Relation, RelationInfo, RelationKind, Store};
use crate::value::{RowDisplay, Tuple, Value};

/// Errors returned by [`Session`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    UnknownRelation(String),
    UnknownQuery(String),
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    /// Only base relations can be changed directly.
    DerivedRelation(String),
    NotAMap(String),
    /// The key of a map already has a different value.
    KeyConflict {
        map: String,
        key: Tuple,
        existing: Value,
    },
    /// `demand` on a query without a demand set.
    NotDemandDriven(String),
    /// `undemand` without a matching `demand`.
    NotDemanded { query: String, params: Tuple },
    /// A batch query with parameters was read without arguments.
    ParametersRequired { query: String, count: usize },
    /// A condition or result expression failed during maintenance.
    Eval(EvalError),
    /// Two occurrences of a self-joined relation derived the same binding
    /// under `assume_disjoint_verify`.
    SelfJoinViolation(String),
    /// A maintained result differs from batch evaluation.
    InstrumentationMismatch {
        query: String,
        expected: Vec<Tuple>,
        found: Vec<Tuple>,
    },
    Internal(String),
    /// An earlier failure left the store inconsistent.
    Poisoned,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownRelation(name) => write!(f, "unknown relation {}", name),
            Self::UnknownQuery(name) => write!(f, "unknown query {}", name),
            Self::ArityMismatch { name, expected, found } => {
                write!(f, "{} expects {} values, got {}", name, expected, found)
            }
            Self::DerivedRelation(name) => {
                write!(f, "{} is derived and cannot be changed directly", name)
            }
            Self::NotAMap(name) => write!(f, "{} is not a map", name),
            Self::KeyConflict { map, key, existing } => write!(
                f,
                "{}{} already maps to {}",
                map,
                RowDisplay(key),
                existing
            ),
            Self::NotDemandDriven(name) => write!(f, "{} is not demand driven", name),
            Self::NotDemanded { query, params } => {
                write!(f, "{}{} is not demanded", query, RowDisplay(params))
            }
            Self::ParametersRequired { query, count } => {
                write!(f, "{} needs {} arguments", query, count)
            }
            Self::Eval(e) => write!(f, "evaluation failed: {}", e),
            Self::SelfJoinViolation(msg) => write!(f, "{}", msg),
            Self::InstrumentationMismatch { query, expected, found } => write!(
                f,
                "maintained result of {} has {} rows, batch evaluation has {}",
                query,
                found.len(),
                expected.len()
            ),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
            Self::Poisoned => write!(f, "session is poisoned by an earlier failure"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<ExecError> for RuntimeError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Eval(e) => RuntimeError::Eval(e),
            e @ ExecError::Disjoint { .. } => RuntimeError::SelfJoinViolation(e.to_string()),
            ExecError::Internal(msg) => RuntimeError::Internal(msg),
        }
    }
}

/// Counters for one session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Changes applied to the store, base and derived.
    pub changes: u64,
    /// Handler invocations.
    pub handler_runs: u64,
}

/// A running program.
pub struct Session {
    program: Program,
    store: Store,
    /// Outstanding `demand` calls per query and parameter tuple.
    demands: HashMap<(String, Tuple), u64>,
    poisoned: bool,
    stats: SessionStats,
}

impl Session {
    pub fn new(program: Program) -> Self {
        let mut store = Store::new();
        for info in program.catalog() {
            store.declare(info.clone());
        }
        for (rel, mask) in program.indices() {
            store.add_index(rel, mask.clone());
        }
        Self {
            program,
            store,
            demands: HashMap::new(),
            poisoned: false,
            stats: SessionStats::default(),
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.store.get(name)
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Outstanding user demands, sorted.
    pub fn user_demands(&self) -> Vec<(String, Tuple, u64)> {
        let mut out: Vec<_> = self
            .demands
            .iter()
            .map(|((q, p), n)| (q.clone(), p.clone(), *n))
            .collect();
        out.sort();
        out
    }

    // ========================================================================
    // Base relations
    // ========================================================================

    /// Add `row` to a base relation. Returns false if it was already present.
    ///
    /// # Errors
    ///
    /// For maps, fails with [`RuntimeError::KeyConflict`] if the key already
    /// has another value.
    pub fn add(&mut self, rel: &str, row: Tuple) -> Result<bool, RuntimeError> {
        self.check_poisoned()?;
        let info = self.base_info(rel, row.len())?;
        if let RelationKind::Map { key_arity } = info.kind {
            if let Some(existing) = self.map_value(rel, &row[..key_arity]) {
                if Some(&existing) == row.last() {
                    return Ok(false);
                }
                return Err(RuntimeError::KeyConflict {
                    map: rel.to_string(),
                    key: row[..key_arity].to_vec(),
                    existing,
                });
            }
        }
        if self.store.contains(rel, &row) {
            return Ok(false);
        }
        self.user_change(Update::new(rel, UpdateOp::Add, row))?;
        Ok(true)
    }

    /// Remove `row` from a base relation. Returns false if it was absent.
    pub fn remove(&mut self, rel: &str, row: Tuple) -> Result<bool, RuntimeError> {
        self.check_poisoned()?;
        self.base_info(rel, row.len())?;
        if !self.store.contains(rel, &row) {
            return Ok(false);
        }
        self.user_change(Update::new(rel, UpdateOp::Remove, row))?;
        Ok(true)
    }

    /// Set `map(key) = value`, replacing any previous value. Returns false if
    /// the key already had this value.
    pub fn assign(&mut self, map: &str, key: Tuple, value: Value) -> Result<bool, RuntimeError> {
        self.check_poisoned()?;
        let key_arity = self.map_key_arity(map, key.len())?;
        let previous = self.map_value(map, &key[..key_arity]);
        if previous.as_ref() == Some(&value) {
            return Ok(false);
        }
        if let Some(old) = previous {
            let mut row = key.clone();
            row.push(old);
            self.user_change(Update::new(map, UpdateOp::Remove, row))?;
        }
        let mut row = key;
        row.push(value);
        self.user_change(Update::new(map, UpdateOp::Add, row))?;
        Ok(true)
    }

    /// Delete `key` from `map`. Returns false if it had no value.
    pub fn unassign(&mut self, map: &str, key: Tuple) -> Result<bool, RuntimeError> {
        self.check_poisoned()?;
        let key_arity = self.map_key_arity(map, key.len())?;
        let Some(old) = self.map_value(map, &key[..key_arity]) else {
            return Ok(false);
        };
        let mut row = key;
        row.push(old);
        self.user_change(Update::new(map, UpdateOp::Remove, row))?;
        Ok(true)
    }

    fn base_info(&self, rel: &str, arity: usize) -> Result<&RelationInfo, RuntimeError> {
        let Some(info) = self.program.relation(rel) else {
            return Err(match self.program.query(rel) {
                Some(_) => RuntimeError::DerivedRelation(rel.to_string()),
                None => RuntimeError::UnknownRelation(rel.to_string()),
            });
        };
        if !info.origin.is_base() {
            return Err(RuntimeError::DerivedRelation(rel.to_string()));
        }
        if info.arity != arity {
            return Err(RuntimeError::ArityMismatch {
                name: rel.to_string(),
                expected: info.arity,
                found: arity,
            });
        }
        Ok(info)
    }

    fn map_key_arity(&self, map: &str, key_len: usize) -> Result<usize, RuntimeError> {
        let info = self.base_info(map, key_len + 1).map_err(|e| match e {
            RuntimeError::ArityMismatch { name, expected, found } => RuntimeError::ArityMismatch {
                name,
                expected: expected.saturating_sub(1),
                found: found - 1,
            },
            other => other,
        })?;
        match info.kind {
            RelationKind::Map { key_arity } => Ok(key_arity),
            RelationKind::Set => Err(RuntimeError::NotAMap(map.to_string())),
        }
    }

    fn map_value(&self, map: &str, key: &[Value]) -> Option<Value> {
        self.store.get(map)?.map_get(key).cloned()
    }

    // ========================================================================
    // Demand
    // ========================================================================

    fn demand_target(&self, query: &str, params: &[Value]) -> Result<String, RuntimeError> {
        let q = self.compiled(query)?;
        let Some(uset) = &q.demand_set else {
            return Err(RuntimeError::NotDemandDriven(query.to_string()));
        };
        check_arity(query, q.params.len(), params.len())?;
        Ok(uset.clone())
    }

    /// Demand `query` for `params`. Demands nest: each call needs its own
    /// `undemand`.
    pub fn demand(&mut self, query: &str, params: Tuple) -> Result<(), RuntimeError> {
        self.check_poisoned()?;
        let uset = self.demand_target(query, &params)?;
        *self.demands.entry((query.to_string(), params.clone())).or_insert(0) += 1;
        debug!(query, params = %RowDisplay(&params), "demand");
        self.user_change(Update::new(uset, UpdateOp::Add, params))
    }

    /// Release one earlier `demand` of `query` for `params`.
    pub fn undemand(&mut self, query: &str, params: Tuple) -> Result<(), RuntimeError> {
        self.check_poisoned()?;
        let uset = self.demand_target(query, &params)?;
        let key = (query.to_string(), params.clone());
        match self.demands.get(&key).copied().unwrap_or(0) {
            0 => {
                return Err(RuntimeError::NotDemanded {
                    query: query.to_string(),
                    params,
                })
            }
            1 => {
                self.demands.remove(&key);
            }
            n => {
                self.demands.insert(key, n - 1);
            }
        }
        debug!(query, params = %RowDisplay(&params), "undemand");
        self.user_change(Update::new(uset, UpdateOp::Remove, params))
    }

    /// Whether `params` is in the demand set of `query`, from any source.
    pub fn is_demanded(&self, query: &str, params: &[Value]) -> Result<bool, RuntimeError> {
        let uset = self.demand_target(query, params)?;
        Ok(self.store.contains(&uset, params))
    }

    // ========================================================================
    // Reading results
    // ========================================================================

    fn compiled(&self, query: &str) -> Result<&CompiledQuery, RuntimeError> {
        self.program
            .query(query)
            .ok_or_else(|| RuntimeError::UnknownQuery(query.to_string()))
    }

    /// Rows of `query` for `params`, without the parameters, sorted.
    ///
    /// A demand-driven query not yet demanded for `params` is demanded
    /// first, and stays demanded.
    pub fn query(&mut self, query: &str, params: Tuple) -> Result<Vec<Tuple>, RuntimeError> {
        self.check_poisoned()?;
        let q = self.compiled(query)?;
        check_arity(query, q.params.len(), params.len())?;
        match q.impl_mode() {
            ImplMode::Batch => self.evaluate(query, &params),
            ImplMode::Inc => Ok(self.prefix_rows(query, &params)),
            ImplMode::Dem => {
                if !self.is_demanded(query, &params)? {
                    self.demand(query, params.clone())?;
                }
                Ok(self.prefix_rows(query, &params))
            }
        }
    }

    /// Every row of the result relation of `query`, sorted.
    pub fn results(&self, query: &str) -> Result<Vec<Tuple>, RuntimeError> {
        self.check_poisoned()?;
        let q = self.compiled(query)?;
        match &q.result {
            Some(result) => Ok(self.store.get(result).map(Relation::sorted_rows).unwrap_or_default()),
            None if q.params.is_empty() => self.evaluate(query, &[]),
            None => Err(RuntimeError::ParametersRequired {
                query: query.to_string(),
                count: q.params.len(),
            }),
        }
    }

    /// Evaluate `query` from scratch for `params`.
    pub fn evaluate(&self, query: &str, params: &[Value]) -> Result<Vec<Tuple>, RuntimeError> {
        let q = self.compiled(query)?;
        check_arity(query, q.params.len(), params.len())?;
        Ok(Evaluator::new(&self.program, &self.store).evaluate(query, params)?)
    }

    fn prefix_rows(&self, query: &str, params: &[Value]) -> Vec<Tuple> {
        let (Some(q), Some(rel)) = (self.program.query(query), self.store.get(query)) else {
            return Vec::new();
        };
        let n = params.len();
        let mut rows: Vec<Tuple> = if n == 0 {
            rel.iter().cloned().collect()
        } else {
            rel.lookup(&q.param_mask(), params).map(|row| row[n..].to_vec()).collect()
        };
        rows.sort();
        rows
    }

    // ========================================================================
    // Propagation
    // ========================================================================

    fn check_poisoned(&self) -> Result<(), RuntimeError> {
        if self.poisoned {
            Err(RuntimeError::Poisoned)
        } else {
            Ok(())
        }
    }

    fn poison(&mut self, error: RuntimeError) -> RuntimeError {
        warn!(%error, "session poisoned");
        self.poisoned = true;
        error
    }

    /// Apply a change requested by the user, then check instrumented queries.
    fn user_change(&mut self, update: Update) -> Result<(), RuntimeError> {
        if let Err(e) = self.propagate(update) {
            return Err(self.poison(e.into()));
        }
        if let Err(e) = self.instrument() {
            return Err(self.poison(e));
        }
        Ok(())
    }

    fn propagate(&mut self, first: Update) -> Result<(), ExecError> {
        let mut worklist = vec![first];
        while let Some(update) = worklist.pop() {
            let produced = self.apply(&update)?;
            worklist.extend(produced.into_iter().rev());
        }
        Ok(())
    }

    /// Apply one change with its handlers; returns the derived updates.
    ///
    /// # Panics
    ///
    /// Panics if a plain derived relation gains a row it already has or
    /// loses one it does not have, and on reference count underflow.
    fn apply(&mut self, update: &Update) -> Result<Vec<Update>, ExecError> {
        let Update { rel, op, row } = update;
        let relation = self
            .store
            .get(rel)
            .ok_or_else(|| ExecError::Internal(format!("update to unknown relation {}", rel)))?;
        let count = relation.count(row);
        let counted = relation.info().counted;
        if !counted {
            match op {
                UpdateOp::Add if count > 0 => panic!(
                    "duplicate add: {} is already in plain relation {}",
                    RowDisplay(row),
                    rel
                ),
                UpdateOp::Remove if count == 0 => panic!(
                    "remove of absent row: {} is not in plain relation {}",
                    RowDisplay(row),
                    rel
                ),
                _ => {}
            }
        }
        self.stats.changes += 1;
        trace!(%update, count, "apply");

        let transition = match op {
            UpdateOp::Add => count == 0,
            UpdateOp::Remove => count == 1,
        };
        if !transition {
            match op {
                UpdateOp::Add => self.store.incref(rel, row.clone()),
                UpdateOp::Remove => self.store.decref(rel, row),
            };
            return Ok(Vec::new());
        }

        let handlers = self.program.handlers_for(rel);
        let mut out = Vec::new();
        for h in handlers.iter().filter(|h| h.op == *op && h.placement == Placement::Before) {
            self.stats.handler_runs += 1;
            out.extend(run(&h.code, &self.store, row)?);
        }
        match op {
            UpdateOp::Add => self.store.incref(rel, row.clone()),
            UpdateOp::Remove => self.store.decref(rel, row),
        };
        for h in handlers.iter().rev().filter(|h| h.op == *op && h.placement == Placement::After) {
            self.stats.handler_runs += 1;
            out.extend(run(&h.code, &self.store, row)?);
        }
        Ok(out)
    }

    /// Compare every instrumented query with batch evaluation.
    fn instrument(&self) -> Result<(), RuntimeError> {
        for q in self.program.queries() {
            if !q.options.instrument {
                continue;
            }
            let Some(result) = &q.result else {
                continue;
            };
            let mut evaluator = Evaluator::new(&self.program, &self.store);
            let expected = match &q.demand_set {
                None => evaluator.evaluate_all(&q.name)?,
                Some(uset) => {
                    let mut rows = Vec::new();
                    for params in self.store.get(uset).map(Relation::sorted_rows).unwrap_or_default() {
                        for suffix in evaluator.evaluate(&q.name, &params)? {
                            let mut row = params.clone();
                            row.extend(suffix);
                            rows.push(row);
                        }
                    }
                    rows.sort();
                    rows
                }
            };
            let found = self.store.get(result).map(Relation::sorted_rows).unwrap_or_default();
            if found != expected {
                return Err(RuntimeError::InstrumentationMismatch {
                    query: q.name.clone(),
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }
}

fn check_arity(name: &str, expected: usize, found: usize) -> Result<(), RuntimeError> {
    if expected == found {
        Ok(())
    } else {
        Err(RuntimeError::ArityMismatch {
            name: name.to_string(),
            expected,
            found,
        })
    }
}
