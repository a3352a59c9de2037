//! Greedy evaluation-order planner.
//!
//! Repeatedly picks, among the remaining clauses, the leftmost one with the
//! best [`Rate`] under the variables bound so far. There is no backtracking:
//! one pass, one successor per step.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::expr::Var;
use crate::ivm::clause::Clause;
use crate::ivm::join::Join;

/// Cost class of scheduling a clause next. Lower is better.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rate {
    First,
    ConstantMembership,
    Constant,
    Normal,
    NotPreferred,
    Unrunnable,
}

/// Secondary tie-break between clauses of equal rate.
pub trait CostEstimator {
    /// Estimated number of rows produced by `clause` given `bound`.
    fn estimate(&self, clause: &Clause, bound: &BTreeSet<Var>) -> Option<u64>;
}

/// Estimates from relation sizes: each bound position divides by 16.
#[derive(Clone, Debug, Default)]
pub struct RelationSizes {
    sizes: HashMap<String, u64>,
}

impl RelationSizes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, rel: impl Into<String>, size: u64) {
        self.sizes.insert(rel.into(), size);
    }
}

impl CostEstimator for RelationSizes {
    fn estimate(&self, clause: &Clause, bound: &BTreeSet<Var>) -> Option<u64> {
        let size = *self.sizes.get(clause.rhs_rel()?)?;
        let bound_positions = clause.lhs_vars().iter().filter(|v| bound.contains(*v)).count();
        Some(size.checked_shr(4 * bound_positions as u32).unwrap_or(0))
    }
}

/// A clause in its scheduled position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedClause {
    /// Position of the clause in the join.
    pub index: usize,
    pub clause: Clause,
    /// Variables bound before this clause runs.
    pub bound_before: BTreeSet<Var>,
}

/// No remaining clause can run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnorderableJoin {
    pub stuck: Vec<Clause>,
}

impl fmt::Display for UnorderableJoin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no legal evaluation order for ")?;
        for (i, c) in self.stuck.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl std::error::Error for UnorderableJoin {}

/// Planner state. Each step yields the next clause, or the failure once.
pub struct Planner<'a> {
    remaining: Vec<(usize, &'a Clause)>,
    bound: BTreeSet<Var>,
    estimator: Option<&'a dyn CostEstimator>,
    failed: bool,
}

impl<'a> Planner<'a> {
    pub fn new(join: &'a Join, bound: BTreeSet<Var>) -> Self {
        Self {
            remaining: join.clauses.iter().enumerate().collect(),
            bound,
            estimator: None,
            failed: false,
        }
    }

    pub fn with_estimator(mut self, estimator: &'a dyn CostEstimator) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn bound(&self) -> &BTreeSet<Var> {
        &self.bound
    }

    fn pick(&self) -> Option<usize> {
        let mut best: Option<(usize, Rate, Option<u64>)> = None;
        for (pos, (_, clause)) in self.remaining.iter().enumerate() {
            let rate = clause.rate(&self.bound);
            let cost = match self.estimator {
                Some(est) if rate != Rate::Unrunnable => est.estimate(clause, &self.bound),
                _ => None,
            };
            let better = match &best {
                None => true,
                Some((_, best_rate, best_cost)) => {
                    rate < *best_rate
                        || (rate == *best_rate
                            && matches!((cost, best_cost), (Some(c), Some(b)) if c < *b))
                }
            };
            if better {
                best = Some((pos, rate, cost));
            }
        }
        match best {
            Some((pos, rate, _)) if rate != Rate::Unrunnable => Some(pos),
            _ => None,
        }
    }
}

impl Iterator for Planner<'_> {
    type Item = Result<PlannedClause, UnorderableJoin>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining.is_empty() {
            return None;
        }
        match self.pick() {
            Some(pos) => {
                let (index, clause) = self.remaining.remove(pos);
                let bound_before = self.bound.clone();
                self.bound.extend(clause.enum_vars());
                Some(Ok(PlannedClause {
                    index,
                    clause: clause.clone(),
                    bound_before,
                }))
            }
            None => {
                self.failed = true;
                Some(Err(UnorderableJoin {
                    stuck: self.remaining.iter().map(|(_, c)| (*c).clone()).collect(),
                }))
            }
        }
    }
}

/// Plan `join` with `bound` initially bound.
pub fn order(
    join: &Join,
    bound: BTreeSet<Var>,
    estimator: Option<&dyn CostEstimator>,
) -> Result<Vec<PlannedClause>, UnorderableJoin> {
    let planner = Planner::new(join, bound);
    match estimator {
        Some(est) => planner.with_estimator(est).collect(),
        None => planner.collect(),
    }
}
