//! Maintenance function synthesis.
//!
//! For a comprehension and one relation it reads, derive the handlers that
//! keep the comprehension's result relation in sync with additions to and
//! removals from that relation.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::compile::CompileError;
use crate::expr::{Expr, Var};
use crate::ivm::code::{Code, UpdateOp};
use crate::ivm::comp::CompSpec;
use crate::ivm::join::Join;
use crate::ivm::order::{order, CostEstimator};

/// How a relation occurring several times in one join is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SelfJoin {
    /// Later occurrences exclude the changed element; handlers run after
    /// an addition and before a removal.
    #[default]
    Sub,
    /// Later occurrences include the changed element; handlers run before
    /// an addition and after a removal.
    Aug,
    /// Occurrence results are unioned and deduplicated by binding.
    Das,
    /// Occurrence results are concatenated without deduplication.
    AssumeDisjoint,
    /// As `AssumeDisjoint`, failing if two occurrences overlap.
    AssumeDisjointVerify,
}

impl SelfJoin {
    pub const ALL: [SelfJoin; 5] = [
        SelfJoin::Sub,
        SelfJoin::Aug,
        SelfJoin::Das,
        SelfJoin::AssumeDisjoint,
        SelfJoin::AssumeDisjointVerify,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SelfJoin::Sub => "sub",
            SelfJoin::Aug => "aug",
            SelfJoin::Das => "das",
            SelfJoin::AssumeDisjoint => "assume_disjoint",
            SelfJoin::AssumeDisjointVerify => "assume_disjoint_verify",
        }
    }

    /// When handlers for `op` run relative to the physical change.
    pub fn placement(self, op: UpdateOp) -> Placement {
        match (self, op) {
            (SelfJoin::Aug, UpdateOp::Add) => Placement::Before,
            (SelfJoin::Aug, UpdateOp::Remove) => Placement::After,
            (_, UpdateOp::Add) => Placement::After,
            (_, UpdateOp::Remove) => Placement::Before,
        }
    }
}

impl fmt::Display for SelfJoin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SelfJoin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SelfJoin::ALL
            .into_iter()
            .find(|sj| sj.name() == s)
            .ok_or_else(|| {
                format!(
                    "expected one of sub, aug, das, assume_disjoint, assume_disjoint_verify, got '{}'",
                    s
                )
            })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Placement {
    Before,
    After,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Before => write!(f, "before"),
            Placement::After => write!(f, "after"),
        }
    }
}

/// A generated handler: runs around `op` on `rel` and emits updates to
/// `target`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaintFn {
    pub target: String,
    pub rel: String,
    pub op: UpdateOp,
    pub placement: Placement,
    pub code: Code,
}

impl fmt::Display for MaintFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {}({}) -> {}:",
            self.placement,
            self.op,
            self.rel,
            self.target
        )?;
        for line in self.code.to_string().lines() {
            writeln!(f, "    {}", line)?;
        }
        Ok(())
    }
}

/// Build the handler for `op` on `rel` maintaining `target = spec`.
pub fn make_maint_fn(
    spec: &CompSpec,
    target: &str,
    rel: &str,
    op: UpdateOp,
    strategy: SelfJoin,
    estimator: Option<&dyn CostEstimator>,
) -> Result<MaintFn, CompileError> {
    let delta = Expr::Var(Var::delta());
    let bound: BTreeSet<Var> = [Var::delta()].into_iter().collect();
    let update = Code::Update {
        rel: target.to_string(),
        op,
        expr: spec.output_expr(),
    };
    let joins = spec.join.maint_joins(rel, &delta, strategy);
    let deduplicate = joins.len() > 1
        && matches!(strategy, SelfJoin::Das | SelfJoin::AssumeDisjointVerify);

    let mut branches = Vec::with_capacity(joins.len());
    for mj in &joins {
        let plan = order(&mj.join, bound.clone(), estimator).map_err(|e| CompileError::UnorderableJoin {
            query: target.to_string(),
            stuck: e.stuck.iter().map(ToString::to_string).collect(),
        })?;
        let leaf = if deduplicate { Code::Collect } else { update.clone() };
        branches.push(Join::get_code(&plan, leaf)?);
    }

    let code = if deduplicate {
        Code::Union {
            vars: spec.join.vars(),
            verify: strategy == SelfJoin::AssumeDisjointVerify,
            branches,
            body: Box::new(update),
        }
    } else {
        Code::block(branches)
    };
    trace!(owner = target, rel, %op, "generated maintenance code");
    Ok(MaintFn {
        target: target.to_string(),
        rel: rel.to_string(),
        op,
        placement: strategy.placement(op),
        code,
    })
}

/// Handlers for both operations on every relation `spec` reads.
pub fn incrementalize(
    spec: &CompSpec,
    target: &str,
    strategy: SelfJoin,
    estimator: Option<&dyn CostEstimator>,
) -> Result<Vec<MaintFn>, CompileError> {
    let mut out = Vec::new();
    for rel in spec.join.rels() {
        for op in UpdateOp::ALL {
            out.push(make_maint_fn(spec, target, &rel, op, strategy, estimator)?);
        }
    }
    Ok(out)
}
