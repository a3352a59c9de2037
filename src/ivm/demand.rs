//! Demand propagation.
//!
//! A demand-driven query is maintained only for parameter tuples in its
//! demand set. Scanning the join left to right, each clause can get
//!
//! - a *filter*: its relation restricted to rows whose inputs appear in
//!   tags of earlier clauses;
//! - *tags*: the demanded values of variables it binds first;
//! - for a clause over a demand-driven subquery, a *demand entry* feeding
//!   the subquery's demand set from the tags of its arguments.
//!
//! Every structure is itself a comprehension, maintained like any other.
//! Filters that no maintenance path would iterate over are pruned, then tags
//! nothing reads, until nothing changes.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use tracing::debug;

use crate::compile::CompileError;
use crate::expr::{Expr, Var};
use crate::ivm::clause::Clause;
use crate::ivm::comp::CompSpec;
use crate::ivm::join::Join;
use crate::ivm::maint::SelfJoin;
use crate::ivm::order::{order, CostEstimator};

pub fn uset_name(query: &str) -> String {
    format!("{}.U", query)
}

pub fn tag_name(query: &str, var: &Var) -> String {
    format!("{}.T_{}", query, var.name())
}

pub fn filter_name(query: &str, clause: usize, rel: &str) -> String {
    format!("{}.F{}_{}", query, clause, rel)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StructureKind {
    Tag { var: Var },
    Filter,
    Demand { subquery: String },
}

/// An auxiliary comprehension of a demand-driven query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Structure {
    pub kind: StructureKind,
    /// Clause of the owning query this structure belongs to.
    pub clause: usize,
    /// Relation the structure writes. For demand entries this is the
    /// subquery's demand set, shared with other consumers.
    pub target: String,
    pub spec: CompSpec,
}

impl Structure {
    /// Whether the target relation keeps reference counts.
    pub fn counted(&self) -> bool {
        match self.kind {
            StructureKind::Demand { .. } => true,
            StructureKind::Tag { .. } | StructureKind::Filter => !self.spec.is_duplicate_safe(),
        }
    }

    fn reads(&self, rel: &str) -> bool {
        self.spec.join.rels().iter().any(|r| r == rel)
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            StructureKind::Tag { .. } => "tag",
            StructureKind::Filter => "filter",
            StructureKind::Demand { .. } => "demand",
        };
        write!(f, "{} {} = {}", kind, self.target, self.spec)
    }
}

/// Result of the demand transformation of one query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DemandPlan {
    /// Surviving structures in dependency order.
    pub structures: Vec<Structure>,
    /// The query's join with selected filters in place of their clauses.
    pub join: Join,
    /// Clauses whose filter replaced them.
    pub selected: BTreeSet<usize>,
}

/// Generate every candidate structure of `query`, whose join is `join`.
///
/// `filters` enables filter generation; clause 0 never gets one.
pub fn generate(query: &str, join: &Join, filters: bool) -> Result<Vec<Structure>, CompileError> {
    let mut tags: IndexMap<Var, String> = IndexMap::new();
    let mut out = Vec::new();

    for (i, clause) in join.clauses.iter().enumerate() {
        let mut filter_rel = None;
        let mut demand_preds = Vec::new();
        match clause {
            Clause::Demand {
                query: subquery,
                params,
                ..
            } => {
                let mut preds = Vec::new();
                for p in params {
                    match tags.get(p) {
                        Some(tag) => {
                            if !preds.iter().any(|c: &Clause| c.lhs_vars() == [p.clone()]) {
                                preds.push(Clause::member(vec![p.clone()], tag.clone()));
                            }
                        }
                        None => {
                            return Err(CompileError::UngroundedDemandParameter {
                                query: query.to_string(),
                                subquery: subquery.clone(),
                                param: p.name().to_string(),
                            })
                        }
                    }
                }
                demand_preds = preds.clone();
                out.push(Structure {
                    kind: StructureKind::Demand {
                        subquery: subquery.clone(),
                    },
                    clause: i,
                    target: uset_name(subquery),
                    spec: CompSpec::new(Join::new(preds), Expr::tuple_of(params), Vec::new()),
                });
            }
            Clause::Member { rel, .. } | Clause::MapMember { rel, .. } if filters && i > 0 => {
                let preds: Vec<Clause> = clause
                    .tagsin_vars()
                    .into_iter()
                    .filter_map(|v| tags.get(&v).map(|tag| Clause::member(vec![v.clone()], tag.clone())))
                    .collect();
                if !preds.is_empty() {
                    let name = filter_name(query, i, rel);
                    let mut clauses = preds;
                    clauses.push(clause.clone());
                    out.push(Structure {
                        kind: StructureKind::Filter,
                        clause: i,
                        target: name.clone(),
                        spec: CompSpec::new(Join::new(clauses), Expr::tuple_of(clause.lhs_vars()), Vec::new()),
                    });
                    filter_rel = Some(name);
                }
            }
            _ => {}
        }

        // Outputs of a subquery are tagged only for the arguments demanded
        // through this clause.
        let source = match (&filter_rel, clause) {
            (Some(rel), _) => vec![clause.rename_rel(rel.clone())],
            (None, Clause::Demand { inner, .. }) => {
                let mut clauses = demand_preds;
                clauses.push((**inner).clone());
                clauses
            }
            (None, _) => vec![clause.clone()],
        };
        for v in clause.tagsout_vars() {
            if v.is_anonymous() || tags.contains_key(&v) {
                continue;
            }
            let name = tag_name(query, &v);
            tags.insert(v.clone(), name.clone());
            out.push(Structure {
                kind: StructureKind::Tag { var: v.clone() },
                clause: i,
                target: name,
                spec: CompSpec::new(Join::new(source.clone()), Expr::Var(v), Vec::new()),
            });
        }
    }
    Ok(out)
}

/// Clauses whose filter some maintenance join would iterate over with an
/// input unbound.
pub fn select_filters(
    query: &str,
    join: &Join,
    structures: &[Structure],
    estimator: Option<&dyn CostEstimator>,
) -> Result<BTreeSet<usize>, CompileError> {
    let filtered: BTreeSet<usize> = structures
        .iter()
        .filter(|s| s.kind == StructureKind::Filter)
        .map(|s| s.clause)
        .collect();
    let delta = Expr::Var(Var::delta());
    let bound: BTreeSet<Var> = [Var::delta()].into_iter().collect();
    let mut selected = BTreeSet::new();
    for rel in join.rels() {
        for mj in join.maint_joins(&rel, &delta, SelfJoin::Das) {
            let plan = order(&mj.join, bound.clone(), estimator).map_err(|e| CompileError::UnorderableJoin {
                query: query.to_string(),
                stuck: e.stuck.iter().map(ToString::to_string).collect(),
            })?;
            for p in plan {
                if p.index != mj.occurrence
                    && filtered.contains(&p.index)
                    && p.clause.needs_filtering(&p.bound_before)
                {
                    selected.insert(p.index);
                }
            }
        }
    }
    Ok(selected)
}

/// Drop unselected filters that no tag reads, then tags that no filter,
/// demand entry or surviving tag reads, to a fixed point.
pub fn prune(structures: Vec<Structure>, selected: &BTreeSet<usize>) -> Vec<Structure> {
    let mut kept = structures;
    loop {
        let before = kept.len();
        let snapshot = kept.clone();
        kept.retain(|s| match s.kind {
            StructureKind::Filter => {
                selected.contains(&s.clause)
                    || snapshot
                        .iter()
                        .any(|t| matches!(t.kind, StructureKind::Tag { .. }) && t.reads(&s.target))
            }
            _ => true,
        });
        let snapshot = kept.clone();
        kept.retain(|s| match s.kind {
            StructureKind::Tag { .. } => snapshot.iter().any(|r| r.target != s.target && r.reads(&s.target)),
            _ => true,
        });
        if kept.len() == before {
            return kept;
        }
    }
}

/// Replace selected clauses by their filters.
pub fn apply(join: &Join, structures: &[Structure], selected: &BTreeSet<usize>) -> Join {
    let clauses = join
        .clauses
        .iter()
        .enumerate()
        .map(|(i, clause)| {
            let filter = structures
                .iter()
                .find(|s| s.kind == StructureKind::Filter && s.clause == i && selected.contains(&i));
            match filter {
                Some(f) => clause.rename_rel(f.target.clone()),
                None => clause.clone(),
            }
        })
        .collect();
    Join::new(clauses)
}

/// Run the whole transformation on `join`.
pub fn transform(
    query: &str,
    join: &Join,
    filters: bool,
    estimator: Option<&dyn CostEstimator>,
) -> Result<DemandPlan, CompileError> {
    let candidates = generate(query, join, filters)?;
    let generated = candidates.len();
    let selected = select_filters(query, join, &candidates, estimator)?;
    let structures = prune(candidates, &selected);
    let join = apply(join, &structures, &selected);
    debug!(
        query,
        generated,
        kept = structures.len(),
        selected = selected.len(),
        "demand structures"
    );
    Ok(DemandPlan {
        structures,
        join,
        selected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinOp;

    fn vars(names: &[&str]) -> Vec<Var> {
        names.iter().map(|n| Var::new(*n)).collect()
    }

    fn celeb_join() -> Join {
        Join::new(vec![
            Clause::member(vars(&["c", "g"]), "Q.U"),
            Clause::member(vars(&["c", "f"]), "Followers"),
            Clause::member(vars(&["g", "f"]), "Members"),
            Clause::MapMember {
                lhs: vars(&["f", "l"]),
                rel: "Loc".into(),
                key_arity: 1,
            },
            Clause::Cond(Expr::binary(BinOp::Eq, Expr::var("l"), Expr::Const("NYC".into()))),
            Clause::MapMember {
                lhs: vars(&["f", "e"]),
                rel: "Email".into(),
                key_arity: 1,
            },
        ])
    }

    fn targets(structures: &[Structure]) -> Vec<&str> {
        structures.iter().map(|s| s.target.as_str()).collect()
    }

    #[test]
    fn test_generate_tags_and_filters() {
        let all = generate("Q", &celeb_join(), true).unwrap();
        assert_eq!(
            targets(&all),
            vec![
                "Q.T_c",
                "Q.T_g",
                "Q.F1_Followers",
                "Q.T_f",
                "Q.F2_Members",
                "Q.F3_Loc",
                "Q.T_l",
                "Q.F5_Email",
                "Q.T_e",
            ]
        );
        let f1 = &all[2];
        assert_eq!(f1.spec.join.clauses[0], Clause::member(vars(&["c"]), "Q.T_c"));
        assert!(!f1.counted());
        // T_c projects g away.
        assert!(all[0].counted());
    }

    #[test]
    fn test_prune_keeps_selected_chain() {
        let plan = transform("Q", &celeb_join(), true, None).unwrap();
        assert_eq!(targets(&plan.structures), vec!["Q.T_c", "Q.F1_Followers"]);
        assert_eq!(plan.join.clauses[1], Clause::member(vars(&["c", "f"]), "Q.F1_Followers"));
        assert_eq!(plan.join.clauses[2], Clause::member(vars(&["g", "f"]), "Members"));
    }

    #[test]
    fn test_filters_off_keeps_only_demand_tags() {
        let plan = transform("Q", &celeb_join(), false, None).unwrap();
        assert!(plan.structures.is_empty());
        assert_eq!(plan.join, celeb_join());
    }

    #[test]
    fn test_demand_entry_for_subquery() {
        let join = Join::new(vec![
            Clause::member(vars(&["a"]), "Near.U"),
            Clause::member(vars(&["a", "m"]), "Edge"),
            Clause::Demand {
                inner: Box::new(Clause::member(vars(&["m", "a", "b"]), "Match")),
                query: "Match".into(),
                params: vars(&["m", "a"]),
            },
        ]);
        let plan = transform("Near", &join, true, None).unwrap();
        assert_eq!(
            targets(&plan.structures),
            vec!["Near.T_a", "Near.F1_Edge", "Near.T_m", "Match.U"]
        );
        let entry = &plan.structures[3];
        assert!(entry.counted());
        assert_eq!(entry.spec.output_expr(), Expr::tuple_of(&vars(&["m", "a"])));
    }

    #[test]
    fn test_subquery_output_tags_follow_argument_tags() {
        let join = Join::new(vec![
            Clause::member(vars(&["a"]), "Q.U"),
            Clause::Demand {
                inner: Box::new(Clause::member(vars(&["a", "b"]), "S")),
                query: "S".into(),
                params: vars(&["a"]),
            },
            Clause::Demand {
                inner: Box::new(Clause::member(vars(&["b", "c"]), "S")),
                query: "S".into(),
                params: vars(&["b"]),
            },
        ]);
        let plan = transform("Q", &join, true, None).unwrap();
        assert_eq!(targets(&plan.structures), vec!["Q.T_a", "S.U", "Q.T_b", "S.U"]);
        let tag = &plan.structures[2];
        assert_eq!(
            tag.spec.join.clauses,
            vec![
                Clause::member(vars(&["a"]), "Q.T_a"),
                Clause::member(vars(&["a", "b"]), "S"),
            ]
        );
        assert!(tag.counted());
    }

    #[test]
    fn test_ungrounded_demand_parameter() {
        let join = Join::new(vec![Clause::Demand {
            inner: Box::new(Clause::member(vars(&["m", "b"]), "S")),
            query: "S".into(),
            params: vars(&["m"]),
        }]);
        let err = generate("Q", &join, true).unwrap_err();
        assert!(matches!(
            err,
            CompileError::UngroundedDemandParameter { ref param, .. } if param == "m"
        ));
    }
}
