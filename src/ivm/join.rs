//! Joins: unordered conjunctions of clauses.

use std::fmt;

use crate::compile::CompileError;
use crate::expr::{Expr, Var};
use crate::ivm::clause::Clause;
use crate::ivm::code::Code;
use crate::ivm::maint::SelfJoin;
use crate::ivm::order::PlannedClause;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Join {
    pub clauses: Vec<Clause>,
}

/// The join computing the combinations affected by one change to one
/// occurrence of a relation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaintJoin {
    pub join: Join,
    /// Index of the singletonized clause.
    pub occurrence: usize,
}

fn push_unique(out: &mut Vec<Var>, vars: impl IntoIterator<Item = Var>) {
    for v in vars {
        if !out.contains(&v) {
            out.push(v);
        }
    }
}

impl Join {
    pub fn new(clauses: Vec<Clause>) -> Self {
        Self { clauses }
    }

    /// All variables, in order of first occurrence.
    pub fn vars(&self) -> Vec<Var> {
        let mut out = Vec::new();
        for c in &self.clauses {
            push_unique(&mut out, c.vars());
        }
        out
    }

    /// Variables bound by some membership clause.
    pub fn enum_vars(&self) -> Vec<Var> {
        let mut out = Vec::new();
        for c in &self.clauses {
            push_unique(&mut out, c.enum_vars());
        }
        out
    }

    pub fn constrained_vars(&self) -> Vec<Var> {
        let mut out = Vec::new();
        for c in &self.clauses {
            push_unique(&mut out, c.constrained_vars());
        }
        out
    }

    /// Relations ranged over, in order of first occurrence.
    pub fn rels(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for c in &self.clauses {
            if let Some(rel) = c.rhs_rel() {
                if !out.iter().any(|r| r == rel) {
                    out.push(rel.to_string());
                }
            }
        }
        out
    }

    /// Indices of the clauses ranging over `rel`.
    pub fn occurrences(&self, rel: &str) -> Vec<usize> {
        self.clauses
            .iter()
            .enumerate()
            .filter(|(_, c)| c.rhs_rel() == Some(rel))
            .map(|(i, _)| i)
            .collect()
    }

    /// One maintenance join per occurrence of `rel`.
    ///
    /// The occurrence itself is bound to `value`. Occurrences after it are
    /// subtracted or augmented according to `strategy`; earlier ones are
    /// left as they are, so each witness is attributed to exactly one
    /// occurrence.
    pub fn maint_joins(&self, rel: &str, value: &Expr, strategy: SelfJoin) -> Vec<MaintJoin> {
        let occurrences = self.occurrences(rel);
        occurrences
            .iter()
            .map(|&i| {
                let clauses = self
                    .clauses
                    .iter()
                    .enumerate()
                    .map(|(j, c)| {
                        if j == i {
                            c.singletonize(value.clone())
                        } else if j > i && occurrences.contains(&j) {
                            match strategy {
                                SelfJoin::Sub => c.subtract(value.clone()),
                                SelfJoin::Aug => c.augment(value.clone()),
                                SelfJoin::Das | SelfJoin::AssumeDisjoint | SelfJoin::AssumeDisjointVerify => {
                                    c.clone()
                                }
                            }
                        } else {
                            c.clone()
                        }
                    })
                    .collect();
                MaintJoin {
                    join: Join::new(clauses),
                    occurrence: i,
                }
            })
            .collect()
    }

    /// Nest the code of `plan` around `body`.
    pub fn get_code(plan: &[PlannedClause], body: Code) -> Result<Code, CompileError> {
        plan.iter()
            .rev()
            .try_fold(body, |inner, p| p.clause.get_code(&p.bound_before, inner))
    }

    pub fn with_clause_first(&self, clause: Clause) -> Join {
        let mut clauses = Vec::with_capacity(self.clauses.len() + 1);
        clauses.push(clause);
        clauses.extend(self.clauses.iter().cloned());
        Join::new(clauses)
    }
}

impl fmt::Display for Join {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.clauses.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(names: &[&str]) -> Vec<Var> {
        names.iter().map(|n| Var::new(*n)).collect()
    }

    fn triangle() -> Join {
        Join::new(vec![
            Clause::member(vars(&["a", "b"]), "E"),
            Clause::member(vars(&["b", "c"]), "E"),
            Clause::member(vars(&["c", "a"]), "E"),
        ])
    }

    #[test]
    fn test_vars_and_rels() {
        let join = triangle();
        assert_eq!(join.vars(), vars(&["a", "b", "c"]));
        assert_eq!(join.rels(), vec!["E".to_string()]);
        assert_eq!(join.occurrences("E"), vec![0, 1, 2]);
    }

    #[test]
    fn test_subtracts_only_later_occurrences() {
        let e = Expr::Var(Var::delta());
        let mjs = triangle().maint_joins("E", &e, SelfJoin::Sub);
        assert_eq!(mjs.len(), 3);
        let second = &mjs[1].join.clauses;
        assert!(matches!(second[0], Clause::Member { .. }));
        assert!(matches!(second[1], Clause::Delta { .. }));
        assert!(matches!(second[2], Clause::Without { .. }));
    }

    #[test]
    fn test_augments_later_occurrences() {
        let e = Expr::Var(Var::delta());
        let mjs = triangle().maint_joins("E", &e, SelfJoin::Aug);
        assert!(matches!(mjs[0].join.clauses[2], Clause::With { .. }));
        assert!(matches!(mjs[2].join.clauses[0], Clause::Member { .. }));
    }

    #[test]
    fn test_das_leaves_occurrences_unchanged() {
        let e = Expr::Var(Var::delta());
        let mjs = triangle().maint_joins("E", &e, SelfJoin::Das);
        assert!(matches!(mjs[0].join.clauses[1], Clause::Member { .. }));
    }
}
