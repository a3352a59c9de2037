//! Comprehension specifications.

use std::fmt;

use crate::expr::{Expr, Var};
use crate::ivm::clause::Clause;
use crate::ivm::join::Join;

/// `{resexp : join}` with external parameters.
///
/// The result relation stores `params ++ components(resexp)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompSpec {
    pub join: Join,
    pub resexp: Expr,
    pub params: Vec<Var>,
}

impl CompSpec {
    pub fn new(join: Join, resexp: Expr, params: Vec<Var>) -> Self {
        Self { join, resexp, params }
    }

    /// Enumerated variables that are not parameters, wildcards included.
    pub fn local_vars(&self) -> Vec<Var> {
        self.join
            .enum_vars()
            .into_iter()
            .filter(|v| !self.params.contains(v))
            .collect()
    }

    /// Whether distinct witnesses always produce distinct result rows, so
    /// the result relation needs no reference counts.
    pub fn is_duplicate_safe(&self) -> bool {
        if !self.resexp.is_injective() {
            return false;
        }
        let mentioned = self.resexp.vars();
        self.local_vars().iter().all(|v| mentioned.contains(v))
    }

    /// Parameters not bound by any membership clause.
    pub fn uncon_params(&self) -> Vec<Var> {
        let constrained = self.join.constrained_vars();
        self.params
            .iter()
            .filter(|p| !constrained.contains(p))
            .cloned()
            .collect()
    }

    /// Result-expression variables the join never binds.
    pub fn unbound_result_vars(&self) -> Vec<Var> {
        let bound = self.join.enum_vars();
        self.resexp
            .vars()
            .into_iter()
            .filter(|v| !bound.contains(v) && !self.params.contains(v))
            .collect()
    }

    /// The same comprehension restricted to parameter tuples in `uset`.
    pub fn with_uset(&self, uset: &str) -> CompSpec {
        let clause = Clause::member(self.params.clone(), uset);
        CompSpec {
            join: self.join.with_clause_first(clause),
            resexp: self.resexp.clone(),
            params: self.params.clone(),
        }
    }

    /// The tuple written to the result relation.
    pub fn output_expr(&self) -> Expr {
        let mut items: Vec<Expr> = self.params.iter().cloned().map(Expr::Var).collect();
        items.extend(self.resexp.components());
        Expr::Tuple(items)
    }

    pub fn result_arity(&self) -> usize {
        self.params.len() + self.resexp.components().len()
    }
}

impl fmt::Display for CompSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{} : {}}}", self.resexp, self.join)?;
        if !self.params.is_empty() {
            write!(f, " with params (")?;
            for (i, p) in self.params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", p)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}
