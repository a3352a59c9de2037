//! Join clauses.
//!
//! A [`Clause`] is one atomic constraint of a comprehension. Every kind is a
//! variant of one enum; the planner, the code generator and the demand
//! transformation all dispatch on it exhaustively.

use std::collections::BTreeSet;
use std::fmt;

use crate::compile::CompileError;
use crate::expr::{BinOp, Expr, Var};
use crate::ivm::code::{Code, PatternDisplay};
use crate::ivm::order::Rate;
use crate::store::Mask;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Clause {
    /// `(x, y) in R` over a set.
    Member { lhs: Vec<Var>, rel: String },
    /// `(k, v) in M` over a map whose first `key_arity` positions are the key.
    MapMember {
        lhs: Vec<Var>,
        rel: String,
        key_arity: usize,
    },
    /// `(x, y) in {expr}`; `expr` evaluates to a tuple of the pattern's length.
    Singleton { lhs: Vec<Var>, expr: Expr },
    /// A membership clause pre-bound to the element `value` of `rel`.
    Delta {
        lhs: Vec<Var>,
        rel: String,
        value: Expr,
    },
    /// `inner` with the element `value` excluded.
    Without { inner: Box<Clause>, value: Expr },
    /// `inner` with the element `value` included.
    With { inner: Box<Clause>, value: Expr },
    /// Membership in the result of a demand-driven query. `inner` ranges
    /// over the result relation, whose rows start with `params`.
    Demand {
        inner: Box<Clause>,
        query: String,
        params: Vec<Var>,
    },
    /// A boolean condition.
    Cond(Expr),
}

fn unique(vars: impl IntoIterator<Item = Var>) -> Vec<Var> {
    let mut out: Vec<Var> = Vec::new();
    for v in vars {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

impl Clause {
    pub fn member(lhs: Vec<Var>, rel: impl Into<String>) -> Self {
        Clause::Member { lhs, rel: rel.into() }
    }

    /// Left-hand pattern, duplicates and wildcards included.
    pub fn lhs_vars(&self) -> &[Var] {
        match self {
            Clause::Member { lhs, .. }
            | Clause::MapMember { lhs, .. }
            | Clause::Singleton { lhs, .. }
            | Clause::Delta { lhs, .. } => lhs,
            Clause::Without { inner, .. } | Clause::With { inner, .. } | Clause::Demand { inner, .. } => {
                inner.lhs_vars()
            }
            Clause::Cond(_) => &[],
        }
    }

    /// Distinct variables this clause binds.
    pub fn enum_vars(&self) -> Vec<Var> {
        unique(self.lhs_vars().iter().cloned())
    }

    /// Every distinct variable mentioned, including ones only read.
    pub fn vars(&self) -> Vec<Var> {
        let mut all = self.enum_vars();
        match self {
            Clause::Singleton { expr, .. } | Clause::Cond(expr) => all.extend(expr.vars()),
            _ => {}
        }
        all.retain(|v| *v != Var::delta());
        unique(all)
    }

    /// Variables this clause can bind without help from other clauses.
    pub fn constrained_vars(&self) -> Vec<Var> {
        match self {
            Clause::Demand { params, .. } => {
                let mut vars = self.enum_vars();
                vars.retain(|v| !params.contains(v));
                vars
            }
            Clause::Cond(_) => Vec::new(),
            _ => self.enum_vars(),
        }
    }

    /// The relation ranged over, if any.
    pub fn rhs_rel(&self) -> Option<&str> {
        match self {
            Clause::Member { rel, .. } | Clause::MapMember { rel, .. } => Some(rel),
            Clause::Without { inner, .. } | Clause::With { inner, .. } | Clause::Demand { inner, .. } => {
                inner.rhs_rel()
            }
            Clause::Singleton { .. } | Clause::Delta { .. } | Clause::Cond(_) => None,
        }
    }

    pub fn is_membership(&self) -> bool {
        !matches!(self, Clause::Cond(_))
    }

    pub fn rate(&self, bound: &BTreeSet<Var>) -> Rate {
        let all_bound = |vars: &[Var]| vars.iter().all(|v| bound.contains(v));
        match self {
            Clause::Member { lhs, .. } => member_rate(lhs, bound),
            Clause::MapMember { lhs, key_arity, .. } => {
                if all_bound(&lhs[..*key_arity]) {
                    if all_bound(lhs) {
                        Rate::ConstantMembership
                    } else {
                        Rate::Constant
                    }
                } else {
                    member_rate(lhs, bound)
                }
            }
            Clause::Singleton { expr, .. } => {
                if all_bound(&expr.vars()) {
                    Rate::Constant
                } else {
                    Rate::Unrunnable
                }
            }
            Clause::Delta { .. } => Rate::First,
            Clause::Without { inner, .. } | Clause::With { inner, .. } => inner.rate(bound),
            Clause::Demand { inner, params, .. } => {
                if all_bound(params) {
                    inner.rate(bound)
                } else {
                    Rate::Unrunnable
                }
            }
            Clause::Cond(expr) => {
                if all_bound(&expr.vars()) {
                    Rate::Constant
                } else {
                    Rate::Unrunnable
                }
            }
        }
    }

    /// Code running `body` once per satisfying assignment of this clause,
    /// given that `bound` are already bound.
    pub fn get_code(&self, bound: &BTreeSet<Var>, body: Code) -> Result<Code, CompileError> {
        let require = |vars: Vec<Var>| -> Result<(), CompileError> {
            match vars.iter().find(|v| !bound.contains(*v) && **v != Var::delta()) {
                Some(v) => Err(CompileError::Internal(format!(
                    "clause {} scheduled while {} is unbound",
                    self, v
                ))),
                None => Ok(()),
            }
        };
        match self {
            Clause::Member { lhs, rel } | Clause::MapMember { lhs, rel, .. } => {
                let mask = Mask::from_pattern(lhs, bound);
                let pattern = lhs.clone();
                let rel = rel.clone();
                let body = Box::new(body);
                Ok(if mask.is_all_bound() {
                    Code::Member { rel, pattern, body }
                } else if mask.is_all_unbound() {
                    Code::Scan { rel, pattern, body }
                } else {
                    Code::Lookup {
                        rel,
                        mask,
                        pattern,
                        body,
                    }
                })
            }
            Clause::Singleton { lhs, expr } => {
                require(expr.vars())?;
                Ok(Code::Bind {
                    pattern: lhs.clone(),
                    expr: expr.clone(),
                    body: Box::new(body),
                })
            }
            Clause::Delta { lhs, value, .. } => Ok(Code::Bind {
                pattern: lhs.clone(),
                expr: value.clone(),
                body: Box::new(body),
            }),
            Clause::Without { inner, value } => {
                let test = Code::If {
                    cond: Expr::binary(BinOp::Ne, Expr::tuple_of(inner.lhs_vars()), value.clone()),
                    body: Box::new(body),
                };
                inner.get_code(bound, test)
            }
            Clause::With { inner, value } => {
                let existing = inner.get_code(bound, body.clone())?;
                let extra = Code::Bind {
                    pattern: inner.lhs_vars().to_vec(),
                    expr: value.clone(),
                    body: Box::new(body),
                };
                Ok(Code::Block(vec![existing, extra]))
            }
            Clause::Demand { inner, params, .. } => {
                require(params.clone())?;
                inner.get_code(bound, body)
            }
            Clause::Cond(expr) => {
                require(expr.vars())?;
                Ok(Code::If {
                    cond: expr.clone(),
                    body: Box::new(body),
                })
            }
        }
    }

    /// This clause with the element `value` excluded.
    pub fn subtract(&self, value: Expr) -> Clause {
        Clause::Without {
            inner: Box::new(self.clone()),
            value,
        }
    }

    /// This clause with the element `value` included.
    pub fn augment(&self, value: Expr) -> Clause {
        Clause::With {
            inner: Box::new(self.clone()),
            value,
        }
    }

    /// This clause pre-bound to the single element `value`.
    pub fn singletonize(&self, value: Expr) -> Clause {
        Clause::Delta {
            lhs: self.lhs_vars().to_vec(),
            rel: self.rhs_rel().unwrap_or_default().to_string(),
            value,
        }
    }

    /// The same pattern over another relation.
    pub fn rename_rel(&self, rel: impl Into<String>) -> Clause {
        Clause::Member {
            lhs: self.lhs_vars().to_vec(),
            rel: rel.into(),
        }
    }

    /// Variables whose values a filter over this clause can restrict.
    pub fn tagsin_vars(&self) -> Vec<Var> {
        match self {
            Clause::Member { .. } | Clause::MapMember { .. } => self.enum_vars(),
            Clause::Without { inner, .. } | Clause::With { inner, .. } => inner.tagsin_vars(),
            Clause::Demand { params, .. } => unique(params.iter().cloned()),
            Clause::Singleton { .. } | Clause::Delta { .. } | Clause::Cond(_) => Vec::new(),
        }
    }

    /// Variables a tag may be defined over.
    pub fn tagsout_vars(&self) -> Vec<Var> {
        match self {
            Clause::Member { .. } | Clause::MapMember { .. } => self.enum_vars(),
            Clause::Without { inner, .. } | Clause::With { inner, .. } => inner.tagsout_vars(),
            Clause::Demand { inner, params, .. } => {
                unique(inner.lhs_vars().iter().skip(params.len()).cloned())
            }
            Clause::Singleton { .. } | Clause::Delta { .. } | Clause::Cond(_) => Vec::new(),
        }
    }

    /// Whether iterating this clause with `bound` bound would range over
    /// rows outside the demanded frontier.
    pub fn needs_filtering(&self, bound: &BTreeSet<Var>) -> bool {
        match self {
            Clause::MapMember { lhs, key_arity, .. }
                if lhs[..*key_arity].iter().all(|v| bound.contains(v)) =>
            {
                false
            }
            Clause::Member { .. } | Clause::MapMember { .. } => {
                self.tagsin_vars().iter().any(|v| !bound.contains(v))
            }
            Clause::Without { inner, .. } | Clause::With { inner, .. } => inner.needs_filtering(bound),
            Clause::Demand { .. } | Clause::Singleton { .. } | Clause::Delta { .. } | Clause::Cond(_) => false,
        }
    }
}

fn member_rate(lhs: &[Var], bound: &BTreeSet<Var>) -> Rate {
    let bound_count = lhs.iter().filter(|v| bound.contains(*v)).count();
    if bound_count == lhs.len() {
        Rate::ConstantMembership
    } else if bound_count == 0 {
        Rate::NotPreferred
    } else {
        Rate::Normal
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Member { lhs, rel } | Clause::MapMember { lhs, rel, .. } => {
                write!(f, "{} in {}", PatternDisplay(lhs), rel)
            }
            Clause::Singleton { lhs, expr } => match expr {
                Expr::Tuple(items) if lhs.len() == 1 && items.len() == 1 => {
                    write!(f, "{} in {{{}}}", lhs[0], items[0])
                }
                _ => write!(f, "{} in {{{}}}", PatternDisplay(lhs), expr),
            },
            Clause::Delta { lhs, rel, value } => {
                write!(f, "{} in {{{}}} from {}", PatternDisplay(lhs), value, rel)
            }
            Clause::Without { inner, value } => write!(f, "{} - {{{}}}", inner, value),
            Clause::With { inner, value } => write!(f, "{} + {{{}}}", inner, value),
            Clause::Demand { inner, query, params } => {
                let rest = &inner.lhs_vars()[params.len()..];
                write!(f, "{} in {}(", PatternDisplay(rest), query)?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ")")
            }
            Clause::Cond(expr) => write!(f, "{}", expr),
        }
    }
}
