//! Maintenance IR.
//!
//! Generated code is a tree: each node binds or tests variables and then
//! runs its body for every satisfying assignment. [`Code::Update`] leaves
//! record a change to a derived relation; they never touch the store
//! directly (see [`crate::ivm::exec`]).

use std::fmt;

use crate::expr::{Expr, Var};
use crate::store::Mask;

/// Direction of a change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpdateOp {
    Add,
    Remove,
}

impl UpdateOp {
    pub const ALL: [UpdateOp; 2] = [UpdateOp::Add, UpdateOp::Remove];

    pub fn name(self) -> &'static str {
        match self {
            UpdateOp::Add => "add",
            UpdateOp::Remove => "remove",
        }
    }
}

impl fmt::Display for UpdateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Code {
    /// Run each item in turn.
    Block(Vec<Code>),
    /// Every row of `rel`, matched against `pattern`.
    Scan {
        rel: String,
        pattern: Vec<Var>,
        body: Box<Code>,
    },
    /// Rows of `rel` whose `mask` positions equal the already bound variables.
    Lookup {
        rel: String,
        mask: Mask,
        pattern: Vec<Var>,
        body: Box<Code>,
    },
    /// Membership test of a fully bound pattern.
    Member {
        rel: String,
        pattern: Vec<Var>,
        body: Box<Code>,
    },
    /// Destructure the tuple `expr` evaluates to.
    Bind {
        pattern: Vec<Var>,
        expr: Expr,
        body: Box<Code>,
    },
    If {
        cond: Expr,
        body: Box<Code>,
    },
    /// Emit `op` of the row `expr` evaluates to on `rel`.
    Update { rel: String, op: UpdateOp, expr: Expr },
    /// Run `branches`, collect the distinct bindings of `vars` they reach,
    /// then run `body` once per binding. With `verify`, a binding reached
    /// by two different branches is an error.
    Union {
        vars: Vec<Var>,
        verify: bool,
        branches: Vec<Code>,
        body: Box<Code>,
    },
    /// Record the current binding in the innermost enclosing `Union`.
    Collect,
}

impl Code {
    pub fn block(items: Vec<Code>) -> Code {
        if items.len() == 1 {
            items.into_iter().next().unwrap_or(Code::Block(Vec::new()))
        } else {
            Code::Block(items)
        }
    }

    /// Every `(relation, mask)` pair looked up through an index.
    pub fn lookups(&self) -> Vec<(String, Mask)> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(code) = stack.pop() {
            match code {
                Code::Block(items) => stack.extend(items.iter()),
                Code::Lookup { rel, mask, body, .. } => {
                    if !out.iter().any(|(r, m)| r == rel && m == mask) {
                        out.push((rel.clone(), mask.clone()));
                    }
                    stack.push(body);
                }
                Code::Scan { body, .. }
                | Code::Member { body, .. }
                | Code::Bind { body, .. }
                | Code::If { body, .. } => stack.push(body),
                Code::Union { branches, body, .. } => {
                    stack.extend(branches.iter());
                    stack.push(body);
                }
                Code::Update { .. } | Code::Collect => {}
            }
        }
        out
    }

    /// Relations the code reads.
    pub fn reads(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut stack = vec![self];
        while let Some(code) = stack.pop() {
            match code {
                Code::Block(items) => stack.extend(items.iter()),
                Code::Scan { rel, body, .. }
                | Code::Lookup { rel, body, .. }
                | Code::Member { rel, body, .. } => {
                    if !out.contains(rel) {
                        out.push(rel.clone());
                    }
                    stack.push(body);
                }
                Code::Bind { body, .. } | Code::If { body, .. } => stack.push(body),
                Code::Union { branches, body, .. } => {
                    stack.extend(branches.iter());
                    stack.push(body);
                }
                Code::Update { .. } | Code::Collect => {}
            }
        }
        out
    }

    fn fmt_at(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "    ".repeat(depth);
        match self {
            Code::Block(items) => {
                if items.is_empty() {
                    writeln!(f, "{}pass", pad)?;
                }
                for item in items {
                    item.fmt_at(f, depth)?;
                }
                Ok(())
            }
            Code::Scan { rel, pattern, body } => {
                writeln!(f, "{}for {} in {}:", pad, PatternDisplay(pattern), rel)?;
                body.fmt_at(f, depth + 1)
            }
            Code::Lookup {
                rel,
                mask,
                pattern,
                body,
            } => {
                writeln!(
                    f,
                    "{}for {} in {}.lookup({}, {}):",
                    pad,
                    PatternDisplay(pattern),
                    rel,
                    mask,
                    PatternDisplay(&mask.bound_vars(pattern).cloned().collect::<Vec<_>>())
                )?;
                body.fmt_at(f, depth + 1)
            }
            Code::Member { rel, pattern, body } => {
                writeln!(f, "{}if {} in {}:", pad, PatternDisplay(pattern), rel)?;
                body.fmt_at(f, depth + 1)
            }
            Code::Bind { pattern, expr, body } => {
                writeln!(f, "{}{} = {}", pad, PatternDisplay(pattern), expr)?;
                body.fmt_at(f, depth)
            }
            Code::If { cond, body } => {
                writeln!(f, "{}if {}:", pad, cond)?;
                body.fmt_at(f, depth + 1)
            }
            Code::Update { rel, op, expr } => writeln!(f, "{}{}.{}({})", pad, rel, op, expr),
            Code::Union {
                vars,
                verify,
                branches,
                body,
            } => {
                let kind = if *verify { "disjoint union" } else { "union" };
                writeln!(f, "{}{} of {}:", pad, kind, PatternDisplay(vars))?;
                for (i, branch) in branches.iter().enumerate() {
                    writeln!(f, "{}    branch {}:", pad, i)?;
                    branch.fmt_at(f, depth + 2)?;
                }
                writeln!(f, "{}for each {}:", pad, PatternDisplay(vars))?;
                body.fmt_at(f, depth + 1)
            }
            Code::Collect => writeln!(f, "{}collect", pad),
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_at(f, 0)
    }
}

/// Display adapter for a variable pattern: `x` or `(x, _)`.
pub struct PatternDisplay<'a>(pub &'a [Var]);

impl fmt::Display for PatternDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            return write!(f, "{}", self.0[0]);
        }
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, ")")
    }
}
