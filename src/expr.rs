//! Core expressions: variables, constants, tuples and operators.
//!
//! Expressions appear as result expressions of comprehensions, as condition
//! clauses, and as the delta operand of generated maintenance code. They are
//! evaluated against a set of [`Bindings`].

use std::collections::HashMap;
use std::fmt;

use crate::value::Value;

/// A query variable.
///
/// Two kinds of internal names cannot be written in source text: anonymous
/// variables introduced for `_` wildcards, and the delta variable that holds
/// the changed element inside a maintenance function.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(String);

const ANON_PREFIX: &str = "_#";
const DELTA_NAME: &str = "#e";

impl Var {
    pub fn new(name: impl Into<String>) -> Self {
        Var(name.into())
    }

    /// The `n`th anonymous variable of a comprehension.
    pub fn anonymous(n: usize) -> Self {
        Var(format!("{}{}", ANON_PREFIX, n))
    }

    /// The variable bound to the changed element in maintenance code.
    pub fn delta() -> Self {
        Var(DELTA_NAME.to_string())
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.starts_with(ANON_PREFIX)
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anonymous() {
            write!(f, "_")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
        };
        write!(f, "{}", s)
    }
}

/// An expression.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expr {
    Var(Var),
    Const(Value),
    Tuple(Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

/// Errors raised while evaluating an expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvalError {
    /// A variable had no binding.
    Unbound(Var),
    /// An operator was applied to operands of the wrong types.
    TypeMismatch { op: String, left: Value, right: Value },
    /// A condition evaluated to a non-boolean.
    NotBoolean(Value),
    /// Integer arithmetic overflowed.
    Overflow { op: BinOp, left: i64, right: i64 },
    /// A value matched against a pattern had the wrong shape.
    ArityMismatch { expected: usize, value: Value },
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Unbound(v) => write!(f, "unbound variable '{}'", v),
            EvalError::TypeMismatch { op, left, right } => write!(
                f,
                "cannot apply '{}' to {} and {} ({} {} {})",
                op,
                left.type_name(),
                right.type_name(),
                left,
                op,
                right
            ),
            EvalError::NotBoolean(v) => write!(f, "condition evaluated to non-boolean {}", v),
            EvalError::Overflow { op, left, right } => {
                write!(f, "integer overflow in {} {} {}", left, op, right)
            }
            EvalError::ArityMismatch { expected, value } => {
                write!(f, "expected a {}-tuple, found {}", expected, value)
            }
        }
    }
}

impl std::error::Error for EvalError {}

/// A source of variable bindings.
pub trait Bindings {
    fn get(&self, var: &Var) -> Option<&Value>;
}

impl Bindings for HashMap<Var, Value> {
    fn get(&self, var: &Var) -> Option<&Value> {
        HashMap::get(self, var)
    }
}

/// No bindings at all, for constant expressions.
pub struct NoBindings;

impl Bindings for NoBindings {
    fn get(&self, _var: &Var) -> Option<&Value> {
        None
    }
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(Var::new(name))
    }

    pub fn tuple_of(vars: &[Var]) -> Self {
        Expr::Tuple(vars.iter().cloned().map(Expr::Var).collect())
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::Binary(op, Box::new(left), Box::new(right))
    }

    /// Variables in order of first occurrence, without duplicates.
    pub fn vars(&self) -> Vec<Var> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut Vec<Var>) {
        match self {
            Expr::Var(v) => {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            }
            Expr::Const(_) => {}
            Expr::Tuple(items) => items.iter().for_each(|e| e.collect_vars(out)),
            Expr::Not(e) | Expr::Neg(e) => e.collect_vars(out),
            Expr::Binary(_, l, r) => {
                l.collect_vars(out);
                r.collect_vars(out);
            }
        }
    }

    /// Conservative injectivity: variables, constants and tuples of
    /// injective expressions. Any operator may merge distinct inputs.
    pub fn is_injective(&self) -> bool {
        match self {
            Expr::Var(_) | Expr::Const(_) => true,
            Expr::Tuple(items) => items.iter().all(Expr::is_injective),
            Expr::Not(_) | Expr::Neg(_) | Expr::Binary(..) => false,
        }
    }

    /// Top-level components: the items of a tuple, or the expression itself.
    pub fn components(&self) -> Vec<Expr> {
        match self {
            Expr::Tuple(items) => items.clone(),
            other => vec![other.clone()],
        }
    }

    pub fn eval<B: Bindings + ?Sized>(&self, env: &B) -> Result<Value, EvalError> {
        match self {
            Expr::Var(v) => env.get(v).cloned().ok_or_else(|| EvalError::Unbound(v.clone())),
            Expr::Const(c) => Ok(c.clone()),
            Expr::Tuple(items) => items
                .iter()
                .map(|e| e.eval(env))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Tuple),
            Expr::Not(e) => match e.eval(env)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(EvalError::NotBoolean(other)),
            },
            Expr::Neg(e) => match e.eval(env)? {
                Value::Int(n) => n.checked_neg().map(Value::Int).ok_or(EvalError::Overflow {
                    op: BinOp::Sub,
                    left: 0,
                    right: n,
                }),
                other => Err(EvalError::TypeMismatch {
                    op: "-".to_string(),
                    left: Value::Int(0),
                    right: other,
                }),
            },
            Expr::Binary(BinOp::And, l, r) => {
                if as_condition(l.eval(env)?)? {
                    Ok(Value::Bool(as_condition(r.eval(env)?)?))
                } else {
                    Ok(Value::Bool(false))
                }
            }
            Expr::Binary(BinOp::Or, l, r) => {
                if as_condition(l.eval(env)?)? {
                    Ok(Value::Bool(true))
                } else {
                    Ok(Value::Bool(as_condition(r.eval(env)?)?))
                }
            }
            Expr::Binary(op, l, r) => apply_binary(*op, l.eval(env)?, r.eval(env)?),
        }
    }

    /// Evaluate as a condition: the result must be a boolean.
    pub fn eval_condition<B: Bindings + ?Sized>(&self, env: &B) -> Result<bool, EvalError> {
        as_condition(self.eval(env)?)
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary(BinOp::Or, ..) => 1,
            Expr::Binary(BinOp::And, ..) => 2,
            Expr::Not(_) => 3,
            Expr::Binary(BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge, ..) => 4,
            Expr::Binary(BinOp::Add | BinOp::Sub, ..) => 5,
            Expr::Binary(BinOp::Mul, ..) => 6,
            Expr::Neg(_) => 7,
            Expr::Var(_) | Expr::Const(_) | Expr::Tuple(_) => 8,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

fn as_condition(v: Value) -> Result<bool, EvalError> {
    match v {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::NotBoolean(other)),
    }
}

fn apply_binary(op: BinOp, left: Value, right: Value) -> Result<Value, EvalError> {
    match op {
        BinOp::Eq => Ok(Value::Bool(left == right)),
        BinOp::Ne => Ok(Value::Bool(left != right)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            if std::mem::discriminant(&left) != std::mem::discriminant(&right) {
                return Err(EvalError::TypeMismatch {
                    op: op.to_string(),
                    left,
                    right,
                });
            }
            let ord = left.cmp(&right);
            Ok(Value::Bool(match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::Le => ord.is_le(),
                BinOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul => match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => {
                let (a, b) = (*a, *b);
                let result = match op {
                    BinOp::Add => a.checked_add(b),
                    BinOp::Sub => a.checked_sub(b),
                    _ => a.checked_mul(b),
                };
                result.map(Value::Int).ok_or(EvalError::Overflow {
                    op,
                    left: a,
                    right: b,
                })
            }
            (Value::Str(a), Value::Str(b)) if op == BinOp::Add => {
                Ok(Value::Str(format!("{}{}", a, b)))
            }
            _ => Err(EvalError::TypeMismatch {
                op: op.to_string(),
                left,
                right,
            }),
        },
        BinOp::And | BinOp::Or => Ok(Value::Bool(as_condition(left)? && as_condition(right)?)),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(v) => write!(f, "{}", v),
            Expr::Const(c) => write!(f, "{}", c),
            Expr::Tuple(items) => {
                write!(f, "(")?;
                for (i, e) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, ")")
            }
            Expr::Not(e) => {
                write!(f, "not ")?;
                e.fmt_operand(f, 3)
            }
            Expr::Neg(e) => {
                write!(f, "-")?;
                e.fmt_operand(f, 7)
            }
            Expr::Binary(op, l, r) => {
                let p = self.precedence();
                l.fmt_operand(f, p)?;
                write!(f, " {} ", op)?;
                r.fmt_operand(f, p + 1)
            }
        }
    }
}
