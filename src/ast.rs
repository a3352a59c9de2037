//! Abstract syntax tree of the query language.

use std::fmt;

use crate::expr::BinOp;

/// A span in the source code, for error reporting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A node with source location
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// A complete source file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct File {
    pub statements: Vec<Spanned<Statement>>,
}

/// Top-level statements: declarations and commands
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Statement {
    /// `relation Name(arity);`
    Relation { name: String, arity: usize },

    /// `map Name(key_arity);`
    Map { name: String, key_arity: usize },

    /// `query Name(params) = {result : clauses} with options;`
    Query(QueryDecl),

    /// `add Name(args);`
    Add { rel: String, args: Vec<Expr> },

    /// `remove Name(args);`
    Remove { rel: String, args: Vec<Expr> },

    /// `set Name(keys) = value;`
    Set {
        map: String,
        keys: Vec<Expr>,
        value: Expr,
    },

    /// `unset Name(keys);`
    Unset { map: String, keys: Vec<Expr> },

    /// `demand Name(args);`
    Demand { query: String, args: Vec<Expr> },

    /// `undemand Name(args);`
    Undemand { query: String, args: Vec<Expr> },

    /// `show Name;` or `show Name(args);`
    Show { name: String, args: Option<Vec<Expr>> },
}

impl Statement {
    pub fn is_declaration(&self) -> bool {
        matches!(
            self,
            Statement::Relation { .. } | Statement::Map { .. } | Statement::Query(_)
        )
    }

    /// Name a declaration introduces.
    pub fn declared_name(&self) -> Option<&str> {
        match self {
            Statement::Relation { name, .. } | Statement::Map { name, .. } => Some(name),
            Statement::Query(q) => Some(&q.name),
            _ => None,
        }
    }
}

/// A query declaration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryDecl {
    pub name: String,
    pub params: Vec<String>,
    pub result: Spanned<Expr>,
    pub clauses: Vec<Spanned<ClauseExpr>>,
    /// `with name = value, ...` in source order
    pub options: Vec<(String, String)>,
}

/// A clause as written
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClauseExpr {
    /// `pattern in source`
    In { pattern: Expr, source: Source },
    /// A boolean expression
    Cond(Expr),
}

/// What a membership clause ranges over
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    /// A relation or query, optionally applied to arguments: `R`, `Q(a, b)`
    Named { name: String, args: Option<Vec<Expr>> },
    /// A one-element set: `{expr}`
    Singleton(Expr),
}

/// Unary operators
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Surface expressions. Wildcards are only meaningful inside patterns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Var(String),
    Wildcard,
    Int(i64),
    Str(String),
    Bool(bool),
    Tuple(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(v) => write!(f, "{}", v),
            Expr::Wildcard => write!(f, "_"),
            Expr::Int(n) => write!(f, "{}", n),
            Expr::Str(s) => write!(f, "{:?}", s),
            Expr::Bool(b) => write!(f, "{}", b),
            Expr::Tuple(items) => {
                write!(f, "(")?;
                for (i, e) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Expr::Unary(UnaryOp::Not, e) => write!(f, "not ({})", e),
            Expr::Unary(UnaryOp::Neg, e) => write!(f, "-({})", e),
            Expr::Binary(op, l, r) => write!(f, "({} {} {})", l, op, r),
        }
    }
}
