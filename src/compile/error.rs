//! Compile-time errors.

use std::fmt;

use crate::config::ConfigError;

/// Why a query (or a whole program) failed to compile.
///
/// Compilation is all-or-nothing per query: no handler of a failing query
/// is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A clause or pattern has no recognized shape.
    MalformedQuery { query: String, message: String },
    /// The planner found no legal next clause.
    UnorderableJoin { query: String, stuck: Vec<String> },
    /// A subquery argument is bound by no earlier clause.
    UngroundedDemandParameter {
        query: String,
        subquery: String,
        param: String,
    },
    UnknownRelation { query: String, name: String },
    ArityMismatch {
        query: String,
        name: String,
        expected: usize,
        found: usize,
    },
    DuplicateDefinition { name: String },
    UnboundResultVar { query: String, var: String },
    /// A parameter of a fully maintained query that no clause enumerates.
    UnconstrainedParameter { query: String, param: String },
    /// `rc = no` on a query whose result may be derived more than once.
    CountingRequired { query: String },
    /// Queries that depend on each other.
    RecursiveQuery { queries: Vec<String> },
    /// A maintained query reads a query that is never maintained.
    UnmaintainedDependency { query: String, dependency: String },
    InvalidOption { query: String, error: ConfigError },
    /// Generated code violated an internal invariant.
    Internal(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedQuery { query, message } => {
                write!(f, "malformed query {}: {}", query, message)
            }
            Self::UnorderableJoin { query, stuck } => write!(
                f,
                "no legal evaluation order in {}; stuck on: {}",
                query,
                stuck.join(", ")
            ),
            Self::UngroundedDemandParameter { query, subquery, param } => write!(
                f,
                "in {}: argument {} of {} is not bound by any earlier clause",
                query, param, subquery
            ),
            Self::UnknownRelation { query, name } => {
                write!(f, "in {}: unknown relation or query {}", query, name)
            }
            Self::ArityMismatch {
                query,
                name,
                expected,
                found,
            } => write!(
                f,
                "in {}: {} expects {} columns, found {}",
                query, name, expected, found
            ),
            Self::DuplicateDefinition { name } => write!(f, "{} is defined more than once", name),
            Self::UnboundResultVar { query, var } => {
                write!(f, "in {}: result variable {} is not bound by any clause", query, var)
            }
            Self::UnconstrainedParameter { query, param } => write!(
                f,
                "in {}: parameter {} is not enumerated by any clause; use impl = dem or impl = batch",
                query, param
            ),
            Self::CountingRequired { query } => write!(
                f,
                "{} can derive a row more than once and needs rc = yes or rc = safe",
                query
            ),
            Self::RecursiveQuery { queries } => {
                write!(f, "recursive query definitions: {}", queries.join(", "))
            }
            Self::UnmaintainedDependency { query, dependency } => write!(
                f,
                "{} is maintained but reads {}, which is evaluated in batch",
                query, dependency
            ),
            Self::InvalidOption { query, error } => write!(f, "in {}: {}", query, error),
            Self::Internal(msg) => write!(f, "internal compiler error: {}", msg),
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidOption { error, .. } => Some(error),
            _ => None,
        }
    }
}
