//! ivmc: an incremental view maintenance compiler
//!
//! Queries are set comprehensions over mutable base relations. The compiler
//! turns each query into maintenance handlers that keep its materialized
//! result current as the base relations change, optionally restricted to the
//! parameter values a client has demanded.

pub mod ast;
pub mod compile;
pub mod config;
pub mod error;
pub mod eval;
pub mod expr;
pub mod ivm;
pub mod lexer;
pub mod parser;
pub mod repl;
pub mod runtime;
pub mod store;
pub mod value;

pub use ast::*;
pub use compile::{CompileError, CompiledQuery, Compiler, Program};
pub use config::{CompileOptions, ImplMode, RcMode};
pub use error::Error;
pub use ivm::SelfJoin;
pub use lexer::lexer;
pub use parser::parser;
pub use runtime::{RuntimeError, Session};
pub use value::{Tuple, Value};

/// Parse source text into an AST
pub fn parse(input: &str) -> Result<File, String> {
    use chumsky::prelude::*;

    let tokens = lexer::lexer()
        .parse(input)
        .map_err(|errs| error::format_lexer_errors(input, errs))?;

    let len = input.chars().count();
    parser::parser()
        .parse(chumsky::Stream::from_iter(len..len + 1, tokens.into_iter()))
        .map_err(|errs| error::format_parser_errors(input, errs))
}

/// Parse and compile source text.
pub fn compile(input: &str, options: CompileOptions) -> Result<Program, Error> {
    let file = parse(input).map_err(Error::Parse)?;
    Ok(Compiler::new(options).compile(&file)?)
}
