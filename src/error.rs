//! Error reporting
//!
//! Lex and parse errors are rendered with ariadne against the source text.
//! [`Error`] gathers every failure a caller of the crate can see.

use std::fmt;
use std::ops::Range;

use ariadne::{Color, Label, Report, ReportKind, Source};
use chumsky::error::SimpleReason;
use chumsky::prelude::Simple;

use crate::compile::CompileError;
use crate::config::ConfigError;
use crate::lexer::Token;
use crate::runtime::RuntimeError;

/// Any error surfaced by the crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Lex or parse failure, already formatted for display.
    Parse(String),
    Compile(CompileError),
    Runtime(RuntimeError),
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse(msg) => write!(f, "{}", msg),
            Error::Compile(e) => write!(f, "compile error: {}", e),
            Error::Runtime(e) => write!(f, "runtime error: {}", e),
            Error::Config(e) => write!(f, "configuration error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Parse(_) => None,
            Error::Compile(e) => Some(e),
            Error::Runtime(e) => Some(e),
            Error::Config(e) => Some(e),
        }
    }
}

impl From<CompileError> for Error {
    fn from(e: CompileError) -> Self {
        Error::Compile(e)
    }
}

impl From<RuntimeError> for Error {
    fn from(e: RuntimeError) -> Self {
        Error::Runtime(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

fn render(source: &str, span: Range<usize>, title: &str, message: String, output: &mut Vec<u8>) {
    let start = span.start.min(source.len());
    let end = span.end.clamp(start, source.len());
    let report = Report::build(ReportKind::Error, (), start)
        .with_message(title)
        .with_label(Label::new(start..end).with_message(message).with_color(Color::Red))
        .finish();
    if report.write(Source::from(source), &mut *output).is_err() {
        output.extend_from_slice(format!("{}: {}\n", title, start).as_bytes());
    }
}

fn into_string(output: Vec<u8>) -> String {
    String::from_utf8(output).unwrap_or_else(|_| "Error formatting failed".to_string())
}

/// Format lexer errors into a user-friendly string
pub fn format_lexer_errors(source: &str, errors: Vec<Simple<char>>) -> String {
    let mut output = Vec::new();
    for error in errors {
        render(source, error.span(), "Lexical error", format_lexer_error(&error), &mut output);
    }
    into_string(output)
}

fn format_lexer_error(error: &Simple<char>) -> String {
    let found = error
        .found()
        .map(|c| format!("'{}'", c))
        .unwrap_or_else(|| "end of input".to_string());

    if error.expected().next().is_some() {
        format!("Unexpected {}, expected {}", found, format_char_set(error.expected()))
    } else {
        format!("Unexpected character {}", found)
    }
}

/// Format parser errors into a user-friendly string. Spans are character
/// offsets into `source`.
pub fn format_parser_errors(source: &str, errors: Vec<Simple<Token>>) -> String {
    let mut output = Vec::new();
    for error in errors {
        render(source, error.span(), "Parse error", format_parser_error(&error), &mut output);
    }
    into_string(output)
}

fn format_parser_error(error: &Simple<Token>) -> String {
    if let SimpleReason::Custom(msg) = error.reason() {
        return msg.clone();
    }

    let found = error
        .found()
        .map(|t| format!("'{}'", t))
        .unwrap_or_else(|| "end of input".to_string());
    let expected = format_token_set(error.expected());

    if expected.is_empty() {
        return match error.label() {
            Some(label) => label.to_string(),
            None => format!("Unexpected token {}", found),
        };
    }

    // Common slips get a direct message.
    if expected.iter().any(|e| e == "';'") && error.found().is_some_and(starts_statement) {
        return format!("Expected ';' to end the statement, found {}", found);
    }
    if expected.iter().any(|e| e == "'in'") && error.found() == Some(&Token::Assign) {
        return "Use '==' for comparisons; '=' only appears in declarations".to_string();
    }

    format!("Unexpected {}, expected one of: {}", found, expected.join(", "))
}

fn starts_statement(token: &Token) -> bool {
    matches!(
        token,
        Token::Relation
            | Token::Map
            | Token::Query
            | Token::Add
            | Token::Remove
            | Token::Set
            | Token::Unset
            | Token::Demand
            | Token::Undemand
            | Token::Show
    )
}

fn format_token_set<'a>(expected: impl Iterator<Item = &'a Option<Token>>) -> Vec<String> {
    let mut out: Vec<String> = expected
        .filter_map(|opt| opt.as_ref())
        .map(|t| format!("'{}'", t))
        .collect();
    out.sort();
    out.dedup();
    out
}

fn format_char_set<'a>(expected: impl Iterator<Item = &'a Option<char>>) -> String {
    let chars: Vec<String> = expected
        .filter_map(|opt| opt.as_ref())
        .map(|c| format!("'{}'", c))
        .collect();

    match chars.len() {
        0 => "valid character".to_string(),
        1 => chars[0].clone(),
        _ => chars.join(" or "),
    }
}

/// Format an error attached to one statement of `source`.
pub fn format_statement_error(source: &str, span: Range<usize>, message: &str) -> String {
    let mut output = Vec::new();
    render(source, span, "Error", message.to_string(), &mut output);
    into_string(output)
}
