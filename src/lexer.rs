//! Lexer for the query language
//!
//! Tokenizes source into a stream for the parser.

use chumsky::prelude::*;
use std::ops::Range;

/// Token types
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Token {
    // Keywords
    Relation,
    Map,
    Query,
    With,
    In,
    Add,
    Remove,
    Set,
    Unset,
    Demand,
    Undemand,
    Show,
    True,
    False,
    And,
    Or,
    Not,

    // Identifiers and literals
    Ident(String),
    Int(String),
    Str(String),

    // Punctuation
    LBrace,     // {
    RBrace,     // }
    LParen,     // (
    RParen,     // )
    Colon,      // :
    Semicolon,  // ;
    Comma,      // ,
    Underscore, // _
    Assign,     // =
    EqEq,       // ==
    NotEq,      // !=
    Le,         // <=
    Ge,         // >=
    Lt,         // <
    Gt,         // >
    Plus,       // +
    Minus,      // -
    Star,       // *
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Relation => write!(f, "relation"),
            Token::Map => write!(f, "map"),
            Token::Query => write!(f, "query"),
            Token::With => write!(f, "with"),
            Token::In => write!(f, "in"),
            Token::Add => write!(f, "add"),
            Token::Remove => write!(f, "remove"),
            Token::Set => write!(f, "set"),
            Token::Unset => write!(f, "unset"),
            Token::Demand => write!(f, "demand"),
            Token::Undemand => write!(f, "undemand"),
            Token::Show => write!(f, "show"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Int(s) => write!(f, "{}", s),
            Token::Str(s) => write!(f, "{:?}", s),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Colon => write!(f, ":"),
            Token::Semicolon => write!(f, ";"),
            Token::Comma => write!(f, ","),
            Token::Underscore => write!(f, "_"),
            Token::Assign => write!(f, "="),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Le => write!(f, "<="),
            Token::Ge => write!(f, ">="),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
        }
    }
}

/// Type alias for spans
pub type Span = Range<usize>;

/// Create a lexer
pub fn lexer() -> impl Parser<char, Vec<(Token, Span)>, Error = Simple<char>> {
    let keyword_or_ident = text::ident().map(|s: String| match s.as_str() {
        "relation" => Token::Relation,
        "map" => Token::Map,
        "query" => Token::Query,
        "with" => Token::With,
        "in" => Token::In,
        "add" => Token::Add,
        "remove" => Token::Remove,
        "set" => Token::Set,
        "unset" => Token::Unset,
        "demand" => Token::Demand,
        "undemand" => Token::Undemand,
        "show" => Token::Show,
        "true" => Token::True,
        "false" => Token::False,
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "_" => Token::Underscore,
        _ => Token::Ident(s),
    });

    let int = text::int(10).map(Token::Int);

    let escape = just('\\').ignore_then(choice((
        just('\\'),
        just('"'),
        just('n').to('\n'),
        just('t').to('\t'),
    )));
    let string = just('"')
        .ignore_then(filter(|c: &char| *c != '\\' && *c != '"').or(escape).repeated())
        .then_ignore(just('"'))
        .collect::<String>()
        .map(Token::Str);

    let punctuation = choice((
        just("==").to(Token::EqEq),
        just("!=").to(Token::NotEq),
        just("<=").to(Token::Le),
        just(">=").to(Token::Ge),
        just('<').to(Token::Lt),
        just('>').to(Token::Gt),
        just('=').to(Token::Assign),
        just('{').to(Token::LBrace),
        just('}').to(Token::RBrace),
        just('(').to(Token::LParen),
        just(')').to(Token::RParen),
        just(':').to(Token::Colon),
        just(';').to(Token::Semicolon),
        just(',').to(Token::Comma),
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('*').to(Token::Star),
    ));

    // Comments: // to end of line (handles both mid-file and end-of-file)
    let line_comment = just("//")
        .then(none_of('\n').repeated())
        .then(just('\n').or_not())
        .ignored();

    // Token OR comment - comments produce None, tokens produce Some
    let token_or_skip = line_comment
        .to(None)
        .or(keyword_or_ident.or(int).or(string).or(punctuation).map(Some));

    token_or_skip
        .map_with_span(|opt_tok, span| opt_tok.map(|tok| (tok, span)))
        .padded()
        .repeated()
        .then_ignore(end())
        .map(|items| items.into_iter().flatten().collect())
}

// Unit tests live in tests/unit_parsing.rs
