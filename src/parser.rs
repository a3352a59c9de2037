//! Parser for the query language
//!
//! Parses token streams into AST.

use chumsky::prelude::*;

use crate::ast::*;
use crate::expr::BinOp;
use crate::lexer::{Span, Token};

/// Create a parser for a complete source file
pub fn parser() -> impl Parser<Token, File, Error = Simple<Token>> + Clone {
    statement()
        .map_with_span(|stmt, span| Spanned::new(stmt, to_span(span)))
        .repeated()
        .then_ignore(end())
        .map(|statements| File { statements })
}

fn to_span(span: Span) -> crate::ast::Span {
    crate::ast::Span::new(span.start, span.end)
}

// ============================================================================
// Helpers
// ============================================================================

fn ident() -> impl Parser<Token, String, Error = Simple<Token>> + Clone {
    select! {
        Token::Ident(s) => s,
    }
}

/// A non-negative count, as in `relation R(2);`
fn count() -> impl Parser<Token, usize, Error = Simple<Token>> + Clone {
    select! {
        Token::Int(s) => s,
    }
    .try_map(|s: String, span| {
        s.parse::<usize>()
            .map_err(|_| Simple::custom(span, format!("expected a count, found {}", s)))
    })
}

/// Parenthesized, comma-separated expressions: `(a, 1, "x")`
fn args() -> impl Parser<Token, Vec<Expr>, Error = Simple<Token>> + Clone {
    expr()
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .delimited_by(just(Token::LParen), just(Token::RParen))
}

// ============================================================================
// Expressions
// ============================================================================

/// Parse an expression.
///
/// Precedence, loosest first: `or`, `and`, `not`, comparisons, `+ -`,
/// `*`, unary minus.
pub fn expr() -> impl Parser<Token, Expr, Error = Simple<Token>> + Clone {
    recursive(|expr| {
        let literal = select! {
            Token::True => Expr::Bool(true),
            Token::False => Expr::Bool(false),
            Token::Str(s) => Expr::Str(s),
            Token::Ident(s) => Expr::Var(s),
            Token::Underscore => Expr::Wildcard,
        };

        let int = select! {
            Token::Int(s) => s,
        }
        .try_map(|s: String, span| {
            s.parse::<i64>()
                .map(Expr::Int)
                .map_err(|_| Simple::custom(span, format!("integer literal {} is out of range", s)))
        });

        let unit = just(Token::LParen)
            .then(just(Token::RParen))
            .to(Expr::Tuple(Vec::new()));

        // `(e)` is grouping; `(e,)` and `(e1, e2)` are tuples
        let paren = expr
            .clone()
            .then(just(Token::Comma).ignore_then(expr.clone()).repeated())
            .then(just(Token::Comma).or_not())
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map(|((first, rest), trailing): ((Expr, Vec<Expr>), Option<Token>)| {
                if rest.is_empty() && trailing.is_none() {
                    first
                } else {
                    let mut items = vec![first];
                    items.extend(rest);
                    Expr::Tuple(items)
                }
            });

        let atom = choice((int, literal, unit, paren)).boxed();

        let neg = just(Token::Minus)
            .repeated()
            .then(atom)
            .foldr(|_, e| Expr::Unary(UnaryOp::Neg, Box::new(e)))
            .boxed();

        let product = neg
            .clone()
            .then(just(Token::Star).to(BinOp::Mul).then(neg).repeated())
            .foldl(|l, (op, r)| Expr::Binary(op, Box::new(l), Box::new(r)))
            .boxed();

        let sum = product
            .clone()
            .then(
                choice((just(Token::Plus).to(BinOp::Add), just(Token::Minus).to(BinOp::Sub)))
                    .then(product)
                    .repeated(),
            )
            .foldl(|l, (op, r)| Expr::Binary(op, Box::new(l), Box::new(r)))
            .boxed();

        let comparison_op = choice((
            just(Token::EqEq).to(BinOp::Eq),
            just(Token::NotEq).to(BinOp::Ne),
            just(Token::Le).to(BinOp::Le),
            just(Token::Ge).to(BinOp::Ge),
            just(Token::Lt).to(BinOp::Lt),
            just(Token::Gt).to(BinOp::Gt),
        ));
        let comparison = sum
            .clone()
            .then(comparison_op.then(sum).or_not())
            .map(|(l, rhs)| match rhs {
                Some((op, r)) => Expr::Binary(op, Box::new(l), Box::new(r)),
                None => l,
            })
            .boxed();

        let not = just(Token::Not)
            .repeated()
            .then(comparison)
            .foldr(|_, e| Expr::Unary(UnaryOp::Not, Box::new(e)))
            .boxed();

        let and = not
            .clone()
            .then(just(Token::And).to(BinOp::And).then(not).repeated())
            .foldl(|l, (op, r)| Expr::Binary(op, Box::new(l), Box::new(r)))
            .boxed();

        and.clone()
            .then(just(Token::Or).to(BinOp::Or).then(and).repeated())
            .foldl(|l, (op, r)| Expr::Binary(op, Box::new(l), Box::new(r)))
    })
}

// ============================================================================
// Queries
// ============================================================================

fn source() -> impl Parser<Token, Source, Error = Simple<Token>> + Clone {
    let singleton = expr()
        .delimited_by(just(Token::LBrace), just(Token::RBrace))
        .map(Source::Singleton);
    let named = ident()
        .then(args().or_not())
        .map(|(name, args)| Source::Named { name, args });
    choice((singleton, named))
}

fn clause() -> impl Parser<Token, Spanned<ClauseExpr>, Error = Simple<Token>> + Clone {
    expr()
        .then(just(Token::In).ignore_then(source()).or_not())
        .map(|(e, source)| match source {
            Some(source) => ClauseExpr::In { pattern: e, source },
            None => ClauseExpr::Cond(e),
        })
        .map_with_span(|c, span| Spanned::new(c, to_span(span)))
}

fn option() -> impl Parser<Token, (String, String), Error = Simple<Token>> + Clone {
    let value = select! {
        Token::Ident(s) => s,
        Token::Int(s) => s,
        Token::True => "true".to_string(),
        Token::False => "false".to_string(),
    };
    ident().then_ignore(just(Token::Assign)).then(value)
}

fn query_decl() -> impl Parser<Token, QueryDecl, Error = Simple<Token>> + Clone {
    let params = ident()
        .separated_by(just(Token::Comma))
        .delimited_by(just(Token::LParen), just(Token::RParen));

    let comprehension = expr()
        .map_with_span(|e, span| Spanned::new(e, to_span(span)))
        .then_ignore(just(Token::Colon))
        .then(clause().separated_by(just(Token::Comma)).allow_trailing())
        .delimited_by(just(Token::LBrace), just(Token::RBrace));

    let options = just(Token::With)
        .ignore_then(option().separated_by(just(Token::Comma)).at_least(1))
        .or_not()
        .map(Option::unwrap_or_default);

    just(Token::Query)
        .ignore_then(ident())
        .then(params.or_not().map(Option::unwrap_or_default))
        .then_ignore(just(Token::Assign))
        .then(comprehension)
        .then(options)
        .map(|(((name, params), (result, clauses)), options)| QueryDecl {
            name,
            params,
            result,
            clauses,
            options,
        })
}

// ============================================================================
// Statements
// ============================================================================

fn statement() -> impl Parser<Token, Statement, Error = Simple<Token>> + Clone {
    let relation = just(Token::Relation)
        .ignore_then(ident())
        .then(count().delimited_by(just(Token::LParen), just(Token::RParen)))
        .map(|(name, arity)| Statement::Relation { name, arity });

    let map = just(Token::Map)
        .ignore_then(ident())
        .then(count().delimited_by(just(Token::LParen), just(Token::RParen)))
        .map(|(name, key_arity)| Statement::Map { name, key_arity });

    let query = query_decl().map(Statement::Query);

    let add = just(Token::Add)
        .ignore_then(ident())
        .then(args())
        .map(|(rel, args)| Statement::Add { rel, args });

    let remove = just(Token::Remove)
        .ignore_then(ident())
        .then(args())
        .map(|(rel, args)| Statement::Remove { rel, args });

    let set = just(Token::Set)
        .ignore_then(ident())
        .then(args())
        .then_ignore(just(Token::Assign))
        .then(expr())
        .map(|((map, keys), value)| Statement::Set { map, keys, value });

    let unset = just(Token::Unset)
        .ignore_then(ident())
        .then(args())
        .map(|(map, keys)| Statement::Unset { map, keys });

    let demand = just(Token::Demand)
        .ignore_then(ident())
        .then(args())
        .map(|(query, args)| Statement::Demand { query, args });

    let undemand = just(Token::Undemand)
        .ignore_then(ident())
        .then(args())
        .map(|(query, args)| Statement::Undemand { query, args });

    let show = just(Token::Show)
        .ignore_then(ident())
        .then(args().or_not())
        .map(|(name, args)| Statement::Show { name, args });

    choice((
        relation, map, query, add, remove, set, unset, demand, undemand, show,
    ))
    .then_ignore(just(Token::Semicolon))
}
