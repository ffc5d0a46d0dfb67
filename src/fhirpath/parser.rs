// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::ast::{BinaryOp, Expr, Literal};
use crate::lexer::{Source, TokenKind, Tokens};

use anyhow::Result;

/// Parse a complete expression.
pub fn parse(text: &str) -> Result<Expr> {
    let source = Source::from_contents("<expression>".to_string(), text.to_string())?;
    let mut tokens = Tokens::new(&source)?;
    let expr = parse_tokens(&mut tokens)?;
    if !tokens.done() {
        return Err(tokens.error("unexpected token after expression"));
    }
    Ok(expr)
}

/// Parse an expression from the front of a token stream. Parsing stops at the first
/// token that cannot continue the expression, which is left unconsumed.
pub fn parse_tokens(tokens: &mut Tokens) -> Result<Expr> {
    parse_or(tokens)
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn parse_or(tokens: &mut Tokens) -> Result<Expr> {
    let mut left = parse_and(tokens)?;
    loop {
        let op = match tokens.current_text() {
            "or" => BinaryOp::Or,
            "xor" => BinaryOp::Xor,
            _ => return Ok(left),
        };
        tokens.take()?;
        let right = parse_and(tokens)?;
        left = binary(op, left, right);
    }
}

fn parse_and(tokens: &mut Tokens) -> Result<Expr> {
    let mut left = parse_equality(tokens)?;
    while tokens.has_token("and") {
        tokens.take()?;
        let right = parse_equality(tokens)?;
        left = binary(BinaryOp::And, left, right);
    }
    Ok(left)
}

fn parse_equality(tokens: &mut Tokens) -> Result<Expr> {
    let mut left = parse_comparison(tokens)?;
    loop {
        let op = match tokens.current_text() {
            "=" => BinaryOp::Equals,
            "!=" => BinaryOp::NotEquals,
            "~" => BinaryOp::Equivalent,
            _ => return Ok(left),
        };
        tokens.take()?;
        let right = parse_comparison(tokens)?;
        left = binary(op, left, right);
    }
}

fn parse_comparison(tokens: &mut Tokens) -> Result<Expr> {
    let mut left = parse_union(tokens)?;
    loop {
        let op = match tokens.current_text() {
            "<" => BinaryOp::LessThan,
            "<=" => BinaryOp::LessOrEqual,
            ">" => BinaryOp::GreaterThan,
            ">=" => BinaryOp::GreaterOrEqual,
            _ => return Ok(left),
        };
        tokens.take()?;
        let right = parse_union(tokens)?;
        left = binary(op, left, right);
    }
}

fn parse_union(tokens: &mut Tokens) -> Result<Expr> {
    let mut left = parse_additive(tokens)?;
    while tokens.has_token("|") {
        tokens.take()?;
        let right = parse_additive(tokens)?;
        left = binary(BinaryOp::Union, left, right);
    }
    Ok(left)
}

fn parse_additive(tokens: &mut Tokens) -> Result<Expr> {
    let mut left = parse_invocation(tokens)?;
    loop {
        let op = match tokens.current_text() {
            "+" => BinaryOp::Plus,
            "-" => BinaryOp::Minus,
            "&" => BinaryOp::Concatenate,
            _ => return Ok(left),
        };
        tokens.take()?;
        let right = parse_invocation(tokens)?;
        left = binary(op, left, right);
    }
}

fn parse_args(tokens: &mut Tokens) -> Result<Vec<Expr>> {
    tokens.expect("(", "to start arguments")?;
    let mut args = vec![];
    if !tokens.has_token(")") {
        loop {
            args.push(parse_or(tokens)?);
            if !tokens.skip_token(",")? {
                break;
            }
        }
    }
    tokens.expect(")", "to close arguments")?;
    Ok(args)
}

fn parse_invocation(tokens: &mut Tokens) -> Result<Expr> {
    let mut expr = parse_term(tokens)?;
    loop {
        if tokens.skip_token(".")? {
            let name = tokens.take_ident("after `.`")?;
            expr = if tokens.has_token("(") {
                Expr::Function {
                    target: Some(Box::new(expr)),
                    name,
                    args: parse_args(tokens)?,
                }
            } else {
                Expr::Member {
                    target: Box::new(expr),
                    name,
                }
            };
        } else if tokens.skip_token("[")? {
            let index = parse_or(tokens)?;
            tokens.expect("]", "to close index")?;
            expr = Expr::Index {
                target: Box::new(expr),
                index: Box::new(index),
            };
        } else {
            return Ok(expr);
        }
    }
}

fn parse_term(tokens: &mut Tokens) -> Result<Expr> {
    let kind = tokens.current().0;
    match (kind, tokens.current_text()) {
        (TokenKind::String, _) => Ok(Expr::Literal(Literal::String(tokens.take_text()?))),
        (TokenKind::Number, _) => Ok(Expr::Literal(Literal::Number(tokens.take_text()?))),
        (TokenKind::Symbol, "-") => {
            tokens.take()?;
            if tokens.current().0 != TokenKind::Number {
                return Err(tokens.error("expecting number after `-`"));
            }
            Ok(Expr::Literal(Literal::Number(format!(
                "-{}",
                tokens.take_text()?
            ))))
        }
        (TokenKind::Symbol, "(") => {
            tokens.take()?;
            let inner = parse_or(tokens)?;
            tokens.expect(")", "to close group")?;
            Ok(Expr::Group(Box::new(inner)))
        }
        (TokenKind::Symbol, "%") => {
            tokens.take()?;
            Ok(Expr::Variable(tokens.take_text()?))
        }
        (TokenKind::Symbol, "$") => {
            tokens.take()?;
            match tokens.take_ident("after `$`")?.as_str() {
                "this" => Ok(Expr::This),
                other => Err(tokens.error(&format!("unsupported special variable ${other}"))),
            }
        }
        (TokenKind::Ident, "true") => {
            tokens.take()?;
            Ok(Expr::Literal(Literal::Boolean(true)))
        }
        (TokenKind::Ident, "false") => {
            tokens.take()?;
            Ok(Expr::Literal(Literal::Boolean(false)))
        }
        (TokenKind::Ident, _) => {
            let name = tokens.take_text()?;
            if tokens.has_token("(") {
                Ok(Expr::Function {
                    target: None,
                    name,
                    args: parse_args(tokens)?,
                })
            } else {
                Ok(Expr::Identifier(name))
            }
        }
        _ => Err(tokens.error("expecting expression")),
    }
}
