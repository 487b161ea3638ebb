//! Expression parsing with precedence climbing.
//!
//! Precedence, lowest first: assignment, `|>`, `||`, `&&`, equality,
//! comparison, range, additive, multiplicative, unary, postfix.

use super::error::ParseError;
use super::{stmt, Parser};
use crate::ast::*;
use crate::token::Token;
use std::sync::Arc;

/// Parse one expression.
pub fn parse_expression(p: &mut Parser) -> Result<Expr, ParseError> {
    let _guard = p.enter_depth()?;
    p.count_node()?;
    parse_assignment(p)
}

fn parse_assignment(p: &mut Parser) -> Result<Expr, ParseError> {
    let left = parse_pipeline(p)?;
    if p.check(&Token::Equal) {
        p.bump();
        let right = parse_assignment(p)?;
        let span = left.span.to(&right.span);
        return Ok(Expr::new(
            ExprKind::Binary {
                op: BinaryOp::Assign,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        ));
    }
    Ok(left)
}

fn parse_pipeline(p: &mut Parser) -> Result<Expr, ParseError> {
    let mut left = parse_or(p)?;
    while p.check(&Token::PipeGreater) {
        p.bump();
        let right = parse_or(p)?;
        let span = left.span.to(&right.span);
        left = Expr::new(
            ExprKind::Binary {
                op: BinaryOp::Pipeline,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        );
    }
    Ok(left)
}

fn parse_or(p: &mut Parser) -> Result<Expr, ParseError> {
    let mut left = parse_and(p)?;
    while p.check(&Token::PipePipe) {
        p.bump();
        let right = parse_and(p)?;
        let span = left.span.to(&right.span);
        left = binary(BinaryOp::Or, left, right, span);
    }
    Ok(left)
}

fn parse_and(p: &mut Parser) -> Result<Expr, ParseError> {
    let mut left = parse_equality(p)?;
    while p.check(&Token::AmpAmp) {
        p.bump();
        let right = parse_equality(p)?;
        let span = left.span.to(&right.span);
        left = binary(BinaryOp::And, left, right, span);
    }
    Ok(left)
}

fn parse_equality(p: &mut Parser) -> Result<Expr, ParseError> {
    let mut left = parse_comparison(p)?;
    loop {
        let op = match p.current() {
            Token::EqualEqual => BinaryOp::Eq,
            Token::BangEqual => BinaryOp::NotEq,
            _ => break,
        };
        p.bump();
        let right = parse_comparison(p)?;
        let span = left.span.to(&right.span);
        left = binary(op, left, right, span);
    }
    Ok(left)
}

fn parse_comparison(p: &mut Parser) -> Result<Expr, ParseError> {
    let mut left = parse_range(p)?;
    loop {
        let op = match p.current() {
            Token::Less => BinaryOp::Less,
            Token::LessEqual => BinaryOp::LessEq,
            Token::Greater => BinaryOp::Greater,
            Token::GreaterEqual => BinaryOp::GreaterEq,
            _ => break,
        };
        p.bump();
        let right = parse_range(p)?;
        let span = left.span.to(&right.span);
        left = binary(op, left, right, span);
    }
    Ok(left)
}

fn parse_range(p: &mut Parser) -> Result<Expr, ParseError> {
    let start = parse_additive(p)?;
    if p.check(&Token::DotDot) {
        p.bump();
        let end = parse_additive(p)?;
        let span = start.span.to(&end.span);
        return Ok(Expr::new(
            ExprKind::Range {
                start: Box::new(start),
                end: Box::new(end),
            },
            span,
        ));
    }
    Ok(start)
}

fn parse_additive(p: &mut Parser) -> Result<Expr, ParseError> {
    let mut left = parse_multiplicative(p)?;
    loop {
        let op = match p.current() {
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
            _ => break,
        };
        p.bump();
        let right = parse_multiplicative(p)?;
        let span = left.span.to(&right.span);
        left = binary(op, left, right, span);
    }
    Ok(left)
}

fn parse_multiplicative(p: &mut Parser) -> Result<Expr, ParseError> {
    let mut left = parse_unary(p)?;
    loop {
        let op = match p.current() {
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            Token::Percent => BinaryOp::Mod,
            _ => break,
        };
        p.bump();
        let right = parse_unary(p)?;
        let span = left.span.to(&right.span);
        left = binary(op, left, right, span);
    }
    Ok(left)
}

fn parse_unary(p: &mut Parser) -> Result<Expr, ParseError> {
    let _guard = p.enter_depth()?;
    let span = p.current_span();
    let op = match p.current() {
        Token::Minus => Some(UnaryOp::Neg),
        Token::Bang => Some(UnaryOp::Not),
        _ => None,
    };
    if let Some(op) = op {
        p.bump();
        let operand = parse_unary(p)?;
        let full = span.to(&operand.span);
        p.count_node()?;
        return Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            full,
        ));
    }
    parse_postfix(p)
}

fn parse_postfix(p: &mut Parser) -> Result<Expr, ParseError> {
    let mut expr = parse_primary(p)?;
    loop {
        match p.current() {
            Token::LParen => {
                p.expect_open(Token::LParen)?;
                let mut args = Vec::new();
                while !p.check(&Token::RParen) {
                    args.push(parse_expression(p)?);
                    if p.check(&Token::Comma) {
                        p.bump();
                    } else {
                        break;
                    }
                }
                let end = p.expect_close(Token::RParen)?;
                let span = expr.span.to(&end);
                p.count_node()?;
                expr = Expr::new(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    span,
                );
            }
            Token::Dot => {
                p.bump();
                let member = p.expect_identifier()?;
                let span = expr.span.to(&p.prev_span());
                p.count_node()?;
                expr = Expr::new(
                    ExprKind::Member {
                        object: Box::new(expr),
                        member,
                    },
                    span,
                );
            }
            Token::LBracket => {
                p.expect_open(Token::LBracket)?;
                let index = parse_expression(p)?;
                let end = p.expect_close(Token::RBracket)?;
                let span = expr.span.to(&end);
                p.count_node()?;
                expr = Expr::new(
                    ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            }
            _ => break,
        }
    }
    Ok(expr)
}

fn parse_primary(p: &mut Parser) -> Result<Expr, ParseError> {
    let _guard = p.enter_depth()?;
    p.count_node()?;
    let span = p.current_span();

    match p.current().clone() {
        Token::IntLiteral(n) => {
            p.bump();
            Ok(Expr::new(ExprKind::Int(n), span))
        }
        Token::FloatLiteral(n) => {
            p.bump();
            Ok(Expr::new(ExprKind::Float(n), span))
        }
        Token::StringLiteral(s) => {
            p.bump();
            Ok(Expr::new(ExprKind::Str(s), span))
        }
        Token::True => {
            p.bump();
            Ok(Expr::new(ExprKind::Bool(true), span))
        }
        Token::False => {
            p.bump();
            Ok(Expr::new(ExprKind::Bool(false), span))
        }
        Token::Null => {
            p.bump();
            Ok(Expr::new(ExprKind::Null, span))
        }
        Token::Identifier(name) => {
            p.bump();
            if p.struct_literals_allowed()
                && p.check(&Token::LBrace)
                && struct_literal_follows(p)
            {
                parse_struct_literal(p, name)
            } else {
                Ok(Expr::new(ExprKind::Identifier(name), span))
            }
        }
        Token::BlockId(id) => {
            p.bump();
            Ok(Expr::new(ExprKind::BlockRef(id), span))
        }
        Token::LParen => {
            p.expect_open(Token::LParen)?;
            let inner = parse_expression(p)?;
            p.expect_close(Token::RParen)?;
            Ok(inner)
        }
        Token::LBracket => {
            p.expect_open(Token::LBracket)?;
            let mut items = Vec::new();
            while !p.check(&Token::RBracket) {
                items.push(parse_expression(p)?);
                if p.check(&Token::Comma) {
                    p.bump();
                } else {
                    break;
                }
            }
            let end = p.expect_close(Token::RBracket)?;
            Ok(Expr::new(ExprKind::List(items), span.to(&end)))
        }
        Token::LBrace => parse_dict_literal(p),
        Token::Function => parse_lambda(p),
        Token::If => parse_if_expression(p),
        Token::LtLt => parse_inline_code(p),
        _ => Err(p.unexpected(&[
            Token::IntLiteral(0),
            Token::Identifier(String::new()),
            Token::LParen,
        ])),
    }
}

/// After `Name {`, decide whether this is a struct literal.
/// `Name {}` and `Name { field: ... }` are; everything else is not.
fn struct_literal_follows(p: &Parser) -> bool {
    match p.peek() {
        Some(Token::RBrace) => true,
        Some(Token::Identifier(_)) => matches!(p.peek2(), Some(Token::Colon)),
        _ => false,
    }
}

fn parse_struct_literal(p: &mut Parser, name: String) -> Result<Expr, ParseError> {
    let span = p.prev_span();
    p.expect_open(Token::LBrace)?;
    let mut fields = Vec::new();
    while !p.check(&Token::RBrace) {
        let field = p.expect_identifier()?;
        p.expect(Token::Colon)?;
        let value = parse_expression(p)?;
        fields.push((field, value));
        if p.check(&Token::Comma) {
            p.bump();
        } else {
            break;
        }
    }
    let end = p.expect_close(Token::RBrace)?;
    Ok(Expr::new(
        ExprKind::StructLiteral { name, fields },
        span.to(&end),
    ))
}

fn parse_dict_literal(p: &mut Parser) -> Result<Expr, ParseError> {
    let span = p.current_span();
    p.expect_open(Token::LBrace)?;
    let mut entries = Vec::new();
    while !p.check(&Token::RBrace) {
        let key = match p.current().clone() {
            Token::StringLiteral(s) => {
                p.bump();
                DictKey::Str(s)
            }
            Token::Identifier(s) => {
                p.bump();
                DictKey::Identifier(s)
            }
            _ => {
                return Err(p.unexpected(&[
                    Token::StringLiteral(String::new()),
                    Token::Identifier(String::new()),
                ]))
            }
        };
        p.expect(Token::Colon)?;
        let value = parse_expression(p)?;
        entries.push((key, value));
        if p.check(&Token::Comma) {
            p.bump();
        } else {
            break;
        }
    }
    let end = p.expect_close(Token::RBrace)?;
    Ok(Expr::new(ExprKind::Dict(entries), span.to(&end)))
}

fn parse_lambda(p: &mut Parser) -> Result<Expr, ParseError> {
    let span = p.current_span();
    p.expect(Token::Function)?;
    let params = stmt::parse_params(p)?;
    let body = stmt::parse_block(p)?;
    Ok(Expr::new(
        ExprKind::Lambda {
            params,
            body: Arc::new(body),
        },
        span.to(&p.prev_span()),
    ))
}

fn parse_if_expression(p: &mut Parser) -> Result<Expr, ParseError> {
    let span = p.current_span();
    p.expect(Token::If)?;
    let cond = p.without_struct_literals(parse_expression)?;
    let then_branch = Arc::new(stmt::parse_block(p)?);
    let else_branch = if p.check(&Token::Else) {
        p.bump();
        if p.check(&Token::If) {
            let nested = parse_if_expression(p)?;
            let nested_span = nested.span;
            Some(Arc::new(vec![Stmt::new(
                StmtKind::Expr(nested),
                nested_span,
            )]))
        } else {
            Some(Arc::new(stmt::parse_block(p)?))
        }
    } else {
        None
    };
    Ok(Expr::new(
        ExprKind::If {
            cond: Box::new(cond),
            then_branch,
            else_branch,
        },
        span.to(&p.prev_span()),
    ))
}

fn parse_inline_code(p: &mut Parser) -> Result<Expr, ParseError> {
    let span = p.current_span();
    p.expect(Token::LtLt)?;
    let language = p.expect_identifier()?;
    let mut bindings = Vec::new();
    if p.check(&Token::LBracket) {
        p.bump();
        while !p.check(&Token::RBracket) {
            bindings.push(p.expect_identifier()?);
            if p.check(&Token::Comma) {
                p.bump();
            }
        }
        p.expect(Token::RBracket)?;
    }
    let body = match p.current() {
        Token::InlineCode(b) => {
            let b = b.clone();
            p.bump();
            b
        }
        _ => return Err(p.unexpected(&[Token::InlineCode(String::new())])),
    };
    p.expect(Token::GtGt)?;
    Ok(Expr::new(
        ExprKind::InlineCode {
            language,
            bindings,
            body,
        },
        span.to(&p.prev_span()),
    ))
}

fn binary(op: BinaryOp, left: Expr, right: Expr, span: crate::token::Span) -> Expr {
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}
