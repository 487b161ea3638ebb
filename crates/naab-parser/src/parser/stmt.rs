//! Statement and declaration parsing.

use super::error::ParseError;
use super::guards::LoopGuard;
use super::{expr, types, Parser};
use crate::ast::*;
use crate::token::Token;
use std::sync::Arc;

/// Parse one top-level item into the program.
pub fn parse_top_level(p: &mut Parser, program: &mut Program) -> Result<(), ParseError> {
    skip_semicolons(p);
    if p.at_eof() {
        return Ok(());
    }

    match p.current() {
        Token::Import => {
            let decl = parse_import(p)?;
            program.imports.push(decl);
        }
        Token::Export => {
            p.bump();
            match p.current() {
                Token::Function => program.functions.push(parse_function(p, true)?),
                Token::Struct => program.structs.push(parse_struct(p, true)?),
                Token::Enum => program.enums.push(parse_enum(p, true)?),
                Token::Let => program.top_level.push(parse_var_decl(p, true)?),
                _ => {
                    return Err(p.unexpected(&[
                        Token::Function,
                        Token::Struct,
                        Token::Enum,
                        Token::Let,
                    ]))
                }
            }
        }
        Token::Function if matches!(p.peek(), Some(Token::Identifier(_))) => {
            program.functions.push(parse_function(p, false)?);
        }
        Token::Struct => program.structs.push(parse_struct(p, false)?),
        Token::Enum => program.enums.push(parse_enum(p, false)?),
        Token::Main if matches!(p.peek(), Some(Token::LBrace)) => {
            let span = p.current_span();
            if program.main.is_some() {
                return Err(ParseError::invalid_syntax(
                    "duplicate 'main' block",
                    span,
                ));
            }
            p.bump();
            let body = parse_block(p)?;
            program.main = Some(Arc::new(body));
        }
        _ => program.top_level.push(parse_statement(p)?),
    }
    Ok(())
}

/// Parse a single statement.
pub fn parse_statement(p: &mut Parser) -> Result<Stmt, ParseError> {
    let _guard = p.enter_depth()?;
    p.count_node()?;
    let span = p.current_span();

    match p.current() {
        Token::Let => parse_var_decl(p, false),
        Token::If => parse_if(p),
        Token::While => {
            p.bump();
            let cond = p.without_struct_literals(expr::parse_expression)?;
            let body = parse_block(p)?;
            Ok(Stmt::new(StmtKind::While { cond, body }, span.to(&p.prev_span())))
        }
        Token::For => {
            p.bump();
            let var = p.expect_identifier()?;
            p.expect(Token::In)?;
            let iterable = p.without_struct_literals(expr::parse_expression)?;
            let body = parse_block(p)?;
            Ok(Stmt::new(
                StmtKind::For {
                    var,
                    iterable,
                    body,
                },
                span.to(&p.prev_span()),
            ))
        }
        Token::Break => {
            p.bump();
            maybe_semicolon(p);
            Ok(Stmt::new(StmtKind::Break, span))
        }
        Token::Continue => {
            p.bump();
            maybe_semicolon(p);
            Ok(Stmt::new(StmtKind::Continue, span))
        }
        Token::Return => {
            p.bump();
            let value = if statement_ends_here(p) {
                None
            } else {
                Some(expr::parse_expression(p)?)
            };
            maybe_semicolon(p);
            Ok(Stmt::new(StmtKind::Return(value), span.to(&p.prev_span())))
        }
        Token::Try => parse_try(p),
        Token::Throw => {
            p.bump();
            let value = expr::parse_expression(p)?;
            maybe_semicolon(p);
            Ok(Stmt::new(StmtKind::Throw(value), span.to(&p.prev_span())))
        }
        Token::LBrace => {
            let body = parse_block(p)?;
            Ok(Stmt::new(StmtKind::Compound(body), span.to(&p.prev_span())))
        }
        _ => {
            let e = expr::parse_expression(p)?;
            maybe_semicolon(p);
            Ok(Stmt::new(StmtKind::Expr(e), span.to(&p.prev_span())))
        }
    }
}

/// Parse a `{ ... }` statement list.
pub fn parse_block(p: &mut Parser) -> Result<Vec<Stmt>, ParseError> {
    p.expect_open(Token::LBrace)?;
    let mut stmts = Vec::new();
    let mut guard = LoopGuard::new("block");
    while !p.check(&Token::RBrace) && !p.at_eof() {
        guard.check(p.current_span())?;
        skip_semicolons(p);
        if p.check(&Token::RBrace) || p.at_eof() {
            break;
        }
        stmts.push(parse_statement(p)?);
    }
    p.expect_close(Token::RBrace)?;
    Ok(stmts)
}

fn parse_var_decl(p: &mut Parser, exported: bool) -> Result<Stmt, ParseError> {
    let span = p.current_span();
    p.expect(Token::Let)?;
    let name = p.expect_identifier()?;
    let ty = if p.check(&Token::Colon) {
        p.bump();
        Some(types::parse_type(p)?)
    } else {
        None
    };
    p.expect(Token::Equal)?;
    let init = expr::parse_expression(p)?;
    maybe_semicolon(p);
    Ok(Stmt::new(
        StmtKind::VarDecl {
            name,
            ty,
            init,
            exported,
        },
        span.to(&p.prev_span()),
    ))
}

fn parse_if(p: &mut Parser) -> Result<Stmt, ParseError> {
    let span = p.current_span();
    p.expect(Token::If)?;
    let cond = p.without_struct_literals(expr::parse_expression)?;
    let then_branch = parse_block(p)?;
    let else_branch = if p.check(&Token::Else) {
        p.bump();
        if p.check(&Token::If) {
            // `else if`: nest a single If statement
            Some(vec![parse_if(p)?])
        } else {
            Some(parse_block(p)?)
        }
    } else {
        None
    };
    Ok(Stmt::new(
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        },
        span.to(&p.prev_span()),
    ))
}

fn parse_try(p: &mut Parser) -> Result<Stmt, ParseError> {
    let span = p.current_span();
    p.expect(Token::Try)?;
    let body = parse_block(p)?;
    p.expect(Token::Catch)?;
    p.expect(Token::LParen)?;
    let catch_name = p.expect_identifier()?;
    p.expect(Token::RParen)?;
    let catch_body = parse_block(p)?;
    let finally_body = if p.check(&Token::Finally) {
        p.bump();
        Some(parse_block(p)?)
    } else {
        None
    };
    Ok(Stmt::new(
        StmtKind::Try {
            body,
            catch_name,
            catch_body,
            finally_body,
        },
        span.to(&p.prev_span()),
    ))
}

fn parse_import(p: &mut Parser) -> Result<ImportDecl, ParseError> {
    let span = p.current_span();
    p.expect(Token::Import)?;

    let items = if p.check(&Token::Star) {
        p.bump();
        p.expect(Token::As)?;
        ImportItems::Star(p.expect_identifier()?)
    } else {
        p.expect_open(Token::LBrace)?;
        let mut names = Vec::new();
        while !p.check(&Token::RBrace) {
            let name = p.expect_identifier()?;
            let alias = if p.check(&Token::As) {
                p.bump();
                Some(p.expect_identifier()?)
            } else {
                None
            };
            names.push((name, alias));
            if p.check(&Token::Comma) {
                p.bump();
            } else {
                break;
            }
        }
        p.expect_close(Token::RBrace)?;
        ImportItems::Named(names)
    };

    p.expect(Token::From)?;
    let source = match p.current() {
        Token::StringLiteral(s) => {
            let s = s.clone();
            p.bump();
            s
        }
        _ => return Err(p.unexpected(&[Token::StringLiteral(String::new())])),
    };
    maybe_semicolon(p);
    Ok(ImportDecl {
        items,
        source,
        span: span.to(&p.prev_span()),
    })
}

fn parse_function(p: &mut Parser, exported: bool) -> Result<FunctionDecl, ParseError> {
    let span = p.current_span();
    p.expect(Token::Function)?;
    let name = p.expect_identifier()?;
    let params = parse_params(p)?;
    let return_type = if p.check(&Token::Arrow) {
        p.bump();
        Some(types::parse_type(p)?)
    } else {
        None
    };
    let body = parse_block(p)?;
    Ok(FunctionDecl {
        name,
        params,
        return_type,
        body: Arc::new(body),
        exported,
        span: span.to(&p.prev_span()),
    })
}

/// Parse a parenthesized parameter list, shared with lambdas.
pub fn parse_params(p: &mut Parser) -> Result<Vec<Param>, ParseError> {
    p.expect_open(Token::LParen)?;
    let mut params = Vec::new();
    while !p.check(&Token::RParen) {
        let name = p.expect_identifier()?;
        let ty = if p.check(&Token::Colon) {
            p.bump();
            Some(types::parse_type(p)?)
        } else {
            None
        };
        let default = if p.check(&Token::Equal) {
            p.bump();
            Some(expr::parse_expression(p)?)
        } else {
            None
        };
        params.push(Param { name, ty, default });
        if p.check(&Token::Comma) {
            p.bump();
        } else {
            break;
        }
    }
    p.expect_close(Token::RParen)?;
    Ok(params)
}

fn parse_struct(p: &mut Parser, exported: bool) -> Result<StructDecl, ParseError> {
    let span = p.current_span();
    p.expect(Token::Struct)?;
    let name = p.expect_identifier()?;
    p.expect_open(Token::LBrace)?;
    let mut fields = Vec::new();
    while !p.check(&Token::RBrace) {
        let field_name = p.expect_identifier()?;
        p.expect(Token::Colon)?;
        let ty = types::parse_type(p)?;
        let default = if p.check(&Token::Equal) {
            p.bump();
            Some(expr::parse_expression(p)?)
        } else {
            None
        };
        fields.push(FieldDecl {
            name: field_name,
            ty,
            default,
        });
        if p.check(&Token::Comma) {
            p.bump();
        } else {
            break;
        }
    }
    p.expect_close(Token::RBrace)?;
    Ok(StructDecl {
        name,
        fields,
        exported,
        span: span.to(&p.prev_span()),
    })
}

fn parse_enum(p: &mut Parser, exported: bool) -> Result<EnumDecl, ParseError> {
    let span = p.current_span();
    p.expect(Token::Enum)?;
    let name = p.expect_identifier()?;
    p.expect_open(Token::LBrace)?;
    let mut variants = Vec::new();
    while !p.check(&Token::RBrace) {
        variants.push(p.expect_identifier()?);
        if p.check(&Token::Comma) {
            p.bump();
        } else {
            break;
        }
    }
    p.expect_close(Token::RBrace)?;
    Ok(EnumDecl {
        name,
        variants,
        exported,
        span: span.to(&p.prev_span()),
    })
}

fn statement_ends_here(p: &Parser) -> bool {
    matches!(
        p.current(),
        Token::Semicolon | Token::RBrace | Token::Eof
    )
}

fn maybe_semicolon(p: &mut Parser) {
    if p.check(&Token::Semicolon) {
        p.bump();
    }
}

fn skip_semicolons(p: &mut Parser) {
    while p.check(&Token::Semicolon) {
        p.bump();
    }
}
