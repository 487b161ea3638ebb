//! Type-expression parsing.
//!
//! The type language is small: base names, `array<T>` / `dict<K,V>` /
//! user generics, nullable `?T`, unions `A|B`, and qualified `mod::T`.
//! In type position a `>>` token is split into two `>` so nested
//! generics close correctly.

use super::error::ParseError;
use super::Parser;
use crate::ast::TypeExpr;
use crate::token::Token;

/// Parse a full type, including unions.
pub fn parse_type(p: &mut Parser) -> Result<TypeExpr, ParseError> {
    let _guard = p.enter_depth()?;
    let first = parse_type_atom(p)?;
    if p.check(&Token::Pipe) {
        let mut parts = vec![first];
        while p.check(&Token::Pipe) {
            p.bump();
            parts.push(parse_type_atom(p)?);
        }
        return Ok(TypeExpr::Union(parts));
    }
    Ok(first)
}

fn parse_type_atom(p: &mut Parser) -> Result<TypeExpr, ParseError> {
    if p.check(&Token::Question) {
        p.bump();
        let inner = parse_type_atom(p)?;
        return Ok(TypeExpr::Nullable(Box::new(inner)));
    }

    let name = p.expect_identifier()?;

    // Qualified module type: mod::T
    let full_name = if p.check(&Token::ColonColon) {
        p.bump();
        let member = p.expect_identifier()?;
        if !p.check(&Token::Less) {
            return Ok(TypeExpr::Qualified {
                module: name,
                name: member,
            });
        }
        format!("{}::{}", name, member)
    } else {
        name
    };

    if p.check(&Token::Less) {
        p.bump();
        let mut args = vec![parse_type(p)?];
        while p.check(&Token::Comma) {
            p.bump();
            args.push(parse_type(p)?);
        }
        p.expect_close_angle()?;
        return Ok(TypeExpr::Generic {
            name: full_name,
            args,
        });
    }

    Ok(TypeExpr::Named(full_name))
}
