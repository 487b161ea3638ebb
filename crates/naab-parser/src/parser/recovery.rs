//! Error recovery: skip to a statement boundary after a parse error.

use super::Parser;
use crate::token::Token;

/// Advance until the next plausible statement start so parsing can
/// continue and report further errors.
pub fn sync_to_statement_boundary(parser: &mut Parser) {
    while !parser.at_eof() {
        match parser.current() {
            // A semicolon ends the broken statement; consume it
            Token::Semicolon => {
                parser.bump();
                return;
            }
            // Tokens that begin a new statement or declaration
            Token::Let
            | Token::If
            | Token::While
            | Token::For
            | Token::Return
            | Token::Break
            | Token::Continue
            | Token::Try
            | Token::Throw
            | Token::Function
            | Token::Struct
            | Token::Enum
            | Token::Import
            | Token::Export
            | Token::Main
            | Token::RBrace => return,
            _ => parser.bump(),
        }
    }
}
