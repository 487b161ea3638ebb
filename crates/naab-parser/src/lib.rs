//! Lexer, parser, AST and advisory checker for the NAAb language.
//!
//! The pipeline is source → tokens → AST; the evaluator in
//! `naab-runtime` walks the AST directly. Parse errors accumulate with
//! source locations instead of aborting on the first problem.

pub mod ast;
pub mod checker;
pub mod diagnostics;
pub mod lexer;
pub mod parser;
pub mod token;

pub use lexer::{LexError, Lexer};
pub use parser::{ParseError, ParseErrorKind, Parser};
pub use token::{Span, Token};

/// Parse a source string into a Program.
///
/// Lex errors are folded into the parse-error list so callers handle a
/// single error type.
pub fn parse_source(source: &str) -> Result<ast::Program, Vec<ParseError>> {
    let parser = match Parser::new(source) {
        Ok(p) => p,
        Err(lex_errors) => {
            return Err(lex_errors
                .into_iter()
                .map(|e| {
                    if e.is_limit {
                        ParseError::limit_exceeded(e.message, e.span)
                    } else {
                        ParseError::invalid_syntax(e.message, e.span)
                    }
                })
                .collect())
        }
    };
    parser.parse()
}
