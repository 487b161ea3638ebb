//! Parse error types and error reporting.

use crate::token::{Span, Token};
use std::fmt;

/// A parse error with location and contextual information.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    /// The kind of error that occurred
    pub kind: ParseErrorKind,

    /// Source location of the error
    pub span: Span,

    /// Human-readable error message
    pub message: String,

    /// Optional suggestion for fixing the error
    pub suggestion: Option<String>,
}

/// The kind of parse error.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    /// Unexpected token found
    UnexpectedToken { expected: Vec<Token>, found: Token },

    /// Unexpected end of file
    UnexpectedEof { expected: Vec<Token> },

    /// Invalid syntax
    InvalidSyntax { reason: String },

    /// A delimiter was never closed
    UnclosedDelimiter { open: Token, open_span: Span },

    /// Parser exceeded its recursion depth cap
    TooDeep { depth: usize },

    /// Parser exceeded an iteration/size limit
    LimitExceeded { message: String },

    /// Parser got stuck (position didn't advance)
    ParserStuck,
}

impl ParseErrorKind {
    /// Stable error code, used by diagnostics and exit-status mapping.
    pub fn code(&self) -> &'static str {
        match self {
            ParseErrorKind::TooDeep { .. } => "E_PARSE_TOO_DEEP",
            ParseErrorKind::LimitExceeded { .. } => "E_INPUT_SIZE",
            _ => "E_PARSE",
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Parse error at {}:{}: {}",
            self.span.line, self.span.column, self.message
        )?;

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n  Suggestion: {}", suggestion)?;
        }

        Ok(())
    }
}

impl std::error::Error for ParseError {}

impl ParseError {
    /// Create an "unexpected token" error.
    pub fn unexpected_token(expected: Vec<Token>, found: Token, span: Span) -> Self {
        let message = if expected.len() == 1 {
            format!("Expected {}, found {}", expected[0], found)
        } else {
            let names: Vec<String> = expected.iter().map(|t| t.to_string()).collect();
            format!("Expected one of {}, found {}", names.join(", "), found)
        };

        Self {
            kind: ParseErrorKind::UnexpectedToken { expected, found },
            span,
            message,
            suggestion: None,
        }
    }

    /// Create an "unexpected EOF" error.
    pub fn unexpected_eof(expected: Vec<Token>, span: Span) -> Self {
        let message = if expected.len() == 1 {
            format!("Unexpected end of file, expected {}", expected[0])
        } else {
            let names: Vec<String> = expected.iter().map(|t| t.to_string()).collect();
            format!("Unexpected end of file, expected one of {}", names.join(", "))
        };

        Self {
            kind: ParseErrorKind::UnexpectedEof { expected },
            span,
            message,
            suggestion: None,
        }
    }

    /// Create an "invalid syntax" error.
    pub fn invalid_syntax(reason: impl Into<String>, span: Span) -> Self {
        let reason = reason.into();
        Self {
            kind: ParseErrorKind::InvalidSyntax {
                reason: reason.clone(),
            },
            span,
            message: format!("Invalid syntax: {}", reason),
            suggestion: None,
        }
    }

    /// Create an "unclosed delimiter" error pointing at where the
    /// delimiter was opened.
    pub fn unclosed_delimiter(open: Token, open_span: Span, close: &Token, at: Span) -> Self {
        let message = format!(
            "expected '{}' to close block opened at line {}",
            close.lexeme(),
            open_span.line
        );
        Self {
            kind: ParseErrorKind::UnclosedDelimiter { open, open_span },
            span: at,
            message,
            suggestion: None,
        }
    }

    /// Create a "too deep" error.
    pub fn too_deep(depth: usize, span: Span) -> Self {
        Self {
            kind: ParseErrorKind::TooDeep { depth },
            span,
            message: format!("Maximum parse nesting depth ({}) exceeded", depth),
            suggestion: None,
        }
    }

    /// Create a "limit exceeded" error.
    pub fn limit_exceeded(message: impl Into<String>, span: Span) -> Self {
        let message = message.into();
        Self {
            kind: ParseErrorKind::LimitExceeded {
                message: message.clone(),
            },
            span,
            message,
            suggestion: None,
        }
    }

    /// Create a "parser stuck" error.
    pub fn parser_stuck(span: Span) -> Self {
        Self {
            kind: ParseErrorKind::ParserStuck,
            span,
            message: "Parser position did not advance".to_string(),
            suggestion: None,
        }
    }

    /// Add a suggestion to this error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}
