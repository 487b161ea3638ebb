//! Lexer for the NAAb programming language.
//!
//! Built on logos. The only place the token stream is not a plain
//! regular language is the inline-code form `<<lang [a, b] body>>`:
//! a callback captures the raw region up to the matching `>>`, and the
//! lexer re-emits it as delimiter, header, and body tokens.

use crate::token::{Span, Token};
use logos::Logos;
use std::fmt;

/// Maximum source file size (bytes).
pub const MAX_SOURCE_BYTES: usize = 10 * 1024 * 1024;
/// Maximum length of a single source line (characters).
pub const MAX_LINE_CHARS: usize = 10_000;
/// Maximum size of one inline-code body (bytes).
pub const MAX_INLINE_BODY_BYTES: usize = 1024 * 1024;

/// Logos-based token enum for lexing.
///
/// Converted to the public Token enum after lexing.
#[derive(Logos, Debug, Clone, PartialEq)]
enum LogosToken {
    // Whitespace (skip)
    #[regex(r"[ \t\r\n]+", logos::skip)]
    Whitespace,

    // Comments (skip)
    #[regex(r"//[^\n]*", logos::skip)]
    LineComment,

    #[regex(r"/\*", lex_block_comment)]
    BlockComment,

    // Keywords (must come before identifiers)
    #[token("function")]
    Function,

    #[token("let")]
    Let,

    #[token("if")]
    If,

    #[token("else")]
    Else,

    #[token("while")]
    While,

    #[token("for")]
    For,

    #[token("in")]
    In,

    #[token("break")]
    Break,

    #[token("continue")]
    Continue,

    #[token("return")]
    Return,

    #[token("try")]
    Try,

    #[token("catch")]
    Catch,

    #[token("finally")]
    Finally,

    #[token("throw")]
    Throw,

    #[token("import")]
    Import,

    #[token("export")]
    Export,

    #[token("from")]
    From,

    #[token("as")]
    As,

    #[token("struct")]
    Struct,

    #[token("enum")]
    Enum,

    #[token("main")]
    Main,

    #[token("true")]
    True,

    #[token("false")]
    False,

    #[token("null")]
    Null,

    // Block references (must come before identifiers)
    #[regex(r"BLOCK-[A-Z]+-[0-9]+", |lex| lex.slice().to_string())]
    BlockId(String),

    // Identifiers (must come after keywords)
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Identifier(String),

    // Numbers with numeric separator support
    #[regex(r"0x[0-9a-fA-F]+(_[0-9a-fA-F]+)*", parse_hex)]
    #[regex(r"[0-9]+(_[0-9]+)*", parse_int)]
    IntLiteral(i64),

    #[regex(
        r"[0-9]+(_[0-9]+)*\.[0-9]+(_[0-9]+)*([eE][+-]?[0-9]+)?",
        parse_float
    )]
    #[regex(r"[0-9]+(_[0-9]+)*[eE][+-]?[0-9]+", parse_float)]
    FloatLiteral(f64),

    // Strings
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    #[regex(r"'([^'\\]|\\.)*'", parse_string)]
    StringLiteral(String),

    // Inline code: `<<` captures everything through the matching `>>`
    #[token("<<", lex_inline_code)]
    InlineBlock(String),

    // Operators (longest first)
    #[token(">>")]
    GtGt,

    #[token("==")]
    EqualEqual,

    #[token("!=")]
    BangEqual,

    #[token("<=")]
    LessEqual,

    #[token(">=")]
    GreaterEqual,

    #[token("&&")]
    AmpAmp,

    #[token("||")]
    PipePipe,

    #[token("|>")]
    PipeGreater,

    #[token("->")]
    Arrow,

    #[token("..")]
    DotDot,

    #[token("::")]
    ColonColon,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token(",")]
    Comma,

    #[token(".")]
    Dot,

    #[token(":")]
    Colon,

    #[token(";")]
    Semicolon,

    #[token("?")]
    Question,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("%")]
    Percent,

    #[token("=")]
    Equal,

    #[token("<")]
    Less,

    #[token(">")]
    Greater,

    #[token("!")]
    Bang,

    #[token("|")]
    Pipe,
}

fn lex_block_comment(lex: &mut logos::Lexer<LogosToken>) -> logos::Skip {
    let remainder = lex.remainder();
    match remainder.find("*/") {
        Some(end) => lex.bump(end + 2),
        None => lex.bump(remainder.len()),
    }
    logos::Skip
}

/// Capture the raw region between `<<` and its matching `>>`.
///
/// Inner `<<` opens nest; the first unmatched `>>` closes. Returns None
/// (a lex error) when the region is unterminated.
fn lex_inline_code(lex: &mut logos::Lexer<LogosToken>) -> Option<String> {
    let remainder = lex.remainder();
    let bytes = remainder.as_bytes();
    let mut depth = 1usize;
    let mut i = 0usize;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'<', b'<') => {
                depth += 1;
                i += 2;
            }
            (b'>', b'>') => {
                depth -= 1;
                if depth == 0 {
                    let content = remainder[..i].to_string();
                    lex.bump(i + 2);
                    return Some(content);
                }
                i += 2;
            }
            _ => i += 1,
        }
    }
    None
}

fn parse_int(lex: &mut logos::Lexer<LogosToken>) -> Option<i64> {
    lex.slice().replace('_', "").parse().ok()
}

fn parse_hex(lex: &mut logos::Lexer<LogosToken>) -> Option<i64> {
    i64::from_str_radix(&lex.slice()[2..].replace('_', ""), 16).ok()
}

fn parse_float(lex: &mut logos::Lexer<LogosToken>) -> Option<f64> {
    lex.slice().replace('_', "").parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<LogosToken>) -> Option<String> {
    let slice = lex.slice();
    unescape(&slice[1..slice.len() - 1])
}

/// Process escape sequences in a string literal body.
fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            'u' => {
                if chars.next()? != '{' {
                    return None;
                }
                let mut hex = String::new();
                loop {
                    match chars.next()? {
                        '}' => break,
                        h => hex.push(h),
                    }
                }
                let code = u32::from_str_radix(&hex, 16).ok()?;
                out.push(char::from_u32(code)?);
            }
            other => {
                // Unknown escape: keep the character as written
                out.push(other);
            }
        }
    }
    Some(out)
}

/// A lexical error with its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub span: Span,
    /// True when the error is a source-size limit violation
    pub is_limit: bool,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lex error at {}:{}: {}",
            self.span.line, self.span.column, self.message
        )
    }
}

impl std::error::Error for LexError {}

/// Lexer over a source string.
pub struct Lexer<'a> {
    source: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self {
            source,
            line_starts,
        }
    }

    /// Enforce the source-size limits before tokenizing.
    pub fn check_limits(&self) -> Result<(), LexError> {
        if self.source.len() > MAX_SOURCE_BYTES {
            return Err(LexError {
                message: format!(
                    "source exceeds maximum size of {} bytes",
                    MAX_SOURCE_BYTES
                ),
                span: Span::default(),
                is_limit: true,
            });
        }
        for (idx, line) in self.source.lines().enumerate() {
            if line.chars().count() > MAX_LINE_CHARS {
                return Err(LexError {
                    message: format!(
                        "line exceeds maximum length of {} characters",
                        MAX_LINE_CHARS
                    ),
                    span: Span::new(
                        self.line_starts[idx],
                        self.line_starts[idx] + line.len(),
                        idx as u32 + 1,
                        1,
                    ),
                    is_limit: true,
                });
            }
        }
        Ok(())
    }

    /// Byte offset -> Span with line/column resolved.
    fn span_at(&self, start: usize, end: usize) -> Span {
        let line_idx = match self.line_starts.binary_search(&start) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let col = self.source[self.line_starts[line_idx]..start]
            .chars()
            .count() as u32
            + 1;
        Span::new(start, end, line_idx as u32 + 1, col)
    }

    /// Tokenize the whole input, expanding inline-code regions into the
    /// delimiter/header/body token sequence.
    pub fn tokenize(self) -> Result<Vec<(Token, Span)>, Vec<LexError>> {
        self.check_limits().map_err(|e| vec![e])?;

        let mut tokens = Vec::new();
        let mut errors = Vec::new();
        let mut lexer = LogosToken::lexer(self.source);

        while let Some(result) = lexer.next() {
            let range = lexer.span();
            let span = self.span_at(range.start, range.end);
            match result {
                Ok(LogosToken::InlineBlock(raw)) => {
                    if let Err(e) = self.expand_inline(&raw, span, &mut tokens) {
                        errors.push(e);
                    }
                }
                Ok(tok) => tokens.push((convert(tok), span)),
                Err(()) => {
                    let snippet: String =
                        self.source[range.clone()].chars().take(12).collect();
                    errors.push(LexError {
                        message: format!("unexpected character(s) '{}'", snippet),
                        span,
                        is_limit: false,
                    });
                }
            }
        }

        let eof_offset = self.source.len();
        let eof_span = self.span_at(eof_offset, eof_offset);
        tokens.push((Token::Eof, eof_span));

        if errors.is_empty() {
            Ok(tokens)
        } else {
            Err(errors)
        }
    }

    /// Expand a captured inline-code region into
    /// `<<` ident [bindings] INLINE_CODE `>>`.
    fn expand_inline(
        &self,
        raw: &str,
        region: Span,
        tokens: &mut Vec<(Token, Span)>,
    ) -> Result<(), LexError> {
        // region covers `<<raw>>`; header offsets are relative to raw
        let base = region.start + 2;
        let open_span = self.span_at(region.start, region.start + 2);
        let close_span = self.span_at(region.end - 2, region.end);
        tokens.push((Token::LtLt, open_span));

        let trimmed = raw.trim_start();
        let header_off = raw.len() - trimmed.len();
        let lang_len = trimmed
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(trimmed.len());
        if lang_len == 0 {
            return Err(LexError {
                message: "inline code must start with a language name".to_string(),
                span: open_span,
                is_limit: false,
            });
        }
        let language = &trimmed[..lang_len];
        let lang_start = base + header_off;
        tokens.push((
            Token::Identifier(language.to_string()),
            self.span_at(lang_start, lang_start + lang_len),
        ));

        let mut rest = &trimmed[lang_len..];
        let mut rest_off = header_off + lang_len;

        // Optional bracketed binding list
        let after_ws = rest.trim_start();
        if after_ws.starts_with('[') {
            rest_off += rest.len() - after_ws.len();
            let close = after_ws.find(']').ok_or_else(|| LexError {
                message: "unterminated binding list in inline code".to_string(),
                span: open_span,
                is_limit: false,
            })?;
            let list_start = base + rest_off;
            tokens.push((Token::LBracket, self.span_at(list_start, list_start + 1)));
            let inner = &after_ws[1..close];
            let mut cursor = 1usize;
            for (i, part) in inner.split(',').enumerate() {
                let name = part.trim();
                if name.is_empty() {
                    continue;
                }
                if i > 0 {
                    tokens.push((
                        Token::Comma,
                        self.span_at(list_start + cursor - 1, list_start + cursor),
                    ));
                }
                let name_off = list_start + cursor + (part.len() - part.trim_start().len());
                tokens.push((
                    Token::Identifier(name.to_string()),
                    self.span_at(name_off, name_off + name.len()),
                ));
                cursor += part.len() + 1;
            }
            tokens.push((
                Token::RBracket,
                self.span_at(list_start + close, list_start + close + 1),
            ));
            rest = &after_ws[close + 1..];
            rest_off += close + 1;
        }

        let body = rest.trim_start();
        if body.len() > MAX_INLINE_BODY_BYTES {
            return Err(LexError {
                message: format!(
                    "inline code body exceeds maximum size of {} bytes",
                    MAX_INLINE_BODY_BYTES
                ),
                span: open_span,
                is_limit: true,
            });
        }
        let body_start = base + rest_off + (rest.len() - body.len());
        tokens.push((
            Token::InlineCode(body.to_string()),
            self.span_at(body_start, base + raw.len()),
        ));
        tokens.push((Token::GtGt, close_span));
        Ok(())
    }
}

fn convert(tok: LogosToken) -> Token {
    match tok {
        LogosToken::Function => Token::Function,
        LogosToken::Let => Token::Let,
        LogosToken::If => Token::If,
        LogosToken::Else => Token::Else,
        LogosToken::While => Token::While,
        LogosToken::For => Token::For,
        LogosToken::In => Token::In,
        LogosToken::Break => Token::Break,
        LogosToken::Continue => Token::Continue,
        LogosToken::Return => Token::Return,
        LogosToken::Try => Token::Try,
        LogosToken::Catch => Token::Catch,
        LogosToken::Finally => Token::Finally,
        LogosToken::Throw => Token::Throw,
        LogosToken::Import => Token::Import,
        LogosToken::Export => Token::Export,
        LogosToken::From => Token::From,
        LogosToken::As => Token::As,
        LogosToken::Struct => Token::Struct,
        LogosToken::Enum => Token::Enum,
        LogosToken::Main => Token::Main,
        LogosToken::True => Token::True,
        LogosToken::False => Token::False,
        LogosToken::Null => Token::Null,
        LogosToken::BlockId(s) => Token::BlockId(s),
        LogosToken::Identifier(s) => Token::Identifier(s),
        LogosToken::IntLiteral(n) => Token::IntLiteral(n),
        LogosToken::FloatLiteral(n) => Token::FloatLiteral(n),
        LogosToken::StringLiteral(s) => Token::StringLiteral(s),
        LogosToken::GtGt => Token::GtGt,
        LogosToken::EqualEqual => Token::EqualEqual,
        LogosToken::BangEqual => Token::BangEqual,
        LogosToken::LessEqual => Token::LessEqual,
        LogosToken::GreaterEqual => Token::GreaterEqual,
        LogosToken::AmpAmp => Token::AmpAmp,
        LogosToken::PipePipe => Token::PipePipe,
        LogosToken::PipeGreater => Token::PipeGreater,
        LogosToken::Arrow => Token::Arrow,
        LogosToken::DotDot => Token::DotDot,
        LogosToken::ColonColon => Token::ColonColon,
        LogosToken::LParen => Token::LParen,
        LogosToken::RParen => Token::RParen,
        LogosToken::LBrace => Token::LBrace,
        LogosToken::RBrace => Token::RBrace,
        LogosToken::LBracket => Token::LBracket,
        LogosToken::RBracket => Token::RBracket,
        LogosToken::Comma => Token::Comma,
        LogosToken::Dot => Token::Dot,
        LogosToken::Colon => Token::Colon,
        LogosToken::Semicolon => Token::Semicolon,
        LogosToken::Question => Token::Question,
        LogosToken::Plus => Token::Plus,
        LogosToken::Minus => Token::Minus,
        LogosToken::Star => Token::Star,
        LogosToken::Slash => Token::Slash,
        LogosToken::Percent => Token::Percent,
        LogosToken::Equal => Token::Equal,
        LogosToken::Less => Token::Less,
        LogosToken::Greater => Token::Greater,
        LogosToken::Bang => Token::Bang,
        LogosToken::Pipe => Token::Pipe,
        LogosToken::Whitespace
        | LogosToken::LineComment
        | LogosToken::BlockComment
        | LogosToken::InlineBlock(_) => unreachable!("skipped or expanded before convert"),
    }
}
