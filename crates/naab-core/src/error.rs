//! The unified error taxonomy and cross-language trace rendering.

use crate::stack::{self, StackFrame};
use crate::value::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::io::Write as IoWrite;
use termcolor::{Buffer, Color, ColorSpec, WriteColor};

/// The kind tag every runtime error carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    Type,
    Arity,
    Undefined,
    AssignTarget,
    NotCallable,
    Index,
    StructField,
    Import,
    CircularImport,
    NoExecutor,
    /// Wraps an error raised inside a foreign runtime
    Foreign,
    Timeout,
    Cancelled,
    Marshal,
    MarshalOverflow,
    DivZero,
    Overflow,
    CallDepth,
    InputSize,
    Io,
    /// A value raised by `throw`; the payload rides in
    /// [`NaabError::thrown`]
    Thrown,
}

impl ErrorKind {
    /// Stable code used in rendered diagnostics and tests.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Parse => "E_PARSE",
            ErrorKind::Type => "E_TYPE",
            ErrorKind::Arity => "E_ARITY",
            ErrorKind::Undefined => "E_UNDEFINED",
            ErrorKind::AssignTarget => "E_ASSIGN_TARGET",
            ErrorKind::NotCallable => "E_NOT_CALLABLE",
            ErrorKind::Index => "E_INDEX",
            ErrorKind::StructField => "E_STRUCT_FIELD",
            ErrorKind::Import => "E_IMPORT",
            ErrorKind::CircularImport => "E_CIRCULAR_IMPORT",
            ErrorKind::NoExecutor => "E_NO_EXECUTOR",
            ErrorKind::Foreign => "E_FOREIGN",
            ErrorKind::Timeout => "E_TIMEOUT",
            ErrorKind::Cancelled => "E_CANCELLED",
            ErrorKind::Marshal => "E_MARSHAL",
            ErrorKind::MarshalOverflow => "E_MARSHAL_OVERFLOW",
            ErrorKind::DivZero => "E_DIV_ZERO",
            ErrorKind::Overflow => "E_OVERFLOW",
            ErrorKind::CallDepth => "E_CALL_DEPTH",
            ErrorKind::InputSize => "E_INPUT_SIZE",
            ErrorKind::Io => "E_IO",
            ErrorKind::Thrown => "E_THROWN",
        }
    }

    /// Fatal kinds short-circuit evaluation and are not catchable by
    /// default (a strict-mode flag on the evaluator can override for
    /// test rigs).
    pub fn catchable(&self) -> bool {
        !matches!(
            self,
            ErrorKind::InputSize | ErrorKind::CallDepth | ErrorKind::Overflow
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A runtime error: kind, message, the thrown payload when it
/// originated from `throw`, and the cross-language stack trace.
#[derive(Debug, Clone, thiserror::Error)]
#[error("error[{kind}]: {message}")]
pub struct NaabError {
    pub kind: ErrorKind,
    pub message: String,
    pub thrown: Option<Value>,
    pub stack: Vec<StackFrame>,
}

impl NaabError {
    /// Create an error capturing the current thread's call stack.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            thrown: None,
            stack: stack::capture(),
        }
    }

    /// Create the error for a `throw` statement. The payload is kept as
    /// a first-class value so `catch` binds exactly what was thrown.
    pub fn from_thrown(value: Value) -> Self {
        Self {
            kind: ErrorKind::Thrown,
            message: crate::display::to_display_string(&value),
            thrown: Some(value),
            stack: stack::capture(),
        }
    }

    /// Wrap a foreign runtime's error. The stack is stored
    /// outermost-first, so the foreign frames sit innermost and render
    /// first in the trace.
    pub fn foreign(
        language: &str,
        message: impl Into<String>,
        foreign_frames: Vec<StackFrame>,
    ) -> Self {
        let mut stack = stack::capture();
        stack.extend(foreign_frames);
        Self {
            kind: ErrorKind::Foreign,
            message: format!("[{}] {}", language, message.into()),
            thrown: None,
            stack,
        }
    }

    /// The value `catch` should bind: the thrown payload if present,
    /// otherwise the rendered message.
    pub fn catch_value(&self) -> Value {
        match &self.thrown {
            Some(value) => value.clone(),
            None => Value::string(self.message.clone()),
        }
    }

    pub fn is_fatal(&self) -> bool {
        !self.kind.catchable()
    }

    /// Plain rendering:
    /// `error[<kind>]: <message>` then one `  at` line per frame.
    pub fn format_plain(&self, scrub: bool) -> String {
        let message = if scrub {
            scrub_message(&self.message)
        } else {
            self.message.clone()
        };
        let mut out = format!("error[{}]: {}", self.kind.code(), message);
        for frame in self.stack.iter().rev() {
            out.push_str(&format!(
                "\n  at {} ({}:{}:{})",
                frame.function_name, frame.language, frame.file, frame.line
            ));
        }
        out
    }

    /// Colour rendering with the fixed per-language colour map.
    pub fn format_colored(&self, scrub: bool) -> String {
        let message = if scrub {
            scrub_message(&self.message)
        } else {
            self.message.clone()
        };
        let mut buffer = Buffer::ansi();
        let mut red = ColorSpec::new();
        red.set_fg(Some(Color::Red)).set_bold(true);
        let _ = buffer.set_color(&red);
        let _ = write!(buffer, "error[{}]", self.kind.code());
        let _ = buffer.reset();
        let _ = write!(buffer, ": {}", message);
        for frame in self.stack.iter().rev() {
            let _ = write!(buffer, "\n  at {} (", frame.function_name);
            let mut spec = ColorSpec::new();
            spec.set_fg(Some(language_color(&frame.language)));
            let _ = buffer.set_color(&spec);
            let _ = write!(buffer, "{}", frame.language);
            let _ = buffer.reset();
            let _ = write!(buffer, ":{}:{})", frame.file, frame.line);
        }
        String::from_utf8_lossy(buffer.as_slice()).into_owned()
    }
}

impl From<std::io::Error> for NaabError {
    fn from(e: std::io::Error) -> Self {
        NaabError::new(ErrorKind::Io, e.to_string())
    }
}

impl From<naab_parser::ParseError> for NaabError {
    fn from(e: naab_parser::ParseError) -> Self {
        let kind = match e.kind.code() {
            "E_INPUT_SIZE" => ErrorKind::InputSize,
            _ => ErrorKind::Parse,
        };
        NaabError::new(kind, e.to_string())
    }
}

/// The fixed per-language colour map used by the colour formatter.
pub fn language_color(language: &str) -> Color {
    match language {
        "naab" => Color::Cyan,
        "python" => Color::Yellow,
        "js" => Color::Blue,
        "c" => Color::Magenta,
        "bash" => Color::Green,
        _ => Color::White,
    }
}

static SCRUB_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"(?:/home|/Users)/[^\s'\x22:]+").unwrap(),
            "<path>",
        ),
        (Regex::new(r"0x[0-9a-fA-F]{6,}").unwrap(), "<addr>"),
        (Regex::new(r"AKIA[0-9A-Z]{16}").unwrap(), "<redacted>"),
        (Regex::new(r"sk-[A-Za-z0-9_-]{16,}").unwrap(), "<redacted>"),
        (
            Regex::new(r"(?i)\b(api[_-]?key|token|secret|password)\s*[=:]\s*\S+").unwrap(),
            "$1=<redacted>",
        ),
    ]
});

/// Remove sensitive shapes (paths, addresses, credential-looking
/// strings) from an error message. Applied in production mode.
pub fn scrub_message(message: &str) -> String {
    let mut out = message.to_string();
    for (pattern, replacement) in SCRUB_PATTERNS.iter() {
        out = pattern.replace_all(&out, *replacement).into_owned();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StackFrame;

    #[test]
    fn test_kind_codes() {
        assert_eq!(ErrorKind::Type.code(), "E_TYPE");
        assert_eq!(ErrorKind::CircularImport.code(), "E_CIRCULAR_IMPORT");
        assert_eq!(ErrorKind::MarshalOverflow.code(), "E_MARSHAL_OVERFLOW");
    }

    #[test]
    fn test_fatal_kinds_not_catchable() {
        assert!(!ErrorKind::InputSize.catchable());
        assert!(!ErrorKind::CallDepth.catchable());
        assert!(!ErrorKind::Overflow.catchable());
        assert!(ErrorKind::Timeout.catchable());
        assert!(ErrorKind::Cancelled.catchable());
        assert!(ErrorKind::Thrown.catchable());
    }

    #[test]
    fn test_format_plain() {
        let mut err = NaabError::new(ErrorKind::Type, "bad operand");
        err.stack = vec![
            StackFrame::new("naab", "main", "test.naab", 1),
            StackFrame::new("python", "helper", "<inline>", 3),
        ];
        let out = err.format_plain(false);
        assert!(out.starts_with("error[E_TYPE]: bad operand"));
        assert!(out.contains("  at helper (python:<inline>:3)"));
        assert!(out.contains("  at main (naab:test.naab:1)"));
        // Innermost frame first
        let helper_pos = out.find("helper").unwrap();
        let main_pos = out.find("at main").unwrap();
        assert!(helper_pos < main_pos);
    }

    #[test]
    fn test_foreign_frames_prepended() {
        let err = NaabError::foreign(
            "python",
            "ZeroDivisionError: division by zero",
            vec![StackFrame::new("python", "<module>", "<inline>", 1)],
        );
        assert_eq!(err.kind, ErrorKind::Foreign);
        assert!(err.message.contains("ZeroDivisionError"));
        // Foreign frames sit innermost (end of the outermost-first list)
        assert_eq!(err.stack.last().unwrap().language, "python");
    }

    #[test]
    fn test_thrown_round_trip() {
        let err = NaabError::from_thrown(Value::string("oops"));
        assert_eq!(err.kind, ErrorKind::Thrown);
        assert_eq!(err.catch_value().as_str(), Some("oops"));
    }

    #[test]
    fn test_scrubbing() {
        let scrubbed = scrub_message("failed reading /home/alice/.ssh/id_rsa at 0xdeadbeef42");
        assert!(!scrubbed.contains("alice"));
        assert!(!scrubbed.contains("0xdeadbeef42"));
        assert!(scrubbed.contains("<path>"));
        assert!(scrubbed.contains("<addr>"));

        let scrubbed = scrub_message("config: api_key=sk-abcdefghijklmnop1234");
        assert!(!scrubbed.contains("abcdefghijklmnop"));
    }

    #[test]
    fn test_colored_output_has_ansi() {
        let err = NaabError::new(ErrorKind::Timeout, "took too long");
        let out = err.format_colored(false);
        assert!(out.contains("\u{1b}["));
        assert!(out.contains("E_TIMEOUT"));
    }
}
