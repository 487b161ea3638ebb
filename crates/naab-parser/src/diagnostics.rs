//! Diagnostic rendering for parse and check errors.
//!
//! Renders accumulated errors with a source snippet per error, in plain
//! or colour mode.

use crate::parser::ParseError;
use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFile;
use codespan_reporting::term::{self, termcolor::Buffer, Config};

/// Render parse errors against their source, one diagnostic per error.
pub fn render_parse_errors(
    filename: &str,
    source: &str,
    errors: &[ParseError],
    color: bool,
) -> String {
    let file = SimpleFile::new(filename, source);
    let config = Config::default();
    let mut buffer = if color {
        Buffer::ansi()
    } else {
        Buffer::no_color()
    };

    for error in errors {
        let mut labels = vec![Label::primary((), clamp(error.span.start, error.span.end, source))];
        if let crate::parser::ParseErrorKind::UnclosedDelimiter { open_span, .. } = &error.kind {
            labels.push(
                Label::secondary((), clamp(open_span.start, open_span.end, source))
                    .with_message("opened here"),
            );
        }
        let mut diagnostic = Diagnostic::error()
            .with_code(error.kind.code())
            .with_message(&error.message)
            .with_labels(labels);
        if let Some(suggestion) = &error.suggestion {
            diagnostic = diagnostic.with_notes(vec![suggestion.clone()]);
        }
        let _ = term::emit(&mut buffer, &config, &file, &diagnostic);
    }

    String::from_utf8_lossy(buffer.as_slice()).into_owned()
}

/// Keep ranges inside the source so rendering never panics on spans
/// that point at EOF.
fn clamp(start: usize, end: usize, source: &str) -> std::ops::Range<usize> {
    let len = source.len();
    let s = start.min(len);
    let e = end.min(len).max(s);
    s..e
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    #[test]
    fn test_render_names_the_code() {
        let source = "let = 1";
        let errors = Parser::new(source).unwrap().parse().unwrap_err();
        let out = render_parse_errors("test.naab", source, &errors, false);
        assert!(out.contains("E_PARSE"));
        assert!(out.contains("test.naab"));
    }

    #[test]
    fn test_render_unclosed_delimiter_points_at_open() {
        let source = "function f() {\n  let x = 1\n";
        let errors = Parser::new(source).unwrap().parse().unwrap_err();
        let out = render_parse_errors("test.naab", source, &errors, false);
        assert!(out.contains("to close block opened at line 1"));
    }
}
