//! The polyglot stdout protocol.
//!
//! Subprocess adapters (and any adapter that cannot return a value
//! in-band) return results over stdout: a line starting with the
//! sentinel carries a JSON-encoded return value, every other line is
//! log output. Without a sentinel line the tail is scanned for the
//! last complete JSON value as a best effort.

use crate::marshal;
use naab_core::{NaabError, Value};

/// Default sentinel prefix for return-value lines.
pub const RETURN_SENTINEL: &str = "@@NAAB_RETURN@@";

/// Parsed subprocess output: the return value plus captured log lines.
#[derive(Debug)]
pub struct ProtocolOutput {
    pub return_value: Value,
    pub log_output: String,
}

/// Parse captured stdout according to the protocol.
///
/// `string_return` relaxes the fallback: when no JSON value is found
/// anywhere, the last non-empty line is returned as a plain string
/// (used when the declared return type is `string`).
pub fn parse_output(stdout: &str, string_return: bool) -> Result<ProtocolOutput, NaabError> {
    parse_output_with_sentinel(stdout, RETURN_SENTINEL, string_return)
}

/// Parse with a custom sentinel.
pub fn parse_output_with_sentinel(
    stdout: &str,
    sentinel: &str,
    string_return: bool,
) -> Result<ProtocolOutput, NaabError> {
    let mut log_lines: Vec<&str> = Vec::new();
    let mut return_value: Option<Value> = None;

    for line in stdout.lines() {
        if let Some(payload) = line.strip_prefix(sentinel) {
            let json: serde_json::Value = serde_json::from_str(payload.trim()).map_err(|e| {
                NaabError::new(
                    naab_core::ErrorKind::Marshal,
                    format!("malformed return payload: {}", e),
                )
            })?;
            // Later sentinel lines win; earlier ones are dropped
            return_value = Some(marshal::from_json(json));
        } else {
            log_lines.push(line);
        }
    }

    if return_value.is_none() {
        // Best effort: last complete JSON value from the end
        for (idx, line) in log_lines.iter().enumerate().rev() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
                return_value = Some(marshal::from_json(json));
                log_lines.remove(idx);
                break;
            }
            if string_return {
                return_value = Some(Value::string(trimmed));
                log_lines.remove(idx);
                break;
            }
        }
    }

    let mut log_output = log_lines.join("\n");
    if !log_output.is_empty() {
        log_output.push('\n');
    }
    Ok(ProtocolOutput {
        return_value: return_value.unwrap_or(Value::Null),
        log_output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_line_carries_return() {
        let out = parse_output("hi\n@@NAAB_RETURN@@ 42\n", false).unwrap();
        assert!(out.return_value.equal(&Value::Int(42)));
        assert_eq!(out.log_output, "hi\n");
    }

    #[test]
    fn test_sentinel_json_object() {
        let out = parse_output("@@NAAB_RETURN@@ {\"a\": [1, 2]}\n", false).unwrap();
        assert_eq!(out.return_value.type_name(), "dict");
    }

    #[test]
    fn test_no_sentinel_scans_tail_for_json() {
        let out = parse_output("log line\n[1, 2, 3]\n", false).unwrap();
        assert_eq!(out.return_value.type_name(), "list");
        assert_eq!(out.log_output, "log line\n");
    }

    #[test]
    fn test_no_json_with_string_return() {
        let out = parse_output("all done\n", true).unwrap();
        assert_eq!(out.return_value.as_str(), Some("all done"));
        assert_eq!(out.log_output, "");
    }

    #[test]
    fn test_no_json_without_string_return_is_null() {
        let out = parse_output("not json at all\n", false).unwrap();
        assert!(matches!(out.return_value, Value::Null));
        assert_eq!(out.log_output, "not json at all\n");
    }

    #[test]
    fn test_malformed_sentinel_payload_is_error() {
        assert!(parse_output("@@NAAB_RETURN@@ {broken\n", false).is_err());
    }

    #[test]
    fn test_last_sentinel_wins() {
        let out = parse_output(
            "@@NAAB_RETURN@@ 1\n@@NAAB_RETURN@@ 2\n",
            false,
        )
        .unwrap();
        assert!(out.return_value.equal(&Value::Int(2)));
    }

    #[test]
    fn test_empty_output() {
        let out = parse_output("", false).unwrap();
        assert!(matches!(out.return_value, Value::Null));
        assert_eq!(out.log_output, "");
    }
}
