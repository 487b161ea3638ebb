//! Generic subprocess adapter.
//!
//! For languages executed from the command line. Each call writes the
//! accumulated program to a temp file, runs the interpreter with piped
//! stdout/stderr under the call timeout, and parses the polyglot
//! stdout protocol for the return value. Temp files are cleaned up on
//! every exit path (they are owned by `NamedTempFile` guards).
//!
//! Because every call spawns a fresh process, code passed to
//! [`execute`] is replayed as a prelude for later calls so
//! `call_function` sees earlier definitions.
//!
//! [`execute`]: naab_core::Executor::execute

use crate::adapters::{dedent, run_command};
use crate::marshal;
use crate::protocol;
use crate::wrapper::DEFAULT_TIMEOUT;
use naab_core::{CancelFlag, ErrorKind, Executor, NaabError, StackFrame, Value};
use parking_lot::Mutex;
use std::io::Write;
use std::process::Command;
use std::time::Duration;

/// Static description of how to drive one interpreter.
#[derive(Debug, Clone, Copy)]
pub struct LanguageProfile {
    pub id: &'static str,
    /// Default interpreter binary, overridable via `<LANG>_PATH`
    pub program: &'static str,
    pub env_override: &'static str,
    pub extension: &'static str,
    /// Whether the fallback return scan may treat a bare tail line as
    /// a string return
    pub string_fallback: bool,
}

const PROFILES: &[LanguageProfile] = &[
    LanguageProfile {
        id: "python",
        program: "python3",
        env_override: "PYTHON_PATH",
        extension: "py",
        string_fallback: false,
    },
    LanguageProfile {
        id: "bash",
        program: "bash",
        env_override: "BASH_PATH",
        extension: "sh",
        string_fallback: true,
    },
    LanguageProfile {
        id: "sh",
        program: "sh",
        env_override: "SH_PATH",
        extension: "sh",
        string_fallback: true,
    },
    LanguageProfile {
        id: "ruby",
        program: "ruby",
        env_override: "RUBY_PATH",
        extension: "rb",
        string_fallback: false,
    },
    LanguageProfile {
        id: "node",
        program: "node",
        env_override: "NODE_PATH_BIN",
        extension: "js",
        string_fallback: false,
    },
];

#[derive(Debug)]
pub struct SubprocessExecutor {
    profile: LanguageProfile,
    /// Replayed before every call: prior `execute` code and bindings
    prelude: Mutex<String>,
    output: Mutex<String>,
    cancel: CancelFlag,
    timeout: Duration,
}

impl SubprocessExecutor {
    /// Create an executor for a known command-line language.
    pub fn for_language(language: &str) -> Result<Self, NaabError> {
        let profile = PROFILES
            .iter()
            .find(|p| p.id == language)
            .copied()
            .ok_or_else(|| {
                NaabError::new(
                    ErrorKind::NoExecutor,
                    format!("no subprocess profile for language '{}'", language),
                )
            })?;
        Ok(Self {
            profile,
            prelude: Mutex::new(String::new()),
            output: Mutex::new(String::new()),
            cancel: CancelFlag::new(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn program(&self) -> String {
        std::env::var(self.profile.env_override).unwrap_or_else(|_| self.profile.program.into())
    }

    /// Run a complete script. With `want_return` the stdout goes
    /// through the polyglot protocol; without it, everything is log
    /// output.
    fn run_script(
        &self,
        script: &str,
        want_return: bool,
    ) -> Result<protocol::ProtocolOutput, NaabError> {
        self.cancel.clear();
        let mut file = tempfile::Builder::new()
            .prefix("naab-inline-")
            .suffix(&format!(".{}", self.profile.extension))
            .tempfile()?;
        file.write_all(script.as_bytes())?;
        file.flush()?;

        let mut command = Command::new(self.program());
        command.arg(file.path());
        let result = run_command(command, self.timeout, &self.cancel)?;

        if result.status_code != 0 {
            let message = if result.stderr.trim().is_empty() {
                format!("exited with status {}", result.status_code)
            } else {
                result.stderr.trim().to_string()
            };
            return Err(NaabError::foreign(
                self.profile.id,
                message,
                vec![StackFrame::new(
                    self.profile.id.to_string(),
                    "<script>",
                    "<inline>",
                    0,
                )],
            ));
        }
        if !result.stderr.is_empty() {
            self.output.lock().push_str(&result.stderr);
        }
        if want_return {
            protocol::parse_output(&result.stdout, self.profile.string_fallback)
        } else {
            Ok(protocol::ProtocolOutput {
                return_value: Value::Null,
                log_output: result.stdout,
            })
        }
    }

    /// Language-specific prologue injected once per script.
    fn prologue(&self) -> &'static str {
        match self.profile.id {
            "python" => "import json as __naab_json\n",
            "ruby" => "require 'json'\n",
            _ => "",
        }
    }

    /// Wrap an inline body so `return` works and the result is
    /// published over the protocol.
    fn return_wrapper(&self, body: &str) -> String {
        let body = dedent(body);
        match self.profile.id {
            "python" => {
                let indented: String = body
                    .lines()
                    .map(|l| format!("    {}\n", l))
                    .collect();
                format!(
                    "def __naab_main():\n{}\nprint(\"{}\" + __naab_json.dumps(__naab_main()))\n",
                    indented,
                    protocol::RETURN_SENTINEL
                )
            }
            "ruby" => format!(
                "__naab_main = lambda do\n{}\nend\nputs \"{}\" + JSON.generate(__naab_main.call)\n",
                body,
                protocol::RETURN_SENTINEL
            ),
            "node" => format!(
                "const __naab_main = function() {{\n{}\n}};\nconst __naab_result = __naab_main();\nconsole.log(\"{}\" + JSON.stringify(__naab_result === undefined ? null : __naab_result));\n",
                body,
                protocol::RETURN_SENTINEL
            ),
            // Shells publish their own sentinel line, or fall back to
            // the tail scan
            _ => format!("{}\n", body),
        }
    }

    /// Statement binding `name` to a JSON-encoded host value.
    fn bind_snippet(&self, name: &str, json_text: &str) -> Result<String, NaabError> {
        // The JSON text rides inside a double-quoted literal; JSON
        // string escaping is valid in all the target languages
        let literal = serde_json::to_string(json_text)
            .map_err(|e| NaabError::new(ErrorKind::Marshal, e.to_string()))?;
        Ok(match self.profile.id {
            "python" => format!("{} = __naab_json.loads({})\n", name, literal),
            "ruby" => format!("{} = JSON.parse({}, quirks_mode: true)\n", name, literal),
            "node" => format!("const {} = JSON.parse({});\n", name, literal),
            // Shells get the raw text; scalars arrive unquoted
            _ => format!("{}={}\n", name, shell_quote(json_text)),
        })
    }

    /// Statement calling `name` with JSON-encoded args, publishing the
    /// result over the protocol.
    fn call_snippet(&self, name: &str, args_json: &str) -> Result<String, NaabError> {
        let literal = serde_json::to_string(args_json)
            .map_err(|e| NaabError::new(ErrorKind::Marshal, e.to_string()))?;
        Ok(match self.profile.id {
            "python" => format!(
                "print(\"{}\" + __naab_json.dumps({}(*__naab_json.loads({}))))\n",
                protocol::RETURN_SENTINEL,
                name,
                literal
            ),
            "ruby" => format!(
                "puts \"{}\" + JSON.generate(send(:{}, *JSON.parse({})))\n",
                protocol::RETURN_SENTINEL,
                name,
                literal
            ),
            "node" => format!(
                "{{ const __naab_r = {}(...JSON.parse({})); console.log(\"{}\" + JSON.stringify(__naab_r === undefined ? null : __naab_r)); }}\n",
                name,
                literal,
                protocol::RETURN_SENTINEL
            ),
            _ => {
                // Shell functions take plain words
                let words: Vec<String> = serde_json::from_str::<Vec<serde_json::Value>>(args_json)
                    .map_err(|e| NaabError::new(ErrorKind::Marshal, e.to_string()))?
                    .into_iter()
                    .map(|v| match v {
                        serde_json::Value::String(s) => shell_quote(&s),
                        other => shell_quote(&other.to_string()),
                    })
                    .collect();
                format!("{} {}\n", name, words.join(" "))
            }
        })
    }

    fn args_to_json(&self, args: &[Value]) -> Result<String, NaabError> {
        let list = Value::list(args.to_vec());
        marshal::to_json_string(&list)
    }
}

fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

impl Executor for SubprocessExecutor {
    fn language_id(&self) -> &str {
        self.profile.id
    }

    fn initialized(&self) -> bool {
        true
    }

    fn execute(&self, code: &str) -> Result<(), NaabError> {
        let script = {
            let prelude = self.prelude.lock();
            format!("{}{}{}\n", self.prologue(), prelude, dedent(code))
        };
        let parsed = self.run_script(&script, false)?;
        self.output.lock().push_str(&parsed.log_output);
        // Definitions persist for later calls
        self.prelude.lock().push_str(&format!("{}\n", dedent(code)));
        Ok(())
    }

    fn execute_with_return(&self, code: &str) -> Result<Value, NaabError> {
        let script = {
            let prelude = self.prelude.lock();
            format!(
                "{}{}{}",
                self.prologue(),
                prelude,
                self.return_wrapper(code)
            )
        };
        let parsed = self.run_script(&script, true)?;
        self.output.lock().push_str(&parsed.log_output);
        Ok(parsed.return_value)
    }

    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, NaabError> {
        let args_json = self.args_to_json(args)?;
        let snippet = self.call_snippet(name, &args_json)?;
        let script = {
            let prelude = self.prelude.lock();
            format!("{}{}{}", self.prologue(), prelude, snippet)
        };
        let parsed = self.run_script(&script, true)?;
        self.output.lock().push_str(&parsed.log_output);
        Ok(parsed.return_value)
    }

    fn bind_value(&self, name: &str, value: &Value) -> Result<(), NaabError> {
        if matches!(value, Value::Foreign(_)) {
            return Err(NaabError::new(
                ErrorKind::Marshal,
                "foreign handles cannot cross a subprocess boundary".to_string(),
            ));
        }
        let json_text = marshal::to_json_string(value)?;
        let snippet = self.bind_snippet(name, &json_text)?;
        self.prelude.lock().push_str(&snippet);
        Ok(())
    }

    fn drain_captured_output(&self) -> String {
        std::mem::take(&mut *self.output.lock())
    }

    fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bash() -> SubprocessExecutor {
        SubprocessExecutor::for_language("bash").unwrap()
    }

    #[test]
    fn test_unknown_profile() {
        let err = SubprocessExecutor::for_language("fortran").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoExecutor);
    }

    #[test]
    fn test_bash_execute_captures_output() {
        let exec = bash();
        exec.execute("echo hello").unwrap();
        assert_eq!(exec.drain_captured_output(), "hello\n");
        // Drain clears
        assert_eq!(exec.drain_captured_output(), "");
    }

    #[test]
    fn test_bash_sentinel_return() {
        let exec = bash();
        let value = exec
            .execute_with_return("echo \"@@NAAB_RETURN@@ 42\"")
            .unwrap();
        assert!(value.equal(&Value::Int(42)));
    }

    #[test]
    fn test_bash_string_fallback_return() {
        let exec = bash();
        let value = exec.execute_with_return("echo done").unwrap();
        assert_eq!(value.as_str(), Some("done"));
    }

    #[test]
    fn test_bash_binding() {
        let exec = bash();
        // Strings bind as their JSON text, so the echoed line parses
        // back to the same string value
        exec.bind_value("greeting", &Value::string("hi")).unwrap();
        let value = exec.execute_with_return("echo \"$greeting\"").unwrap();
        assert_eq!(value.as_str(), Some("hi"));
    }

    #[test]
    fn test_bash_call_function() {
        let exec = bash();
        exec.execute("double() { echo \"@@NAAB_RETURN@@ $(( $1 * 2 ))\"; }")
            .unwrap();
        let value = exec
            .call_function("double", &[Value::Int(21)])
            .unwrap();
        assert!(value.equal(&Value::Int(42)));
    }

    #[test]
    fn test_bash_failure_is_foreign_error() {
        let exec = bash();
        let err = exec.execute("exit 3").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Foreign);
    }

    #[test]
    fn test_timeout_then_fresh_call_succeeds() {
        let exec = bash().with_timeout(Duration::from_millis(200));
        let err = exec.execute("sleep 10").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        // A fresh executor instance works fine afterwards
        let fresh = bash();
        let value = fresh.execute_with_return("echo \"@@NAAB_RETURN@@ 1\"").unwrap();
        assert!(value.equal(&Value::Int(1)));
    }
}
