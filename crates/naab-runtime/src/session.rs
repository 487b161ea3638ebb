//! Persistent evaluation session.
//!
//! Each eval runs against the same retained evaluator, so
//! declarations (lets, functions, structs, imports) persist across
//! inputs. The REPL is an external collaborator; this is the object it
//! would drive.

use crate::builtins::OutputSink;
use crate::evaluator::{EvalOptions, Evaluator};
use crate::modules::ModuleRegistry;
use naab_core::{NaabError, Value};
use std::sync::Arc;

pub struct Session {
    evaluator: Evaluator,
}

impl Session {
    pub fn new(options: EvalOptions, sink: OutputSink) -> Result<Self, NaabError> {
        let registry = Arc::new(ModuleRegistry::new(&options.base_dir)?);
        Ok(Self {
            evaluator: Evaluator::new(options, registry, sink),
        })
    }

    /// Evaluate a snippet. State persists: a `let` or `function` from
    /// one eval is visible to the next.
    pub fn eval(&mut self, source: &str) -> Result<Value, NaabError> {
        let program = naab_parser::parse_source(source).map_err(|errors| {
            NaabError::from(errors.into_iter().next().expect("at least one error"))
        })?;
        self.evaluator.run_program(&program)
    }

    /// Render a value the way the REPL shows results.
    pub fn format_value(&self, value: &Value) -> String {
        match value {
            Value::Str(s) => format!("\"{}\"", s),
            other => naab_core::display::to_display_string(other),
        }
    }
}
