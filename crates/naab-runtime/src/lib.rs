//! The NAAb runtime: module loading, the tree-walking evaluator, host
//! builtins, and the process lifecycle around them.

pub mod builtins;
pub mod config;
pub mod evaluator;
pub mod modules;
pub mod session;

pub use builtins::OutputSink;
pub use evaluator::{EvalOptions, Evaluator};
pub use modules::{Module, ModuleRegistry, ModuleState};
pub use session::Session;

use naab_core::{ErrorKind, NaabError, Value};
use std::path::Path;
use std::sync::Arc;

/// Exit code mapping: 0 success, 1 uncaught thrown value / runtime
/// error, 2 parse/import error surfaced before execution, 124
/// top-level timeout.
pub fn exit_code_for(error: &NaabError) -> i32 {
    match error.kind {
        ErrorKind::Parse
        | ErrorKind::Import
        | ErrorKind::CircularImport
        | ErrorKind::InputSize => 2,
        ErrorKind::Timeout => 124,
        _ => 1,
    }
}

/// Facade the CLI (and tests) drive: brings up the process-scoped
/// polyglot services, runs programs, and tears everything down.
pub struct Runtime {
    options: EvalOptions,
    registry: Arc<ModuleRegistry>,
    sink: OutputSink,
}

impl Runtime {
    pub fn new(options: EvalOptions, sink: OutputSink) -> Result<Self, NaabError> {
        naab_polyglot::init_process();
        let registry = Arc::new(ModuleRegistry::new(&options.base_dir)?);
        Ok(Self {
            options,
            registry,
            sink,
        })
    }

    /// Parse and evaluate a source string.
    pub fn run_source(&self, source: &str, file_name: &str) -> Result<Value, NaabError> {
        let program = naab_parser::parse_source(source).map_err(|errors| {
            let rendered = naab_parser::diagnostics::render_parse_errors(
                file_name, source, &errors, false,
            );
            NaabError::new(
                ErrorKind::Parse,
                format!("{} parse error(s):\n{}", errors.len(), rendered),
            )
        })?;

        let mut options = self.options.clone();
        options.file_name = file_name.to_string();
        let mut evaluator = Evaluator::new(options, self.registry.clone(), self.sink.clone());
        evaluator.run_program(&program)
    }

    /// Load and evaluate a program file.
    pub fn run_file(&self, path: &Path) -> Result<Value, NaabError> {
        let source = std::fs::read_to_string(path)?;
        let mut options = self.options.clone();
        if let Some(parent) = path.parent() {
            options.base_dir = parent.to_path_buf();
        }
        let runtime = Runtime {
            options,
            registry: self.registry.clone(),
            sink: self.sink.clone(),
        };
        runtime.run_source(&source, &path.display().to_string())
    }

    /// Tear down process-scoped services (executors are closed, which
    /// finalizes their outstanding foreign handles).
    pub fn shutdown(&self) {
        naab_polyglot::shutdown_process();
    }
}
