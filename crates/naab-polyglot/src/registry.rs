//! The process-wide executor registry.
//!
//! One entry per language id. Lookup lazily constructs the built-in
//! adapter for known languages; duplicate registration replaces (and
//! closes) the prior entry. The registry is one of the process-scoped
//! services bracketed by [`init_process`] / [`shutdown_process`].

use naab_core::{ErrorKind, Executor, NaabError};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

pub struct ExecutorRegistry {
    executors: Mutex<FxHashMap<String, Arc<dyn Executor>>>,
}

static REGISTRY: Lazy<ExecutorRegistry> = Lazy::new(|| ExecutorRegistry {
    executors: Mutex::new(FxHashMap::default()),
});

impl ExecutorRegistry {
    /// The process-wide registry.
    pub fn global() -> &'static ExecutorRegistry {
        &REGISTRY
    }

    /// Register an executor under its language id. A prior entry for
    /// the same language is closed and replaced.
    pub fn register(&self, executor: Arc<dyn Executor>) {
        let id = executor.language_id().to_string();
        let previous = self.executors.lock().insert(id.clone(), executor);
        if let Some(previous) = previous {
            log::debug!("replacing executor for '{}'", id);
            previous.close();
        }
    }

    /// Look up an executor without constructing one.
    pub fn get(&self, language: &str) -> Result<Arc<dyn Executor>, NaabError> {
        self.executors
            .lock()
            .get(language)
            .cloned()
            .ok_or_else(|| no_executor(language))
    }

    /// Look up an executor, lazily constructing the built-in adapter
    /// for known languages on first use.
    pub fn get_or_init(&self, language: &str) -> Result<Arc<dyn Executor>, NaabError> {
        if let Some(executor) = self.executors.lock().get(language) {
            return Ok(executor.clone());
        }
        // Construct outside the lock: adapter start-up can be slow
        let executor = crate::adapters::create_builtin(language)?;
        let mut executors = self.executors.lock();
        // A racing caller may have registered meanwhile; theirs wins
        Ok(executors
            .entry(language.to_string())
            .or_insert(executor)
            .clone())
    }

    /// Registered language ids.
    pub fn languages(&self) -> Vec<String> {
        self.executors.lock().keys().cloned().collect()
    }

    /// Close every executor and clear the table.
    pub fn shutdown(&self) {
        let executors: Vec<_> = {
            let mut map = self.executors.lock();
            map.drain().collect()
        };
        for (id, executor) in executors {
            log::debug!("closing executor '{}'", id);
            executor.close();
        }
    }
}

fn no_executor(language: &str) -> NaabError {
    NaabError::new(
        ErrorKind::NoExecutor,
        format!("no executor registered for language '{}'", language),
    )
}

/// Bring up the process-scoped polyglot services. Idempotent.
pub fn init_process() {
    // The registry and pool are lazy; touching them here gives the
    // host an explicit bring-up point and warms the worker threads.
    let _ = ExecutorRegistry::global();
    let _ = crate::pool::global();
}

/// Tear down process-scoped polyglot services: close all executors
/// (finalizing their outstanding foreign handles).
pub fn shutdown_process() {
    ExecutorRegistry::global().shutdown();
}
