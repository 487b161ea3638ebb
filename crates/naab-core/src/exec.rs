//! The executor capability contract.
//!
//! One implementation per foreign language. Adapters live in
//! `naab-polyglot`; the trait is defined here because [`Value::Block`]
//! carries an executor reference.
//!
//! [`Value::Block`]: crate::value::Value::Block

use crate::error::NaabError;
use crate::value::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between an executor and the
/// foreign-call timeout wrapper.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// In-host proxy to a foreign language runtime.
///
/// All methods take `&self`: executors are shared through `Arc` and use
/// interior mutability for their output buffers and runtime state.
pub trait Executor: Send + Sync {
    /// The language this executor serves ("python", "js", "c", ...).
    fn language_id(&self) -> &str;

    /// Whether the underlying runtime is up.
    fn initialized(&self) -> bool;

    /// Run top-level code for its side effects.
    fn execute(&self, code: &str) -> Result<(), NaabError>;

    /// Run code and marshal its result back into a [`Value`].
    fn execute_with_return(&self, code: &str) -> Result<Value, NaabError>;

    /// Invoke a function defined by a prior [`execute`].
    ///
    /// [`execute`]: Executor::execute
    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, NaabError>;

    /// Bind a host value under `name` inside the foreign runtime, so
    /// inline-code bodies can read it.
    fn bind_value(&self, name: &str, value: &Value) -> Result<(), NaabError>;

    /// Consume and clear output captured since the last drain.
    fn drain_captured_output(&self) -> String;

    /// Invoke a method on a foreign handle previously issued by this
    /// executor (method-chain semantics on `Foreign` values).
    fn call_method(&self, target: &Value, name: &str, args: &[Value]) -> Result<Value, NaabError> {
        let _ = (target, name, args);
        Err(NaabError::new(
            crate::error::ErrorKind::Foreign,
            format!("{}: method calls are not supported", self.language_id()),
        ))
    }

    /// The cancellation flag this executor polls, if it supports
    /// cooperative cancellation. The timeout wrapper sets it on expiry.
    fn cancel_flag(&self) -> CancelFlag {
        CancelFlag::new()
    }

    /// Release runtime resources and finalize outstanding foreign
    /// handles. Idempotent.
    fn close(&self) {}
}

impl std::fmt::Debug for dyn Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Executor")
            .field("language_id", &self.language_id())
            .finish()
    }
}
