//! Core runtime model for the NAAb language.
//!
//! This crate owns the pieces every other part of the system speaks in:
//! the tagged [`Value`] universe, lexically-scoped [`Environment`]s,
//! the [`NaabError`] taxonomy with its thread-local call stack, and the
//! [`Executor`] capability trait that foreign-language adapters
//! implement.

pub mod display;
pub mod env;
pub mod error;
pub mod exec;
pub mod stack;
pub mod suggest;
pub mod value;

pub use env::Environment;
pub use error::{ErrorKind, NaabError};
pub use exec::{CancelFlag, Executor};
pub use stack::{FrameGuard, StackFrame};
pub use value::{
    BlockValue, ForeignValue, FunctionKind, FunctionValue, StructDef, StructField,
    StructInstance, Value,
};
