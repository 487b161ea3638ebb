//! Foreign-runtime integration for NAAb.
//!
//! This crate adapts each foreign language runtime (embedded Python,
//! QuickJS, compiled C, generic subprocess interpreters) to the single
//! [`Executor`] capability contract from `naab-core`, and owns the
//! machinery around the adapters: the process-wide registry, the
//! bidirectional marshaller, the polyglot stdout protocol, the
//! content-hashed artifact cache, and the timeout/retry/parallel/race
//! wrapper with its bounded worker pool.
//!
//! [`Executor`]: naab_core::Executor

pub mod adapters;
pub mod cache;
pub mod marshal;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod wrapper;

pub use cache::{ArtifactCache, DEFAULT_CACHE_CAP_BYTES};
pub use registry::{init_process, shutdown_process, ExecutorRegistry};
pub use wrapper::{CancelFlag, COMPILE_TIMEOUT, DEFAULT_TIMEOUT};
