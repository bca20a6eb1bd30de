//! Stitch Runner - windowed ingestion and span correlation.
//!
//! This crate provides the moving parts of stitch:
//! - Windowed ingestion manager with timer rotation and a bounded
//!   ready queue
//! - Two-generation span correlator with deterministic trace-id
//!   synthesis and sampling
//! - Exporter interface for downstream delivery
//! - Configuration and tracing setup
//! - Synthetic-trace test helpers

#![warn(missing_docs)]

pub mod config;
pub mod correlator;
pub mod export;
pub mod observability;
pub mod testing;
pub mod window;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::RunnerConfig;
    pub use crate::correlator::{EbpfSpan, Generation, Runner, SpanArena, SpanRef};
    pub use crate::export::{Exporter, FnExporter};
    pub use crate::observability::{init_tracing, LogFormat, TracingConfig, TracingGuard};
    pub use crate::testing::{gen_trace, CollectingExporter, SyntheticTrace, TraceShape};
    pub use crate::window::WindowManager;
}
