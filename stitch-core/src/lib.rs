//! Stitch Core Library
//!
//! This crate provides the foundational types and storage for stitch,
//! an engine that reconstructs distributed traces from kernel-observed
//! span fragments without in-band context propagation.
//!
//! # Key Components
//!
//! - **Types**: fixed-width span/trace identifiers with hex and decimal
//!   encodings and a deterministic sampling predicate
//! - **Span**: point records, the wire field vocabulary, and durable
//!   span metadata
//! - **Storage**: the append-log interface with file-backed and
//!   in-memory implementations
//! - **Chunk**: the container for exactly one time window's spans
//!
//! # Example
//!
//! ```ignore
//! use stitch_core::prelude::*;
//!
//! let log = MemorySpanLog::new();
//! let chunk = Chunk::new(0, 20_000_000_000, 0, Box::new(log));
//! chunk.put_span(&points)?;
//! let metas = chunk.get_all_span_meta()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod error;
pub mod prelude;
pub mod span;
pub mod storage;
pub mod types;

// Re-export key types at crate root for convenience
pub use chunk::{AssignedSpan, Chunk};
pub use error::{Result, StitchError};
pub use span::{Direction, Encode, Point, SampleDecision, SpanKind, SpanMeta, Value};
pub use storage::{SpanLog, SpanLogFactory};
pub use types::{Id64, Id128, RandId};
