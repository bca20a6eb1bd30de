//! Prelude for convenient imports.
//!
//! # Example
//!
//! ```ignore
//! use stitch_core::prelude::*;
//! ```

// Core types
pub use crate::types::{Id64, Id128, RandId};

// Error handling
pub use crate::error::{Result, StitchError};

// Span model
pub use crate::span::{
    fields, Direction, Encode, Point, SampleDecision, SpanKind, SpanMeta, Value,
};

// Storage
pub use crate::storage::{
    FileLogConfig, FileLogFactory, FileSpanLog, MemoryLogFactory, MemorySpanLog, SpanLog,
    SpanLogFactory,
};

// Chunk
pub use crate::chunk::{AssignedSpan, Chunk};
