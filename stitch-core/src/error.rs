//! Error types for stitch.
//!
//! This module provides strongly-typed errors with actionable context.
//! Every variant carries the identifiers needed to locate the failing
//! window or stream without a debugger attached.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for stitch operations.
#[derive(Error, Debug)]
pub enum StitchError {
    // =========================================================================
    // Storage-log errors (E001-E099)
    // =========================================================================
    /// Failed to create or open a span log.
    #[error("E001: Failed to create span log at {path}: {cause}")]
    LogCreate {
        /// The path where log creation failed.
        path: PathBuf,
        /// Reason for the failure.
        cause: String,
    },

    /// Append to a span log failed.
    #[error("E002: Log append failed on the {stream} stream: {cause}")]
    LogAppend {
        /// Which stream was being written ("points" or "meta").
        stream: &'static str,
        /// Reason for the append failure.
        cause: String,
    },

    /// Replay read from a span log failed.
    #[error("E003: Log read failed on the {stream} stream: {cause}")]
    LogRead {
        /// Which stream was being read ("points" or "meta").
        stream: &'static str,
        /// Reason for the read failure.
        cause: String,
    },

    /// A framed record failed its checksum or length check.
    #[error("E004: Log corruption at offset {offset}: {cause}")]
    LogCorruption {
        /// Byte offset of the corrupt frame.
        offset: u64,
        /// Description of the corruption.
        cause: String,
    },

    /// Deleting a span log's backing storage failed.
    #[error("E005: Failed to destroy span log at {path}: {cause}")]
    LogDestroy {
        /// The path that could not be removed.
        path: PathBuf,
        /// Reason for the failure.
        cause: String,
    },

    /// Both parallel streams failed while persisting one batch.
    ///
    /// The point and metadata streams are written back to back without a
    /// transaction; when both appends fail the whole batch is lost and
    /// both causes are reported together.
    #[error("E006: Both log streams failed: meta: {meta_cause}; points: {point_cause}")]
    LogBothStreams {
        /// Failure reported by the metadata stream.
        meta_cause: String,
        /// Failure reported by the point stream.
        point_cause: String,
    },

    // =========================================================================
    // Chunk errors (E100-E199)
    // =========================================================================
    /// Write attempted against a chunk that has been sealed.
    #[error("E101: Chunk for window starting {window_start_ns} is sealed")]
    ChunkSealed {
        /// Window start timestamp (ns) of the sealed chunk.
        window_start_ns: u64,
    },

    /// Point-blob replay and the correlated span list disagree in length.
    ///
    /// The export path pairs streams positionally; a mismatch means the
    /// storage contract was violated and the window cannot be exported.
    #[error("E102: Chunk stream misaligned: {stored} stored spans, {correlated} correlated")]
    ChunkMisaligned {
        /// Number of spans read back from storage.
        stored: usize,
        /// Number of spans supplied by the correlator.
        correlated: usize,
    },

    /// Span batch submitted after the ingestion manager shut down.
    #[error("E103: Ingestion manager is shut down")]
    IngestClosed,

    // =========================================================================
    // Correlation errors (E200-E299)
    // =========================================================================
    /// Loading a queued chunk's metadata failed.
    ///
    /// Fatal to the runner: losing a whole window silently is worse than
    /// forcing a supervisor restart.
    #[error("E201: Metadata load failed for window starting {window_start_ns}: {cause}")]
    MetaLoad {
        /// Window start timestamp (ns) of the failing chunk.
        window_start_ns: u64,
        /// Reason for the load failure.
        cause: String,
    },

    // =========================================================================
    // Export errors (E300-E399)
    // =========================================================================
    /// The exporter callback rejected a batch.
    #[error("E301: Export failed: {cause}")]
    ExportFailed {
        /// Reason reported by the exporter.
        cause: String,
    },

    // =========================================================================
    // Configuration errors (E800-E899)
    // =========================================================================
    /// Invalid configuration value.
    #[error("E801: Invalid configuration '{field}': {cause}")]
    ConfigValue {
        /// The configuration field with the invalid value.
        field: String,
        /// Description of why the value is invalid.
        cause: String,
    },

    /// Serialization/deserialization error.
    #[error("E802: Serialization error: {0}")]
    Serialization(
        /// The serialization error message.
        String,
    ),
}

impl StitchError {
    /// Get the error code (e.g., "E001").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::LogCreate { .. } => "E001",
            Self::LogAppend { .. } => "E002",
            Self::LogRead { .. } => "E003",
            Self::LogCorruption { .. } => "E004",
            Self::LogDestroy { .. } => "E005",
            Self::LogBothStreams { .. } => "E006",
            Self::ChunkSealed { .. } => "E101",
            Self::ChunkMisaligned { .. } => "E102",
            Self::IngestClosed => "E103",
            Self::MetaLoad { .. } => "E201",
            Self::ExportFailed { .. } => "E301",
            Self::ConfigValue { .. } => "E801",
            Self::Serialization(_) => "E802",
        }
    }

    /// Check if this error must take down its runner.
    ///
    /// A metadata-load failure aborts the correlation tick and propagates
    /// to the supervisor; everything else is reported and survived.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MetaLoad { .. })
    }

    /// Check if this error came from the storage layer.
    #[must_use]
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            Self::LogCreate { .. }
                | Self::LogAppend { .. }
                | Self::LogRead { .. }
                | Self::LogCorruption { .. }
                | Self::LogDestroy { .. }
                | Self::LogBothStreams { .. }
        )
    }
}

/// Result type alias using `StitchError`.
pub type Result<T> = std::result::Result<T, StitchError>;
