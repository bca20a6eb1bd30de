//! The in-memory handle for one time window's worth of spans.
//!
//! A chunk owns one append log and is writable only until its window
//! rotates. After sealing it moves through the ready queue to the
//! correlator, which reads the metadata list once (cached thereafter),
//! streams the point blobs back out for export, and finally drops the
//! backing storage.

use crate::error::{Result, StitchError};
use crate::span::{fields, Encode, Point, SpanMeta, Value};
use crate::storage::SpanLog;
use crate::types::{Id64, Id128};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Final identifier assignment for one span, produced by the correlator.
///
/// The slice handed to [`Chunk::get_pt_blob_and_feed`] must be in the
/// exact order of the chunk's stored metadata; points and assignments
/// pair positionally.
#[derive(Debug, Clone)]
pub struct AssignedSpan {
    /// The final trace id.
    pub trace_id: Id128,
    /// The final parent span id.
    pub parent_id: Id64,
    /// Encoding convention for the exported identifiers.
    pub encode: Encode,
    /// Whether the final ids came from application instrumentation.
    pub from_app: bool,
}

/// Durable container for exactly one window.
pub struct Chunk {
    window_start_ns: u64,
    window_end_ns: u64,
    sequence: u64,
    log: Box<dyn SpanLog>,
    /// Serializes writers into this chunk's two streams.
    write_lock: Mutex<()>,
    writable: AtomicBool,
    /// Populated on first read, immutable afterwards.
    meta_cache: OnceCell<Vec<SpanMeta>>,
}

impl Chunk {
    /// Create a writable chunk for the window `[start_ns, end_ns)`.
    #[must_use]
    pub fn new(window_start_ns: u64, window_end_ns: u64, sequence: u64, log: Box<dyn SpanLog>) -> Self {
        Self {
            window_start_ns,
            window_end_ns,
            sequence,
            log,
            write_lock: Mutex::new(()),
            writable: AtomicBool::new(true),
            meta_cache: OnceCell::new(),
        }
    }

    /// Window start, nanoseconds since the Unix epoch.
    #[must_use]
    pub fn window_start_ns(&self) -> u64 {
        self.window_start_ns
    }

    /// Window end (exclusive), nanoseconds since the Unix epoch.
    #[must_use]
    pub fn window_end_ns(&self) -> u64 {
        self.window_end_ns
    }

    /// Rotation sequence number of this chunk.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether this chunk still accepts writes.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::Acquire)
    }

    /// Mark the chunk read-only. Called exactly once, at rotation.
    pub fn seal(&self) {
        self.writable.store(false, Ordering::Release);
    }

    /// Persist a point batch into the window.
    ///
    /// Points without decodable span metadata are silently excluded. The
    /// surviving points and their metadata are appended to the two
    /// parallel streams back to back; the streams are not written
    /// transactionally, so a one-sided failure leaves them skewed for
    /// this window (reported, logged, not repaired).
    ///
    /// Returns the number of spans persisted.
    pub fn put_span(&self, pts: &[Point]) -> Result<usize> {
        if !self.is_writable() {
            return Err(StitchError::ChunkSealed {
                window_start_ns: self.window_start_ns,
            });
        }

        let mut metas = Vec::with_capacity(pts.len());
        let mut accepted = Vec::with_capacity(pts.len());
        for pt in pts {
            if let Some(meta) = SpanMeta::from_point(pt) {
                metas.push(meta);
                accepted.push(pt.clone());
            }
        }
        if metas.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock();
        let meta_res = self.log.put_meta(&metas);
        let point_res = self.log.put(&accepted);

        match (meta_res, point_res) {
            (Ok(()), Ok(())) => Ok(metas.len()),
            (Err(meta_err), Err(point_err)) => Err(StitchError::LogBothStreams {
                meta_cause: meta_err.to_string(),
                point_cause: point_err.to_string(),
            }),
            (Err(err), Ok(())) | (Ok(()), Err(err)) => {
                tracing::warn!(
                    window_start_ns = self.window_start_ns,
                    error = %err,
                    "one log stream failed; window streams are skewed"
                );
                Err(err)
            }
        }
    }

    /// Read the full ordered metadata list for this window.
    ///
    /// The list is loaded from storage once and cached; repeat calls
    /// return the cache without touching the log. Errors only surface
    /// for real read failures, never for end of stream.
    pub fn get_all_span_meta(&self) -> Result<&[SpanMeta]> {
        self.meta_cache
            .get_or_try_init(|| {
                let mut all = Vec::new();
                while let Some(batch) = self.log.get_meta()? {
                    all.extend(batch);
                }
                Ok(all)
            })
            .map(Vec::as_slice)
    }

    /// Stream this window's points out for export.
    ///
    /// Point blobs replay from storage in the order they were persisted
    /// and pair positionally with `spans`. Spans whose final trace id is
    /// in `reject` are skipped; every surviving point gets the assigned
    /// identifiers attached, and `feed` fires whenever `batch_size`
    /// points have accumulated and once more at end of stream.
    pub fn get_pt_blob_and_feed(
        &self,
        spans: &[AssignedSpan],
        reject: &HashSet<Id128>,
        batch_size: usize,
        feed: &mut dyn FnMut(Vec<Point>) -> Result<()>,
    ) -> Result<()> {
        let mut index = 0usize;
        let mut pending: Vec<Point> = Vec::with_capacity(batch_size);

        while let Some(batch) = self.log.get()? {
            for mut pt in batch {
                let assigned = spans.get(index).ok_or(StitchError::ChunkMisaligned {
                    stored: index + 1,
                    correlated: spans.len(),
                })?;
                index += 1;

                if reject.contains(&assigned.trace_id) {
                    continue;
                }

                attach_ids(&mut pt, assigned);
                pending.push(pt);

                if pending.len() >= batch_size {
                    feed(std::mem::take(&mut pending))?;
                }
            }
        }

        if index != spans.len() {
            return Err(StitchError::ChunkMisaligned {
                stored: index,
                correlated: spans.len(),
            });
        }

        if !pending.is_empty() {
            feed(pending)?;
        }
        Ok(())
    }

    /// Close the log and delete its backing storage.
    pub fn drop_storage(&self) -> Result<()> {
        self.log.destroy()
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("window_start_ns", &self.window_start_ns)
            .field("window_end_ns", &self.window_end_ns)
            .field("sequence", &self.sequence)
            .field("writable", &self.is_writable())
            .finish_non_exhaustive()
    }
}

/// Write the final identifiers onto an outgoing point.
fn attach_ids(pt: &mut Point, assigned: &AssignedSpan) {
    let (trace, parent) = match assigned.encode {
        Encode::Hex => (
            assigned.trace_id.string_hex(),
            assigned.parent_id.string_hex(),
        ),
        Encode::Dec => (
            assigned.trace_id.string_dec(),
            assigned.parent_id.string_dec(),
        ),
    };

    pt.set(fields::EBPF_TRACE_ID, Value::string(trace.clone()));
    pt.set(fields::EBPF_PARENT_ID, Value::string(parent.clone()));
    if assigned.from_app {
        pt.set(fields::APP_TRACE_ID, Value::string(trace));
        pt.set(fields::APP_PARENT_ID, Value::string(parent));
    }
}
