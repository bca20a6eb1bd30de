//! Windowed ingestion manager.
//!
//! Owns the currently writable chunk, rotates it on a fixed interval,
//! and queues sealed chunks (bounded depth) for the correlator. The
//! bounded queue is the system's primary backpressure mechanism: when it
//! fills, no new writable chunk is created and ingestion stays disabled
//! until the correlator drains a slot, trading freshness for bounded
//! memory.

use crate::config::RunnerConfig;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use stitch_core::chunk::Chunk;
use stitch_core::error::{Result, StitchError};
use stitch_core::span::Point;
use stitch_core::storage::SpanLogFactory;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Shared manager state, mutated only under its own locks.
struct ManagerInner {
    config: RunnerConfig,
    factory: Arc<dyn SpanLogFactory>,
    /// The currently writable chunk; `None` while ingestion is disabled.
    active: Mutex<Option<Arc<Chunk>>>,
    /// Sealed chunks awaiting correlation, oldest first.
    ready: Mutex<VecDeque<Arc<Chunk>>>,
    /// Rotation counter, also used as the chunk sequence number.
    sequence: AtomicU64,
}

impl ManagerInner {
    /// Write a batch into the active chunk.
    ///
    /// Returns the number of spans persisted; `Ok(0)` when ingestion is
    /// disabled. Storage errors are reported but never abort ingestion.
    fn write_batch(&self, pts: &[Point]) -> Result<usize> {
        let active = self.active.lock();
        match active.as_ref() {
            Some(chunk) => chunk.put_span(pts),
            None => {
                tracing::warn!(
                    batch_len = pts.len(),
                    "no writable chunk; batch not persisted"
                );
                Ok(0)
            }
        }
    }

    /// Rotate the window: seal and enqueue the active chunk, then open a
    /// fresh one if the ready queue has spare capacity.
    fn replace_header(&self) {
        let now = now_ns();
        let mut active = self.active.lock();
        let mut ready = self.ready.lock();

        if let Some(chunk) = active.take() {
            chunk.seal();
            tracing::debug!(
                window_start_ns = chunk.window_start_ns(),
                sequence = chunk.sequence(),
                "chunk sealed and queued"
            );
            ready.push_back(chunk);
        }

        if ready.len() < self.config.max_ready_chunks {
            match self.create_chunk(now) {
                Ok(chunk) => *active = Some(Arc::new(chunk)),
                Err(e) => {
                    tracing::error!(error = %e, "failed to create chunk; ingestion disabled");
                }
            }
        } else {
            tracing::warn!(
                depth = ready.len(),
                "ready queue full; ingestion disabled until a chunk is dequeued"
            );
        }
    }

    fn create_chunk(&self, window_start_ns: u64) -> Result<Chunk> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let window_end_ns = window_start_ns + self.config.window.as_nanos() as u64;
        let log = self.factory.create(window_start_ns)?;
        Ok(Chunk::new(window_start_ns, window_end_ns, sequence, log))
    }

    /// Best-effort flush at shutdown: seal and enqueue the active chunk.
    fn flush(&self) {
        let mut active = self.active.lock();
        if let Some(chunk) = active.take() {
            chunk.seal();
            self.ready.lock().push_back(chunk);
        }
    }
}

/// Accepts point batches, rotates time windows, and feeds the
/// correlator's ready queue.
pub struct WindowManager {
    inner: Arc<ManagerInner>,
    insert_tx: mpsc::Sender<Vec<Point>>,
    insert_rx: Mutex<Option<mpsc::Receiver<Vec<Point>>>>,
    shutdown_tx: RwLock<Option<oneshot::Sender<()>>>,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WindowManager {
    /// Create a manager and its first writable chunk.
    ///
    /// The first chunk is created synchronously so nothing submitted
    /// before [`WindowManager::start`] is lost.
    pub fn new(config: RunnerConfig, factory: Arc<dyn SpanLogFactory>) -> Result<Self> {
        let config = config.normalized();
        let (insert_tx, insert_rx) = mpsc::channel(config.insert_channel_capacity);

        let inner = Arc::new(ManagerInner {
            config,
            factory,
            active: Mutex::new(None),
            ready: Mutex::new(VecDeque::new()),
            sequence: AtomicU64::new(0),
        });

        let first = inner.create_chunk(now_ns())?;
        *inner.active.lock() = Some(Arc::new(first));

        Ok(Self {
            inner,
            insert_tx,
            insert_rx: Mutex::new(Some(insert_rx)),
            shutdown_tx: RwLock::new(None),
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        })
    }

    /// Spawn the manager loop.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(rx) = self.insert_rx.lock().take() else {
            return;
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.write() = Some(shutdown_tx);

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(run_loop(inner, rx, shutdown_rx));
        *self.handle.lock() = Some(handle);
    }

    /// Submit a point batch for ingestion.
    ///
    /// Blocks (asynchronously) while the bounded channel is full; this
    /// is the only backpressure point visible to the caller.
    pub async fn insert_span(&self, pts: Vec<Point>) -> Result<()> {
        self.insert_tx
            .send(pts)
            .await
            .map_err(|_| StitchError::IngestClosed)
    }

    /// Pop the oldest sealed chunk, or `None` when the queue is empty.
    #[must_use]
    pub fn get_db_ready_chunk(&self) -> Option<Arc<Chunk>> {
        self.inner.ready.lock().pop_front()
    }

    /// Number of sealed chunks awaiting correlation.
    #[must_use]
    pub fn ready_len(&self) -> usize {
        self.inner.ready.lock().len()
    }

    /// Whether a writable chunk currently exists.
    #[must_use]
    pub fn is_ingesting(&self) -> bool {
        self.inner.active.lock().is_some()
    }

    /// Rotate the window immediately.
    ///
    /// The manager loop calls this on every timer tick; embeddings that
    /// drive rotation themselves (tests, batch replay) call it directly.
    pub fn rotate(&self) {
        self.inner.replace_header();
    }

    /// Write a batch straight into the active chunk, bypassing the
    /// channel. Used by the loop on receive and by direct embeddings.
    pub fn write_batch(&self, pts: &[Point]) -> Result<usize> {
        self.inner.write_batch(pts)
    }

    /// Stop the loop and flush the active chunk into the ready queue.
    ///
    /// A batch submitted concurrently with shutdown is not guaranteed to
    /// be flushed.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.write().take() {
            let _ = tx.send(());
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        } else {
            // Loop never started; flush directly.
            self.inner.flush();
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for WindowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowManager")
            .field("ready", &self.ready_len())
            .field("ingesting", &self.is_ingesting())
            .finish_non_exhaustive()
    }
}

/// The manager loop: timer rotation, batch receive, shutdown flush.
async fn run_loop(
    inner: Arc<ManagerInner>,
    mut rx: mpsc::Receiver<Vec<Point>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(inner.config.window);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; consume it so the first
    // rotation happens one full window after start.
    ticker.tick().await;

    tracing::info!(
        window_ms = inner.config.window.as_millis() as u64,
        max_ready_chunks = inner.config.max_ready_chunks,
        "window manager started"
    );

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                inner.flush();
                tracing::info!("window manager shut down");
                break;
            }
            _ = ticker.tick() => {
                inner.replace_header();
            }
            batch = rx.recv() => match batch {
                Some(pts) => {
                    if let Err(e) = inner.write_batch(&pts) {
                        // Partial storage failures are reported, never
                        // escalated out of the ingestion path.
                        tracing::error!(error = %e, "failed to persist batch");
                    }
                }
                None => {
                    inner.flush();
                    break;
                }
            }
        }
    }
}

/// Current time, nanoseconds since the Unix epoch.
fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stitch_core::span::{fields, Value};
    use stitch_core::storage::MemoryLogFactory;

    fn test_manager(depth: usize) -> WindowManager {
        let config = RunnerConfig::default()
            .with_window(std::time::Duration::from_secs(60))
            .with_max_ready_chunks(depth);
        WindowManager::new(config, Arc::new(MemoryLogFactory::new())).unwrap()
    }

    fn span_point(id: u64) -> Point {
        Point::new("dketrace", 1)
            .with(fields::SPAN_ID, Value::uint(id))
            .with(fields::DIRECTION, Value::string("incoming"))
            .with(fields::EBPF_SPAN_TYPE, Value::string("entry"))
    }

    #[test]
    fn first_chunk_exists_at_construction() {
        let manager = test_manager(4);
        assert!(manager.is_ingesting());
        assert_eq!(manager.ready_len(), 0);
    }

    #[test]
    fn rotation_queues_chunks_fifo() {
        let manager = test_manager(4);

        manager.write_batch(&[span_point(1)]).unwrap();
        manager.rotate();
        manager.write_batch(&[span_point(2)]).unwrap();
        manager.rotate();

        assert_eq!(manager.ready_len(), 2);

        let first = manager.get_db_ready_chunk().unwrap();
        let second = manager.get_db_ready_chunk().unwrap();
        assert!(first.sequence() < second.sequence());
        assert_eq!(
            first.get_all_span_meta().unwrap()[0].span_id.as_u64(),
            1
        );
        assert_eq!(
            second.get_all_span_meta().unwrap()[0].span_id.as_u64(),
            2
        );
        assert!(manager.get_db_ready_chunk().is_none());
    }

    #[test]
    fn full_queue_disables_ingestion_until_drained() {
        let manager = test_manager(2);

        manager.rotate(); // queue: 1
        manager.rotate(); // queue: 2, full; no new chunk
        assert_eq!(manager.ready_len(), 2);
        assert!(!manager.is_ingesting());

        // Writes are dropped, not errors.
        assert_eq!(manager.write_batch(&[span_point(9)]).unwrap(), 0);

        // Draining one slot lets the next rotation re-enable ingestion.
        let _ = manager.get_db_ready_chunk().unwrap();
        manager.rotate();
        assert!(manager.is_ingesting());
        assert_eq!(manager.write_batch(&[span_point(10)]).unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn channel_path_flushes_on_shutdown() {
        let manager = test_manager(4);
        manager.start();

        manager.insert_span(vec![span_point(5)]).await.unwrap();
        // Let the loop drain the channel before stopping it.
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        manager.shutdown().await;

        let chunk = manager.get_db_ready_chunk().unwrap();
        let metas = chunk.get_all_span_meta().unwrap();
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].span_id.as_u64(), 5);
    }

    #[tokio::test]
    async fn insert_after_shutdown_is_an_error() {
        let manager = test_manager(4);
        manager.start();
        manager.shutdown().await;

        let result = manager.insert_span(vec![span_point(1)]).await;
        assert!(matches!(result, Err(StitchError::IngestClosed)));
    }
}
