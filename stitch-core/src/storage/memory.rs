//! In-memory span log for tests and diskless deployments.

use super::{SpanLog, SpanLogFactory};
use crate::error::Result;
use crate::span::{Point, SpanMeta};
use parking_lot::Mutex;

struct Batches<T> {
    batches: Vec<Vec<T>>,
    cursor: usize,
}

impl<T> Default for Batches<T> {
    fn default() -> Self {
        Self {
            batches: Vec::new(),
            cursor: 0,
        }
    }
}

impl<T: Clone> Batches<T> {
    fn push(&mut self, batch: &[T]) {
        self.batches.push(batch.to_vec());
    }

    fn next(&mut self) -> Option<Vec<T>> {
        let batch = self.batches.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(batch)
    }
}

/// In-memory implementation of [`SpanLog`].
#[derive(Default)]
pub struct MemorySpanLog {
    points: Mutex<Batches<Point>>,
    meta: Mutex<Batches<SpanMeta>>,
}

impl MemorySpanLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of point batches currently held.
    #[must_use]
    pub fn point_batches(&self) -> usize {
        self.points.lock().batches.len()
    }
}

impl SpanLog for MemorySpanLog {
    fn put(&self, pts: &[Point]) -> Result<()> {
        self.points.lock().push(pts);
        Ok(())
    }

    fn get(&self) -> Result<Option<Vec<Point>>> {
        Ok(self.points.lock().next())
    }

    fn put_meta(&self, metas: &[SpanMeta]) -> Result<()> {
        self.meta.lock().push(metas);
        Ok(())
    }

    fn get_meta(&self) -> Result<Option<Vec<SpanMeta>>> {
        Ok(self.meta.lock().next())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) {}

    fn destroy(&self) -> Result<()> {
        let mut points = self.points.lock();
        points.batches.clear();
        points.cursor = 0;
        let mut meta = self.meta.lock();
        meta.batches.clear();
        meta.cursor = 0;
        Ok(())
    }
}

/// Factory handing out fresh [`MemorySpanLog`]s.
#[derive(Debug, Default)]
pub struct MemoryLogFactory;

impl MemoryLogFactory {
    /// Create a factory.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SpanLogFactory for MemoryLogFactory {
    fn create(&self, _window_start_ns: u64) -> Result<Box<dyn SpanLog>> {
        Ok(Box::new(MemorySpanLog::new()))
    }
}
