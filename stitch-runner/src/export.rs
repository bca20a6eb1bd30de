//! Exporter interface.
//!
//! The correlator calls the exporter synchronously, in fixed-size
//! batches, from its own task. Delivery is at-most-once: a failed batch
//! is logged by the caller and dropped, never retried.

use std::sync::Arc;
use stitch_core::error::Result;
use stitch_core::span::Point;

/// Receives batches of correlated points.
pub trait Exporter: Send + Sync {
    /// Deliver one batch downstream.
    fn export(&self, pts: Vec<Point>) -> Result<()>;
}

/// Adapter turning a closure into an [`Exporter`].
pub struct FnExporter<F> {
    callback: F,
}

impl<F> FnExporter<F>
where
    F: Fn(Vec<Point>) -> Result<()> + Send + Sync,
{
    /// Wrap a callback.
    pub fn new(callback: F) -> Self {
        Self { callback }
    }

    /// Wrap a callback directly into the `Arc<dyn Exporter>` the runner
    /// takes.
    pub fn arc(callback: F) -> Arc<dyn Exporter>
    where
        F: 'static,
    {
        Arc::new(Self::new(callback))
    }
}

impl<F> Exporter for FnExporter<F>
where
    F: Fn(Vec<Point>) -> Result<()> + Send + Sync,
{
    fn export(&self, pts: Vec<Point>) -> Result<()> {
        (self.callback)(pts)
    }
}

impl<F> std::fmt::Debug for FnExporter<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExporter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn closure_exporter_receives_batches() {
        let seen = Arc::new(Mutex::new(0usize));
        let seen_clone = Arc::clone(&seen);
        let exporter = FnExporter::arc(move |pts| {
            *seen_clone.lock() += pts.len();
            Ok(())
        });

        exporter
            .export(vec![Point::new("a", 1), Point::new("b", 2)])
            .unwrap();
        assert_eq!(*seen.lock(), 2);
    }
}
