//! Runner configuration.

use std::time::Duration;

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(20);

/// Windows at or below this length are treated as misconfigured.
const MIN_WINDOW: Duration = Duration::from_micros(1);

/// Configuration for one ingestion-manager/correlator pair.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Length of one time window.
    pub window: Duration,
    /// Maximum depth of the completed-chunk queue. When the queue is
    /// full, ingestion is disabled until a chunk is dequeued.
    pub max_ready_chunks: usize,
    /// Probabilistic sampling rate in `[0, 1]`, applied to traces that
    /// carry no explicit application decision.
    pub sampling_rate: f64,
    /// Use application-instrumented trace/parent ids when present.
    pub use_app_trace: bool,
    /// Capacity of the bounded ingestion channel; `insert_span` blocks
    /// when it is full.
    pub insert_channel_capacity: usize,
    /// Points accumulated before the export callback fires.
    pub feed_batch: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_ready_chunks: 8,
            sampling_rate: 1.0,
            use_app_trace: true,
            insert_channel_capacity: 64,
            feed_batch: 512,
        }
    }
}

impl RunnerConfig {
    /// Load configuration from `STITCH_*` environment variables, falling
    /// back to defaults for anything absent or unparseable.
    #[must_use]
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Some(secs) = read_env::<u64>("STITCH_WINDOW_SECS") {
            config.window = Duration::from_secs(secs);
        }
        if let Some(depth) = read_env::<usize>("STITCH_MAX_READY_CHUNKS") {
            config.max_ready_chunks = depth;
        }
        if let Some(rate) = read_env::<f64>("STITCH_SAMPLING_RATE") {
            config.sampling_rate = rate;
        }
        if let Some(enabled) = read_env::<bool>("STITCH_USE_APP_TRACE") {
            config.use_app_trace = enabled;
        }

        config.normalized()
    }

    /// Set the window length.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the completed-chunk queue depth.
    #[must_use]
    pub fn with_max_ready_chunks(mut self, depth: usize) -> Self {
        self.max_ready_chunks = depth;
        self
    }

    /// Set the sampling rate.
    #[must_use]
    pub fn with_sampling_rate(mut self, rate: f64) -> Self {
        self.sampling_rate = rate;
        self
    }

    /// Enable or disable application trace ids.
    #[must_use]
    pub fn with_app_trace(mut self, enabled: bool) -> Self {
        self.use_app_trace = enabled;
        self
    }

    /// Apply the guard rails: a window at or below one microsecond falls
    /// back to the default, the sampling rate is clamped to `[0, 1]`,
    /// and the queue depth is at least one.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.window <= MIN_WINDOW {
            tracing::warn!(
                configured_us = self.window.as_micros() as u64,
                "window length misconfigured; falling back to default"
            );
            self.window = DEFAULT_WINDOW;
        }
        self.sampling_rate = self.sampling_rate.clamp(0.0, 1.0);
        if self.max_ready_chunks == 0 {
            self.max_ready_chunks = 1;
        }
        if self.insert_channel_capacity == 0 {
            self.insert_channel_capacity = 1;
        }
        if self.feed_batch == 0 {
            self.feed_batch = 512;
        }
        self
    }
}

fn read_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_window_falls_back_to_default() {
        let config = RunnerConfig::default()
            .with_window(Duration::from_nanos(500))
            .normalized();
        assert_eq!(config.window, DEFAULT_WINDOW);
    }

    #[test]
    fn sane_window_is_kept() {
        let config = RunnerConfig::default()
            .with_window(Duration::from_secs(5))
            .normalized();
        assert_eq!(config.window, Duration::from_secs(5));
    }

    #[test]
    fn sampling_rate_is_clamped() {
        let config = RunnerConfig::default().with_sampling_rate(1.7).normalized();
        assert!((config.sampling_rate - 1.0).abs() < f64::EPSILON);

        let config = RunnerConfig::default()
            .with_sampling_rate(-0.3)
            .normalized();
        assert!(config.sampling_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn zero_queue_depth_becomes_one() {
        let config = RunnerConfig::default().with_max_ready_chunks(0).normalized();
        assert_eq!(config.max_ready_chunks, 1);
    }
}
