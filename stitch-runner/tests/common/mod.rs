//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use stitch_core::span::{fields, Point, Value};
use stitch_core::storage::MemoryLogFactory;
use stitch_runner::config::RunnerConfig;
use stitch_runner::window::WindowManager;

/// A config with a long window so timers never interfere with
/// manually driven rotation.
pub fn test_config() -> RunnerConfig {
    RunnerConfig::default()
        .with_window(Duration::from_secs(600))
        .with_max_ready_chunks(8)
}

/// A manager backed by in-memory chunk logs.
pub fn memory_manager(config: RunnerConfig) -> Arc<WindowManager> {
    Arc::new(WindowManager::new(config, Arc::new(MemoryLogFactory::new())).unwrap())
}

/// Build a span-carrying point by hand.
pub fn span_point(
    span_id: u64,
    thread: u64,
    flow: (u64, u64),
    direction: &str,
    span_type: &str,
) -> Point {
    let mut pt = Point::new("dketrace", span_id * 10)
        .with(fields::SPAN_ID, Value::uint(span_id))
        .with(fields::DIRECTION, Value::string(direction))
        .with(fields::EBPF_SPAN_TYPE, Value::string(span_type))
        .with(fields::REQ_SEQ, Value::uint(flow.0))
        .with(fields::RESP_SEQ, Value::uint(flow.1));
    if thread != 0 {
        pt.set(fields::THREAD_TRACE_ID, Value::uint(thread));
    }
    pt
}

/// Find the exported point carrying a given span id.
pub fn find_span(pts: &[Point], span_id: u64) -> &Point {
    pts.iter()
        .find(|pt| pt.get_u64(fields::SPAN_ID) == Some(span_id))
        .unwrap_or_else(|| panic!("span {span_id} was not exported"))
}
