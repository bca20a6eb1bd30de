//! Test support: synthetic trace generation and a collecting exporter.
//!
//! Used by this crate's integration tests and handy for downstream
//! embedders writing their own.

use crate::export::Exporter;
use parking_lot::Mutex;
use stitch_core::error::Result;
use stitch_core::span::{fields, Point, Value};

/// Exporter that buffers everything it receives.
#[derive(Debug, Default)]
pub struct CollectingExporter {
    pts: Mutex<Vec<Point>>,
}

impl CollectingExporter {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything exported so far.
    #[must_use]
    pub fn collected(&self) -> Vec<Point> {
        self.pts.lock().clone()
    }

    /// Number of points exported so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.pts.lock().len()
    }
}

impl Exporter for CollectingExporter {
    fn export(&self, pts: Vec<Point>) -> Result<()> {
        self.pts.lock().extend(pts);
        Ok(())
    }
}

/// Shape of a synthetic call tree.
#[derive(Debug, Clone, Copy)]
pub struct TraceShape {
    /// Number of call levels below (and including) the root call.
    pub depth: u32,
    /// Outbound calls made by each handler that is not at the last
    /// level.
    pub children: u32,
}

/// A generated trace: points in capture order plus the span count.
#[derive(Debug)]
pub struct SyntheticTrace {
    /// Point records, in the order the kernel probe would emit them.
    pub points: Vec<Point>,
    /// Total spans generated.
    pub span_count: usize,
}

/// Deterministic id counters for span, thread, and sequence numbers.
struct Counters {
    next_span: u64,
    next_thread: u64,
    next_seq: u64,
    next_ts: u64,
}

impl Counters {
    fn new() -> Self {
        Self {
            next_span: 1,
            next_thread: 1000,
            next_seq: 1,
            next_ts: 1_000_000,
        }
    }

    fn span_id(&mut self) -> u64 {
        let id = self.next_span;
        self.next_span += 1;
        id
    }

    fn thread_id(&mut self) -> u64 {
        let id = self.next_thread;
        self.next_thread += 1;
        id
    }

    /// A fresh (request, response) sequence-number pair.
    fn flow(&mut self) -> (u64, u64) {
        let req = self.next_seq;
        let resp = self.next_seq + 1;
        self.next_seq += 2;
        (req, resp)
    }

    fn timestamp(&mut self) -> u64 {
        let ts = self.next_ts;
        self.next_ts += 1_000;
        ts
    }
}

fn span_point(
    counters: &mut Counters,
    span_id: u64,
    thread: u64,
    flow: (u64, u64),
    direction: &str,
    span_type: &str,
) -> Point {
    Point::new("dketrace", counters.timestamp())
        .with(fields::SPAN_ID, Value::uint(span_id))
        .with(fields::THREAD_TRACE_ID, Value::uint(thread))
        .with(fields::REQ_SEQ, Value::uint(flow.0))
        .with(fields::RESP_SEQ, Value::uint(flow.1))
        .with(fields::DIRECTION, Value::string(direction))
        .with(fields::EBPF_SPAN_TYPE, Value::string(span_type))
}

/// One handled call: an entry span plus, below the last level, child
/// calls each made of an exit span and the callee's own handled call.
fn gen_call(
    level: u32,
    shape: TraceShape,
    counters: &mut Counters,
    flow: (u64, u64),
    out: &mut Vec<Point>,
) {
    let thread = counters.thread_id();
    let entry_id = counters.span_id();
    out.push(span_point(
        counters, entry_id, thread, flow, "incoming", "entry",
    ));

    if level >= shape.depth {
        return;
    }
    for _ in 0..shape.children {
        let child_flow = counters.flow();
        let exit_id = counters.span_id();
        out.push(span_point(
            counters, exit_id, thread, child_flow, "outgoing", "exit",
        ));
        gen_call(level + 1, shape, counters, child_flow, out);
    }
}

/// Generate one synthetic distributed trace.
#[must_use]
pub fn gen_trace(shape: TraceShape) -> SyntheticTrace {
    let mut counters = Counters::new();
    let mut points = Vec::new();
    let root_flow = counters.flow();
    gen_call(1, shape, &mut counters, root_flow, &mut points);
    let span_count = points.len();
    SyntheticTrace { points, span_count }
}
