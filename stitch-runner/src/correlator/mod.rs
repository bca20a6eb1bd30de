//! Span correlator.
//!
//! Consumes sealed chunks two generations at a time, builds same-thread
//! and same-network-flow linkages across their spans, assigns
//! trace/parent identifiers and sampling decisions by backward traversal
//! from root spans, and streams the older window's points to the
//! exporter.
//!
//! Keeping one window of lookback means both halves of a network hop
//! that straddles a window boundary are visible before the span is
//! finalized, as long as end-to-end latency stays under one window,
//! while bounding memory to roughly two windows of spans.

mod arena;

pub use arena::{EbpfSpan, Generation, SpanArena, SpanRef};

use crate::config::RunnerConfig;
use crate::export::Exporter;
use crate::window::WindowManager;
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::sync::Arc;
use stitch_core::chunk::Chunk;
use stitch_core::error::{Result, StitchError};
use stitch_core::span::{Direction, SampleDecision, SpanKind};
use stitch_core::types::{Id64, Id128, RandId};
use tokio::sync::oneshot;

/// Upper bound on a `pre`-chain walk; linkage is built from unordered
/// input and a malformed feed must not hang the runner.
const MAX_WALK: usize = 4096;

/// Derive the deterministic trace id for a root span on a known flow.
///
/// Two processes that independently observed the same flow compute the
/// same digest, so one logical exchange gets one synthetic id without
/// any coordination.
fn flow_trace_id(net: Id128) -> Id128 {
    let mut buf = [0u8; 16];
    buf[..8].copy_from_slice(&net.low.to_le_bytes());
    buf[8..].copy_from_slice(&net.high.to_le_bytes());
    let digest: [u8; 16] = Md5::digest(buf).into();
    Id128::from_be_bytes(digest)
}

/// Spans recorded under one thread-trace key.
#[derive(Default)]
struct ThreadGroup {
    entry: Option<SpanRef>,
    others: Vec<SpanRef>,
}

/// Build linkages over the union of both generations, skipping spans a
/// previous tick already consumed.
///
/// - *Inner* (same thread): the entry span becomes `pre` of, and gains
///   as `childs`, every other span under its thread key; slot 0 of the
///   child list is the entry itself.
/// - *Outer* (same flow): the outgoing half's `next` is the incoming
///   half, and the incoming half's `pre` is the outgoing half.
fn connect_spans(arena: &mut SpanArena) {
    let mut inner: HashMap<u64, ThreadGroup> = HashMap::new();
    let mut outer: HashMap<Id128, [Option<SpanRef>; 2]> = HashMap::new();

    for r in arena.all_refs() {
        let span = arena.get(r);
        if span.used {
            continue;
        }

        let thread_id = span.meta.thread_trace_id;
        if !thread_id.is_zero() {
            let group = inner.entry(thread_id.as_u64()).or_default();
            if span.meta.kind == SpanKind::Entry && group.entry.is_none() {
                group.entry = Some(r);
            } else {
                group.others.push(r);
            }
        }

        let net = span.meta.net_trace_id;
        if !net.is_zero() {
            let pair = outer.entry(net).or_insert([None, None]);
            let slot = match span.meta.direction {
                Direction::Outgoing => 0,
                Direction::Incoming => 1,
            };
            if pair[slot].is_none() {
                pair[slot] = Some(r);
            }
        }
    }

    for group in inner.values() {
        let Some(entry) = group.entry else { continue };
        if group.others.is_empty() {
            continue;
        }
        let mut childs = Vec::with_capacity(group.others.len() + 1);
        childs.push(entry);
        childs.extend(group.others.iter().copied());
        for &child in &group.others {
            arena.get_mut(child).pre = Some(entry);
        }
        arena.get_mut(entry).childs = childs;
    }

    for pair in outer.values() {
        if let (Some(outgoing), Some(incoming)) = (pair[0], pair[1]) {
            arena.get_mut(outgoing).next = Some(incoming);
            arena.get_mut(incoming).pre = Some(outgoing);
        }
    }
}

/// Assign identifiers and sampling decisions to every still-unused span
/// of the older generation, walking each trace backward from its root.
fn link_and_gather_trace(
    arena: &mut SpanArena,
    rand: &RandId,
    use_app_trace: bool,
    sampling_rate: f64,
) {
    for start in arena.older_refs() {
        if arena.get(start).used {
            continue;
        }

        // Walk to the root: the first span with no (unconsumed) caller.
        let mut root = start;
        let mut hops = 0usize;
        while let Some(pre) = arena.get(root).pre {
            if arena.get(pre).used || hops >= MAX_WALK {
                break;
            }
            root = pre;
            hops += 1;
        }

        let root_net = arena.get(root).meta.net_trace_id;
        let synthesized = if root_net.is_zero() {
            rand.next_id128()
        } else {
            flow_trace_id(root_net)
        };

        // Backward depth-first walk from the root through next-hop and
        // sibling-call edges, flowing the trace id down.
        let mut visited: Vec<SpanRef> = Vec::new();
        let mut decision = SampleDecision::Unset;
        let mut stack: Vec<(SpanRef, Id128, Id64, bool)> =
            vec![(root, synthesized, Id64::zero(), false)];

        while let Some((r, flow_trace, flow_parent, flow_from_app)) = stack.pop() {
            if arena.get(r).used {
                continue;
            }

            let (trace_id, from_app) = {
                let node = arena.get_mut(r);
                node.used = true;

                // App-instrumented ids take precedence from the span
                // where they appear onward; ancestors already visited
                // keep what flowed to them.
                let (trace_id, parent_id, from_app) =
                    if use_app_trace && node.meta.has_app_trace() {
                        (node.meta.app_trace_id, node.meta.app_parent_id, true)
                    } else {
                        (flow_trace, flow_parent, flow_from_app)
                    };

                node.trace_id = trace_id;
                node.parent_id = parent_id;
                node.from_app = from_app;
                decision = decision.merge(node.meta.app_sampled);
                (trace_id, from_app)
            };
            visited.push(r);

            let span_id = arena.get(r).meta.span_id;
            if let Some(next) = arena.get(r).next {
                stack.push((next, trace_id, span_id, from_app));
            }
            let siblings: Vec<SpanRef> = arena.get(r).childs.iter().skip(1).copied().collect();
            for child in siblings {
                stack.push((child, trace_id, span_id, from_app));
            }
        }

        // One decision per trace; probabilistic sampling fills in the
        // traces that carried no explicit app decision.
        for r in visited {
            let node = arena.get_mut(r);
            node.decision = match decision {
                SampleDecision::Unset => {
                    if node.trace_id.sampled(sampling_rate) {
                        SampleDecision::Keep
                    } else {
                        SampleDecision::Reject
                    }
                }
                explicit => explicit,
            };
        }
    }
}

/// Consumes sealed chunks from a window manager, correlates them, and
/// republishes the correlated points to an exporter.
///
/// The runner owns its arena exclusively; nothing else touches span
/// nodes while a tick is in progress.
pub struct Runner {
    config: RunnerConfig,
    manager: Arc<WindowManager>,
    exporter: Arc<dyn Exporter>,
    rand: RandId,
    arena: SpanArena,
    older_chunk: Option<Arc<Chunk>>,
}

impl Runner {
    /// Create a runner over a manager's ready queue.
    #[must_use]
    pub fn new(
        config: RunnerConfig,
        manager: Arc<WindowManager>,
        exporter: Arc<dyn Exporter>,
    ) -> Self {
        Self {
            config: config.normalized(),
            manager,
            exporter,
            rand: RandId::new(),
            arena: SpanArena::new(),
            older_chunk: None,
        }
    }

    /// Replace the random-id source, for reproducible tests.
    #[must_use]
    pub fn with_rand(mut self, rand: RandId) -> Self {
        self.rand = rand;
        self
    }

    /// Process every currently ready chunk, oldest first.
    ///
    /// The run loop calls this on every tick; it is public so batch
    /// embeddings and tests can drive correlation without a timer.
    /// Returns the number of chunks processed.
    pub fn drain_ready(&mut self) -> Result<usize> {
        let mut processed = 0usize;
        while let Some(chunk) = self.manager.get_db_ready_chunk() {
            self.process_chunk(chunk)?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Correlate one dequeued chunk against the previous window, then
    /// export and drop that previous window.
    fn process_chunk(&mut self, chunk: Arc<Chunk>) -> Result<()> {
        let metas = chunk
            .get_all_span_meta()
            .map_err(|e| StitchError::MetaLoad {
                window_start_ns: chunk.window_start_ns(),
                cause: e.to_string(),
            })?;

        self.arena.fill_newer(metas);
        connect_spans(&mut self.arena);
        link_and_gather_trace(
            &mut self.arena,
            &self.rand,
            self.config.use_app_trace,
            self.config.sampling_rate,
        );

        self.export_older();
        self.arena.slide();
        self.older_chunk = Some(chunk);
        Ok(())
    }

    /// Stream the older window to the exporter and drop its storage.
    ///
    /// Exporter and stream errors are logged and dropped: delivery is
    /// at-most-once by design.
    fn export_older(&mut self) {
        let Some(chunk) = self.older_chunk.take() else {
            return;
        };

        let assigned = self.arena.older_assignments();
        let reject = self.arena.older_reject_set();
        let exporter = Arc::clone(&self.exporter);

        let result = chunk.get_pt_blob_and_feed(
            &assigned,
            &reject,
            self.config.feed_batch,
            &mut |batch| {
                if let Err(e) = exporter.export(batch) {
                    tracing::warn!(error = %e, "exporter rejected batch; dropped");
                }
                Ok(())
            },
        );
        if let Err(e) = result {
            tracing::error!(
                error = %e,
                window_start_ns = chunk.window_start_ns(),
                "failed to stream window for export"
            );
        }

        if let Err(e) = chunk.drop_storage() {
            tracing::warn!(error = %e, "failed to drop chunk storage");
        }
    }

    /// Drive the correlation loop until shutdown or a fatal error.
    ///
    /// A metadata-load failure propagates out of this future; the caller
    /// is expected to treat it as fatal and restart the runner.
    pub async fn run(mut self, mut shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.window);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        tracing::info!(
            window_ms = self.config.window.as_millis() as u64,
            sampling_rate = self.config.sampling_rate,
            "correlator started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    tracing::info!("correlator shut down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.drain_ready() {
                        Ok(0) => {}
                        Ok(processed) => {
                            tracing::debug!(processed, "correlation tick");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "fatal correlation failure");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stitch_core::span::{Encode, SpanMeta};

    fn meta(
        span_id: u64,
        thread: u64,
        kind: SpanKind,
        direction: Direction,
        net: Id128,
    ) -> SpanMeta {
        SpanMeta {
            span_id: Id64::new(span_id),
            thread_trace_id: Id64::new(thread),
            net_trace_id: net,
            direction,
            kind,
            etrace_id: Id128::zero(),
            eparent_id: Id64::zero(),
            app_trace_id: Id128::zero(),
            app_parent_id: Id64::zero(),
            app_sampled: SampleDecision::Unset,
            encode: Encode::Hex,
        }
    }

    fn older_arena(metas: Vec<SpanMeta>) -> SpanArena {
        let mut arena = SpanArena::new();
        arena.fill_newer(&metas);
        arena.slide();
        arena
    }

    #[test]
    fn same_thread_spans_link_under_the_entry() {
        let mut arena = older_arena(vec![
            meta(1, 100, SpanKind::Entry, Direction::Incoming, Id128::zero()),
            meta(2, 100, SpanKind::Exit, Direction::Outgoing, Id128::zero()),
            meta(3, 100, SpanKind::Exit, Direction::Outgoing, Id128::zero()),
        ]);
        connect_spans(&mut arena);

        let entry = SpanRef::new(Generation::Older, 0);
        let exit_a = SpanRef::new(Generation::Older, 1);
        let exit_b = SpanRef::new(Generation::Older, 2);

        assert_eq!(arena.get(entry).childs, vec![entry, exit_a, exit_b]);
        assert_eq!(arena.get(exit_a).pre, Some(entry));
        assert_eq!(arena.get(exit_b).pre, Some(entry));
        assert!(arena.get(exit_a).childs.is_empty());
        assert!(arena.get(exit_b).childs.is_empty());
    }

    #[test]
    fn flow_pair_links_across_generations() {
        let flow = Id128::new(11, 22);
        let mut arena = SpanArena::new();
        arena.fill_newer(&[meta(1, 100, SpanKind::Exit, Direction::Outgoing, flow)]);
        arena.slide();
        arena.fill_newer(&[meta(2, 200, SpanKind::Entry, Direction::Incoming, flow)]);
        connect_spans(&mut arena);

        let outgoing = SpanRef::new(Generation::Older, 0);
        let incoming = SpanRef::new(Generation::Newer, 0);
        assert_eq!(arena.get(outgoing).next, Some(incoming));
        assert_eq!(arena.get(incoming).pre, Some(outgoing));
    }

    #[test]
    fn matched_flow_shares_trace_id_and_parent() {
        let flow = Id128::new(11, 22);
        let root_flow = Id128::new(1, 2);
        let mut arena = older_arena(vec![
            meta(1, 100, SpanKind::Entry, Direction::Incoming, root_flow),
            meta(2, 100, SpanKind::Exit, Direction::Outgoing, flow),
            meta(3, 200, SpanKind::Entry, Direction::Incoming, flow),
        ]);
        connect_spans(&mut arena);
        link_and_gather_trace(&mut arena, &RandId::from_seed(1), true, 1.0);

        let entry = arena.get(SpanRef::new(Generation::Older, 0));
        let exit = arena.get(SpanRef::new(Generation::Older, 1));
        let callee = arena.get(SpanRef::new(Generation::Older, 2));

        assert_eq!(entry.trace_id, flow_trace_id(root_flow));
        assert_eq!(exit.trace_id, entry.trace_id);
        assert_eq!(callee.trace_id, entry.trace_id);

        // The callee's parent is the caller's outgoing span; the
        // caller's exit's parent is its own thread entry.
        assert_eq!(callee.parent_id, exit.meta.span_id);
        assert_eq!(exit.parent_id, entry.meta.span_id);
        assert!(entry.parent_id.is_zero());
        assert!(entry.used && exit.used && callee.used);
    }

    #[test]
    fn flow_derived_ids_agree_across_processes() {
        let flow = Id128::new(0xaaaa, 0xbbbb);
        assert_eq!(flow_trace_id(flow), flow_trace_id(flow));
        assert_ne!(flow_trace_id(flow), flow_trace_id(Id128::new(1, 2)));
    }

    #[test]
    fn rootless_trace_gets_random_id() {
        let mut arena = older_arena(vec![meta(
            1,
            100,
            SpanKind::Entry,
            Direction::Incoming,
            Id128::zero(),
        )]);
        connect_spans(&mut arena);
        link_and_gather_trace(&mut arena, &RandId::from_seed(5), true, 1.0);

        let entry = arena.get(SpanRef::new(Generation::Older, 0));
        assert!(!entry.trace_id.is_zero());
    }

    #[test]
    fn zero_rate_rejects_everything() {
        let mut arena = older_arena(vec![
            meta(1, 100, SpanKind::Entry, Direction::Incoming, Id128::new(3, 4)),
            meta(2, 100, SpanKind::Exit, Direction::Outgoing, Id128::zero()),
        ]);
        connect_spans(&mut arena);
        link_and_gather_trace(&mut arena, &RandId::from_seed(1), true, 0.0);

        let reject = arena.older_reject_set();
        let entry = arena.get(SpanRef::new(Generation::Older, 0));
        assert!(reject.contains(&entry.trace_id));
    }

    #[test]
    fn explicit_keep_overrides_probabilistic_reject() {
        let mut kept = meta(1, 100, SpanKind::Entry, Direction::Incoming, Id128::new(3, 4));
        kept.app_sampled = SampleDecision::Keep;
        let mut arena = older_arena(vec![
            kept,
            meta(2, 100, SpanKind::Exit, Direction::Outgoing, Id128::zero()),
        ]);
        connect_spans(&mut arena);
        link_and_gather_trace(&mut arena, &RandId::from_seed(1), true, 0.0);

        assert!(arena.older_reject_set().is_empty());
    }

    #[test]
    fn explicit_reject_beats_keep_across_the_trace() {
        let mut kept = meta(1, 100, SpanKind::Entry, Direction::Incoming, Id128::new(3, 4));
        kept.app_sampled = SampleDecision::Keep;
        let mut rejected = meta(2, 100, SpanKind::Exit, Direction::Outgoing, Id128::zero());
        rejected.app_sampled = SampleDecision::Reject;

        let mut arena = older_arena(vec![kept, rejected]);
        connect_spans(&mut arena);
        link_and_gather_trace(&mut arena, &RandId::from_seed(1), true, 1.0);

        let reject = arena.older_reject_set();
        assert_eq!(reject.len(), 1);
    }

    #[test]
    fn app_ids_take_precedence_from_first_appearance() {
        let flow = Id128::new(7, 8);
        let root = meta(1, 100, SpanKind::Entry, Direction::Incoming, Id128::new(1, 1));
        let exit = meta(2, 100, SpanKind::Exit, Direction::Outgoing, flow);
        let mut callee = meta(3, 200, SpanKind::Entry, Direction::Incoming, flow);
        callee.app_trace_id = Id128::new(0xfeed, 0);
        callee.app_parent_id = Id64::new(0xbeef);
        callee.encode = Encode::Dec;

        let mut arena = older_arena(vec![root, exit, callee]);
        connect_spans(&mut arena);
        link_and_gather_trace(&mut arena, &RandId::from_seed(1), true, 1.0);

        let root = arena.get(SpanRef::new(Generation::Older, 0));
        let callee = arena.get(SpanRef::new(Generation::Older, 2));

        // Ancestors keep the synthesized id; the app span switches.
        assert_eq!(root.trace_id, flow_trace_id(Id128::new(1, 1)));
        assert!(!root.from_app);
        assert_eq!(callee.trace_id, Id128::new(0xfeed, 0));
        assert_eq!(callee.parent_id, Id64::new(0xbeef));
        assert!(callee.from_app);
    }

    #[test]
    fn app_ids_are_ignored_when_disabled() {
        let mut entry = meta(1, 100, SpanKind::Entry, Direction::Incoming, Id128::new(1, 1));
        entry.app_trace_id = Id128::new(0xfeed, 0);
        entry.app_parent_id = Id64::new(0xbeef);

        let mut arena = older_arena(vec![entry]);
        connect_spans(&mut arena);
        link_and_gather_trace(&mut arena, &RandId::from_seed(1), false, 1.0);

        let entry = arena.get(SpanRef::new(Generation::Older, 0));
        assert_eq!(entry.trace_id, flow_trace_id(Id128::new(1, 1)));
        assert!(!entry.from_app);
    }

    #[test]
    fn used_spans_are_not_relinked() {
        let mut arena = older_arena(vec![
            meta(1, 100, SpanKind::Entry, Direction::Incoming, Id128::zero()),
            meta(2, 100, SpanKind::Exit, Direction::Outgoing, Id128::zero()),
        ]);
        connect_spans(&mut arena);
        link_and_gather_trace(&mut arena, &RandId::from_seed(1), true, 1.0);

        let before = arena.get(SpanRef::new(Generation::Older, 1)).trace_id;

        // A second pass must not revisit or reassign anything.
        connect_spans(&mut arena);
        link_and_gather_trace(&mut arena, &RandId::from_seed(2), true, 1.0);
        let after = arena.get(SpanRef::new(Generation::Older, 1)).trace_id;
        assert_eq!(before, after);
    }
}
