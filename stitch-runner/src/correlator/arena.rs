//! Two-generation span arena.
//!
//! Correlation nodes for the two active windows live in two indexable
//! sequences; links between nodes are `(generation, index)` handles
//! rather than pointers, and sliding the window is an O(1) swap of the
//! generations. The arena is owned exclusively by its runner task for
//! the duration of one correlation tick, which is what makes in-place
//! `used`/sampling mutation safe.

use std::collections::HashSet;
use stitch_core::chunk::AssignedSpan;
use stitch_core::span::{SampleDecision, SpanMeta};
use stitch_core::types::{Id64, Id128};

/// Which of the two active windows a span belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    /// The window about to be exported.
    Older,
    /// The most recently dequeued window.
    Newer,
}

/// Handle to one span node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanRef {
    /// The generation holding the node.
    pub generation: Generation,
    /// Index within that generation.
    pub index: u32,
}

impl SpanRef {
    /// Create a handle.
    #[must_use]
    pub fn new(generation: Generation, index: u32) -> Self {
        Self { generation, index }
    }
}

/// Runtime correlation node wrapping one [`SpanMeta`].
#[derive(Debug, Clone)]
pub struct EbpfSpan {
    /// The decoded metadata record.
    pub meta: SpanMeta,
    /// The caller side of this span: the thread entry for same-thread
    /// children, or the outgoing half of the network hop for an
    /// incoming span.
    pub pre: Option<SpanRef>,
    /// The incoming half of the network hop, for an outgoing span.
    pub next: Option<SpanRef>,
    /// Same-thread call list; slot 0 is the thread's entry span itself,
    /// the rest are its sequential outbound calls.
    pub childs: Vec<SpanRef>,
    /// Set exactly once, the first time a traversal visits this node.
    pub used: bool,
    /// Final exported trace id.
    pub trace_id: Id128,
    /// Final exported parent id.
    pub parent_id: Id64,
    /// Whether the final ids came from application instrumentation.
    pub from_app: bool,
    /// Aggregated sampling decision for this span's trace.
    pub decision: SampleDecision,
}

impl EbpfSpan {
    fn new(meta: SpanMeta) -> Self {
        Self {
            meta,
            pre: None,
            next: None,
            childs: Vec::new(),
            used: false,
            trace_id: Id128::zero(),
            parent_id: Id64::zero(),
            from_app: false,
            decision: SampleDecision::Unset,
        }
    }
}

/// Holds the two generations of span nodes for one runner.
#[derive(Debug, Default)]
pub struct SpanArena {
    older: Vec<EbpfSpan>,
    newer: Vec<EbpfSpan>,
}

impl SpanArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a freshly dequeued window's metadata into the newer
    /// generation, preserving storage order.
    ///
    /// The newer generation must be empty (the previous tick slid it
    /// into `older`).
    pub fn fill_newer(&mut self, metas: &[SpanMeta]) {
        debug_assert!(self.newer.is_empty());
        self.newer = metas.iter().cloned().map(EbpfSpan::new).collect();
    }

    /// Number of spans in the older generation.
    #[must_use]
    pub fn older_len(&self) -> usize {
        self.older.len()
    }

    /// Borrow a node.
    #[must_use]
    pub fn get(&self, r: SpanRef) -> &EbpfSpan {
        match r.generation {
            Generation::Older => &self.older[r.index as usize],
            Generation::Newer => &self.newer[r.index as usize],
        }
    }

    /// Mutably borrow a node.
    pub fn get_mut(&mut self, r: SpanRef) -> &mut EbpfSpan {
        match r.generation {
            Generation::Older => &mut self.older[r.index as usize],
            Generation::Newer => &mut self.newer[r.index as usize],
        }
    }

    /// Handles to every node across both generations, older first.
    #[must_use]
    pub fn all_refs(&self) -> Vec<SpanRef> {
        let older = (0..self.older.len() as u32)
            .map(|i| SpanRef::new(Generation::Older, i));
        let newer = (0..self.newer.len() as u32)
            .map(|i| SpanRef::new(Generation::Newer, i));
        older.chain(newer).collect()
    }

    /// Handles to the older generation, in storage order.
    #[must_use]
    pub fn older_refs(&self) -> Vec<SpanRef> {
        (0..self.older.len() as u32)
            .map(|i| SpanRef::new(Generation::Older, i))
            .collect()
    }

    /// Final identifier assignments for the older generation, in storage
    /// order, for the positional export feed.
    #[must_use]
    pub fn older_assignments(&self) -> Vec<AssignedSpan> {
        self.older
            .iter()
            .map(|span| AssignedSpan {
                trace_id: span.trace_id,
                parent_id: span.parent_id,
                encode: span.meta.encode,
                from_app: span.from_app,
            })
            .collect()
    }

    /// Trace ids of every older-generation span whose final decision is
    /// reject; the export filter for that window.
    #[must_use]
    pub fn older_reject_set(&self) -> HashSet<Id128> {
        self.older
            .iter()
            .filter(|span| span.decision == SampleDecision::Reject)
            .map(|span| span.trace_id)
            .collect()
    }

    /// Slide the window: the newer generation becomes older, and any
    /// handles into the discarded generation die with it.
    ///
    /// Surviving `newer` nodes keep their `used` flags and assigned
    /// identifiers, but their cross-generation links are cleared; the
    /// next tick's `connect_spans` pass rebuilds links among the spans
    /// that are still unused.
    pub fn slide(&mut self) {
        self.older = std::mem::take(&mut self.newer);
        for span in &mut self.older {
            span.pre = None;
            span.next = None;
            span.childs.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stitch_core::span::{fields, Point, Value};

    fn meta(span_id: u64) -> SpanMeta {
        let pt = Point::new("t", 0)
            .with(fields::SPAN_ID, Value::uint(span_id))
            .with(fields::DIRECTION, Value::string("incoming"))
            .with(fields::EBPF_SPAN_TYPE, Value::string("entry"));
        SpanMeta::from_point(&pt).unwrap()
    }

    #[test]
    fn fill_preserves_order() {
        let mut arena = SpanArena::new();
        arena.fill_newer(&[meta(3), meta(1), meta(2)]);
        arena.slide();

        let ids: Vec<u64> = arena
            .older_refs()
            .into_iter()
            .map(|r| arena.get(r).meta.span_id.as_u64())
            .collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn slide_keeps_used_and_ids_but_clears_links() {
        let mut arena = SpanArena::new();
        arena.fill_newer(&[meta(1), meta(2)]);

        let a = SpanRef::new(Generation::Newer, 0);
        let b = SpanRef::new(Generation::Newer, 1);
        arena.get_mut(a).used = true;
        arena.get_mut(a).trace_id = Id128::new(9, 9);
        arena.get_mut(a).next = Some(b);
        arena.get_mut(b).pre = Some(a);

        arena.slide();

        let a = SpanRef::new(Generation::Older, 0);
        let b = SpanRef::new(Generation::Older, 1);
        assert!(arena.get(a).used);
        assert_eq!(arena.get(a).trace_id, Id128::new(9, 9));
        assert!(arena.get(a).next.is_none());
        assert!(arena.get(b).pre.is_none());

        // Newer is empty again and ready for the next window.
        assert!(arena.all_refs().len() == 2);
        arena.fill_newer(&[meta(3)]);
        assert_eq!(arena.all_refs().len(), 3);
    }
}
