//! Partial (in-flight) heap state: disjoint received-range tracking and the
//! handoff into [`FrozenHeap::freeze`]. §4.5.

use std::time::Instant;

use octs::BytesMut;
use tracing::warn;

use crate::{
    frozen::{BugCompat, FrozenHeap},
    packet::{ItemPointer, ParsedPacket},
};

/// A disjoint, ordered set of half-open `[start, end)` byte ranges.
///
/// Used to track which parts of a partial heap's payload have been written,
/// so completion can be detected without rescanning the payload buffer.
#[derive(Debug, Clone, Default)]
pub struct RangeSet {
    ranges: Vec<(u64, u64)>,
}

impl RangeSet {
    /// An empty range set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `[start, end)` intersects any range already in the set.
    #[must_use]
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.ranges.iter().any(|&(s, e)| start < e && s < end)
    }

    /// Merges `[start, end)` into the set, coalescing adjacent/overlapping
    /// ranges.
    pub fn insert(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        let mut merged = (start, end);
        let mut result = Vec::with_capacity(self.ranges.len() + 1);
        let mut inserted = false;
        for &(s, e) in &self.ranges {
            if e < merged.0 {
                result.push((s, e));
            } else if merged.1 < s {
                if !inserted {
                    result.push(merged);
                    inserted = true;
                }
                result.push((s, e));
            } else {
                merged = (merged.0.min(s), merged.1.max(e));
            }
        }
        if !inserted {
            result.push(merged);
        }
        self.ranges = result;
    }

    /// Whether the set covers exactly `[0, len)`.
    ///
    /// `len == 0` is vacuously covered by the empty range set: a zero-length
    /// heap (an immediate-only heap, or the `STREAM_CTRL_END` terminator
    /// heap, spec.md §6) has no payload bytes to cover in the first place.
    #[must_use]
    pub fn covers(&self, len: u64) -> bool {
        if len == 0 {
            return true;
        }
        matches!(self.ranges.as_slice(), [(start, end)] if *start == 0 && *end == len)
    }
}

/// An in-flight heap: payload bytes and item pointers accumulated from
/// packets sharing a `heap_cnt`, not yet known to be complete.
///
/// See spec.md §3 "Heap (inbound, partial)".
#[derive(Debug)]
pub struct PartialHeap {
    /// The heap counter this partial belongs to.
    pub heap_cnt: u64,
    heap_length: u64,
    payload: BytesMut,
    received: RangeSet,
    pointers: Vec<ItemPointer>,
    /// Monotonic timestamp of the last packet applied, used for LRU
    /// eviction (spec.md §4.5).
    pub last_update: Instant,
}

impl PartialHeap {
    /// Creates a new partial heap sized from `parsed`'s `heap_length`.
    #[must_use]
    pub fn new(parsed: &ParsedPacket, now: Instant) -> Self {
        Self {
            heap_cnt: parsed.heap_cnt,
            heap_length: parsed.heap_length,
            payload: BytesMut::zeroed(parsed.heap_length as usize),
            received: RangeSet::new(),
            pointers: Vec::new(),
            last_update: now,
        }
    }

    /// Merges one more packet belonging to this heap.
    ///
    /// See spec.md §4.5 step 2-3: overlapping writes are allowed (last write
    /// wins) but logged.
    pub fn apply(&mut self, parsed: ParsedPacket, now: Instant) {
        self.last_update = now;
        let start = parsed.payload_offset;
        let end = start + parsed.payload.len() as u64;
        if self.received.overlaps(start, end) {
            warn!(heap_cnt = self.heap_cnt, start, end, "overlapping payload write");
        }
        let start_idx = start as usize;
        let end_idx = end as usize;
        if end_idx <= self.payload.len() {
            self.payload[start_idx..end_idx].copy_from_slice(&parsed.payload);
        }
        self.received.insert(start, end);
        self.pointers.extend(parsed.item_pointers);
    }

    /// Whether the union of received ranges covers the whole heap and at
    /// least one item pointer has been seen.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received.covers(self.heap_length) && !self.pointers.is_empty()
    }

    /// Consumes this partial heap and runs the freeze procedure over
    /// whatever pointers/payload were collected.
    ///
    /// Used both for genuinely complete heaps and for heaps forcibly
    /// flushed incomplete (eviction, stream stop) — the freeze procedure
    /// does not require completeness, it just reports what was received.
    #[must_use]
    pub fn freeze(self, address_bits: u32, bug_compat: BugCompat) -> FrozenHeap {
        FrozenHeap::freeze(
            self.heap_cnt,
            address_bits,
            bug_compat,
            self.payload.freeze(),
            self.pointers,
        )
    }
}
