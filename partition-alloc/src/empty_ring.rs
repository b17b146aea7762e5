//! The process-wide global empty-slot-span ring (spec §3 "global empty-slot-
//! span ring", §9 "Cross-root ring interaction").
//!
//! Grounded directly on the teacher's `RingBuffer<T, const N: usize>`
//! (`support/src/ring_buffer.rs`): its `push_overwrite` semantics — evict the
//! oldest entry when full, otherwise just append — are exactly what spec §3
//! describes ("when the ring wraps, the oldest entry is decommitted").
//!
//! Resolves the open question in spec §9 ("Cross-root ring interaction") by
//! storing the owning root pointer in each slot explicitly, as the note
//! recommends, rather than inferring it from the span's back-pointer.

use partition_alloc_support::RingBuffer;

use crate::root::PartitionRoot;
use crate::slot_span::SlotSpan;

/// Entries are plain pointers: every entry is only ever touched while
/// holding the owning root's lock (see `PartitionRoot::evict_from_empty_ring`).
#[derive(Clone, Copy)]
pub struct EmptyRingEntry {
    pub root: *mut PartitionRoot,
    pub span: *mut SlotSpan,
}

/// Matches the real allocator's ring capacity order of magnitude; kept
/// small and named so it is easy to retune.
pub const EMPTY_RING_SIZE: usize = 16;

pub struct EmptyRing {
    ring: RingBuffer<Option<EmptyRingEntry>, EMPTY_RING_SIZE>,
}

impl EmptyRing {
    pub const fn new() -> Self {
        Self {
            ring: RingBuffer::new_with(None),
        }
    }

    /// Insert a newly emptied span, returning the entry evicted to make
    /// room if the ring was already full (spec invariant 6: every entry's
    /// `empty_cache_index` must point back to its own slot, so the caller
    /// is responsible for updating the new entry's index after this call
    /// using the returned occupancy).
    pub fn push(&mut self, entry: EmptyRingEntry) -> Option<EmptyRingEntry> {
        let evicted = if self.ring.len() as usize >= EMPTY_RING_SIZE {
            self.ring.peek().copied().flatten()
        } else {
            None
        };
        self.ring.push_overwrite(Some(entry));
        evicted
    }

    pub fn len(&self) -> usize {
        self.ring.len() as usize
    }

    /// Clear any slot still naming `span`, so a later eviction of that slot
    /// can't `decommit_span` a span that has already left the empty state
    /// (spec §4.5: the ring slot must be cleared whenever its span is
    /// reused or decommitted, or a stale entry would re-decommit a live or
    /// already-decommitted span and corrupt its bucket's lists).
    pub fn invalidate_span(&mut self, span: *mut SlotSpan) {
        for slot in self.ring.as_mut_slice() {
            if slot.is_some_and(|entry| entry.span == span) {
                *slot = None;
            }
        }
    }
}

impl Default for EmptyRing {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: entries are only mutated while holding the owning root's lock;
// the ring itself is guarded by a dedicated process-global lock taken for
// the duration of any push (see `PartitionRoot`).
unsafe impl Send for EmptyRing {}
