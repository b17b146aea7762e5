//! SlotSpan: the allocated-state record for one span of partition pages
//! serving a single bucket (spec §3 SlotSpan, §4.8 state machine).

use std::ptr::NonNull;

use crate::bucket::Bucket;
use crate::freelist;

/// One of the four states spec §3 invariant 3 defines for a slot span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSpanState {
    Active,
    Full,
    Empty,
    Decommitted,
}

/// A single span of contiguous partition pages carved into equal-size slots
/// for one bucket.
///
/// Intrusive-list threading via `next` mirrors the teacher's raw-pointer
/// lists in `kernel_heap.rs`/`page_alloc.rs`: single-linked, no back
/// pointers, terminated by a statically-allocated sentinel rather than a
/// null check (spec §9 "Cyclic list invariants").
#[repr(C)]
pub struct SlotSpan {
    pub bucket: *mut Bucket,
    /// Head of the free list, or `None` if no free slots remain.
    pub freelist_head: Option<NonNull<u8>>,
    pub num_allocated_slots: u32,
    pub num_unprovisioned_slots: u32,
    /// Index into the global empty ring, if this span is currently cached
    /// there (spec invariant 6).
    pub empty_cache_index: Option<u32>,
    /// Next slot span in whichever of the bucket's three lists this span
    /// currently belongs to.
    pub next: *mut SlotSpan,
    /// Recovers the caller's originally requested size when a slot was
    /// rounded up to the bucket's slot size, so `Realloc`/`ActualSize`
    /// queries can report the true usable/requested size split.
    pub raw_size: Option<usize>,
    pub slots_per_span: u32,
    pub num_system_pages: u32,
    pub payload_base: NonNull<u8>,
    /// `true` only for the one statically-allocated sentinel span that
    /// terminates every freshly initialized bucket's active list (spec
    /// invariant 4). The sentinel never transitions and never frees.
    pub is_sentinel: bool,
}

// SAFETY: a SlotSpan is only ever touched while the owning PartitionRoot's
// lock is held (spec §5); the raw pointers it carries are plain intrusive
// list links, not independently shared state.
unsafe impl Send for SlotSpan {}

impl SlotSpan {
    pub fn sentinel() -> Self {
        SlotSpan {
            bucket: std::ptr::null_mut(),
            freelist_head: None,
            num_allocated_slots: 0,
            num_unprovisioned_slots: 0,
            empty_cache_index: None,
            next: std::ptr::null_mut(),
            raw_size: None,
            slots_per_span: 0,
            num_system_pages: 0,
            // Never dereferenced: the sentinel is never carved from real
            // memory, only ever used as a list terminator.
            payload_base: NonNull::dangling(),
            is_sentinel: true,
        }
    }

    /// Slots never yet touched plus free-list slots plus allocated slots
    /// must always equal the total (spec invariant 2).
    pub fn assert_slot_accounting(&self) {
        debug_assert_eq!(
            self.num_allocated_slots as usize
                + self.freelist_len()
                + self.num_unprovisioned_slots as usize,
            self.slots_per_span as usize,
        );
    }

    fn freelist_len(&self) -> usize {
        let mut count = 0usize;
        let mut cur = self.freelist_head;
        while let Some(ptr) = cur {
            count += 1;
            // SAFETY: every entry in the free list was written by this
            // crate's own `push_free_slot`/provisioning logic.
            cur = unsafe { freelist::read_next(ptr) };
        }
        count
    }

    /// The state this span is currently in, derived from its counters
    /// rather than stored redundantly (spec invariant 3).
    pub fn state(&self) -> SlotSpanState {
        if self.is_sentinel {
            return SlotSpanState::Active;
        }
        if self.num_allocated_slots == self.slots_per_span {
            SlotSpanState::Full
        } else if self.num_allocated_slots == 0 {
            // Distinguished by the caller (empty vs decommitted) since that
            // depends on whether backing pages are still committed, which
            // this struct alone doesn't record — see `PartitionRoot`.
            SlotSpanState::Empty
        } else {
            SlotSpanState::Active
        }
    }

    pub fn has_free_slots(&self) -> bool {
        self.freelist_head.is_some() || self.num_unprovisioned_slots > 0
    }

    /// Pop a slot from the free list. Returns `None` if the free list is
    /// empty (the caller should fall back to provisioning).
    pub fn pop_free_slot(&mut self) -> Option<NonNull<u8>> {
        let head = self.freelist_head?;
        // SAFETY: `head` was pushed by `push_free_slot` below.
        self.freelist_head = unsafe { freelist::read_next(head) };
        self.num_allocated_slots += 1;
        Some(head)
    }

    /// Provision the next never-touched slot, bumping the unprovisioned
    /// cursor. Caller must ensure `num_unprovisioned_slots > 0`.
    pub fn provision_slot(&mut self) -> NonNull<u8> {
        debug_assert!(self.num_unprovisioned_slots > 0);
        let slot_size = self.slot_size();
        let index = self.slots_per_span - self.num_unprovisioned_slots;
        self.num_unprovisioned_slots -= 1;
        self.num_allocated_slots += 1;
        // SAFETY: index is within [0, slots_per_span) and payload_base owns
        // slots_per_span * slot_size contiguous bytes.
        unsafe {
            NonNull::new_unchecked(self.payload_base.as_ptr().add(index as usize * slot_size))
        }
    }

    /// Return a slot to the free list (spec §4.3 step 4).
    ///
    /// # Safety
    /// `slot` must be a pointer this span previously handed out via
    /// `pop_free_slot`/`provision_slot` and not currently live anywhere
    /// else.
    pub unsafe fn push_free_slot(&mut self, slot: NonNull<u8>) {
        unsafe { freelist::write_next(slot, self.freelist_head) };
        self.freelist_head = Some(slot);
        self.num_allocated_slots -= 1;
    }

    pub(crate) fn slot_size(&self) -> usize {
        // SAFETY: every non-sentinel span's bucket pointer is valid for the
        // lifetime of the span (buckets live as long as the root).
        unsafe { (*self.bucket).slot_size as usize }
    }
}
