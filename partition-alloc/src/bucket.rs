//! Bucket size-class table and fast size→bucket lookup (spec §4.1).

use std::ptr::NonNull;

use crate::constants::*;
use crate::slot_span::SlotSpan;

/// One size class. Owns three intrusive lists of `SlotSpan` (active / empty
/// / decommitted) plus a full-span count, all threaded through
/// `SlotSpan::next`.
pub struct Bucket {
    pub slot_size: u32,
    pub slots_per_span: u32,
    pub num_system_pages_per_span: u32,
    /// `true` for a bucket whose slot size is not a multiple of
    /// `GENERIC_SMALLEST_BUCKET`: exists only for index arithmetic, never
    /// serves an allocation (spec §3, invariant 5).
    pub is_pseudo: bool,
    /// `true` only for the single trailing sentinel bucket (spec §4.1:
    /// "sizes above the maximum order map to a sentinel bucket").
    pub is_sentinel: bool,
    pub active_list: *mut SlotSpan,
    pub empty_list: *mut SlotSpan,
    pub decommitted_list: *mut SlotSpan,
    pub num_full_spans: u32,
}

// SAFETY: see SlotSpan — buckets are only mutated under the owning root's
// lock.
unsafe impl Send for Bucket {}

impl Bucket {
    fn pseudo(slot_size: u32) -> Self {
        Bucket {
            slot_size,
            slots_per_span: 0,
            num_system_pages_per_span: 0,
            is_pseudo: true,
            is_sentinel: false,
            // Null on purpose: spec §3 says an attempted allocation through
            // a pseudo-bucket must fault rather than silently succeed.
            active_list: std::ptr::null_mut(),
            empty_list: std::ptr::null_mut(),
            decommitted_list: std::ptr::null_mut(),
            num_full_spans: 0,
        }
    }

    fn real(slot_size: u32, sentinel: *mut SlotSpan) -> Self {
        let slots_per_span = real_slots_per_span(slot_size as usize);
        let num_system_pages_per_span =
            (slots_per_span as usize * slot_size as usize).div_ceil(SYSTEM_PAGE_SIZE) as u32;
        Bucket {
            slot_size,
            slots_per_span: slots_per_span as u32,
            num_system_pages_per_span,
            is_pseudo: false,
            is_sentinel: false,
            active_list: sentinel,
            empty_list: std::ptr::null_mut(),
            decommitted_list: std::ptr::null_mut(),
            num_full_spans: 0,
        }
    }

    pub fn sentinel_bucket() -> Self {
        Bucket {
            slot_size: 0,
            slots_per_span: 0,
            num_system_pages_per_span: 0,
            is_pseudo: false,
            is_sentinel: true,
            active_list: std::ptr::null_mut(),
            empty_list: std::ptr::null_mut(),
            decommitted_list: std::ptr::null_mut(),
            num_full_spans: 0,
        }
    }

    /// Unlink `span` from whichever list `head` points into, returning the
    /// new head. `span` must currently be the head.
    ///
    /// # Safety
    /// `head` and `span` must be valid, and `span` must be the current head
    /// of the list `head` points into.
    pub unsafe fn pop_head(head: *mut SlotSpan) -> (*mut SlotSpan, *mut SlotSpan) {
        debug_assert!(!head.is_null());
        let next = unsafe { (*head).next };
        (head, next)
    }

    pub unsafe fn push_front(list: &mut *mut SlotSpan, span: *mut SlotSpan) {
        unsafe { (*span).next = *list };
        *list = span;
    }
}

/// Number of slots that fit in one slot span for a bucket of this slot
/// size, bounded so a span never spans more than
/// `MAX_SYSTEM_PAGES_PER_SLOT_SPAN` system pages (spec §6).
fn real_slots_per_span(slot_size: usize) -> usize {
    if slot_size == 0 {
        return 0;
    }
    let mut system_pages = slot_size.div_ceil(SYSTEM_PAGE_SIZE).max(1);
    // Grow the span until it amortizes rounding waste to under ~1/32, as in
    // the original allocator's bucket-population heuristic, capped by the
    // per-span system-page ceiling.
    while system_pages * SYSTEM_PAGE_SIZE % slot_size > (system_pages * SYSTEM_PAGE_SIZE) / 32
        && system_pages * 2 <= MAX_SYSTEM_PAGES_PER_SLOT_SPAN
    {
        system_pages *= 2;
    }
    (system_pages * SYSTEM_PAGE_SIZE) / slot_size
}

/// The full size-class table plus the precomputed fast lookup structures
/// (spec §4.1).
pub struct BucketTable {
    /// Indexed directly by flat cell for the first `lookup_len` entries
    /// (the construction loop pushes exactly one bucket per `(order,
    /// sub)` pair, in that order), with the sentinel bucket appended last.
    pub buckets: Vec<Bucket>,
    /// Per-order bit shift so that `(size >> shift) & mask` extracts the
    /// sub-bucket index within that order.
    shifts: Vec<u32>,
    masks: Vec<u32>,
    /// Flat `(order << NUM_BUCKETS_PER_ORDER_BITS) | sub_index` → smallest
    /// real bucket whose slot size covers every size that hashes into
    /// that cell, used when the cell's own exact bucket (`buckets[flat]`)
    /// is a pseudo-bucket too small for the requested size.
    round_up: Vec<u16>,
    pub sentinel_bucket_index: usize,
}

impl BucketTable {
    /// Build the table in order-major, sub-order-minor layout (spec §4.1).
    pub fn new(sentinel_span: *mut SlotSpan) -> Self {
        let max_order = MAX_BUCKETED_ORDER;
        let num_orders = (max_order + 1) as usize;
        let mut buckets = Vec::with_capacity(num_orders * NUM_BUCKETS_PER_ORDER + 1);
        let mut shifts = vec![0u32; num_orders];
        let mut masks = vec![0u32; num_orders];
        let lookup_len = num_orders * NUM_BUCKETS_PER_ORDER;
        // The largest request size that hashes to each flat cell (via the
        // same order/shift/sub formula `bucket_index_for_size` uses), i.e.
        // the cell's upper bound. A bucket is only a valid target for a
        // cell if its slot size covers that whole range, not just the
        // cell's lower bound.
        let mut cell_upper_bound = vec![0usize; lookup_len];

        for order in 0..=max_order {
            let size_of_order: usize = if order == 0 { 0 } else { 1usize << order };
            let current_increment = if order < MIN_BUCKETED_ORDER {
                0
            } else {
                size_of_order >> NUM_BUCKETS_PER_ORDER_BITS
            };
            // Shift so that `(size >> shift)` isolates the low
            // `NUM_BUCKETS_PER_ORDER_BITS` bits that select a sub-bucket
            // within this order.
            let shift = if current_increment == 0 {
                0
            } else {
                current_increment.trailing_zeros()
            };
            shifts[order as usize] = shift;
            masks[order as usize] = (NUM_BUCKETS_PER_ORDER as u32) - 1;

            for sub in 0..NUM_BUCKETS_PER_ORDER {
                let slot_size = if order < MIN_BUCKETED_ORDER {
                    GENERIC_SMALLEST_BUCKET
                } else {
                    size_of_order + sub * current_increment
                };
                let slot_size = slot_size.max(GENERIC_SMALLEST_BUCKET);
                let is_pseudo = slot_size % GENERIC_SMALLEST_BUCKET != 0
                    || (order < MIN_BUCKETED_ORDER && sub > 0);
                let bucket = if is_pseudo {
                    Bucket::pseudo(slot_size as u32)
                } else {
                    Bucket::real(slot_size as u32, sentinel_span)
                };
                buckets.push(bucket);

                let flat = (order as usize) * NUM_BUCKETS_PER_ORDER + sub;
                // Every size with `ilog2(size) == order` hashes to sub 0
                // below `MIN_BUCKETED_ORDER` (shift forces sub to 0), so
                // that single cell's upper bound is the order's whole
                // range; above it, each sub-cell covers one increment.
                cell_upper_bound[flat] = if order < MIN_BUCKETED_ORDER {
                    (1usize << (order + 1)) - 1
                } else {
                    size_of_order + (sub + 1) * current_increment - 1
                };
            }
        }

        let sentinel_bucket_index = buckets.len();
        buckets.push(Bucket::sentinel_bucket());

        // For each flat cell, precompute the smallest real bucket whose
        // slot size is at least the cell's upper bound. This only matters
        // as a fallback: `buckets[flat]` itself is the cell's own exact
        // bucket (the construction loop above pushed exactly one bucket
        // per flat cell, in order), and serves any request size that the
        // cell's own bucket already covers. The fallback is needed
        // because a single cell also catches every *other* size that
        // hashes to it (e.g. flat cell 16 catches 16, 17, 18 and 19 all
        // alike, since the floor-based hash only has 2 bits of sub-order
        // resolution per order here) — those larger sizes need a bigger
        // real bucket than the cell's own, which may be a pseudo-bucket
        // or simply too small.
        let mut round_up = vec![sentinel_bucket_index as u16; lookup_len];
        for flat in 0..lookup_len {
            let upper_bound = cell_upper_bound[flat];
            let mut candidate: Option<u16> = None;
            for (index, bucket) in buckets.iter().enumerate() {
                if bucket.is_pseudo || bucket.is_sentinel {
                    continue;
                }
                if (bucket.slot_size as usize) >= upper_bound
                    && (candidate.is_none()
                        || bucket.slot_size < buckets[candidate.unwrap() as usize].slot_size)
                {
                    candidate = Some(index as u16);
                }
            }
            if let Some(candidate) = candidate {
                round_up[flat] = candidate;
            }
        }

        BucketTable {
            buckets,
            shifts,
            masks,
            round_up,
            sentinel_bucket_index,
        }
    }

    /// Bucket index for a request size, per the three-step fast path in
    /// spec §4.1. Sizes below `GENERIC_SMALLEST_BUCKET` map to the
    /// smallest bucket; sizes above `GENERIC_MAX_BUCKETED` map to the
    /// sentinel.
    pub fn bucket_index_for_size(&self, size: usize) -> usize {
        if size == 0 {
            return self.bucket_index_for_size(1);
        }
        if size > GENERIC_MAX_BUCKETED {
            return self.sentinel_bucket_index;
        }
        let order = size.ilog2().min(MAX_BUCKETED_ORDER);
        let shift = self.shifts[order as usize];
        let sub = if shift == 0 {
            0
        } else {
            (size >> shift) & (self.masks[order as usize] as usize)
        };
        let flat = (order as usize) * NUM_BUCKETS_PER_ORDER + sub;
        if flat >= self.round_up.len() {
            return self.sentinel_bucket_index;
        }
        // The cell's own bucket serves this size directly if it's real
        // and already big enough; this is the common case (an exact or
        // near-exact match). Otherwise fall back to the smallest real
        // bucket that covers the whole cell, which handles both
        // pseudo-bucket cells and sizes that hash into a cell above
        // their own bucket's slot size.
        let exact = &self.buckets[flat];
        if !exact.is_pseudo && !exact.is_sentinel && exact.slot_size as usize >= size {
            return flat;
        }
        self.round_up[flat] as usize
    }

    pub fn bucket_for_size(&self, size: usize) -> &Bucket {
        &self.buckets[self.bucket_index_for_size(size)]
    }

    pub fn bucket_for_size_mut(&mut self, size: usize) -> &mut Bucket {
        let index = self.bucket_index_for_size(size);
        &mut self.buckets[index]
    }
}

/// Number of payload partition pages a fresh span of `bucket` needs,
/// expressed in whole partition pages.
pub fn partition_pages_for_bucket(bucket: &Bucket) -> usize {
    (bucket.num_system_pages_per_span as usize * SYSTEM_PAGE_SIZE).div_ceil(PARTITION_PAGE_SIZE)
}

pub fn payload_ptr_for_span(base: NonNull<u8>) -> NonNull<u8> {
    base
}
