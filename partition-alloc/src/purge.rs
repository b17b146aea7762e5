//! Purge / decommit engine (spec §4.5).
//!
//! Per-span purge is a two-pass algorithm: Pass A truncates the tail of a
//! span's free list when the trailing slots are all free, turning them back
//! into unprovisioned slots and discarding their pages; Pass B discards the
//! interior of every remaining free slot that isn't otherwise truncated.
//! Both passes can run in "dry" mode (`discard = false`) to compute
//! discardable bytes without mutating anything, which is how the stats
//! walker reports discardable bytes without side effects.

use crate::constants::SYSTEM_PAGE_SIZE;
use crate::freelist;
use crate::page_allocator::PageAllocator;
use crate::slot_span::SlotSpan;
use partition_alloc_support::{align_down_usize, align_up_usize};

/// Outcome of purging (or dry-running a purge of) one slot span.
#[derive(Default, Debug, Clone, Copy)]
pub struct PurgeStats {
    pub discardable_bytes: usize,
    pub reclaimed_slots: u32,
}

/// Run both passes against `span`. When `discard` is `false` this is a pure
/// query used by the stats walker (spec §4.6); when `true` it actually
/// decommits/discards pages and rewrites the free list (spec §4.5).
///
/// # Safety
/// `span` must be a live, non-sentinel span whose free list and payload
/// pointer are valid, and the caller must hold the owning root's lock.
pub unsafe fn purge_slot_span(
    allocator: &dyn PageAllocator,
    span: &mut SlotSpan,
    slot_size: usize,
    discard: bool,
) -> PurgeStats {
    if slot_size < SYSTEM_PAGE_SIZE {
        // "Purge on slot smaller than system page": silently skipped
        // (spec §7).
        return PurgeStats::default();
    }

    if let Some(raw_size) = span.raw_size {
        if raw_size < slot_size {
            let discardable = slot_size - raw_size;
            return PurgeStats {
                discardable_bytes: discardable,
                reclaimed_slots: 0,
            };
        }
    }

    let slots_per_span = span.slots_per_span as usize;
    let mut slot_is_free = vec![false; slots_per_span];
    let mut cur = span.freelist_head;
    while let Some(ptr) = cur {
        let offset = unsafe { ptr.as_ptr().offset_from(span.payload_base.as_ptr()) };
        let index = (offset as usize) / slot_size;
        if index < slots_per_span {
            slot_is_free[index] = true;
        }
        // SAFETY: caller guarantees the free list is well-formed.
        cur = unsafe { freelist::read_next(ptr) };
    }

    // Pass A: count the trailing run of free slots (highest indices first).
    let mut trailing_free = 0usize;
    let provisioned = slots_per_span - span.num_unprovisioned_slots as usize;
    for index in (0..provisioned).rev() {
        if slot_is_free[index] {
            trailing_free += 1;
        } else {
            break;
        }
    }

    let mut stats = PurgeStats::default();

    if trailing_free > 0 {
        let reclaim_start_index = provisioned - trailing_free;
        let reclaim_byte_start = reclaim_start_index * slot_size;
        let span_payload_size = provisioned * slot_size;

        let discard_start = align_up_usize(reclaim_byte_start, SYSTEM_PAGE_SIZE);
        let discard_end = align_down_usize(span_payload_size, SYSTEM_PAGE_SIZE);
        if discard_end > discard_start {
            stats.discardable_bytes += discard_end - discard_start;
        }
        stats.reclaimed_slots = trailing_free as u32;

        if discard {
            // Rewrite the free list to drop every entry at or past
            // reclaim_start_index.
            let mut new_head = None;
            let mut cur = span.freelist_head;
            let mut kept = Vec::new();
            while let Some(ptr) = cur {
                let offset = unsafe { ptr.as_ptr().offset_from(span.payload_base.as_ptr()) };
                let index = (offset as usize) / slot_size;
                let next = unsafe { freelist::read_next(ptr) };
                if index < reclaim_start_index {
                    kept.push(ptr);
                }
                cur = next;
            }
            for ptr in kept.into_iter().rev() {
                unsafe { freelist::write_next(ptr, new_head) };
                new_head = Some(ptr);
            }
            span.freelist_head = new_head;
            span.num_unprovisioned_slots += trailing_free as u32;

            if discard_end > discard_start {
                let base = unsafe { span.payload_base.as_ptr().add(discard_start) };
                let base = std::ptr::NonNull::new(base).unwrap();
                let _ = allocator.discard_system_pages(base, discard_end - discard_start);
            }
        }
    }

    // Pass B: interior holes of every remaining free slot not covered by
    // pass A's truncation.
    let reclaim_start_index = provisioned - trailing_free;
    for index in 0..reclaim_start_index {
        if !slot_is_free[index] {
            continue;
        }
        let slot_start = index * slot_size;
        let slot_end = slot_start + slot_size;
        // Preserve the freelist-entry bytes at the front of the slot so the
        // chain stays intact; only the interior is discardable.
        let hole_start = align_up_usize(slot_start + std::mem::size_of::<usize>(), SYSTEM_PAGE_SIZE);
        let hole_end = align_down_usize(slot_end, SYSTEM_PAGE_SIZE);
        if hole_end > hole_start {
            stats.discardable_bytes += hole_end - hole_start;
            if discard {
                let base = unsafe { span.payload_base.as_ptr().add(hole_start) };
                let base = std::ptr::NonNull::new(base).unwrap();
                let _ = allocator.discard_system_pages(base, hole_end - hole_start);
            }
        }
    }

    stats
}
