//! DirectMap extents: the large-allocation path that skips buckets entirely
//! (spec §3 "DirectMap extent", §4.2 "Direct-map path", §4.4 in-place
//! realloc).

use std::ptr::NonNull;

use crate::constants::*;
use crate::page_allocator::{PageAccess, PageAllocator};

/// Metadata for one direct-mapped allocation: reservation size, guard-page
/// bracketing, and intrusive doubly-linked-list threading in the owning
/// root's direct-map list (spec §3, invariant 8).
pub struct DirectMapExtent {
    /// Base of the full reservation, including the leading guard page.
    pub reservation_base: NonNull<u8>,
    pub reservation_size: usize,
    /// Base of the user-visible payload, one system page past
    /// `reservation_base`.
    pub payload_base: NonNull<u8>,
    /// Size of the committed payload, rounded up to system-page
    /// granularity.
    pub mapped_size: usize,
    /// The caller's originally requested size, recovered by `ActualSize`
    /// and by in-place realloc bookkeeping.
    pub raw_size: usize,
    pub prev: *mut DirectMapExtent,
    pub next: *mut DirectMapExtent,
}

// SAFETY: only ever touched under the owning root's lock.
unsafe impl Send for DirectMapExtent {}

/// Reserve `guard + payload + guard`, commit only the payload, and leave
/// the guards `PROT_NONE` (spec §4.2 "Direct-map path", invariant 8).
pub fn allocate_direct_map(
    allocator: &dyn PageAllocator,
    requested_size: usize,
) -> crate::error::PartitionResult<DirectMapExtent> {
    let payload_size = requested_size.next_multiple_of(SYSTEM_PAGE_SIZE);
    let total_size = payload_size + 2 * SYSTEM_PAGE_SIZE;

    let reservation_base = allocator.reserve_address_space(total_size, SYSTEM_PAGE_SIZE)?;
    let payload_base =
        unsafe { NonNull::new_unchecked(reservation_base.as_ptr().add(SYSTEM_PAGE_SIZE)) };

    allocator.set_system_pages_access(payload_base, payload_size, PageAccess::ReadWrite)?;

    Ok(DirectMapExtent {
        reservation_base,
        reservation_size: total_size,
        payload_base,
        mapped_size: payload_size,
        raw_size: requested_size,
        prev: std::ptr::null_mut(),
        next: std::ptr::null_mut(),
    })
}

/// Release the full guard-payload-guard reservation (spec §4.3 step 3).
///
/// # Safety
/// `extent` must not be referenced from any root's direct-map list
/// afterward.
pub unsafe fn free_direct_map(allocator: &dyn PageAllocator, extent: &DirectMapExtent) {
    unsafe { allocator.release_address_space(extent.reservation_base, extent.reservation_size) };
}

/// Outcome of attempting an in-place realloc on a direct-mapped extent
/// (spec §4.4 steps 4a-d).
pub enum InPlaceResult {
    /// The reservation didn't change; only the recorded raw size did.
    Unchanged,
    ShrankInPlace,
    GrewInPlace,
    /// The requested size can't be satisfied without a new reservation;
    /// caller must copy-and-free.
    NotPossible,
}

/// Attempt to resize a direct-mapped extent without moving it.
///
/// The 80% shrink threshold is reproduced as the original's exact integer
/// comparison (`(new/page)*5 < (map/page)*4`), not an approximate float
/// ratio, so the documented boundary behavior (79% fails, 81% succeeds) is
/// bit-for-bit reproducible (see SPEC_FULL.md).
pub fn realloc_direct_map_in_place(
    allocator: &dyn PageAllocator,
    extent: &mut DirectMapExtent,
    new_size: usize,
) -> crate::error::PartitionResult<InPlaceResult> {
    if new_size > GENERIC_MAX_DIRECT_MAPPED {
        return Ok(InPlaceResult::NotPossible);
    }

    let new_payload_size = new_size.next_multiple_of(SYSTEM_PAGE_SIZE);

    if new_payload_size == extent.mapped_size {
        extent.raw_size = new_size;
        return Ok(InPlaceResult::Unchanged);
    }

    if new_payload_size < extent.mapped_size {
        let new_pages = new_payload_size / SYSTEM_PAGE_SIZE;
        let map_pages = extent.mapped_size / SYSTEM_PAGE_SIZE;
        if new_pages * 5 < map_pages * 4 {
            // Below the 80% threshold: not worth shrinking in place.
            return Ok(InPlaceResult::NotPossible);
        }
        let shrink_base = unsafe {
            NonNull::new_unchecked(extent.payload_base.as_ptr().add(new_payload_size))
        };
        let shrink_len = extent.mapped_size - new_payload_size;
        allocator.decommit_system_pages(shrink_base, shrink_len)?;
        extent.mapped_size = new_payload_size;
        extent.raw_size = new_size;
        return Ok(InPlaceResult::ShrankInPlace);
    }

    // Growing: only possible if the larger payload still fits inside the
    // original reservation (between the two guard pages).
    let max_payload_within_reservation = extent.reservation_size - 2 * SYSTEM_PAGE_SIZE;
    if new_payload_size > max_payload_within_reservation {
        return Ok(InPlaceResult::NotPossible);
    }
    let grow_base =
        unsafe { NonNull::new_unchecked(extent.payload_base.as_ptr().add(extent.mapped_size)) };
    let grow_len = new_payload_size - extent.mapped_size;
    allocator.set_system_pages_access(grow_base, grow_len, PageAccess::ReadWrite)?;
    allocator.recommit_system_pages(grow_base, grow_len)?;
    extent.mapped_size = new_payload_size;
    extent.raw_size = new_size;
    Ok(InPlaceResult::GrewInPlace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_allocator::MmapPageAllocator;

    #[test]
    fn shrink_to_79_percent_is_rejected_shrink_to_81_percent_succeeds() {
        let allocator = MmapPageAllocator::new();
        let original_size = 100 * SYSTEM_PAGE_SIZE;
        let mut extent = allocate_direct_map(&allocator, original_size).unwrap();

        let shrink_79 = (original_size as f64 * 0.79) as usize;
        let result = realloc_direct_map_in_place(&allocator, &mut extent, shrink_79).unwrap();
        assert!(matches!(result, InPlaceResult::NotPossible));

        let shrink_81 = (original_size as f64 * 0.81) as usize;
        let result = realloc_direct_map_in_place(&allocator, &mut extent, shrink_81).unwrap();
        assert!(matches!(result, InPlaceResult::ShrankInPlace));

        unsafe { free_direct_map(&allocator, &extent) };
    }
}
