//! Freelist entry encoding (spec §3 FreelistEntry, §9 "Freelist encoding").
//!
//! A free slot's first word holds an *encoded* pointer to the next free
//! slot. Encoding must be bijective except that `encode(None) == 0`, so a
//! freshly decommitted (all-zero) page decodes back to "no next" rather
//! than to a wild pointer (invariant 9).
//!
//! This crate uses the simplest encoding that satisfies that property on a
//! little-endian target: bitwise-not of the raw address.

use std::ptr::NonNull;

/// Encode a (possibly absent) next-slot pointer for in-place storage.
#[inline]
pub fn encode(next: Option<NonNull<u8>>) -> usize {
    match next {
        None => 0,
        Some(ptr) => !(ptr.as_ptr() as usize),
    }
}

/// Decode a next-slot pointer previously produced by `encode`.
///
/// Any all-zero bit pattern — including one read back from a page the OS
/// decommitted and that now faults in as zero — decodes to `None`.
#[inline]
pub fn decode(bits: usize) -> Option<NonNull<u8>> {
    if bits == 0 {
        None
    } else {
        NonNull::new((!bits) as *mut u8)
    }
}

/// Read the encoded next pointer out of a free slot's first word.
///
/// # Safety
/// `slot` must point to at least `size_of::<usize>()` readable bytes that
/// are logically part of a free slot (not a live allocation).
#[inline]
pub unsafe fn read_next(slot: NonNull<u8>) -> Option<NonNull<u8>> {
    let bits = unsafe { slot.cast::<usize>().read_unaligned() };
    decode(bits)
}

/// Write an encoded next pointer into a free slot's first word.
///
/// # Safety
/// `slot` must point to at least `size_of::<usize>()` writable bytes that
/// are logically part of a free slot.
#[inline]
pub unsafe fn write_next(slot: NonNull<u8>, next: Option<NonNull<u8>>) {
    let bits = encode(next);
    unsafe { slot.cast::<usize>().write_unaligned(bits) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_none_is_zero() {
        assert_eq!(encode(None), 0);
        assert_eq!(decode(0), None);
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let value: u64 = 0;
        let ptr = NonNull::new((&value as *const u64 as usize) as *mut u8).unwrap();
        let encoded = encode(Some(ptr));
        assert_ne!(encoded, 0);
        assert_eq!(decode(encoded), Some(ptr));
    }

    #[test]
    fn zeroed_memory_decodes_to_none() {
        let mut slot = [0u8; 16];
        let ptr = NonNull::new(slot.as_mut_ptr()).unwrap();
        // Simulates a page that came back from the OS freshly decommitted:
        // all zero bits, never explicitly encoded.
        let bits = unsafe { ptr.cast::<usize>().read_unaligned() };
        assert_eq!(decode(bits), None);
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut slot_a = [0u8; 16];
        let mut slot_b = [0u8; 16];
        let ptr_a = NonNull::new(slot_a.as_mut_ptr()).unwrap();
        let ptr_b = NonNull::new(slot_b.as_mut_ptr()).unwrap();
        unsafe { write_next(ptr_a, Some(ptr_b)) };
        assert_eq!(unsafe { read_next(ptr_a) }, Some(ptr_b));
    }
}
