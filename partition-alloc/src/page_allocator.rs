//! Platform page-allocator primitives (spec §6 external collaborator) and
//! one concrete backend.
//!
//! Spec §1 explicitly carves the page allocator out of core scope as an
//! external collaborator — but a specification can leave an interface
//! abstract where a buildable crate cannot. `MmapPageAllocator` is grounded
//! on `Iradukunda-Fils-HTTP-X`'s `httpx-dsa/src/slab.rs` `SecureSlab`, which
//! already reserves address space with `mmap` and flips individual pages
//! between `PROT_NONE` and `PROT_READ | PROT_WRITE` with `mprotect`.

use std::ptr::NonNull;

use nix::sys::mman::{MapFlags, ProtFlags, mmap_anonymous, mprotect, munmap};

use crate::error::{PartitionError, PartitionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAccess {
    Inaccessible,
    ReadOnly,
    ReadWrite,
}

impl PageAccess {
    fn prot_flags(self) -> ProtFlags {
        match self {
            PageAccess::Inaccessible => ProtFlags::PROT_NONE,
            PageAccess::ReadOnly => ProtFlags::PROT_READ,
            PageAccess::ReadWrite => ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
        }
    }
}

/// The platform page-allocator interface spec §6 specifies.
pub trait PageAllocator: Send + Sync {
    /// Reserve `size` bytes of address space aligned to `align`, mapped
    /// `PROT_NONE` (no commit, no access) until `set_access` is called.
    fn reserve_address_space(&self, size: usize, align: usize) -> PartitionResult<NonNull<u8>>;

    /// Release a reservation made by `reserve_address_space`.
    ///
    /// # Safety
    /// `base`/`size` must exactly match a prior successful reservation, and
    /// no outstanding references to that memory may remain.
    unsafe fn release_address_space(&self, base: NonNull<u8>, size: usize);

    /// Make `[base, base+size)` accessible with the given protection,
    /// committing physical pages as a side effect of the first touch.
    fn set_system_pages_access(
        &self,
        base: NonNull<u8>,
        size: usize,
        access: PageAccess,
    ) -> PartitionResult<()>;

    /// Release the physical pages backing `[base, base+size)` back to the
    /// OS while leaving the virtual reservation intact, and make the range
    /// inaccessible so stray reads fault instead of reading stale data.
    fn decommit_system_pages(&self, base: NonNull<u8>, size: usize) -> PartitionResult<()>;

    /// Recommit a previously decommitted range (spec §4.2 slow path reusing
    /// a decommitted span): makes it read/write again. Contents are
    /// unspecified (typically zero) until written.
    fn recommit_system_pages(&self, base: NonNull<u8>, size: usize) -> PartitionResult<()>;

    /// Advise the OS that `[base, base+size)`'s contents are unneeded.
    /// Non-destructive on some platforms (contents may or may not survive),
    /// destructive (zeroed) on others; callers must not depend on either
    /// (spec GLOSSARY "Discard").
    fn discard_system_pages(&self, base: NonNull<u8>, size: usize) -> PartitionResult<()>;
}

/// `mmap`/`mprotect`/`madvise`-backed implementation, the one concrete
/// `PageAllocator` this crate ships.
#[derive(Debug, Default)]
pub struct MmapPageAllocator;

impl MmapPageAllocator {
    pub fn new() -> Self {
        Self
    }
}

impl PageAllocator for MmapPageAllocator {
    fn reserve_address_space(&self, size: usize, align: usize) -> PartitionResult<NonNull<u8>> {
        // Over-allocate by `align` so we can hand back an aligned sub-range
        // and release the slop; nix/mmap have no native alignment hint.
        let padded = size + align;
        let flags = MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS;
        let mapping = unsafe {
            mmap_anonymous(
                None,
                std::num::NonZeroUsize::new(padded).expect("nonzero reservation size"),
                ProtFlags::PROT_NONE,
                flags,
            )
        }
        .map_err(|_| PartitionError::OutOfMemory {
            requested_size: size,
        })?;

        let raw = mapping.as_ptr() as usize;
        let aligned = raw.next_multiple_of(align);
        let front_slop = aligned - raw;
        let back_slop = padded - front_slop - size;

        if front_slop > 0 {
            unsafe { munmap(mapping, front_slop).ok() };
        }
        if back_slop > 0 {
            let back_ptr = NonNull::new((aligned + size) as *mut std::ffi::c_void).unwrap();
            unsafe { munmap(back_ptr, back_slop).ok() };
        }

        Ok(NonNull::new(aligned as *mut u8).expect("mmap returned null"))
    }

    unsafe fn release_address_space(&self, base: NonNull<u8>, size: usize) {
        let ptr = base.cast::<std::ffi::c_void>();
        unsafe { munmap(ptr, size).ok() };
    }

    fn set_system_pages_access(
        &self,
        base: NonNull<u8>,
        size: usize,
        access: PageAccess,
    ) -> PartitionResult<()> {
        let ptr = base.cast::<std::ffi::c_void>();
        unsafe { mprotect(ptr, size, access.prot_flags()) }.map_err(|_| {
            PartitionError::OutOfMemory {
                requested_size: size,
            }
        })
    }

    fn decommit_system_pages(&self, base: NonNull<u8>, size: usize) -> PartitionResult<()> {
        self.set_system_pages_access(base, size, PageAccess::Inaccessible)?;
        // `mprotect` alone only changes access rights; `madvise` is what
        // actually returns physical pages to the OS.
        let ptr = base.cast::<std::ffi::c_void>();
        unsafe { nix::sys::mman::madvise(ptr, size, nix::sys::mman::MmapAdvise::MADV_DONTNEED) }
            .ok();
        Ok(())
    }

    fn recommit_system_pages(&self, base: NonNull<u8>, size: usize) -> PartitionResult<()> {
        self.set_system_pages_access(base, size, PageAccess::ReadWrite)
    }

    fn discard_system_pages(&self, base: NonNull<u8>, size: usize) -> PartitionResult<()> {
        let ptr = base.cast::<std::ffi::c_void>();
        unsafe { nix::sys::mman::madvise(ptr, size, nix::sys::mman::MmapAdvise::MADV_DONTNEED) }
            .ok();
        Ok(())
    }
}
