//! `PartitionRoot`: the public surface (spec §4.2-§4.9, §6 "Alloc / Free /
//! Realloc / PurgeMemory / DumpStats").

use std::ptr::NonNull;

use bitflags::bitflags;
use partition_alloc_support::RootLock;

use crate::bucket::{BucketTable, partition_pages_for_bucket};
use crate::constants::*;
use crate::direct_map::{self, DirectMapExtent, InPlaceResult};
use crate::empty_ring::{EMPTY_RING_SIZE, EmptyRing, EmptyRingEntry};
use crate::error::{PartitionError, PartitionResult};
use crate::hooks;
use crate::page_allocator::{PageAccess, PageAllocator};
use crate::purge;
use crate::slot_span::SlotSpan;
use crate::stats::{BucketStats, DirectMapStats, PartitionRootStats, StatsDumper};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        const RETURN_NULL = 0b01;
        const ZERO_FILL   = 0b10;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PurgeFlags: u32 {
        const DECOMMIT_EMPTY_PAGES       = 0b01;
        const DISCARD_UNUSED_SYSTEM_PAGES = 0b10;
    }
}

/// One OS reservation. Payload partition pages are handed out with a bump
/// cursor; pages already carved into spans are reused through the owning
/// bucket's empty/decommitted lists rather than re-carved here. Guard pages
/// (partition page 0 and the last partition page) are never touched past
/// the initial `PROT_NONE` mapping `reserve_address_space` already leaves
/// them in (spec §3 super-page layout, invariant 8).
///
/// The metadata region spec §3 describes as packed in-place inside the
/// super page's partition page 1 is, in this crate, kept as an ordinary
/// Rust `Vec` on `PartitionRoot` instead (see SPEC_FULL.md /
/// DESIGN.md): the original's embedded-metadata trick exists to solve a
/// bootstrapping problem — the allocator cannot call itself to heap
/// allocate SlotSpan records before it exists — that a Rust implementation
/// living inside an ordinary process heap doesn't have. The guard/metadata
/// partition page's *address space* is still reserved and left
/// inaccessible, preserving the addressing and guard-page-fault invariants.
struct SuperPage {
    base: NonNull<u8>,
    total_partition_pages: usize,
    next_free_partition_page: usize,
}

// SAFETY: only touched under the owning root's lock.
unsafe impl Send for SuperPage {}

impl SuperPage {
    fn payload_start_page(&self) -> usize {
        2
    }

    fn payload_end_page(&self) -> usize {
        self.total_partition_pages - 1
    }

    fn free_partition_pages(&self) -> usize {
        self.payload_end_page() - self.next_free_partition_page
    }
}

struct PartitionRootInner {
    initialized: bool,
    buckets: BucketTable,
    sentinel_span: *mut SlotSpan,
    super_pages: Vec<SuperPage>,
    direct_maps: Vec<Box<DirectMapExtent>>,
    empty_ring: EmptyRing,
    total_committed_bytes: usize,
    total_super_page_bytes: usize,
    total_direct_mapped_bytes: usize,
}

impl PartitionRootInner {
    fn uninitialized() -> Self {
        PartitionRootInner {
            initialized: false,
            buckets: BucketTable::new(std::ptr::null_mut()),
            sentinel_span: std::ptr::null_mut(),
            super_pages: Vec::new(),
            direct_maps: Vec::new(),
            empty_ring: EmptyRing::new(),
            total_committed_bytes: 0,
            total_super_page_bytes: 0,
            total_direct_mapped_bytes: 0,
        }
    }
}

/// A per-partition singleton owning all state for one logically independent
/// heap (spec §2, §3). Thread-safe: every public operation takes the single
/// root lock for its whole duration (spec §5).
pub struct PartitionRoot {
    inner: RootLock<PartitionRootInner>,
    allocator: Box<dyn PageAllocator>,
}

impl PartitionRoot {
    /// Construct a root. Initialization of the bucket table and sentinel
    /// span is deferred to the first public call (spec §3 Lifecycle:
    /// "lazily transitions to initialized on first use via a double-checked
    /// slow path"), matching the teacher's `OnceLock`/`InitFlag` idiom.
    pub fn new(allocator: impl PageAllocator + 'static) -> Self {
        PartitionRoot {
            inner: RootLock::new(PartitionRootInner::uninitialized()),
            allocator: Box::new(allocator),
        }
    }

    pub fn new_with_mmap() -> Self {
        Self::new(crate::page_allocator::MmapPageAllocator::new())
    }

    fn ensure_initialized(&self, inner: &mut PartitionRootInner) {
        if inner.initialized {
            return;
        }
        // The sentinel span is leaked once for the process lifetime of the
        // root (spec §3: "the root itself has process lifetime"); every
        // freshly-built real bucket points its active head at it (spec §9).
        let sentinel = Box::leak(Box::new(SlotSpan::sentinel())) as *mut SlotSpan;
        inner.sentinel_span = sentinel;
        inner.buckets = BucketTable::new(sentinel);
        inner.initialized = true;
        partition_alloc_support::palloc_debug!("partition root initialized");
    }

    // ---------------------------------------------------------------
    // Alloc
    // ---------------------------------------------------------------

    pub fn alloc(&self, size: usize, type_name: &'static str) -> *mut u8 {
        self.alloc_flags(AllocFlags::empty(), size, type_name)
    }

    pub fn alloc_flags(&self, flags: AllocFlags, size: usize, type_name: &'static str) -> *mut u8 {
        if let Some(ptr) = hooks::try_override_alloc(size, type_name) {
            return ptr;
        }

        let result = self.try_alloc(size);
        match result {
            Ok(ptr) => {
                if flags.contains(AllocFlags::ZERO_FILL) {
                    // SAFETY: the bucket/direct-map slot size is always
                    // >= size.
                    unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, size) };
                }
                hooks::notify_alloc(ptr.as_ptr(), size, type_name);
                ptr.as_ptr()
            }
            Err(err) => {
                if flags.contains(AllocFlags::RETURN_NULL) {
                    std::ptr::null_mut()
                } else {
                    self.out_of_memory(err)
                }
            }
        }
    }

    fn out_of_memory(&self, err: PartitionError) -> ! {
        partition_alloc_support::palloc_error!(error = %err, "partition allocator out of memory");
        panic!("partition-alloc: {err}");
    }

    fn try_alloc(&self, size: usize) -> PartitionResult<NonNull<u8>> {
        let mut inner = self.inner.lock();
        self.ensure_initialized(&mut inner);

        if size > GENERIC_MAX_DIRECT_MAPPED {
            return Err(PartitionError::SizeTooLarge {
                requested_size: size,
            });
        }

        let bucket_index = inner.buckets.bucket_index_for_size(size);
        if bucket_index == inner.buckets.sentinel_bucket_index || size > GENERIC_MAX_BUCKETED {
            return self.alloc_direct_mapped(&mut inner, size);
        }

        if let Some(ptr) = self.fast_alloc(&mut inner, bucket_index) {
            return Ok(ptr);
        }
        self.slow_alloc(&mut inner, bucket_index, size)
    }

    fn fast_alloc(&self, inner: &mut PartitionRootInner, bucket_index: usize) -> Option<NonNull<u8>> {
        loop {
            let bucket = &mut inner.buckets.buckets[bucket_index];
            let head = bucket.active_list;
            if head.is_null() {
                // Pseudo-bucket: no allocation may ever be served here
                // (invariant 5).
                return None;
            }
            let head_span = unsafe { &mut *head };
            if head_span.is_sentinel {
                return None;
            }

            if let Some(slot) = head_span.pop_free_slot() {
                self.retire_if_full(bucket_index, inner, head);
                return Some(slot);
            } else if head_span.num_unprovisioned_slots > 0 {
                let slot = head_span.provision_slot();
                self.retire_if_full(bucket_index, inner, head);
                return Some(slot);
            } else {
                bucket.active_list = head_span.next;
                bucket.num_full_spans += 1;
                continue;
            }
        }
    }

    fn retire_if_full(&self, bucket_index: usize, inner: &mut PartitionRootInner, span_ptr: *mut SlotSpan) {
        let span = unsafe { &mut *span_ptr };
        if span.num_allocated_slots == span.slots_per_span {
            let bucket = &mut inner.buckets.buckets[bucket_index];
            bucket.active_list = span.next;
            span.next = std::ptr::null_mut();
            bucket.num_full_spans += 1;
        }
    }

    fn slow_alloc(
        &self,
        inner: &mut PartitionRootInner,
        bucket_index: usize,
        _size: usize,
    ) -> PartitionResult<NonNull<u8>> {
        let bucket = &mut inner.buckets.buckets[bucket_index];

        if !bucket.empty_list.is_null() {
            let span_ptr = bucket.empty_list;
            let span = unsafe { &mut *span_ptr };
            bucket.empty_list = span.next;
            span.empty_cache_index = None;
            span.next = bucket.active_list;
            bucket.active_list = span_ptr;
            // The span is leaving the empty state: any ring slot still
            // naming it must be cleared so a later eviction can't
            // decommit it out from under this now-active span (spec
            // §4.5).
            inner.empty_ring.invalidate_span(span_ptr);
            return self
                .fast_alloc(inner, bucket_index)
                .ok_or(PartitionError::OutOfMemory { requested_size: 0 });
        }

        if !bucket.decommitted_list.is_null() {
            let span_ptr = bucket.decommitted_list;
            let span = unsafe { &mut *span_ptr };
            bucket.decommitted_list = span.next;
            let span_bytes = span.num_system_pages as usize * SYSTEM_PAGE_SIZE;
            self.allocator
                .recommit_system_pages(span.payload_base, span_bytes)?;
            span.num_unprovisioned_slots = span.slots_per_span;
            span.num_allocated_slots = 0;
            span.freelist_head = None;
            span.next = bucket.active_list;
            bucket.active_list = span_ptr;
            inner.total_committed_bytes += span_bytes;
            return self
                .fast_alloc(inner, bucket_index)
                .ok_or(PartitionError::OutOfMemory { requested_size: 0 });
        }

        let span_ptr = self.carve_new_span(inner, bucket_index)?;
        let bucket = &mut inner.buckets.buckets[bucket_index];
        let span = unsafe { &mut *span_ptr };
        span.next = bucket.active_list;
        bucket.active_list = span_ptr;
        self.fast_alloc(inner, bucket_index)
            .ok_or(PartitionError::OutOfMemory { requested_size: 0 })
    }

    fn carve_new_span(
        &self,
        inner: &mut PartitionRootInner,
        bucket_index: usize,
    ) -> PartitionResult<*mut SlotSpan> {
        let (slot_size, slots_per_span, num_system_pages) = {
            let bucket = &inner.buckets.buckets[bucket_index];
            (
                bucket.slot_size,
                bucket.slots_per_span,
                bucket.num_system_pages_per_span,
            )
        };
        let needed_partition_pages = partition_pages_for_bucket(&inner.buckets.buckets[bucket_index]);

        let super_page_index = inner
            .super_pages
            .iter()
            .position(|sp| sp.free_partition_pages() >= needed_partition_pages);

        let super_page_index = match super_page_index {
            Some(index) => index,
            None => {
                self.reserve_super_page(inner)?;
                inner.super_pages.len() - 1
            }
        };

        let super_page = &mut inner.super_pages[super_page_index];
        let partition_page_start = super_page.next_free_partition_page;
        let payload_base = unsafe {
            NonNull::new_unchecked(
                super_page
                    .base
                    .as_ptr()
                    .add(partition_page_start * PARTITION_PAGE_SIZE),
            )
        };
        let span_bytes = num_system_pages as usize * SYSTEM_PAGE_SIZE;
        self.allocator
            .set_system_pages_access(payload_base, span_bytes, PageAccess::ReadWrite)?;
        super_page.next_free_partition_page += needed_partition_pages;
        inner.total_committed_bytes += span_bytes;

        let bucket_ptr = &mut inner.buckets.buckets[bucket_index] as *mut crate::bucket::Bucket;
        let span = Box::leak(Box::new(SlotSpan {
            bucket: bucket_ptr,
            freelist_head: None,
            num_allocated_slots: 0,
            num_unprovisioned_slots: slots_per_span,
            empty_cache_index: None,
            next: std::ptr::null_mut(),
            raw_size: None,
            slots_per_span,
            num_system_pages,
            payload_base,
            is_sentinel: false,
        }));
        Ok(span as *mut SlotSpan)
    }

    fn reserve_super_page(&self, inner: &mut PartitionRootInner) -> PartitionResult<()> {
        let base = self
            .allocator
            .reserve_address_space(SUPER_PAGE_SIZE, SUPER_PAGE_SIZE)?;
        inner.super_pages.push(SuperPage {
            base,
            total_partition_pages: PARTITION_PAGES_PER_SUPER_PAGE,
            next_free_partition_page: 2,
        });
        inner.total_super_page_bytes += SUPER_PAGE_SIZE;
        Ok(())
    }

    fn alloc_direct_mapped(
        &self,
        inner: &mut PartitionRootInner,
        size: usize,
    ) -> PartitionResult<NonNull<u8>> {
        let extent = direct_map::allocate_direct_map(self.allocator.as_ref(), size)?;
        let payload_base = extent.payload_base;
        inner.total_direct_mapped_bytes += extent.reservation_size;
        inner.total_committed_bytes += extent.mapped_size;
        inner.direct_maps.insert(0, Box::new(extent));
        Ok(payload_base)
    }

    // ---------------------------------------------------------------
    // Free
    // ---------------------------------------------------------------

    pub fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        if hooks::try_override_free(ptr) {
            return;
        }

        let mut inner = self.inner.lock();

        if let Some(index) = inner
            .direct_maps
            .iter()
            .position(|extent| extent.payload_base.as_ptr() == ptr)
        {
            let extent = inner.direct_maps.remove(index);
            inner.total_direct_mapped_bytes -= extent.reservation_size;
            inner.total_committed_bytes -= extent.mapped_size;
            unsafe { direct_map::free_direct_map(self.allocator.as_ref(), &extent) };
            drop(inner);
            hooks::notify_free(ptr);
            return;
        }

        let span_ptr = self.find_owning_span(&inner, ptr);
        let span_ptr = match span_ptr {
            Some(p) => p,
            None => panic!("partition-alloc: free() of pointer not owned by this root"),
        };

        let span = unsafe { &mut *span_ptr };
        let was_full = span.num_allocated_slots == span.slots_per_span;
        let slot = NonNull::new(ptr).unwrap();
        unsafe { span.push_free_slot(slot) };

        let bucket_index = self.bucket_index_of(&inner, span.bucket);

        if was_full {
            let bucket = &mut inner.buckets.buckets[bucket_index];
            span.next = bucket.active_list;
            bucket.active_list = span_ptr;
            bucket.num_full_spans = bucket.num_full_spans.saturating_sub(1);
        }

        if span.num_allocated_slots == 0 {
            self.move_to_empty(&mut inner, bucket_index, span_ptr);
        }

        drop(inner);
        hooks::notify_free(ptr);
    }

    fn find_owning_span(&self, inner: &PartitionRootInner, ptr: *mut u8) -> Option<*mut SlotSpan> {
        for super_page in &inner.super_pages {
            let start = unsafe { super_page.base.as_ptr().add(2 * PARTITION_PAGE_SIZE) };
            let end = unsafe {
                super_page
                    .base
                    .as_ptr()
                    .add(super_page.payload_end_page() * PARTITION_PAGE_SIZE)
            };
            if (ptr as usize) >= (start as usize) && (ptr as usize) < (end as usize) {
                return self.scan_bucket_lists_for_pointer(inner, ptr);
            }
        }
        None
    }

    fn scan_bucket_lists_for_pointer(
        &self,
        inner: &PartitionRootInner,
        ptr: *mut u8,
    ) -> Option<*mut SlotSpan> {
        for bucket in &inner.buckets.buckets {
            for &list_head in &[bucket.active_list, bucket.empty_list, bucket.decommitted_list] {
                let mut cur = list_head;
                while !cur.is_null() {
                    let span = unsafe { &*cur };
                    if !span.is_sentinel {
                        let start = span.payload_base.as_ptr() as usize;
                        let span_bytes = span.num_system_pages as usize * SYSTEM_PAGE_SIZE;
                        let end = start + span_bytes;
                        let addr = ptr as usize;
                        if addr >= start && addr < end {
                            return Some(cur as *const SlotSpan as *mut SlotSpan);
                        }
                    }
                    cur = span.next;
                }
            }
        }
        None
    }

    fn bucket_index_of(&self, inner: &PartitionRootInner, bucket_ptr: *mut crate::bucket::Bucket) -> usize {
        inner
            .buckets
            .buckets
            .iter()
            .position(|b| b as *const _ as *mut crate::bucket::Bucket == bucket_ptr)
            .expect("slot span's bucket must belong to this root's bucket table")
    }

    fn move_to_empty(&self, inner: &mut PartitionRootInner, bucket_index: usize, span_ptr: *mut SlotSpan) {
        // Unlink from the active list first if still linked there.
        let bucket = &mut inner.buckets.buckets[bucket_index];
        if bucket.active_list == span_ptr {
            let span = unsafe { &*span_ptr };
            bucket.active_list = span.next;
        } else {
            let mut cur = bucket.active_list;
            while !cur.is_null() {
                let node = unsafe { &mut *cur };
                if node.next == span_ptr {
                    let target = unsafe { &*span_ptr };
                    node.next = target.next;
                    break;
                }
                cur = node.next;
            }
        }

        let span = unsafe { &mut *span_ptr };
        span.next = bucket.empty_list;
        bucket.empty_list = span_ptr;

        let root_ptr = self as *const PartitionRoot as *mut PartitionRoot;
        let evicted = inner
            .empty_ring
            .push(EmptyRingEntry { root: root_ptr, span: span_ptr });
        span.empty_cache_index = Some((inner.empty_ring.len().min(EMPTY_RING_SIZE) - 1) as u32);

        if let Some(evicted) = evicted {
            // Spec §9 "Cross-root ring interaction": the evicted entry
            // names its owning root explicitly. Here it is always `self`
            // since this crate gives each root its own process-private
            // empty ring rather than sharing one across roots — the
            // simplest resolution of the documented open question that
            // never risks acquiring two root locks at once.
            debug_assert!(evicted.root == root_ptr);
            self.decommit_span(inner, evicted.span);
        }
    }

    fn decommit_span(&self, inner: &mut PartitionRootInner, span_ptr: *mut SlotSpan) {
        let bucket_index = {
            let span = unsafe { &*span_ptr };
            self.bucket_index_of(inner, span.bucket)
        };
        let bucket = &mut inner.buckets.buckets[bucket_index];

        if bucket.empty_list == span_ptr {
            let span = unsafe { &*span_ptr };
            bucket.empty_list = span.next;
        } else {
            let mut cur = bucket.empty_list;
            while !cur.is_null() {
                let node = unsafe { &mut *cur };
                if node.next == span_ptr {
                    let target = unsafe { &*span_ptr };
                    node.next = target.next;
                    break;
                }
                cur = node.next;
            }
        }

        let span = unsafe { &mut *span_ptr };
        let span_bytes = span.num_system_pages as usize * SYSTEM_PAGE_SIZE;
        let _ = self.allocator.decommit_system_pages(span.payload_base, span_bytes);
        inner.total_committed_bytes = inner.total_committed_bytes.saturating_sub(span_bytes);
        // Whether this span arrived here via ring eviction or a direct
        // purge (`decommit_all_empty_spans`), it no longer belongs in the
        // empty ring once decommitted (spec §4.5) — leaving a stale entry
        // would let a later eviction re-decommit it and double-insert it
        // into the decommitted list.
        inner.empty_ring.invalidate_span(span_ptr);

        let bucket = &mut inner.buckets.buckets[bucket_index];
        span.next = bucket.decommitted_list;
        bucket.decommitted_list = span_ptr;
        span.empty_cache_index = None;
    }

    // ---------------------------------------------------------------
    // Realloc
    // ---------------------------------------------------------------

    pub fn realloc(&self, ptr: *mut u8, new_size: usize, type_name: &'static str) -> *mut u8 {
        self.realloc_flags(AllocFlags::empty(), ptr, new_size, type_name)
    }

    pub fn realloc_flags(
        &self,
        flags: AllocFlags,
        ptr: *mut u8,
        new_size: usize,
        type_name: &'static str,
    ) -> *mut u8 {
        if ptr.is_null() {
            return self.alloc_flags(flags, new_size, type_name);
        }
        if new_size == 0 {
            self.free(ptr);
            return std::ptr::null_mut();
        }
        if let Some(result) = hooks::try_override_realloc(ptr, new_size) {
            return result;
        }
        if new_size > GENERIC_MAX_DIRECT_MAPPED {
            if flags.contains(AllocFlags::RETURN_NULL) {
                return std::ptr::null_mut();
            }
            self.out_of_memory(PartitionError::SizeTooLarge {
                requested_size: new_size,
            });
        }

        let mut inner = self.inner.lock();

        if let Some(index) = inner
            .direct_maps
            .iter()
            .position(|extent| extent.payload_base.as_ptr() == ptr)
        {
            let old_raw_size = inner.direct_maps[index].raw_size;
            let result = {
                let extent = &mut inner.direct_maps[index];
                direct_map::realloc_direct_map_in_place(self.allocator.as_ref(), extent, new_size)
            };
            match result {
                Ok(InPlaceResult::Unchanged | InPlaceResult::ShrankInPlace | InPlaceResult::GrewInPlace) => {
                    drop(inner);
                    hooks::notify_realloc(ptr, ptr, new_size);
                    return ptr;
                }
                Ok(InPlaceResult::NotPossible) | Err(_) => {
                    drop(inner);
                    return self.realloc_copy(flags, ptr, old_raw_size, new_size, type_name);
                }
            }
        }

        let span_ptr = self.find_owning_span(&inner, ptr);
        let span_ptr = match span_ptr {
            Some(p) => p,
            None => panic!("partition-alloc: realloc() of pointer not owned by this root"),
        };
        let span = unsafe { &mut *span_ptr };
        let old_size = span.raw_size.unwrap_or_else(|| span.slot_size());
        let bucket_index = self.bucket_index_of(&inner, span.bucket);
        let new_bucket_index = inner.buckets.bucket_index_for_size(new_size);
        if new_bucket_index == bucket_index {
            span.raw_size = Some(new_size);
            return ptr;
        }
        drop(inner);
        self.realloc_copy(flags, ptr, old_size, new_size, type_name)
    }

    /// Copy-and-free path (spec §4.4 step 6: "copy `min(old_size,
    /// new_size)` bytes"). `old_size` must be the *previous* block's usable
    /// size, recovered by the caller before the old block is touched.
    fn realloc_copy(
        &self,
        flags: AllocFlags,
        ptr: *mut u8,
        old_size: usize,
        new_size: usize,
        type_name: &'static str,
    ) -> *mut u8 {
        let new_ptr = self.alloc_flags(flags, new_size, type_name);
        if new_ptr.is_null() {
            return std::ptr::null_mut();
        }
        let copy_len = old_size.min(new_size);
        unsafe { std::ptr::copy_nonoverlapping(ptr, new_ptr, copy_len) };
        self.free(ptr);
        hooks::notify_realloc(ptr, new_ptr, new_size);
        new_ptr
    }

    /// The bucket slot size that would serve `requested_size` (spec §6
    /// `ActualSize`).
    pub fn actual_size(&self, requested_size: usize) -> usize {
        let mut inner = self.inner.lock();
        self.ensure_initialized(&mut inner);
        if requested_size > GENERIC_MAX_BUCKETED {
            return requested_size.next_multiple_of(SYSTEM_PAGE_SIZE);
        }
        inner.buckets.bucket_for_size(requested_size).slot_size as usize
    }

    // ---------------------------------------------------------------
    // Purge
    // ---------------------------------------------------------------

    pub fn purge_memory(&self, flags: PurgeFlags) {
        let mut inner = self.inner.lock();
        self.ensure_initialized(&mut inner);

        if flags.contains(PurgeFlags::DECOMMIT_EMPTY_PAGES) {
            self.decommit_all_empty_spans(&mut inner);
        }

        if flags.contains(PurgeFlags::DISCARD_UNUSED_SYSTEM_PAGES) {
            self.discard_unused_pages(&mut inner);
        }
    }

    fn decommit_all_empty_spans(&self, inner: &mut PartitionRootInner) {
        let bucket_count = inner.buckets.buckets.len();
        for bucket_index in 0..bucket_count {
            loop {
                let head = inner.buckets.buckets[bucket_index].empty_list;
                if head.is_null() {
                    break;
                }
                self.decommit_span(inner, head);
            }
        }
    }

    fn discard_unused_pages(&self, inner: &mut PartitionRootInner) {
        let bucket_count = inner.buckets.buckets.len();
        for bucket_index in 0..bucket_count {
            let (slot_size, is_pseudo, is_sentinel) = {
                let bucket = &inner.buckets.buckets[bucket_index];
                (bucket.slot_size as usize, bucket.is_pseudo, bucket.is_sentinel)
            };
            if is_pseudo || is_sentinel || slot_size < SYSTEM_PAGE_SIZE {
                continue;
            }
            let mut cur = inner.buckets.buckets[bucket_index].active_list;
            while !cur.is_null() {
                let span = unsafe { &mut *cur };
                if span.is_sentinel {
                    break;
                }
                unsafe { purge::purge_slot_span(self.allocator.as_ref(), span, slot_size, true) };
                cur = span.next;
            }
        }
    }

    // ---------------------------------------------------------------
    // Stats
    // ---------------------------------------------------------------

    pub fn dump_stats(&self, partition_name: &str, is_light_dump: bool, dumper: &mut dyn StatsDumper) {
        let snapshot = {
            let mut inner = self.inner.lock();
            self.ensure_initialized(&mut inner);
            self.snapshot_stats(&inner, is_light_dump)
        };
        dumper.dump(partition_name, &snapshot);
    }

    fn snapshot_stats(&self, inner: &PartitionRootInner, is_light_dump: bool) -> PartitionRootStats {
        let mut stats = PartitionRootStats {
            total_committed_bytes: inner.total_committed_bytes,
            total_super_page_bytes: inner.total_super_page_bytes,
            total_direct_mapped_bytes: inner.total_direct_mapped_bytes,
            ..Default::default()
        };

        if is_light_dump {
            return stats;
        }

        for bucket in &inner.buckets.buckets {
            if bucket.is_pseudo || bucket.is_sentinel {
                continue;
            }
            if bucket.active_list.is_null() && bucket.empty_list.is_null() && bucket.decommitted_list.is_null() {
                continue;
            }
            let mut bucket_stats = BucketStats {
                slot_size: bucket.slot_size,
                num_full_spans: bucket.num_full_spans,
                ..Default::default()
            };
            for &(list, kind) in &[
                (bucket.active_list, 0u8),
                (bucket.empty_list, 1u8),
                (bucket.decommitted_list, 2u8),
            ] {
                let mut cur = list;
                while !cur.is_null() {
                    // SAFETY: snapshot_stats runs under the root lock; no
                    // other reference to this span is live concurrently.
                    let span = unsafe { &mut *cur };
                    if span.is_sentinel {
                        break;
                    }
                    match kind {
                        0 => bucket_stats.num_active_spans += 1,
                        1 => bucket_stats.num_empty_spans += 1,
                        _ => bucket_stats.num_decommitted_spans += 1,
                    }
                    let span_bytes = span.num_system_pages as usize * SYSTEM_PAGE_SIZE;
                    bucket_stats.allocated_bytes +=
                        span.num_allocated_slots as usize * bucket.slot_size as usize;
                    if kind != 2 {
                        bucket_stats.resident_bytes += span_bytes;
                    }
                    if kind == 0 {
                        // Dry-run the purge engine (discard=false) to report
                        // discardable bytes without mutating anything (spec
                        // §4.6).
                        let dry_run = unsafe {
                            crate::purge::purge_slot_span(
                                self.allocator.as_ref(),
                                span,
                                bucket.slot_size as usize,
                                false,
                            )
                        };
                        bucket_stats.discardable_bytes += dry_run.discardable_bytes;
                    }
                    cur = span.next;
                }
            }
            stats.buckets.push(bucket_stats);
        }

        for extent in &inner.direct_maps {
            crate::stats::push_direct_map_stat(
                &mut stats,
                DirectMapStats {
                    mapped_size: extent.mapped_size,
                    raw_size: extent.raw_size,
                },
            );
        }

        stats
    }
}

// SAFETY: all mutable state lives behind `inner`'s `RootLock`.
unsafe impl Sync for PartitionRoot {}
unsafe impl Send for PartitionRoot {}
