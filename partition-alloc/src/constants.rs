//! Compile-time geometry constants.
//!
//! These mirror `mm_constants.rs` in the teacher crate (itself a re-export
//! from `slopos_abi`): fixed, `const`-evaluable values that the fast path's
//! shift/mask tables are precomputed from. See spec §6.

/// The OS virtual-memory granularity. All commit/decommit/protect calls
/// align to this.
pub const SYSTEM_PAGE_SIZE: usize = 4096;

/// Fixed multiple of system pages; the unit of slot-span composition and of
/// metadata indexing.
pub const PARTITION_PAGE_SIZE: usize = 4 * SYSTEM_PAGE_SIZE;

/// A single OS reservation. Matches the real PartitionAlloc's 2 MiB super
/// page: large enough to host many partition pages, small enough that guard
/// + metadata overhead stays under 1%.
pub const SUPER_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Partition pages per super page, including the two guard pages and the
/// one metadata page.
pub const PARTITION_PAGES_PER_SUPER_PAGE: usize = SUPER_PAGE_SIZE / PARTITION_PAGE_SIZE;

/// `alignof(max_align_t)` analogue: the smallest bucket slot size.
pub const GENERIC_SMALLEST_BUCKET: usize = 16;

/// Roughly 960 KiB in the reference configuration — the largest allocation
/// still served by a bucket rather than the direct-map path.
pub const GENERIC_MAX_BUCKETED: usize = 983_040;

/// Page-allocation granularity used to bound direct-map reservations.
pub const PAGE_ALLOCATION_GRANULARITY: usize = SYSTEM_PAGE_SIZE;

/// `2^31 + PageAllocationGranularity` — largest direct-mapped allocation.
pub const GENERIC_MAX_DIRECT_MAPPED: usize = (1usize << 31) + PAGE_ALLOCATION_GRANULARITY;

/// Upper bound on partition pages a single slot span may span.
pub const MAX_SYSTEM_PAGES_PER_SLOT_SPAN: usize = 255;

/// Sub-buckets per power-of-two order. Must be a power of two (spec §6);
/// matches the real allocator's value.
pub const NUM_BUCKETS_PER_ORDER_BITS: u32 = 2;
pub const NUM_BUCKETS_PER_ORDER: usize = 1 << NUM_BUCKETS_PER_ORDER_BITS;

/// Smallest order actually backed by a real (non-pseudo) bucket: the order
/// of `GENERIC_SMALLEST_BUCKET`.
pub const MIN_BUCKETED_ORDER: u32 = GENERIC_SMALLEST_BUCKET.trailing_zeros();

/// Largest order a bucketed allocation can reach before falling through to
/// the direct-map path; one above the order of `GENERIC_MAX_BUCKETED`.
pub const MAX_BUCKETED_ORDER: u32 = 20;

/// Size of one metadata record: fixed so that the metadata partition page's
/// first system page holds exactly `PARTITION_PAGE_SIZE / SYSTEM_PAGE_SIZE *
/// (SYSTEM_PAGE_SIZE / METADATA_RECORD_SIZE)` records, matching spec §3's
/// description of a fixed-size record packed one-per-partition-page.
pub const METADATA_RECORD_SIZE: usize = 32;

/// Direct-map stats reports are capped at this many entries (spec §4.6,
/// `kMaxReportableDirectMaps` in the original).
pub const MAX_REPORTABLE_DIRECT_MAPS: usize = 4096;

const _: () = assert!(PARTITION_PAGE_SIZE >= 4 * SYSTEM_PAGE_SIZE);
const _: () = assert!(SUPER_PAGE_SIZE >= 4 * PARTITION_PAGE_SIZE);
const _: () = assert!(NUM_BUCKETS_PER_ORDER.is_power_of_two());
const _: () = assert!(MAX_SYSTEM_PAGES_PER_SLOT_SPAN < 256);
const _: () = assert!(GENERIC_MAX_DIRECT_MAPPED <= (1usize << 31) + PAGE_ALLOCATION_GRANULARITY);
const _: () = assert!(PARTITION_PAGES_PER_SUPER_PAGE >= 4);
