//! A partitioned, size-class slab allocator core.
//!
//! Organized around a [`root::PartitionRoot`]: a per-partition singleton
//! that owns a fixed array of [`bucket::Bucket`]s (size classes), each with
//! intrusive lists of [`slot_span::SlotSpan`]s carved out of 2 MiB
//! super-page reservations. Allocations above the bucketed threshold go
//! through [`direct_map`] instead. See `SPEC_FULL.md` and `DESIGN.md` at the
//! workspace root for the full design and its grounding.

pub mod bucket;
pub mod constants;
pub mod direct_map;
pub mod empty_ring;
pub mod error;
pub mod freelist;
pub mod hooks;
pub mod page_allocator;
pub mod purge;
pub mod root;
pub mod slot_span;
pub mod stats;

pub use error::{PartitionError, PartitionResult};
pub use page_allocator::{MmapPageAllocator, PageAccess, PageAllocator};
pub use root::{AllocFlags, PartitionRoot, PurgeFlags};
pub use stats::{CollectingDumper, PartitionRootStats, StatsDumper};

#[cfg(test)]
mod tests_scenarios;
