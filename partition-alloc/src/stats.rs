//! Stats walker (spec §4.6).
//!
//! Snapshots are taken under the root lock and handed to the caller's
//! dumper only after the lock is released, so the dumper is free to
//! allocate on the same root (spec §4.6, §5: user callbacks never run with
//! the lock held).

use crate::constants::MAX_REPORTABLE_DIRECT_MAPS;

#[derive(Debug, Clone, Default)]
pub struct SlotSpanStats {
    pub allocated_bytes: usize,
    pub resident_bytes: usize,
    pub discardable_bytes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BucketStats {
    pub slot_size: u32,
    pub num_active_spans: u32,
    pub num_empty_spans: u32,
    pub num_decommitted_spans: u32,
    pub num_full_spans: u32,
    pub allocated_bytes: usize,
    pub resident_bytes: usize,
    pub discardable_bytes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DirectMapStats {
    pub mapped_size: usize,
    pub raw_size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PartitionRootStats {
    pub total_committed_bytes: usize,
    pub total_super_page_bytes: usize,
    pub total_direct_mapped_bytes: usize,
    /// Present only for a full dump (spec §4.6 "light dump" omits these).
    pub buckets: Vec<BucketStats>,
    /// Capped at `MAX_REPORTABLE_DIRECT_MAPS` entries; `direct_map_overflow`
    /// records how many were dropped so a reader can tell the report is
    /// truncated rather than complete.
    pub direct_maps: Vec<DirectMapStats>,
    pub direct_map_overflow: usize,
}

/// Caller-provided sink for a stats dump, mirroring the `dumper` parameter
/// of `PartitionRoot::DumpStats` in spec §4.6/§6.
pub trait StatsDumper {
    fn dump(&mut self, partition_name: &str, stats: &PartitionRootStats);
}

/// A dumper that just collects the stats for the caller to inspect, useful
/// in tests and grounded on the teacher's `get_heap_stats`/
/// `print_heap_stats` pair in `kernel_heap.rs` (one collects, one prints).
#[derive(Default)]
pub struct CollectingDumper {
    pub last: Option<PartitionRootStats>,
}

impl StatsDumper for CollectingDumper {
    fn dump(&mut self, _partition_name: &str, stats: &PartitionRootStats) {
        self.last = Some(stats.clone());
    }
}

pub(crate) fn push_direct_map_stat(stats: &mut PartitionRootStats, entry: DirectMapStats) {
    if stats.direct_maps.len() >= MAX_REPORTABLE_DIRECT_MAPS {
        stats.direct_map_overflow += 1;
    } else {
        stats.direct_maps.push(entry);
    }
}
