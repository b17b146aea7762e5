//! Error type for the partition allocator.
//!
//! Spec §7 splits failures into two buckets: ones with a recoverable,
//! caller-visible outcome (out-of-memory with `RETURN_NULL` set) and ones
//! that are always fatal (bad pointer to `free`, hook double-registration,
//! an impossible state transition). Only the former are represented here;
//! the latter are raised as `panic!` at the point of detection, matching
//! the teacher's own practice of hand-rolling an error enum with a manual
//! `Display` rather than pulling in `thiserror`.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionError {
    /// Address-space reservation or commit failed, and the caller requested
    /// `RETURN_NULL` so no OOM handler is invoked.
    OutOfMemory { requested_size: usize },
    /// The requested size exceeds `GENERIC_MAX_DIRECT_MAPPED`.
    SizeTooLarge { requested_size: usize },
}

impl fmt::Display for PartitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested_size } => {
                write!(f, "out of memory allocating {requested_size} bytes")
            }
            Self::SizeTooLarge { requested_size } => {
                write!(
                    f,
                    "requested size {requested_size} exceeds the maximum direct-mapped allocation"
                )
            }
        }
    }
}

impl std::error::Error for PartitionError {}

pub type PartitionResult<T = ()> = Result<T, PartitionError>;
