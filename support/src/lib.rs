//! Small, dependency-light support library shared by the partition allocator
//! crate: alignment helpers, the ticket spin-lock, one-shot lazy init, and a
//! fixed-capacity ring buffer, plus a `tracing` logging facade.
//!
//! None of this is allocator-specific; it is kept separate so the core crate
//! reads as allocator logic and nothing else.

pub mod alignment;
pub mod log;
pub mod once_lock;
pub mod ring_buffer;
pub mod spinlock;

#[doc(hidden)]
pub use paste;

pub use alignment::{align_down_u64, align_down_usize, align_up_u64, align_up_usize};
pub use alignment::{align_down_usize as align_down, align_up_usize as align_up};
pub use once_lock::OnceLock;
pub use ring_buffer::RingBuffer;
pub use spinlock::{RootLock, RootLockGuard};
