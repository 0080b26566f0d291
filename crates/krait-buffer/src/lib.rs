//! Buffer pool management for Krait.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - Clock eviction policy for cache management
//! - Pin counting to keep in-use pages resident
//! - Dirty page tracking for write-back

mod frame;
mod page_table;
mod pool;
mod replacer;

pub use frame::{BufferFrame, FrameId};
pub use page_table::PageTable;
pub use pool::{BufferPool, BufferPoolConfig, BufferPoolStats, EvictedPage};
pub use replacer::{ClockReplacer, Replacer};
