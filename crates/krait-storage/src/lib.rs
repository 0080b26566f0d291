//! Storage engine for Krait.
//!
//! This crate provides:
//! - Disk manager for page-level I/O over named files
//! - Buffer manager facade tying the buffer pool to the disk manager,
//!   with guard-based page pinning
//! - Heap files for fixed-size record storage and sequential scans
//! - B+ tree secondary index with key-ordered range scans

mod btree;
mod bufmgr;
mod disk;
mod heap;

pub use btree::{
    leaf_occupancy, non_leaf_occupancy, BTreeIndex, DoubleKey, IndexKey, IndexMetaInfo, KeyType,
    KeyValue, LeafNode, NonLeafNode, ScanOp, TextKey, HEADER_PAGE_NUM, INITIAL_ROOT_PAGE_NUM,
    RELATION_NAME_SIZE, STRING_SIZE,
};
pub use bufmgr::{BufferManager, PageGuard};
pub use disk::{DiskManager, DiskManagerConfig};
pub use heap::{HeapFile, HeapScan};
