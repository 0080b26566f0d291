//! Range scan state machine for the B+ tree index.
//!
//! A scan moves through three states: idle (no [`ScanState`]), active (a leaf
//! is pinned under the cursor), and exhausted (the cursor ran off the last
//! qualifying entry). `IndexScanCompleted` is terminal until `end_scan`
//! resets the index to idle.

use crate::bufmgr::PageGuard;
use crate::btree::index::BTreeIndex;
use crate::btree::key::{DoubleKey, IndexKey, KeyType, KeyValue, TextKey};
use crate::btree::node::{LeafNode, NonLeafNode};
use krait_common::page::{PageId, RecordId};
use krait_common::{KraitError, Result};
use std::cmp::Ordering;

/// Comparison operator for scan bounds.
///
/// Low bounds accept `Gt`/`Gte`, high bounds `Lt`/`Lte`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

/// State of an in-progress range scan.
pub(crate) struct ScanState {
    /// Upper bound of the range.
    high: KeyValue,
    /// How the upper bound terminates the scan.
    high_op: ScanOp,
    /// Leaf pinned under the cursor; None once the leaf chain is exhausted.
    current_page: Option<PageGuard>,
    /// Entry the next `scan_next` call will look at.
    next_entry: usize,
}

impl BTreeIndex {
    /// Begins a range scan over `[low, high]` with the given bound operators.
    ///
    /// Positions the cursor on the leftmost entry satisfying the low bound.
    /// Fails with `BadOpcodes` for operators on the wrong side, with
    /// `BadScanRange` when the low bound exceeds the high bound, and with
    /// `IndexScanCompleted` when no key in the tree satisfies the range. An
    /// already-active scan is ended first.
    pub fn start_scan(
        &mut self,
        low: KeyValue,
        low_op: ScanOp,
        high: KeyValue,
        high_op: ScanOp,
    ) -> Result<()> {
        if !matches!(low_op, ScanOp::Gt | ScanOp::Gte)
            || !matches!(high_op, ScanOp::Lt | ScanOp::Lte)
        {
            return Err(KraitError::BadOpcodes);
        }
        for bound in [&low, &high] {
            if bound.key_type() != self.key_type {
                return Err(KraitError::KeyTypeMismatch {
                    expected: self.key_type.to_string(),
                    actual: bound.key_type().to_string(),
                });
            }
        }
        if low.try_cmp(&high) == Some(Ordering::Greater) {
            return Err(KraitError::BadScanRange);
        }

        if self.scan.is_some() {
            self.end_scan()?;
        }

        let (guard, next_entry) = match self.key_type {
            KeyType::Integer => self.seek_scan::<i32>(self.typed_key(&low)?, low_op)?,
            KeyType::Double => self.seek_scan::<DoubleKey>(self.typed_key(&low)?, low_op)?,
            KeyType::Text => self.seek_scan::<TextKey>(self.typed_key(&low)?, low_op)?,
        };

        self.scan = Some(ScanState {
            high,
            high_op,
            current_page: Some(guard),
            next_entry,
        });
        Ok(())
    }

    /// Finds the leftmost entry satisfying the low bound.
    ///
    /// Descends to the leaf the low key would live in, then walks right
    /// sibling links until an entry qualifies. Fails with
    /// `IndexScanCompleted` when the leaf chain runs out first.
    fn seek_scan<K: IndexKey>(&self, low: K, low_op: ScanOp) -> Result<(PageGuard, usize)> {
        let mut leaf_page = self.root_page_num;

        if !self.only_root {
            let mut guard = self
                .mgr
                .fetch_page(PageId::new(self.file_id, leaf_page))?;
            loop {
                let node = NonLeafNode::<K>::from_bytes(&guard.read());
                let child = node.page_no_at(node.scan_child_index(&low));
                if node.level() == 1 {
                    leaf_page = child;
                    break;
                }
                // Replacing the guard releases the parent before stepping down
                guard = self.mgr.fetch_page(PageId::new(self.file_id, child))?;
            }
        }

        let mut page_num = leaf_page;
        loop {
            let guard = self.mgr.fetch_page(PageId::new(self.file_id, page_num))?;
            let (found, sibling) = {
                let data = guard.read();
                let occ = LeafNode::<K>::occupancy();
                let mut found = None;
                for i in 0..occ {
                    if LeafNode::<K>::rid_in_slice(&data[..], i).is_empty() {
                        break;
                    }
                    let k = LeafNode::<K>::key_in_slice(&data[..], i);
                    let qualifies = match low_op {
                        ScanOp::Gt => k > low,
                        _ => k >= low,
                    };
                    if qualifies {
                        found = Some(i);
                        break;
                    }
                }
                (found, LeafNode::<K>::right_sibling_in_slice(&data[..]))
            };

            if let Some(i) = found {
                return Ok((guard, i));
            }
            if sibling == 0 {
                return Err(KraitError::IndexScanCompleted);
            }
            page_num = sibling;
        }
    }

    /// Returns the next record ID in key order.
    ///
    /// Fails with `ScanNotInitialized` outside a scan and with
    /// `IndexScanCompleted` once the high bound is crossed or the leaf chain
    /// ends; the completed state persists until `end_scan`.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        match self.key_type {
            KeyType::Integer => self.scan_next_typed::<i32>(),
            KeyType::Double => self.scan_next_typed::<DoubleKey>(),
            KeyType::Text => self.scan_next_typed::<TextKey>(),
        }
    }

    fn scan_next_typed<K: IndexKey>(&mut self) -> Result<RecordId> {
        let high_value = match &self.scan {
            Some(state) => state.high,
            None => return Err(KraitError::ScanNotInitialized),
        };
        let high: K = self.typed_key(&high_value)?;

        let state = self.scan.as_mut().ok_or(KraitError::ScanNotInitialized)?;

        let (rid, at_leaf_end, sibling) = {
            let guard = state
                .current_page
                .as_ref()
                .ok_or(KraitError::IndexScanCompleted)?;
            let data = guard.read();

            let k = LeafNode::<K>::key_in_slice(&data[..], state.next_entry);
            let past_high = match state.high_op {
                ScanOp::Lt => k >= high,
                _ => k > high,
            };
            if past_high {
                return Err(KraitError::IndexScanCompleted);
            }

            let rid = LeafNode::<K>::rid_in_slice(&data[..], state.next_entry);
            let occ = LeafNode::<K>::occupancy();
            let at_leaf_end = state.next_entry == occ - 1
                || LeafNode::<K>::rid_in_slice(&data[..], state.next_entry + 1).is_empty();
            (rid, at_leaf_end, LeafNode::<K>::right_sibling_in_slice(&data[..]))
        };

        if at_leaf_end {
            if sibling == 0 {
                // Exhausted: the next call reports completion
                state.current_page = None;
            } else {
                let next_guard = self.mgr.fetch_page(PageId::new(self.file_id, sibling))?;
                state.current_page = Some(next_guard);
                state.next_entry = 0;
            }
        } else {
            state.next_entry += 1;
        }

        Ok(rid)
    }

    /// Ends the current scan, releasing the pinned leaf.
    ///
    /// Fails with `ScanNotInitialized` when no scan is in progress.
    pub fn end_scan(&mut self) -> Result<()> {
        match self.scan.take() {
            // Dropping the state unpins the current leaf; a page that was
            // already released elsewhere is tolerated silently.
            Some(_state) => Ok(()),
            None => Err(KraitError::ScanNotInitialized),
        }
    }
}
