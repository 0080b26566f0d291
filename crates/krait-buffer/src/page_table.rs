//! Page table mapping resident page IDs to buffer frames.

use crate::frame::FrameId;
use krait_common::page::PageId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Maps PageId to the frame currently holding that page.
pub struct PageTable {
    entries: RwLock<HashMap<PageId, FrameId>>,
}

impl PageTable {
    /// Creates a new page table sized for the given number of frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Looks up a page ID and returns its frame ID if resident.
    #[inline]
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        self.entries.read().get(&page_id).copied()
    }

    /// Inserts a page ID to frame ID mapping.
    #[inline]
    pub fn insert(&self, page_id: PageId, frame_id: FrameId) {
        self.entries.write().insert(page_id, frame_id);
    }

    /// Removes a mapping, returning the frame it pointed at.
    #[inline]
    pub fn remove(&self, page_id: PageId) -> Option<FrameId> {
        self.entries.write().remove(&page_id)
    }

    /// Returns true if the page is resident.
    #[inline]
    pub fn contains(&self, page_id: PageId) -> bool {
        self.entries.read().contains_key(&page_id)
    }

    /// Returns the number of resident pages.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no pages are resident.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Calls `f` for every resident page. Iteration stops if `f` returns false.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(PageId, FrameId) -> bool,
    {
        for (&page_id, &frame_id) in self.entries.read().iter() {
            if !f(page_id, frame_id) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_table_insert_get() {
        let table = PageTable::new(16);
        let page_id = PageId::new(0, 1);

        assert!(table.get(page_id).is_none());

        table.insert(page_id, FrameId(3));
        assert_eq!(table.get(page_id), Some(FrameId(3)));
        assert!(table.contains(page_id));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_page_table_remove() {
        let table = PageTable::new(16);
        let page_id = PageId::new(2, 7);

        table.insert(page_id, FrameId(0));
        assert_eq!(table.remove(page_id), Some(FrameId(0)));
        assert!(table.get(page_id).is_none());
        assert!(table.is_empty());

        assert_eq!(table.remove(page_id), None);
    }

    #[test]
    fn test_page_table_overwrite() {
        let table = PageTable::new(16);
        let page_id = PageId::new(0, 5);

        table.insert(page_id, FrameId(1));
        table.insert(page_id, FrameId(2));

        assert_eq!(table.get(page_id), Some(FrameId(2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_page_table_distinct_files() {
        let table = PageTable::new(16);

        table.insert(PageId::new(0, 1), FrameId(0));
        table.insert(PageId::new(1, 1), FrameId(1));

        assert_eq!(table.get(PageId::new(0, 1)), Some(FrameId(0)));
        assert_eq!(table.get(PageId::new(1, 1)), Some(FrameId(1)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_page_table_for_each() {
        let table = PageTable::new(16);
        for i in 0..5 {
            table.insert(PageId::new(0, i), FrameId(i));
        }

        let mut seen = 0;
        table.for_each(|_, _| {
            seen += 1;
            true
        });
        assert_eq!(seen, 5);

        let mut stopped = 0;
        table.for_each(|_, _| {
            stopped += 1;
            stopped < 2
        });
        assert_eq!(stopped, 2);
    }
}
