//! Sequential scan over the records of a heap file.

use crate::bufmgr::PageGuard;
use crate::heap::file::{HeapFile, RECORDS_HEADER_SIZE};
use bytes::Bytes;
use krait_common::page::{PageId, RecordId};
use krait_common::{KraitError, Result};

/// Cursor over every record of a heap file, in file order.
///
/// `scan_next` advances the cursor and returns the next record ID;
/// `EndOfFile` signals exhaustion. The page under the cursor stays pinned
/// between calls so `record` can read it without re-fetching.
pub struct HeapScan<'a> {
    file: &'a HeapFile,
    /// Pinned page under the cursor.
    current_page: Option<PageGuard>,
    /// Page the cursor is on (0 before the first `scan_next`).
    page_num: u32,
    /// Slot of the record returned by the last `scan_next`.
    slot: usize,
    /// True until the first `scan_next` call.
    fresh: bool,
}

impl<'a> HeapScan<'a> {
    pub(crate) fn new(file: &'a HeapFile) -> Self {
        Self {
            file,
            current_page: None,
            page_num: 0,
            slot: 0,
            fresh: true,
        }
    }

    /// Number of live records on the pinned page.
    fn current_page_count(&self) -> usize {
        match &self.current_page {
            Some(guard) => {
                let data = guard.read();
                u16::from_le_bytes([data[0], data[1]]) as usize
            }
            None => 0,
        }
    }

    /// Pins the next data page, releasing the current one.
    ///
    /// Returns false when the file has no further pages.
    fn advance_page(&mut self) -> Result<bool> {
        let mgr = self.file.buffer_manager();
        let num_pages = mgr.disk().num_pages(self.file.file_id())?;

        let next = self.page_num + 1;
        if next >= num_pages {
            self.current_page = None;
            return Ok(false);
        }

        self.current_page = Some(mgr.fetch_page(PageId::new(self.file.file_id(), next))?);
        self.page_num = next;
        self.slot = 0;
        Ok(true)
    }

    /// Advances to the next record and returns its identifier.
    ///
    /// Returns `EndOfFile` once every record has been produced.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        loop {
            if self.current_page.is_none() {
                if !self.advance_page()? {
                    return Err(KraitError::EndOfFile);
                }
            } else if self.fresh {
                // Cursor already sits on slot 0 of the first page
            } else {
                self.slot += 1;
            }
            self.fresh = false;

            if self.slot < self.current_page_count() {
                return Ok(RecordId::new(self.page_num, self.slot as u16));
            }

            // Page exhausted (or empty trailing page)
            if !self.advance_page()? {
                return Err(KraitError::EndOfFile);
            }
            self.fresh = true;
        }
    }

    /// Returns the record under the cursor.
    ///
    /// Only valid after a successful `scan_next`.
    pub fn record(&self) -> Result<Bytes> {
        let guard = self
            .current_page
            .as_ref()
            .ok_or(KraitError::ScanNotInitialized)?;
        let record_size = self.file.record_size();
        let data = guard.read();
        let offset = RECORDS_HEADER_SIZE + self.slot * record_size;
        Ok(Bytes::copy_from_slice(&data[offset..offset + record_size]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bufmgr::BufferManager;
    use crate::disk::{DiskManager, DiskManagerConfig};
    use krait_buffer::{BufferPool, BufferPoolConfig};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn create_test_heap(record_size: usize) -> (HeapFile, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::new(DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        })
        .unwrap();
        let pool = BufferPool::new(BufferPoolConfig { num_frames: 64 });
        let mgr = Arc::new(BufferManager::new(Arc::new(disk), pool));
        let heap = HeapFile::create(mgr, "scan.tbl", record_size).unwrap();
        (heap, dir)
    }

    #[test]
    fn test_scan_empty_file() {
        let (heap, _dir) = create_test_heap(8);

        let mut scan = heap.scan();
        assert!(matches!(scan.scan_next(), Err(KraitError::EndOfFile)));
    }

    #[test]
    fn test_scan_record_before_next() {
        let (heap, _dir) = create_test_heap(8);
        heap.insert_record(&[1u8; 8]).unwrap();

        let scan = heap.scan();
        assert!(matches!(scan.record(), Err(KraitError::ScanNotInitialized)));
    }

    #[test]
    fn test_scan_all_records_in_order() {
        let (heap, _dir) = create_test_heap(8);

        let mut expected = Vec::new();
        for i in 0..10u8 {
            let record = [i; 8];
            let rid = heap.insert_record(&record).unwrap();
            expected.push((rid, record));
        }

        let mut scan = heap.scan();
        for (rid, record) in &expected {
            let got = scan.scan_next().unwrap();
            assert_eq!(got, *rid);
            assert_eq!(scan.record().unwrap().as_ref(), record);
        }
        assert!(matches!(scan.scan_next(), Err(KraitError::EndOfFile)));
    }

    #[test]
    fn test_scan_crosses_page_boundary() {
        let (heap, _dir) = create_test_heap(1024);
        let per_page = heap.records_per_page();
        let total = per_page + 3;

        for i in 0..total {
            heap.insert_record(&[i as u8; 1024]).unwrap();
        }

        let mut scan = heap.scan();
        let mut count = 0;
        while let Ok(rid) = scan.scan_next() {
            assert_eq!(scan.record().unwrap()[0], count as u8);
            if count < per_page {
                assert_eq!(rid.page_num, 1);
            } else {
                assert_eq!(rid.page_num, 2);
            }
            count += 1;
        }
        assert_eq!(count, total);
    }

    #[test]
    fn test_scan_end_is_sticky() {
        let (heap, _dir) = create_test_heap(8);
        heap.insert_record(&[7u8; 8]).unwrap();

        let mut scan = heap.scan();
        scan.scan_next().unwrap();
        assert!(matches!(scan.scan_next(), Err(KraitError::EndOfFile)));
        assert!(matches!(scan.scan_next(), Err(KraitError::EndOfFile)));
    }
}
