//! Heap file manager for fixed-size records.
//!
//! Layout: page 0 is the file header (magic + record size); data pages hold a
//! record count followed by densely packed fixed-width slots. Records are
//! append-only and addressed by `(page_num, slot)`.

use crate::bufmgr::BufferManager;
use crate::heap::scan::HeapScan;
use bytes::Bytes;
use krait_common::page::{PageId, RecordId, PAGE_SIZE};
use krait_common::{KraitError, Result};
use std::sync::Arc;

/// Magic number identifying a heap file ("KRHP").
const HEAP_MAGIC: u32 = 0x4B52_4850;

/// Bytes of per-page header on a data page (record count).
pub const RECORDS_HEADER_SIZE: usize = 2;

/// A heap file of fixed-size records.
pub struct HeapFile {
    mgr: Arc<BufferManager>,
    file_id: u32,
    name: String,
    record_size: usize,
    records_per_page: usize,
}

impl HeapFile {
    /// Creates a new heap file with the given record size.
    ///
    /// Fails if a file of that name already exists.
    pub fn create(mgr: Arc<BufferManager>, name: &str, record_size: usize) -> Result<Self> {
        if record_size == 0 || record_size > PAGE_SIZE - RECORDS_HEADER_SIZE {
            return Err(KraitError::BadRecordSize {
                expected: PAGE_SIZE - RECORDS_HEADER_SIZE,
                actual: record_size,
            });
        }
        if mgr.disk().file_exists(name) {
            return Err(KraitError::IoError(format!(
                "heap file {} already exists",
                name
            )));
        }

        let file_id = mgr.disk().open_file(name)?;

        // Page 0 doubles as the heap header
        {
            let header = mgr.fetch_page(PageId::new(file_id, 0))?;
            let mut data = header.write();
            data[0..4].copy_from_slice(&HEAP_MAGIC.to_le_bytes());
            data[4..8].copy_from_slice(&(record_size as u32).to_le_bytes());
        }
        mgr.flush_file(file_id)?;

        Ok(Self {
            mgr,
            file_id,
            name: name.to_string(),
            record_size,
            records_per_page: (PAGE_SIZE - RECORDS_HEADER_SIZE) / record_size,
        })
    }

    /// Opens an existing heap file, reading the record size from its header.
    pub fn open(mgr: Arc<BufferManager>, name: &str) -> Result<Self> {
        if !mgr.disk().file_exists(name) {
            return Err(KraitError::IoError(format!(
                "heap file {} does not exist",
                name
            )));
        }

        let file_id = mgr.disk().open_file(name)?;
        let record_size = {
            let header = mgr.fetch_page(PageId::new(file_id, 0))?;
            let data = header.read();
            let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            if magic != HEAP_MAGIC {
                return Err(KraitError::BadHeapFile(name.to_string()));
            }
            u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize
        };
        if record_size == 0 || record_size > PAGE_SIZE - RECORDS_HEADER_SIZE {
            return Err(KraitError::BadHeapFile(name.to_string()));
        }

        Ok(Self {
            mgr,
            file_id,
            name: name.to_string(),
            record_size,
            records_per_page: (PAGE_SIZE - RECORDS_HEADER_SIZE) / record_size,
        })
    }

    /// Returns the file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the file ID assigned by the disk manager.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the fixed record size in bytes.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Returns how many records fit on one data page.
    pub fn records_per_page(&self) -> usize {
        self.records_per_page
    }

    pub(crate) fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.mgr
    }

    fn page_record_count(data: &[u8]) -> usize {
        u16::from_le_bytes([data[0], data[1]]) as usize
    }

    fn set_page_record_count(data: &mut [u8], count: usize) {
        data[0..2].copy_from_slice(&(count as u16).to_le_bytes());
    }

    /// Appends a record, returning its identifier.
    pub fn insert_record(&self, record: &[u8]) -> Result<RecordId> {
        if record.len() != self.record_size {
            return Err(KraitError::BadRecordSize {
                expected: self.record_size,
                actual: record.len(),
            });
        }

        let num_pages = self.mgr.disk().num_pages(self.file_id)?;

        // Try the last data page first
        if num_pages > 1 {
            let page_num = num_pages - 1;
            let guard = self.mgr.fetch_page(PageId::new(self.file_id, page_num))?;
            let count = Self::page_record_count(&guard.read()[..]);
            if count < self.records_per_page {
                let mut data = guard.write();
                let offset = RECORDS_HEADER_SIZE + count * self.record_size;
                data[offset..offset + self.record_size].copy_from_slice(record);
                Self::set_page_record_count(&mut data[..], count + 1);
                return Ok(RecordId::new(page_num, count as u16));
            }
        }

        // Last page full (or no data pages yet): extend the file
        let (page_num, guard) = self.mgr.alloc_page(self.file_id)?;
        let mut data = guard.write();
        data[RECORDS_HEADER_SIZE..RECORDS_HEADER_SIZE + self.record_size].copy_from_slice(record);
        Self::set_page_record_count(&mut data[..], 1);
        Ok(RecordId::new(page_num, 0))
    }

    /// Reads the record with the given identifier.
    pub fn get_record(&self, rid: RecordId) -> Result<Bytes> {
        let num_pages = self.mgr.disk().num_pages(self.file_id)?;
        if rid.page_num == 0 || rid.page_num >= num_pages {
            return Err(KraitError::RecordNotFound { rid });
        }

        let guard = self.mgr.fetch_page(PageId::new(self.file_id, rid.page_num))?;
        let data = guard.read();
        let count = Self::page_record_count(&data[..]);
        if rid.slot as usize >= count {
            return Err(KraitError::RecordNotFound { rid });
        }

        let offset = RECORDS_HEADER_SIZE + rid.slot as usize * self.record_size;
        Ok(Bytes::copy_from_slice(&data[offset..offset + self.record_size]))
    }

    /// Starts a scan over all records in the file.
    pub fn scan(&self) -> HeapScan<'_> {
        HeapScan::new(self)
    }

    /// Flushes all dirty pages of this file to disk.
    pub fn flush(&self) -> Result<usize> {
        self.mgr.flush_file(self.file_id)
    }
}

impl Drop for HeapFile {
    fn drop(&mut self) {
        let _ = self.mgr.flush_file(self.file_id);
    }
}
