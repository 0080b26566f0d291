//! Buffer manager facade combining the buffer pool with the disk manager.
//!
//! This is the page-access contract the heap and index layers consume:
//! fetch pins (loading from disk on a miss), alloc extends the file and pins,
//! and every pin is held through a [`PageGuard`] so the matching unpin happens
//! on every exit path.

use crate::disk::{DiskManager, DiskManagerConfig};
use krait_buffer::{BufferPool, BufferPoolConfig, EvictedPage, FrameId};
use krait_common::page::{PageId, PAGE_SIZE};
use krait_common::{KraitError, Result, StorageConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Buffer manager: page cache in front of the disk manager.
pub struct BufferManager {
    pool: BufferPool,
    disk: Arc<DiskManager>,
}

impl BufferManager {
    /// Creates a buffer manager over the given pool and disk manager.
    pub fn new(disk: Arc<DiskManager>, pool: BufferPool) -> Self {
        Self { pool, disk }
    }

    /// Builds a buffer manager from a storage configuration.
    pub fn open(config: &StorageConfig) -> Result<Arc<Self>> {
        let disk = DiskManager::new(DiskManagerConfig {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        })?;
        let pool = BufferPool::new(BufferPoolConfig {
            num_frames: config.buffer_pool_frames,
        });
        Ok(Arc::new(Self::new(Arc::new(disk), pool)))
    }

    /// Returns the underlying disk manager.
    pub fn disk(&self) -> &DiskManager {
        &self.disk
    }

    /// Returns the underlying buffer pool.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Writes an evicted dirty page back to disk.
    fn write_back(&self, evicted: Option<EvictedPage>) -> Result<()> {
        if let Some(page) = evicted {
            self.disk.write_page(page.page_id, &page.data)?;
        }
        Ok(())
    }

    /// Fetches a page, pinning it for the lifetime of the returned guard.
    ///
    /// The page is served from the pool when resident, otherwise read from
    /// disk. A dirty page evicted to make room is written back here.
    pub fn fetch_page(self: &Arc<Self>, page_id: PageId) -> Result<PageGuard> {
        if let Some(frame) = self.pool.fetch_page(page_id) {
            return Ok(PageGuard::new(Arc::clone(self), page_id, frame.frame_id()));
        }

        let data = self.disk.read_page(page_id)?;
        let (frame, evicted) = self.pool.load_page(page_id, &data)?;
        let frame_id = frame.frame_id();
        self.write_back(evicted)?;

        Ok(PageGuard::new(Arc::clone(self), page_id, frame_id))
    }

    /// Allocates a fresh page at the end of the file, pinned and zeroed.
    ///
    /// Returns the new page number together with its guard.
    pub fn alloc_page(self: &Arc<Self>, file_id: u32) -> Result<(u32, PageGuard)> {
        let page_num = self.disk.allocate_page(file_id)?;
        let page_id = PageId::new(file_id, page_num);

        let (frame, evicted) = self.pool.new_page(page_id)?;
        let frame_id = frame.frame_id();
        self.write_back(evicted)?;

        Ok((page_num, PageGuard::new(Arc::clone(self), page_id, frame_id)))
    }

    /// Unpins a page, marking it dirty if the holder mutated it.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> Result<()> {
        self.pool.unpin_page(page_id, dirty)
    }

    /// Writes every dirty cached page of the file to disk and syncs it.
    ///
    /// Returns the number of pages written.
    pub fn flush_file(&self, file_id: u32) -> Result<usize> {
        let flushed = self.pool.flush_file(file_id, |page_id, data| {
            let buf: &[u8; PAGE_SIZE] = data
                .try_into()
                .map_err(|_| KraitError::IoError("page buffer size mismatch".to_string()))?;
            self.disk.write_page(page_id, buf)
        })?;
        self.disk.flush_file(file_id)?;
        Ok(flushed)
    }
}

/// A pinned page.
///
/// Holds one pin on the page for its whole lifetime and releases it on drop,
/// reporting whether the page was mutated. Drop swallows unpin errors so that
/// teardown paths which already released the pin stay silent.
pub struct PageGuard {
    mgr: Arc<BufferManager>,
    page_id: PageId,
    frame_id: FrameId,
    dirty: AtomicBool,
}

impl PageGuard {
    fn new(mgr: Arc<BufferManager>, page_id: PageId, frame_id: FrameId) -> Self {
        Self {
            mgr,
            page_id,
            frame_id,
            dirty: AtomicBool::new(false),
        }
    }

    /// Returns the pinned page's ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the pinned page's number within its file.
    pub fn page_num(&self) -> u32 {
        self.page_id.page_num
    }

    /// Reads the page bytes.
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.mgr.pool.frame(self.frame_id).read_data()
    }

    /// Writes the page bytes, marking the page dirty.
    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.dirty.store(true, Ordering::Release);
        self.mgr.pool.frame(self.frame_id).write_data()
    }

    /// Marks the page dirty without writing through the guard.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let dirty = self.dirty.load(Ordering::Acquire);
        // Best effort: a page already released elsewhere must not fail teardown
        let _ = self.mgr.unpin_page(self.page_id, dirty);
    }
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManagerConfig;
    use krait_buffer::BufferPoolConfig;
    use tempfile::tempdir;

    fn create_test_manager(num_frames: usize) -> (Arc<BufferManager>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::new(DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        })
        .unwrap();
        let pool = BufferPool::new(BufferPoolConfig { num_frames });
        (Arc::new(BufferManager::new(Arc::new(disk), pool)), dir)
    }

    #[test]
    fn test_open_from_config() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
            ..Default::default()
        };

        let mgr = BufferManager::open(&config).unwrap();
        assert_eq!(mgr.pool().num_frames(), config.buffer_pool_frames);

        let file_id = mgr.disk().open_file("c.tbl").unwrap();
        let (page_num, guard) = mgr.alloc_page(file_id).unwrap();
        guard.write()[0] = 1;
        drop(guard);
        assert_eq!(mgr.flush_file(file_id).unwrap(), 1);
        assert_eq!(page_num, 1);
    }

    #[test]
    fn test_alloc_page_starts_after_reserved() {
        let (mgr, _dir) = create_test_manager(8);
        let file_id = mgr.disk().open_file("t.tbl").unwrap();

        let (page_num, _guard) = mgr.alloc_page(file_id).unwrap();
        assert_eq!(page_num, 1);
    }

    #[test]
    fn test_guard_releases_pin_on_drop() {
        let (mgr, _dir) = create_test_manager(8);
        let file_id = mgr.disk().open_file("t.tbl").unwrap();

        let (_, guard) = mgr.alloc_page(file_id).unwrap();
        assert_eq!(mgr.pool().stats().pinned_frames, 1);

        drop(guard);
        assert_eq!(mgr.pool().stats().pinned_frames, 0);
    }

    #[test]
    fn test_guard_write_marks_dirty() {
        let (mgr, _dir) = create_test_manager(8);
        let file_id = mgr.disk().open_file("t.tbl").unwrap();

        let (page_num, guard) = mgr.alloc_page(file_id).unwrap();
        guard.write()[0] = 0x5A;
        drop(guard);

        // Still cached: dirty until flushed
        assert_eq!(mgr.pool().stats().dirty_frames, 1);

        mgr.flush_file(file_id).unwrap();
        assert_eq!(mgr.pool().stats().dirty_frames, 0);

        let read = mgr
            .disk()
            .read_page(PageId::new(file_id, page_num))
            .unwrap();
        assert_eq!(read[0], 0x5A);
    }

    #[test]
    fn test_fetch_page_round_trips_through_disk() {
        let (mgr, _dir) = create_test_manager(2);
        let file_id = mgr.disk().open_file("t.tbl").unwrap();

        let (page_num, guard) = mgr.alloc_page(file_id).unwrap();
        guard.write()[7] = 0x77;
        drop(guard);

        // Evict the page by cycling other pages through the tiny pool
        for _ in 0..3 {
            let (_, g) = mgr.alloc_page(file_id).unwrap();
            drop(g);
        }

        let guard = mgr.fetch_page(PageId::new(file_id, page_num)).unwrap();
        assert_eq!(guard.read()[7], 0x77);
    }

    #[test]
    fn test_fetch_pins_resident_page() {
        let (mgr, _dir) = create_test_manager(8);
        let file_id = mgr.disk().open_file("t.tbl").unwrap();

        let (page_num, guard) = mgr.alloc_page(file_id).unwrap();
        let page_id = PageId::new(file_id, page_num);

        let second = mgr.fetch_page(page_id).unwrap();
        assert_eq!(mgr.pool().frame(second.frame_id).pin_count(), 2);

        drop(guard);
        drop(second);
        assert_eq!(mgr.pool().stats().pinned_frames, 0);
    }

    #[test]
    fn test_unpin_page_errors_surface() {
        let (mgr, _dir) = create_test_manager(8);
        let file_id = mgr.disk().open_file("t.tbl").unwrap();

        let (page_num, guard) = mgr.alloc_page(file_id).unwrap();
        let page_id = PageId::new(file_id, page_num);

        mgr.unpin_page(page_id, false).unwrap();
        let result = mgr.unpin_page(page_id, false);
        assert!(matches!(result, Err(KraitError::PageNotPinned { .. })));

        // Guard drop after a manual unpin must stay silent
        drop(guard);
    }

    #[test]
    fn test_flush_file_reports_count() {
        let (mgr, _dir) = create_test_manager(8);
        let file_id = mgr.disk().open_file("t.tbl").unwrap();

        for _ in 0..3 {
            let (_, guard) = mgr.alloc_page(file_id).unwrap();
            guard.write()[0] = 1;
        }

        assert_eq!(mgr.flush_file(file_id).unwrap(), 3);
        assert_eq!(mgr.flush_file(file_id).unwrap(), 0);
    }
}
