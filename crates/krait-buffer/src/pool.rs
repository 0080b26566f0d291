//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::page_table::PageTable;
use crate::replacer::{ClockReplacer, Replacer};
use krait_common::page::{PageId, PAGE_SIZE};
use krait_common::{KraitError, Result};
use parking_lot::Mutex;
use sysinfo::System;

/// A dirty page that was evicted from the buffer pool.
///
/// The caller must write this to disk to prevent data loss.
#[derive(Debug)]
pub struct EvictedPage {
    pub page_id: PageId,
    pub data: Box<[u8; PAGE_SIZE]>,
}

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping
/// - Free frame list for new pages
/// - Clock replacement for eviction
/// - Pin counting to keep in-use pages resident
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page ID to frame ID mapping.
    page_table: PageTable,
    /// List of free frame IDs.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: ClockReplacer,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            page_table: PageTable::new(num_frames),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames so small systems still get useful caching.
    pub fn auto_sized() -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(BufferPoolConfig { num_frames })
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Checks if a page is in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.contains(page_id)
    }

    /// Returns the frame with the given ID.
    ///
    /// Only meaningful for a frame ID obtained while its page was pinned; a
    /// pinned page cannot be evicted, so the mapping stays valid until unpin.
    #[inline]
    pub fn frame(&self, frame_id: FrameId) -> &BufferFrame {
        &self.frames[frame_id.0 as usize]
    }

    /// Fetches a resident page, pinning it.
    ///
    /// Returns None if the page is not in the pool; loading from disk is the
    /// caller's job.
    pub fn fetch_page(&self, page_id: PageId) -> Option<&BufferFrame> {
        let frame_id = self.page_table.get(page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.pin();
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
        Some(frame)
    }

    /// Allocates a frame for a new page.
    ///
    /// Tries the free list first, then evicts an unpinned page. Returns the
    /// frame ID and any evicted dirty page that must be flushed.
    fn allocate_frame(&self) -> Result<(FrameId, Option<EvictedPage>)> {
        {
            let mut free_list = self.free_list.lock();
            if let Some(frame_id) = free_list.pop() {
                return Ok((frame_id, None));
            }
        }

        let victim_id = self
            .replacer
            .evict(&|fid| self.frames[fid.0 as usize].pin_count() == 0);

        if let Some(victim_id) = victim_id {
            let frame = &self.frames[victim_id.0 as usize];

            let evicted = if frame.is_dirty() {
                frame.page_id().map(|page_id| {
                    let guard = frame.read_data();
                    let mut data = Box::new([0u8; PAGE_SIZE]);
                    data.copy_from_slice(&**guard);
                    EvictedPage { page_id, data }
                })
            } else {
                None
            };

            if let Some(old_page_id) = frame.page_id() {
                self.page_table.remove(old_page_id);
            }

            return Ok((victim_id, evicted));
        }

        Err(KraitError::BufferPoolFull)
    }

    /// Binds a frame to a new page, pinning it.
    ///
    /// If the page is already resident, the existing frame is pinned and
    /// returned. Otherwise a frame is claimed, zeroed, and mapped; a dirty
    /// victim's bytes come back as `EvictedPage` for the caller to write out.
    pub fn new_page(&self, page_id: PageId) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok((frame, None));
        }

        let (frame_id, evicted) = self.allocate_frame()?;

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();

        self.page_table.insert(page_id, frame_id);

        Ok((frame, evicted))
    }

    /// Loads page bytes into the pool, pinning the frame.
    ///
    /// Used when reading a page in from disk.
    pub fn load_page(
        &self,
        page_id: PageId,
        data: &[u8],
    ) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        let (frame, evicted) = self.new_page(page_id)?;
        frame.copy_from(data);
        Ok((frame, evicted))
    }

    /// Unpins a page, optionally marking it dirty.
    ///
    /// The dirty flag reflects whether the caller mutated the page while it
    /// held the pin. A page whose pin count drops to zero becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> Result<()> {
        let frame_id = self
            .page_table
            .get(page_id)
            .ok_or(KraitError::PageNotFound { page_id })?;
        let frame = &self.frames[frame_id.0 as usize];

        if frame.pin_count() == 0 {
            return Err(KraitError::PageNotPinned { page_id });
        }

        if dirty {
            frame.set_dirty(true);
        }

        if frame.unpin() == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        Ok(())
    }

    /// Flushes all dirty pages of one file through the callback.
    ///
    /// Returns the number of pages flushed. Dirty flags are cleared only for
    /// pages the callback accepted.
    pub fn flush_file<F>(&self, file_id: u32, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let mut targets = Vec::new();
        self.page_table.for_each(|page_id, frame_id| {
            if page_id.file_id == file_id {
                targets.push((page_id, frame_id));
            }
            true
        });

        let mut flushed = 0;
        for (page_id, frame_id) in targets {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                flush_fn(page_id, &**data)?;
                frame.set_dirty(false);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Flushes all dirty pages through the callback.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_all<F>(&self, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let mut targets = Vec::new();
        self.page_table.for_each(|page_id, frame_id| {
            targets.push((page_id, frame_id));
            true
        });

        let mut flushed = 0;
        for (page_id, frame_id) in targets {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                flush_fn(page_id, &**data)?;
                frame.set_dirty(false);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned_count = 0;
        let mut dirty_count = 0;

        self.page_table.for_each(|_, frame_id| {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_count += 1;
            }
            if frame.is_dirty() {
                dirty_count += 1;
            }
            true
        });

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: self.free_count(),
            used_frames: self.page_table.len(),
            pinned_frames: pinned_count,
            dirty_frames: dirty_count,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}
