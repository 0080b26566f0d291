//! Disk manager for page-level file I/O.
//!
//! Files are registered by name and addressed through a run-local file ID.
//! Page 0 of every file is written at creation and never handed out by
//! allocation, so a zero page number can serve as a null page reference.

use krait_common::page::{PageId, PAGE_SIZE};
use krait_common::{KraitError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

/// Handle for an open data file.
struct FileHandle {
    /// The file handle.
    file: File,
    /// File name the handle was registered under.
    name: String,
    /// Number of pages in the file.
    num_pages: u32,
}

#[derive(Default)]
struct DiskManagerInner {
    /// Open file handles keyed by file ID.
    files: HashMap<u32, FileHandle>,
    /// Name to file ID registry.
    by_name: HashMap<String, u32>,
    /// Next file ID to hand out.
    next_file_id: u32,
}

/// Manages reading and writing pages to named disk files.
pub struct DiskManager {
    config: DiskManagerConfig,
    inner: Mutex<DiskManagerInner>,
}

impl DiskManager {
    /// Creates a new disk manager.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            inner: Mutex::new(DiskManagerInner::default()),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Generates the path for a file name.
    fn file_path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(name)
    }

    /// Returns true if a file with this name exists on disk.
    pub fn file_exists(&self, name: &str) -> bool {
        self.file_path(name).exists()
    }

    /// Opens a file by name, creating it if necessary.
    ///
    /// Returns the file ID. A freshly created file gets its reserved page 0
    /// written immediately, so allocation starts at page 1.
    pub fn open_file(&self, name: &str) -> Result<u32> {
        let mut inner = self.inner.lock();

        if let Some(&file_id) = inner.by_name.get(name) {
            return Ok(file_id);
        }

        let path = self.file_path(name);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let mut num_pages = (file_size / PAGE_SIZE as u64) as u32;

        if num_pages == 0 {
            // Reserve page 0
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&[0u8; PAGE_SIZE])?;
            if self.config.fsync_enabled {
                file.sync_all()?;
            }
            num_pages = 1;
        }

        let file_id = inner.next_file_id;
        inner.next_file_id += 1;
        inner.by_name.insert(name.to_string(), file_id);
        inner.files.insert(
            file_id,
            FileHandle {
                file,
                name: name.to_string(),
                num_pages,
            },
        );

        Ok(file_id)
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&page_id.file_id)
            .ok_or_else(|| KraitError::IoError(format!("file {} not open", page_id.file_id)))?;

        if page_id.page_num >= handle.num_pages {
            return Err(KraitError::IoError(format!(
                "page {} does not exist in file {}",
                page_id.page_num, handle.name
            )));
        }

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = [0u8; PAGE_SIZE];
        handle.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&page_id.file_id)
            .ok_or_else(|| KraitError::IoError(format!("file {} not open", page_id.file_id)))?;

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        if page_id.page_num >= handle.num_pages {
            handle.num_pages = page_id.page_num + 1;
        }

        Ok(())
    }

    /// Allocates a new page at the end of the file.
    ///
    /// Returns the page number of the newly allocated page.
    pub fn allocate_page(&self, file_id: u32) -> Result<u32> {
        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&file_id)
            .ok_or_else(|| KraitError::IoError(format!("file {} not open", file_id)))?;

        let page_num = handle.num_pages;

        // Extend the file with a zeroed page
        let offset = (page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        handle.num_pages = page_num + 1;

        Ok(page_num)
    }

    /// Returns the number of pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        let inner = self.inner.lock();
        let handle = inner
            .files
            .get(&file_id)
            .ok_or_else(|| KraitError::IoError(format!("file {} not open", file_id)))?;

        Ok(handle.num_pages)
    }

    /// Syncs a file's pending writes to disk.
    pub fn flush_file(&self, file_id: u32) -> Result<()> {
        let inner = self.inner.lock();
        if let Some(handle) = inner.files.get(&file_id) {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes all open files.
    pub fn close_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.by_name.clear();
        for (_, handle) in inner.files.drain() {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Deletes a file by name.
    pub fn delete_file(&self, name: &str) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if let Some(file_id) = inner.by_name.remove(name) {
                if let Some(handle) = inner.files.remove(&file_id) {
                    handle.file.sync_all()?;
                }
            }
        }
        let path = self.file_path(name);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}
