//! The page store: a file of fixed-size pages.
//!
//! The page store knows nothing about node formats; it reads and writes
//! raw 4 KiB frames and hands out fresh page ids. The cache above it
//! decides what lives in memory.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::BTreeError;
use crate::types::{PAGE_SIZE, PageId};

/// Creation-time configuration, fixed for the life of the file.
#[derive(Debug, Clone, Default)]
pub struct StoreStaticConfig {
    /// Pages to preallocate at creation (zero = grow on demand).
    pub preallocate_pages: u64,
}

/// Open-time configuration; may differ between runs.
#[derive(Debug, Clone)]
pub struct StoreDynamicConfig {
    /// Whether `sync` issues an fsync. Disabled only by tests that don't
    /// need durability.
    pub fsync: bool,
}

impl Default for StoreDynamicConfig {
    fn default() -> Self {
        Self { fsync: true }
    }
}

/// A file of fixed 4 KiB pages.
pub struct PageStore {
    file: File,
    next_page_id: PageId,
    fsync: bool,
}

impl PageStore {
    /// Creates a new, empty page store. Fails if the file already exists.
    pub fn create(path: impl AsRef<Path>, config: &StoreStaticConfig) -> Result<Self, BTreeError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;
        if config.preallocate_pages > 0 {
            file.set_len(config.preallocate_pages * PAGE_SIZE as u64)?;
        }
        tracing::info!(path = %path.as_ref().display(), "created page store");

        Ok(Self {
            file,
            next_page_id: PageId::new(0),
            fsync: true,
        })
    }

    /// Opens an existing page store.
    pub fn open(path: impl AsRef<Path>, config: &StoreDynamicConfig) -> Result<Self, BTreeError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let file_len = file.metadata()?.len();
        let next_page_id = PageId::new(file_len / PAGE_SIZE as u64);
        tracing::info!(
            path = %path.as_ref().display(),
            pages = next_page_id.as_u64(),
            "opened page store"
        );

        Ok(Self {
            file,
            next_page_id,
            fsync: config.fsync,
        })
    }

    /// The id the next allocation will return; also the page count.
    pub fn next_page_id(&self) -> PageId {
        self.next_page_id
    }

    /// True if `page_id` has been allocated.
    pub fn contains(&self, page_id: PageId) -> bool {
        page_id < self.next_page_id
    }

    /// Allocates a fresh page id. The frame is materialized on first
    /// write.
    pub fn allocate(&mut self) -> PageId {
        let page_id = self.next_page_id;
        self.next_page_id = self.next_page_id.next();
        page_id
    }

    /// Reads one raw page frame.
    pub fn read_page(&mut self, page_id: PageId) -> Result<[u8; PAGE_SIZE], BTreeError> {
        if !self.contains(page_id) {
            return Err(BTreeError::PageNotFound(page_id));
        }
        let mut buf = [0u8; PAGE_SIZE];
        self.file.seek(SeekFrom::Start(page_id.byte_offset()))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Writes one raw page frame, extending the file if needed.
    pub fn write_page(&mut self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<(), BTreeError> {
        if !self.contains(page_id) {
            return Err(BTreeError::PageNotFound(page_id));
        }
        self.file.seek(SeekFrom::Start(page_id.byte_offset()))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Makes previous writes durable.
    pub fn sync(&mut self) -> Result<(), BTreeError> {
        if self.fsync {
            self.file.sync_all()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStore")
            .field("next_page_id", &self.next_page_id)
            .field("fsync", &self.fsync)
            .finish_non_exhaustive()
    }
}
