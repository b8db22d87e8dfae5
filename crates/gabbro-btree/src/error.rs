//! Error types for the B-tree layer.

use std::io;

use crate::types::PageId;

/// Errors surfaced by the page store, cache, and B-tree.
///
/// These are propagated to the store facade unchanged; the core never
/// recovers from them locally.
#[derive(thiserror::Error, Debug)]
pub enum BTreeError {
    /// Filesystem I/O error.
    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),

    /// Page CRC32 checksum mismatch.
    #[error("page {page_id} corrupted: CRC mismatch (expected {expected:#010x}, got {actual:#010x})")]
    PageCorrupted {
        page_id: PageId,
        expected: u32,
        actual: u32,
    },

    /// Page has invalid magic bytes.
    #[error("invalid page magic: expected {expected:#010x}, got {actual:#010x}")]
    InvalidPageMagic { expected: u32, actual: u32 },

    /// Page has an unsupported format version.
    #[error("unsupported page version: {0}")]
    UnsupportedPageVersion(u8),

    /// Superblock has invalid magic bytes.
    #[error("invalid superblock magic")]
    InvalidSuperblockMagic,

    /// Superblock CRC mismatch.
    #[error("superblock corrupted: CRC mismatch")]
    SuperblockCorrupted,

    /// Node payload does not fit in a page.
    #[error("page overflow: need {needed} bytes, have {available}")]
    PageOverflow { needed: usize, available: usize },

    /// The superblock metainfo block does not fit in the superblock page.
    #[error("superblock metainfo overflow: {size} bytes")]
    MetainfoOverflow { size: usize },

    /// Page not found in the store.
    #[error("page {0} not found")]
    PageNotFound(PageId),

    /// Internal node invariant violation.
    #[error("B-tree invariant violation: {0}")]
    NodeCorrupted(String),
}
