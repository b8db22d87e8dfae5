//! The superblock: page 0, holding the B-tree root pointer and the
//! replication metainfo block.
//!
//! # Format
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Magic (8 bytes): "GABBROSB"                                  │
//! │ Version (4 bytes): u32 LE                                    │
//! │ Root page (8 bytes): u64 LE, u64::MAX = empty tree           │
//! │ Tree height (4 bytes): u32 LE                                │
//! │ Metainfo count (2 bytes): u16 LE                             │
//! │ Metainfo: [key_len u16][key][value_len u32][value] * count   │
//! │ Padding to page size - 4                                     │
//! │ CRC32 (4 bytes): u32 LE                                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Metainfo keys are serialized regions (see `gabbro-region`); the store
//! facade owns their meaning. This layer stores opaque byte pairs.

use crate::error::BTreeError;
use crate::types::{CRC_SIZE, PAGE_SIZE, PageId};

/// Magic bytes identifying a valid superblock.
const SUPERBLOCK_MAGIC: &[u8; 8] = b"GABBROSB";

/// Current superblock format version.
const SUPERBLOCK_VERSION: u32 = 1;

/// Header size before the metainfo block.
const HEADER_SIZE: usize = 8 + 4 + 8 + 4 + 2;

/// Sentinel for "no root" (empty tree).
const NO_ROOT: u64 = u64::MAX;

/// The shard's root metadata, persisted in page 0.
///
/// A write transaction mutates a decoded copy and writes it back on
/// commit; readers decode and drop it.
#[derive(Debug, Clone)]
pub struct Superblock {
    /// Root of the B-tree; `None` while the tree is empty.
    pub root: Option<PageId>,
    /// Height of the tree (1 = root is a leaf).
    pub height: u32,
    /// Opaque replication metainfo: (serialized region, version blob)
    /// pairs, kept in insertion order.
    metainfo: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Superblock {
    /// A superblock for a freshly created shard.
    pub fn new() -> Self {
        Self {
            root: None,
            height: 0,
            metainfo: Vec::new(),
        }
    }

    /// All metainfo pairs, in stored order.
    pub fn metainfo_pairs(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.metainfo
    }

    /// Sets one metainfo pair, replacing any pair with the same key.
    pub fn set_metainfo_pair(&mut self, key: Vec<u8>, value: Vec<u8>) {
        match self.metainfo.iter_mut().find(|(k, _)| *k == key) {
            Some(pair) => pair.1 = value,
            None => self.metainfo.push((key, value)),
        }
    }

    /// Removes every metainfo pair.
    pub fn clear_metainfo(&mut self) {
        self.metainfo.clear();
    }

    fn metainfo_size(&self) -> usize {
        self.metainfo
            .iter()
            .map(|(k, v)| 2 + k.len() + 4 + v.len())
            .sum()
    }

    /// Serializes to a page-sized buffer.
    pub fn serialize(&self) -> Result<[u8; PAGE_SIZE], BTreeError> {
        let needed = HEADER_SIZE + self.metainfo_size();
        if needed > PAGE_SIZE - CRC_SIZE {
            return Err(BTreeError::MetainfoOverflow { size: needed });
        }

        let mut buf = [0u8; PAGE_SIZE];
        let mut offset = 0;

        buf[offset..offset + 8].copy_from_slice(SUPERBLOCK_MAGIC);
        offset += 8;
        buf[offset..offset + 4].copy_from_slice(&SUPERBLOCK_VERSION.to_le_bytes());
        offset += 4;
        let root = self.root.map_or(NO_ROOT, PageId::as_u64);
        buf[offset..offset + 8].copy_from_slice(&root.to_le_bytes());
        offset += 8;
        buf[offset..offset + 4].copy_from_slice(&self.height.to_le_bytes());
        offset += 4;
        buf[offset..offset + 2].copy_from_slice(&(self.metainfo.len() as u16).to_le_bytes());
        offset += 2;

        for (key, value) in &self.metainfo {
            buf[offset..offset + 2].copy_from_slice(&(key.len() as u16).to_le_bytes());
            offset += 2;
            buf[offset..offset + key.len()].copy_from_slice(key);
            offset += key.len();
            buf[offset..offset + 4].copy_from_slice(&(value.len() as u32).to_le_bytes());
            offset += 4;
            buf[offset..offset + value.len()].copy_from_slice(value);
            offset += value.len();
        }

        let crc = crc32fast::hash(&buf[..PAGE_SIZE - CRC_SIZE]);
        buf[PAGE_SIZE - CRC_SIZE..].copy_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Deserializes from a page-sized buffer.
    pub fn deserialize(buf: &[u8; PAGE_SIZE]) -> Result<Self, BTreeError> {
        let stored_crc = u32::from_le_bytes(buf[PAGE_SIZE - CRC_SIZE..].try_into().unwrap());
        let computed_crc = crc32fast::hash(&buf[..PAGE_SIZE - CRC_SIZE]);
        if stored_crc != computed_crc {
            return Err(BTreeError::SuperblockCorrupted);
        }

        let mut offset = 0;
        let magic: [u8; 8] = buf[offset..offset + 8].try_into().unwrap();
        if &magic != SUPERBLOCK_MAGIC {
            return Err(BTreeError::InvalidSuperblockMagic);
        }
        offset += 8;

        let version = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
        if version != SUPERBLOCK_VERSION {
            return Err(BTreeError::UnsupportedPageVersion(version as u8));
        }
        offset += 4;

        let root_raw = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
        let root = if root_raw == NO_ROOT {
            None
        } else {
            Some(PageId::new(root_raw))
        };
        offset += 8;

        let height = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
        offset += 4;

        let count = u16::from_le_bytes(buf[offset..offset + 2].try_into().unwrap()) as usize;
        offset += 2;

        let mut metainfo = Vec::with_capacity(count);
        for _ in 0..count {
            if offset + 2 > PAGE_SIZE - CRC_SIZE {
                return Err(BTreeError::SuperblockCorrupted);
            }
            let key_len = u16::from_le_bytes(buf[offset..offset + 2].try_into().unwrap()) as usize;
            offset += 2;
            if offset + key_len + 4 > PAGE_SIZE - CRC_SIZE {
                return Err(BTreeError::SuperblockCorrupted);
            }
            let key = buf[offset..offset + key_len].to_vec();
            offset += key_len;
            let value_len =
                u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
            offset += 4;
            if offset + value_len > PAGE_SIZE - CRC_SIZE {
                return Err(BTreeError::SuperblockCorrupted);
            }
            let value = buf[offset..offset + value_len].to_vec();
            offset += value_len;
            metainfo.push((key, value));
        }

        Ok(Self {
            root,
            height,
            metainfo,
        })
    }
}

impl Default for Superblock {
    fn default() -> Self {
        Self::new()
    }
}
