//! B-tree node structures: leaves with replication history, internal
//! separator nodes.
//!
//! # Leaf payload format
//!
//! ```text
//! [history_floor: u64][entry_count: u16] then per entry:
//!   [key_len: u16][key][tag: u8]
//!   tag 0 (live):      [flags: u32][exptime: u32][cas: u64][recency: u64]
//!                      [value_len: u32][value]
//!   tag 1 (tombstone): [recency: u64]
//! ```
//!
//! # Internal payload format
//!
//! ```text
//! [leftmost_child: u64][entry_count: u16] then per entry:
//!   [key_len: u16][key][child: u64]
//! ```
//!
//! A leaf keeps deletion tombstones so a backfill source can replay
//! recent deletions. Tombstones are capped per leaf; discarding one
//! raises `history_floor`, the oldest point from which the leaf's
//! deletion history is still complete. Backfills that need to reach
//! further back must fall back to a whole-range delete.

use bytes::Bytes;
use gabbro_types::{Cas, Exptime, Flags, Key, RepliTimestamp};

use crate::error::BTreeError;
use crate::page::{Page, PageType};
use crate::types::{MAX_TOMBSTONES_PER_LEAF, PageId};

const TAG_LIVE: u8 = 0;
const TAG_TOMBSTONE: u8 = 1;

// ============================================================================
// Entries
// ============================================================================

/// A live stored value with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRecord {
    pub value: Bytes,
    pub flags: Flags,
    pub exptime: Exptime,
    pub cas: Cas,
    pub recency: RepliTimestamp,
}

/// The state of a key inside a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    Live(ValueRecord),
    Tombstone { recency: RepliTimestamp },
}

/// One leaf slot: a key and its live value or tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    pub key: Key,
    pub state: EntryState,
}

impl LeafEntry {
    /// When this key last changed.
    pub fn recency(&self) -> RepliTimestamp {
        match &self.state {
            EntryState::Live(record) => record.recency,
            EntryState::Tombstone { recency } => *recency,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.state, EntryState::Tombstone { .. })
    }

    fn serialized_size(&self) -> usize {
        let body = match &self.state {
            EntryState::Live(record) => 4 + 4 + 8 + 8 + 4 + record.value.len(),
            EntryState::Tombstone { .. } => 8,
        };
        2 + self.key.len() + 1 + body
    }
}

// ============================================================================
// Leaf node
// ============================================================================

/// A leaf: sorted entries plus the tombstone-history floor.
#[derive(Debug, Clone, Default)]
pub struct LeafNode {
    pub entries: Vec<LeafEntry>,
    /// Oldest recency from which this leaf's deletion history is still
    /// complete. Starts at the distant past; rises when a tombstone is
    /// discarded.
    pub history_floor: RepliTimestamp,
}

impl LeafNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries (live and tombstone).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds the entry for `key`.
    pub fn get(&self, key: &Key) -> Option<&LeafEntry> {
        self.position(key).ok().map(|i| &self.entries[i])
    }

    /// Inserts or replaces the entry for `entry.key`, keeping order and
    /// pruning excess tombstones.
    pub fn upsert(&mut self, entry: LeafEntry) {
        match self.position(&entry.key) {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
        self.prune_tombstones();
    }

    /// Removes the entry for `key` outright (no tombstone). Used by the
    /// bulk-erase path, where the caller rewrites region metadata anyway.
    pub fn remove(&mut self, key: &Key) -> bool {
        match self.position(key) {
            Ok(i) => {
                self.entries.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    fn position(&self, key: &Key) -> Result<usize, usize> {
        self.entries.binary_search_by(|entry| entry.key.cmp(key))
    }

    /// Discards the oldest tombstones over the cap, raising the history
    /// floor to the newest discarded recency.
    fn prune_tombstones(&mut self) {
        loop {
            let tombstones = self.entries.iter().filter(|e| e.is_tombstone()).count();
            if tombstones <= MAX_TOMBSTONES_PER_LEAF {
                return;
            }
            let oldest = self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.is_tombstone())
                .min_by_key(|(_, e)| e.recency())
                .map(|(i, _)| i)
                .expect("tombstone count checked above");
            let discarded = self.entries.remove(oldest);
            if discarded.recency() > self.history_floor {
                self.history_floor = discarded.recency();
            }
        }
    }

    /// Total payload size if serialized now.
    pub fn serialized_size(&self) -> usize {
        8 + 2 + self.entries.iter().map(LeafEntry::serialized_size).sum::<usize>()
    }

    /// Splits off the upper half, returning the first key of the new
    /// right sibling. Both halves keep the history floor.
    ///
    /// The split point is chosen to minimize the larger half's byte
    /// size. Entries are bounded below half a page, so the balanced
    /// split always leaves both halves fitting their pages.
    pub fn split(&mut self) -> (Key, LeafNode) {
        debug_assert!(self.entries.len() >= 2, "splitting a leaf with < 2 entries");

        let total: usize = self.entries.iter().map(LeafEntry::serialized_size).sum();
        let mut acc = 0;
        let mut split_at = 1;
        let mut best = usize::MAX;
        for (i, entry) in self.entries.iter().enumerate().take(self.entries.len() - 1) {
            acc += entry.serialized_size();
            let worse_half = acc.max(total - acc);
            if worse_half < best {
                best = worse_half;
                split_at = i + 1;
            }
        }

        let right_entries = self.entries.split_off(split_at);
        let split_key = right_entries[0].key.clone();
        let right = LeafNode {
            entries: right_entries,
            history_floor: self.history_floor,
        };
        (split_key, right)
    }

    /// Serializes into a page.
    pub fn to_page(&self, page: &mut Page) -> Result<(), BTreeError> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        buf.extend_from_slice(&self.history_floor.as_u64().to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&(entry.key.len() as u16).to_le_bytes());
            buf.extend_from_slice(entry.key.as_bytes());
            match &entry.state {
                EntryState::Live(record) => {
                    buf.push(TAG_LIVE);
                    buf.extend_from_slice(&record.flags.as_u32().to_le_bytes());
                    buf.extend_from_slice(&record.exptime.as_u32().to_le_bytes());
                    buf.extend_from_slice(&record.cas.as_u64().to_le_bytes());
                    buf.extend_from_slice(&record.recency.as_u64().to_le_bytes());
                    buf.extend_from_slice(&(record.value.len() as u32).to_le_bytes());
                    buf.extend_from_slice(&record.value);
                }
                EntryState::Tombstone { recency } => {
                    buf.push(TAG_TOMBSTONE);
                    buf.extend_from_slice(&recency.as_u64().to_le_bytes());
                }
            }
        }
        page.set_payload(PageType::Leaf, &buf)
    }

    /// Deserializes from a page.
    pub fn from_page(page: &Page) -> Result<Self, BTreeError> {
        debug_assert_eq!(page.page_type(), PageType::Leaf);
        let mut r = Reader::new(page.payload());

        let history_floor = RepliTimestamp::new(r.u64()?);
        let count = r.u16()? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let key = r.key()?;
            let state = match r.u8()? {
                TAG_LIVE => {
                    let flags = Flags::new(r.u32()?);
                    let exptime = Exptime::new(r.u32()?);
                    let cas = Cas::new(r.u64()?);
                    let recency = RepliTimestamp::new(r.u64()?);
                    let value_len = r.u32()? as usize;
                    let value = r.bytes(value_len)?;
                    EntryState::Live(ValueRecord {
                        value,
                        flags,
                        exptime,
                        cas,
                        recency,
                    })
                }
                TAG_TOMBSTONE => EntryState::Tombstone {
                    recency: RepliTimestamp::new(r.u64()?),
                },
                tag => {
                    return Err(BTreeError::NodeCorrupted(format!(
                        "unknown leaf entry tag {tag:#04x}"
                    )));
                }
            };
            entries.push(LeafEntry { key, state });
        }
        r.finish()?;

        Ok(Self {
            entries,
            history_floor,
        })
    }
}

// ============================================================================
// Internal node
// ============================================================================

/// A separator entry: keys `>= key` (and below the next separator) route
/// to `child`.
#[derive(Debug, Clone)]
pub struct InternalEntry {
    pub key: Key,
    pub child: PageId,
}

/// An internal node: a leftmost child plus sorted separators.
#[derive(Debug, Clone)]
pub struct InternalNode {
    pub leftmost: PageId,
    pub entries: Vec<InternalEntry>,
}

impl InternalNode {
    /// Builds the node created by a root split.
    pub fn from_split(left: PageId, key: Key, right: PageId) -> Self {
        Self {
            leftmost: left,
            entries: vec![InternalEntry { key, child: right }],
        }
    }

    /// The child that covers `key`.
    pub fn find_child(&self, key: &Key) -> PageId {
        match self.entries.binary_search_by(|e| e.key.cmp(key)) {
            Ok(i) => self.entries[i].child,
            Err(0) => self.leftmost,
            Err(i) => self.entries[i - 1].child,
        }
    }

    /// All children in key order, each with the (inclusive, exclusive)
    /// key bounds it covers; `None` means unbounded on that side.
    pub fn children(&self) -> Vec<(PageId, Option<&Key>, Option<&Key>)> {
        let mut out = Vec::with_capacity(self.entries.len() + 1);
        out.push((self.leftmost, None, self.entries.first().map(|e| &e.key)));
        for (i, entry) in self.entries.iter().enumerate() {
            let upper = self.entries.get(i + 1).map(|e| &e.key);
            out.push((entry.child, Some(&entry.key), upper));
        }
        out
    }

    /// Records a child split: `key` becomes a new separator routing to
    /// `child`.
    pub fn insert(&mut self, key: Key, child: PageId) {
        match self.entries.binary_search_by(|e| e.key.cmp(&key)) {
            Ok(i) => {
                debug_assert!(false, "duplicate separator key");
                self.entries[i].child = child;
            }
            Err(i) => self.entries.insert(i, InternalEntry { key, child }),
        }
    }

    pub fn serialized_size(&self) -> usize {
        8 + 2 + self.entries.iter().map(|e| 2 + e.key.len() + 8).sum::<usize>()
    }

    /// Splits off the upper half; the middle separator moves up to the
    /// parent.
    pub fn split(&mut self) -> (Key, InternalNode) {
        debug_assert!(self.entries.len() >= 3, "splitting an internal node with < 3 separators");
        let mid = self.entries.len() / 2;
        let mut upper = self.entries.split_off(mid);
        let promoted = upper.remove(0);
        let right = InternalNode {
            leftmost: promoted.child,
            entries: upper,
        };
        (promoted.key, right)
    }

    /// Serializes into a page.
    pub fn to_page(&self, page: &mut Page) -> Result<(), BTreeError> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        buf.extend_from_slice(&self.leftmost.as_u64().to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&(entry.key.len() as u16).to_le_bytes());
            buf.extend_from_slice(entry.key.as_bytes());
            buf.extend_from_slice(&entry.child.as_u64().to_le_bytes());
        }
        page.set_payload(PageType::Internal, &buf)
    }

    /// Deserializes from a page.
    pub fn from_page(page: &Page) -> Result<Self, BTreeError> {
        debug_assert_eq!(page.page_type(), PageType::Internal);
        let mut r = Reader::new(page.payload());

        let leftmost = PageId::new(r.u64()?);
        let count = r.u16()? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let key = r.key()?;
            let child = PageId::new(r.u64()?);
            entries.push(InternalEntry { key, child });
        }
        r.finish()?;

        Ok(Self { leftmost, entries })
    }
}

// ============================================================================
// Payload reader
// ============================================================================

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], BTreeError> {
        if self.data.len() < n {
            return Err(BTreeError::NodeCorrupted("truncated node payload".into()));
        }
        let (head, rest) = self.data.split_at(n);
        self.data = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, BTreeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, BTreeError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, BTreeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, BTreeError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn key(&mut self) -> Result<Key, BTreeError> {
        let len = self.u16()? as usize;
        Ok(Key::from(self.take(len)?))
    }

    fn bytes(&mut self, len: usize) -> Result<Bytes, BTreeError> {
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }

    fn finish(self) -> Result<(), BTreeError> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(BTreeError::NodeCorrupted("trailing bytes in node payload".into()))
        }
    }
}
