//! # gabbro-btree: Persistent B-tree for one shard
//!
//! The storage collaborators the Gabbro store facade drives:
//!
//! - **Page store**: a file of 4 KiB pages with CRC32 integrity checks
//! - **Page cache**: LRU working set with dirty-page write-back
//! - **Superblock**: root pointer plus the replication metainfo block
//! - **B-tree slice**: point lookups, range scans, the mutation family,
//!   bulk erase, and the "changed since" backfill walk
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  BTreeSlice (get / rget / change / backfill)        │
//! ├─────────────────────────────────────────────────────┤
//! │  Nodes (leaves with tombstone history, separators)  │
//! ├─────────────────────────────────────────────────────┤
//! │  PageCache (LRU, dirty tracking)                    │
//! ├─────────────────────────────────────────────────────┤
//! │  PageStore (4 KiB frames, CRC32, fsync)             │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Leaves carry per-key recency timestamps and retain a bounded number of
//! deletion tombstones, which is what lets a backfill source answer
//! "everything that changed since T", and admit, via the history floor,
//! when it no longer can.

mod cache;
mod error;
mod node;
mod page;
mod pagestore;
mod slice;
mod superblock;
mod txn;
mod types;


pub use cache::{CacheConfig, PageCache};
pub use error::BTreeError;
pub use node::{EntryState, InternalNode, LeafEntry, LeafNode, ValueRecord};
pub use page::{Page, PageType};
pub use pagestore::{PageStore, StoreDynamicConfig, StoreStaticConfig};
pub use slice::{BTreeSlice, BackfillCallback, EraseAll, KeyTester};
pub use superblock::Superblock;
pub use txn::{Access, OrderCheckpoint, OrderSource, OrderToken, Transaction};
pub use types::{MAX_TOMBSTONES_PER_LEAF, MAX_VALUE_LENGTH, PAGE_SIZE, PageId};
