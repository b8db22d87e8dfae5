//! The store facade: one shard's public surface.
//!
//! Every operation follows the same fixed sequence: **ticket wait →
//! transaction acquisition → metadata check → data access**. The FIFO
//! gate slot is released as soon as the B-tree view is held, and the
//! view itself serializes the data access, so operations become visible
//! in ticket-issue order. Cancellation is honored only during the ticket
//! wait; an operation that has begun its transaction runs to commit.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use gabbro_btree::{
    Access, BTreeSlice, BackfillCallback, CacheConfig, EraseAll, KeyTester, OrderSource, PageCache,
    PageStore, StoreDynamicConfig, StoreStaticConfig, Superblock, Transaction,
};
use gabbro_protocol::{BackfillAtom, BackfillChunk, Read, ReadResponse, Write, WriteResponse};
use gabbro_region::{Region, RegionMap};
use gabbro_types::{Castime, Key, RepliTimestamp, StateTimestamp};

use crate::error::ShardError;
use crate::fifo::{FifoSink, FifoSource, ReadTicket, WriteTicket};
use crate::interrupt::Interruptor;
use crate::metainfo::{
    Metainfo, check_and_update_metainfo, check_metainfo, decode_metainfo, update_metainfo,
};

/// Pins a store to the worker thread that created it.
///
/// One shard runs on one logical worker; parallelism comes from running
/// distinct stores on distinct workers. There are no locks guarding the
/// tree beyond the FIFO gate, so entry from another thread is a bug.
#[derive(Debug)]
struct ThreadAffinity {
    home: ThreadId,
}

impl ThreadAffinity {
    fn new() -> Self {
        Self {
            home: thread::current().id(),
        }
    }

    fn assert(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.home,
            "store entered from a thread other than its home worker"
        );
    }
}

/// One shard's store: a persistent B-tree over the shard's key region,
/// fronted by the FIFO ordering gate.
#[derive(Debug)]
pub struct Store {
    btree: Mutex<BTreeSlice>,
    fifo_source: FifoSource,
    fifo_sink: FifoSink,
    order_source: OrderSource,
    thread: ThreadAffinity,
}

impl Store {
    /// Creates a shard store at `path`: page store, cache, and an empty
    /// B-tree whose metainfo is an empty blob over the universe region.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ShardError> {
        let pages = PageStore::create(path, &StoreStaticConfig::default())?;
        let cache = PageCache::create(pages, &CacheConfig::default());
        let btree = BTreeSlice::create(cache, &Region::universe())?;
        Ok(Self::wrap(btree))
    }

    /// Opens an existing shard store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ShardError> {
        let pages = PageStore::open(path, &StoreDynamicConfig::default())?;
        let cache = PageCache::open(pages, &CacheConfig::default());
        let btree = BTreeSlice::open(cache)?;
        Ok(Self::wrap(btree))
    }

    /// Creates or opens, depending on `create`.
    pub fn new(path: impl AsRef<Path>, create: bool) -> Result<Self, ShardError> {
        if create {
            Self::create(path)
        } else {
            Self::open(path)
        }
    }

    fn wrap(btree: BTreeSlice) -> Self {
        Self {
            btree: Mutex::new(btree),
            fifo_source: FifoSource::new(),
            fifo_sink: FifoSink::new(),
            order_source: OrderSource::new(),
            thread: ThreadAffinity::new(),
        }
    }

    // ========================================================================
    // Tickets
    // ========================================================================

    /// Issues a read ticket. The ticket's place in line is fixed now;
    /// the read itself may be performed later.
    pub fn new_read_token(&self) -> ReadTicket {
        self.fifo_sink.exit_read(self.fifo_source.enter_read())
    }

    /// Issues a write ticket.
    pub fn new_write_token(&self) -> WriteTicket {
        self.fifo_sink.exit_write(self.fifo_source.enter_write())
    }

    // ========================================================================
    // View acquisition
    // ========================================================================

    async fn acquire_for_read(
        &self,
        tag: &'static str,
        ticket: ReadTicket,
        interruptor: &Interruptor,
    ) -> Result<(MutexGuard<'_, BTreeSlice>, Transaction, Superblock), ShardError> {
        self.thread.assert();
        ticket.wait(interruptor).await?;

        let token = self.order_source.check_in(tag);
        let mut btree = self.btree.lock().unwrap();
        let (txn, sb) = btree.begin(Access::Read, 1, token)?;
        // The read view is held; the gate can admit the next operation.
        drop(ticket);
        Ok((btree, txn, sb))
    }

    /// Read acquisition for a backfill scan, under its own checkpoint
    /// tag.
    async fn acquire_for_backfill(
        &self,
        ticket: ReadTicket,
        interruptor: &Interruptor,
    ) -> Result<(MutexGuard<'_, BTreeSlice>, Transaction, Superblock), ShardError> {
        self.thread.assert();
        ticket.wait(interruptor).await?;

        let token = self
            .order_source
            .check_in("gabbro_shard::Store::acquire_for_backfill");
        let mut btree = self.btree.lock().unwrap();
        let (txn, sb) = btree.begin(Access::Read, 1, token)?;
        drop(ticket);
        Ok((btree, txn, sb))
    }

    async fn acquire_for_write(
        &self,
        tag: &'static str,
        expected_change_count: usize,
        ticket: WriteTicket,
        interruptor: &Interruptor,
    ) -> Result<(MutexGuard<'_, BTreeSlice>, Transaction, Superblock), ShardError> {
        self.thread.assert();
        ticket.wait(interruptor).await?;

        let token = self.order_source.check_in(tag);
        let mut btree = self.btree.lock().unwrap();
        let (txn, sb) = btree.begin(Access::Write, expected_change_count, token)?;
        drop(ticket);
        Ok((btree, txn, sb))
    }

    // ========================================================================
    // Reads and writes
    // ========================================================================

    /// Executes a read under the shard's current view (reads are not
    /// snapshot-isolated).
    pub async fn read(
        &self,
        expected_metainfo: &Metainfo,
        read: &Read,
        ticket: ReadTicket,
        interruptor: &Interruptor,
    ) -> Result<ReadResponse, ShardError> {
        let (mut btree, txn, sb) = self
            .acquire_for_read("gabbro_shard::Store::read", ticket, interruptor)
            .await?;

        check_metainfo(&sb, expected_metainfo)?;

        let response = match read {
            Read::Get(get) => ReadResponse::Get(btree.get(&get.key, &txn, &sb)?),
            Read::Rget(rget) => ReadResponse::Rget(btree.rget(
                rget.left_mode,
                &rget.left_key,
                rget.right_mode,
                &rget.right_key,
                &txn,
                &sb,
            )?),
        };
        btree.commit(txn, sb)?;
        Ok(response)
    }

    /// Executes a write: verifies the expected metainfo, overwrites it
    /// with `new_metainfo` on its domain, and applies the mutation
    /// stamped with `(proposed_cas, timestamp)`.
    pub async fn write(
        &self,
        expected_metainfo: &Metainfo,
        new_metainfo: &Metainfo,
        write: &Write,
        timestamp: StateTimestamp,
        ticket: WriteTicket,
        interruptor: &Interruptor,
    ) -> Result<WriteResponse, ShardError> {
        // An estimate: the mutation plus a possible leaf split.
        let expected_change_count = 2;
        let (mut btree, mut txn, mut sb) = self
            .acquire_for_write(
                "gabbro_shard::Store::write",
                expected_change_count,
                ticket,
                interruptor,
            )
            .await?;

        check_and_update_metainfo(&mut sb, expected_metainfo, new_metainfo)?;

        let castime = Castime::new(write.proposed_cas, timestamp.to_repli());
        let result = btree.change(&write.mutation, castime, &mut txn, &mut sb)?;
        btree.commit(txn, sb)?;
        Ok(WriteResponse { result })
    }

    // ========================================================================
    // Metainfo
    // ========================================================================

    /// Reads the full region→blob metadata map.
    pub async fn get_metainfo(
        &self,
        ticket: ReadTicket,
        interruptor: &Interruptor,
    ) -> Result<Metainfo, ShardError> {
        let (mut btree, txn, sb) = self
            .acquire_for_read("gabbro_shard::Store::get_metainfo", ticket, interruptor)
            .await?;
        let metainfo = decode_metainfo(&sb)?;
        btree.commit(txn, sb)?;
        Ok(metainfo)
    }

    /// Overwrites the metadata map with `new` on `new`'s domain,
    /// preserving it elsewhere.
    pub async fn set_metainfo(
        &self,
        new: &Metainfo,
        ticket: WriteTicket,
        interruptor: &Interruptor,
    ) -> Result<(), ShardError> {
        let (mut btree, txn, mut sb) = self
            .acquire_for_write("gabbro_shard::Store::set_metainfo", 1, ticket, interruptor)
            .await?;
        update_metainfo(&mut sb, new)?;
        btree.commit(txn, sb)?;
        Ok(())
    }

    // ========================================================================
    // Backfill
    // ========================================================================

    /// Acts as a backfill source.
    ///
    /// Reads the current metainfo and offers it to `should_backfill`;
    /// if declined, returns `false` without scanning. Otherwise emits,
    /// for every `(region, since)` entry of `start_point`, each change
    /// strictly newer than `since` as a [`BackfillChunk`] pushed
    /// synchronously into `chunk_sink`; a blocking sink is the
    /// backpressure mechanism. Cancellation is checked between regions,
    /// best-effort, never mid-chunk.
    ///
    /// The `since` conversion to the tree's recency granularity is
    /// lossy, so already-applied chunks may be re-sent; the sink's
    /// `SetKey`/`DeleteKey` handling is idempotent to absorb that.
    pub async fn send_backfill<P, S>(
        &self,
        start_point: &RegionMap<StateTimestamp>,
        should_backfill: P,
        mut chunk_sink: S,
        ticket: ReadTicket,
        interruptor: &Interruptor,
    ) -> Result<bool, ShardError>
    where
        P: FnOnce(&Metainfo) -> bool,
        S: FnMut(BackfillChunk),
    {
        let (mut btree, txn, sb) = self.acquire_for_backfill(ticket, interruptor).await?;

        let metainfo = decode_metainfo(&sb)?;
        if !should_backfill(&metainfo) {
            btree.commit(txn, sb)?;
            return Ok(false);
        }

        let mut translator = ChunkTranslator {
            sink: &mut chunk_sink,
        };
        for (region, since) in start_point.iter() {
            if interruptor.is_fired() {
                return Err(ShardError::Interrupted);
            }
            tracing::debug!(?region, since = %since, "backfilling region");
            btree.backfill(region, since.to_repli(), &mut translator, &txn, &sb)?;
        }
        btree.commit(txn, sb)?;
        Ok(true)
    }

    /// Acts as a backfill sink: applies one chunk under its own write
    /// transaction. Safe to re-apply.
    pub async fn receive_backfill(
        &self,
        chunk: &BackfillChunk,
        ticket: WriteTicket,
        interruptor: &Interruptor,
    ) -> Result<(), ShardError> {
        let (mut btree, mut txn, mut sb) = self
            .acquire_for_write("gabbro_shard::Store::receive_backfill", 1, ticket, interruptor)
            .await?;

        match chunk {
            // The chunk's recency is accepted but not consulted here.
            BackfillChunk::DeleteKey { key, recency: _ } => {
                btree.backfill_delete(key, &mut txn, &mut sb)?;
            }
            BackfillChunk::DeleteRange { region } => {
                let tester = RegionTester { region };
                btree.backfill_delete_range(&tester, region, &mut txn, &mut sb)?;
            }
            BackfillChunk::SetKey { atom } => {
                btree.backfill_set(atom, &mut txn, &mut sb)?;
            }
        }
        btree.commit(txn, sb)?;
        Ok(())
    }

    /// Atomically overwrites the metadata on `new_metainfo`'s domain and
    /// erases every key in `subregion`.
    pub async fn reset_data(
        &self,
        subregion: &Region,
        new_metainfo: &Metainfo,
        ticket: WriteTicket,
        interruptor: &Interruptor,
    ) -> Result<(), ShardError> {
        // Probably a leaf-node-sized range of keys, and it won't be
        // aligned on a leaf boundary.
        let expected_change_count = 2;
        let (mut btree, mut txn, mut sb) = self
            .acquire_for_write(
                "gabbro_shard::Store::reset_data",
                expected_change_count,
                ticket,
                interruptor,
            )
            .await?;

        update_metainfo(&mut sb, new_metainfo)?;
        btree.backfill_delete_range(&EraseAll, subregion, &mut txn, &mut sb)?;
        btree.commit(txn, sb)?;
        Ok(())
    }
}

/// Translates B-tree backfill events into wire chunks.
struct ChunkTranslator<'a, S: FnMut(BackfillChunk)> {
    sink: &'a mut S,
}

impl<S: FnMut(BackfillChunk)> BackfillCallback for ChunkTranslator<'_, S> {
    fn on_delete_range(&mut self, region: &Region) {
        (self.sink)(BackfillChunk::DeleteRange {
            region: region.clone(),
        });
    }

    fn on_deletion(&mut self, key: &Key, recency: RepliTimestamp) {
        (self.sink)(BackfillChunk::DeleteKey {
            key: key.clone(),
            recency,
        });
    }

    fn on_keyvalue(&mut self, atom: BackfillAtom) {
        (self.sink)(BackfillChunk::SetKey { atom });
    }
}

/// Erases exactly the keys inside a replicated deletion's region.
struct RegionTester<'a> {
    region: &'a Region,
}

impl KeyTester for RegionTester<'_> {
    fn key_should_be_erased(&self, key: &Key) -> bool {
        self.region.contains_key(key)
    }
}
