//! The B-tree slice: one shard's ordered tree and the operations the
//! store facade drives against it.
//!
//! The slice owns the page cache (which owns the page store) and executes
//! point lookups, range scans, mutations, bulk erases, and backfill walks
//! under a [`Transaction`]. The superblock travels alongside the
//! transaction as a decoded value; write transactions mutate it and write
//! it back on [`BTreeSlice::commit`].

use bytes::Bytes;
use gabbro_protocol::{
    AppendPrependResult, BackfillAtom, DeleteResult, GetResult, GetValue, IncrDecrResult, Mutation,
    MutationResult, RgetAtom, RgetResult, SetResult,
};
use gabbro_region::{BoundMode, Region};
use gabbro_types::{Cas, Castime, Exptime, Flags, Key, RepliTimestamp};

use crate::cache::PageCache;
use crate::error::BTreeError;
use crate::node::{EntryState, InternalNode, LeafEntry, LeafNode, ValueRecord};
use crate::page::PageType;
use crate::superblock::Superblock;
use crate::txn::{Access, OrderCheckpoint, OrderToken, Transaction};
use crate::types::{MAX_PAYLOAD, MAX_VALUE_LENGTH, PageId};

/// Maximum tree depth, guarding the recursive paths against a corrupted
/// page graph.
const MAX_TREE_DEPTH: u32 = 32;

/// Callbacks receiving a backfill walk's events, in region order.
pub trait BackfillCallback {
    /// The deletion history for `region` has been truncated; the sink
    /// must erase everything it holds there before applying what
    /// follows.
    fn on_delete_range(&mut self, region: &Region);

    /// A key deleted since the requested timestamp.
    fn on_deletion(&mut self, key: &Key, recency: RepliTimestamp);

    /// A key written since the requested timestamp.
    fn on_keyvalue(&mut self, atom: BackfillAtom);
}

/// Decides which keys a bulk erase actually removes.
pub trait KeyTester {
    fn key_should_be_erased(&self, key: &Key) -> bool;
}

/// Erases every key inside its region.
pub struct EraseAll;

impl KeyTester for EraseAll {
    fn key_should_be_erased(&self, _key: &Key) -> bool {
        true
    }
}

/// One shard's persistent B-tree.
pub struct BTreeSlice {
    cache: PageCache,
    order_checkpoint: OrderCheckpoint,
}

impl BTreeSlice {
    /// Initializes an empty tree over a freshly created cache, seeding
    /// the metainfo block with an empty blob covering `universe`.
    pub fn create(mut cache: PageCache, universe: &Region) -> Result<Self, BTreeError> {
        let sb_page = cache.allocate_raw();
        debug_assert_eq!(sb_page, PageId::SUPERBLOCK, "superblock must be page 0");

        let mut sb = Superblock::new();
        sb.set_metainfo_pair(universe.encode(), Vec::new());
        cache.write_raw(PageId::SUPERBLOCK, &sb.serialize()?)?;
        tracing::info!("created empty B-tree slice");

        Ok(Self {
            cache,
            order_checkpoint: OrderCheckpoint::new(),
        })
    }

    /// Opens the tree in an existing cache, validating the superblock.
    pub fn open(mut cache: PageCache) -> Result<Self, BTreeError> {
        let raw = cache.read_raw(PageId::SUPERBLOCK)?;
        let sb = Superblock::deserialize(&raw)?;
        tracing::info!(root = ?sb.root, height = sb.height, "opened B-tree slice");

        Ok(Self {
            cache,
            order_checkpoint: OrderCheckpoint::new(),
        })
    }

    /// Begins a transaction: checks the order token through and decodes
    /// the current superblock.
    pub fn begin(
        &mut self,
        access: Access,
        expected_change_count: usize,
        token: OrderToken,
    ) -> Result<(Transaction, Superblock), BTreeError> {
        self.order_checkpoint.check_through(&token);
        let raw = self.cache.read_raw(PageId::SUPERBLOCK)?;
        let sb = Superblock::deserialize(&raw)?;
        Ok((Transaction::new(access, expected_change_count, token), sb))
    }

    /// Commits a transaction. For writes this persists the superblock
    /// and flushes dirty pages; for reads it is a no-op.
    pub fn commit(&mut self, txn: Transaction, sb: Superblock) -> Result<(), BTreeError> {
        match txn.access() {
            Access::Read => Ok(()),
            Access::Write => {
                self.cache.write_raw(PageId::SUPERBLOCK, &sb.serialize()?)?;
                self.cache.sync()
            }
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Point lookup.
    pub fn get(
        &mut self,
        key: &Key,
        _txn: &Transaction,
        sb: &Superblock,
    ) -> Result<GetResult, BTreeError> {
        let Some(root) = sb.root else {
            return Ok(None);
        };
        let leaf_id = self.find_leaf(root, key, 0)?;
        let leaf = LeafNode::from_page(self.cache.get(leaf_id)?)?;

        Ok(leaf.get(key).and_then(|entry| match &entry.state {
            EntryState::Live(record) => Some(GetValue {
                value: record.value.clone(),
                flags: record.flags,
                exptime: record.exptime,
                cas: record.cas,
            }),
            EntryState::Tombstone { .. } => None,
        }))
    }

    /// Range scan over the region implied by the wire-form bounds,
    /// ascending, skipping tombstones.
    pub fn rget(
        &mut self,
        left_mode: BoundMode,
        left_key: &Key,
        right_mode: BoundMode,
        right_key: &Key,
        _txn: &Transaction,
        sb: &Superblock,
    ) -> Result<RgetResult, BTreeError> {
        let region = Region::new(left_mode, left_key, right_mode, right_key);
        let mut atoms = Vec::new();
        self.for_each_leaf_in(sb, &region, &mut |_, leaf, _, _| {
            for entry in &leaf.entries {
                if !region.contains_key(&entry.key) {
                    continue;
                }
                if let EntryState::Live(record) = &entry.state {
                    atoms.push(RgetAtom {
                        key: entry.key.clone(),
                        value: record.value.clone(),
                        flags: record.flags,
                        exptime: record.exptime,
                        cas: record.cas,
                    });
                }
            }
            Ok(())
        })?;
        Ok(RgetResult::from_atoms(atoms))
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Applies one mutation, stamping stored values with `castime`.
    pub fn change(
        &mut self,
        mutation: &Mutation,
        castime: Castime,
        txn: &mut Transaction,
        sb: &mut Superblock,
    ) -> Result<MutationResult, BTreeError> {
        debug_assert_eq!(txn.access(), Access::Write, "change under a read transaction");
        let cas = castime.cas;
        let recency = castime.timestamp;

        let result = match mutation {
            Mutation::Set {
                key,
                value,
                flags,
                exptime,
            } => MutationResult::Set(
                self.apply_sarc(sb, key, value, *flags, *exptime, true, true, None, cas, recency)?,
            ),
            Mutation::Add {
                key,
                value,
                flags,
                exptime,
            } => MutationResult::Set(
                self.apply_sarc(sb, key, value, *flags, *exptime, true, false, None, cas, recency)?,
            ),
            Mutation::Replace {
                key,
                value,
                flags,
                exptime,
            } => MutationResult::Set(
                self.apply_sarc(sb, key, value, *flags, *exptime, false, true, None, cas, recency)?,
            ),
            Mutation::Cas {
                key,
                value,
                flags,
                exptime,
                expected,
            } => MutationResult::Set(self.apply_sarc(
                sb,
                key,
                value,
                *flags,
                *exptime,
                false,
                true,
                Some(*expected),
                cas,
                recency,
            )?),
            Mutation::Append { key, value } => {
                MutationResult::AppendPrepend(self.apply_concat(sb, key, value, true, cas, recency)?)
            }
            Mutation::Prepend { key, value } => MutationResult::AppendPrepend(
                self.apply_concat(sb, key, value, false, cas, recency)?,
            ),
            Mutation::Incr { key, amount } => {
                MutationResult::IncrDecr(self.apply_arith(sb, key, *amount, true, cas, recency)?)
            }
            Mutation::Decr { key, amount } => {
                MutationResult::IncrDecr(self.apply_arith(sb, key, *amount, false, cas, recency)?)
            }
            Mutation::Delete { key } => {
                MutationResult::Delete(self.apply_delete(sb, key, recency)?)
            }
        };
        Ok(result)
    }

    /// Stores a replicated atom verbatim: both store policies allowed,
    /// the atom's CAS (or zero) and recency preserved.
    pub fn backfill_set(
        &mut self,
        atom: &BackfillAtom,
        txn: &mut Transaction,
        sb: &mut Superblock,
    ) -> Result<(), BTreeError> {
        debug_assert_eq!(txn.access(), Access::Write);
        self.apply_sarc(
            sb,
            &atom.key,
            &atom.value,
            atom.flags,
            atom.exptime,
            true,
            true,
            None,
            atom.cas_or_zero,
            atom.recency,
        )?;
        Ok(())
    }

    /// Applies a replicated single-key deletion at a null castime.
    pub fn backfill_delete(
        &mut self,
        key: &Key,
        txn: &mut Transaction,
        sb: &mut Superblock,
    ) -> Result<(), BTreeError> {
        debug_assert_eq!(txn.access(), Access::Write);
        self.apply_delete(sb, key, RepliTimestamp::DISTANT_PAST)?;
        Ok(())
    }

    /// Erases every key in `region` that `tester` approves, without
    /// leaving tombstones. Used by backfill range deletions and
    /// `reset_data`.
    pub fn backfill_delete_range(
        &mut self,
        tester: &dyn KeyTester,
        region: &Region,
        txn: &mut Transaction,
        sb: &mut Superblock,
    ) -> Result<(), BTreeError> {
        debug_assert_eq!(txn.access(), Access::Write);

        let mut leaf_ids = Vec::new();
        self.for_each_leaf_in(sb, region, &mut |page_id, _, _, _| {
            leaf_ids.push(page_id);
            Ok(())
        })?;

        for page_id in leaf_ids {
            let mut leaf = LeafNode::from_page(self.cache.get(page_id)?)?;
            let before = leaf.len();
            leaf.entries
                .retain(|e| !(region.contains_key(&e.key) && tester.key_should_be_erased(&e.key)));
            if leaf.len() != before {
                leaf.to_page(self.cache.get_mut(page_id)?)?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Backfill source walk
    // ========================================================================

    /// Emits, in region order, every change in `region` strictly newer
    /// than `since`, plus the range-deletion skeleton for leaves whose
    /// tombstone history no longer reaches back to `since`.
    pub fn backfill(
        &mut self,
        region: &Region,
        since: RepliTimestamp,
        callback: &mut dyn BackfillCallback,
        _txn: &Transaction,
        sb: &Superblock,
    ) -> Result<(), BTreeError> {
        self.for_each_leaf_in(sb, region, &mut |_, leaf, lower, upper| {
            if leaf.history_floor > since {
                // This leaf has discarded tombstones newer than `since`;
                // only a range erase makes the sink consistent.
                let leaf_region = match (lower, upper) {
                    (None, None) => Region::universe(),
                    (None, Some(u)) => Region::half_open(Key::min(), u.clone()),
                    (Some(l), None) => Region::from_key_onward(l.clone()),
                    (Some(l), Some(u)) => Region::half_open(l.clone(), u.clone()),
                };
                let skeleton = leaf_region.intersection(region);
                if !skeleton.is_empty() {
                    callback.on_delete_range(&skeleton);
                }
            }
            for entry in &leaf.entries {
                if !region.contains_key(&entry.key) || entry.recency() <= since {
                    continue;
                }
                match &entry.state {
                    EntryState::Tombstone { recency } => {
                        callback.on_deletion(&entry.key, *recency);
                    }
                    EntryState::Live(record) => callback.on_keyvalue(BackfillAtom {
                        key: entry.key.clone(),
                        value: record.value.clone(),
                        flags: record.flags,
                        exptime: record.exptime,
                        cas_or_zero: record.cas,
                        recency: record.recency,
                    }),
                }
            }
            Ok(())
        })
    }

    // ========================================================================
    // Sarc path (set family + replicated sets)
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    fn apply_sarc(
        &mut self,
        sb: &mut Superblock,
        key: &Key,
        value: &Bytes,
        flags: Flags,
        exptime: Exptime,
        add_ok: bool,
        replace_ok: bool,
        required_cas: Option<Cas>,
        stamp_cas: Cas,
        recency: RepliTimestamp,
    ) -> Result<SetResult, BTreeError> {
        if value.len() > MAX_VALUE_LENGTH {
            return Ok(SetResult::TooLarge);
        }

        let existing = self.read_live(sb, key)?;
        if let Some(required) = required_cas {
            match &existing {
                None => return Ok(SetResult::NotFound),
                Some(record) if record.cas != required => return Ok(SetResult::Exists),
                Some(_) => {}
            }
        } else if existing.is_some() && !replace_ok {
            return Ok(SetResult::NotStored);
        } else if existing.is_none() && !add_ok {
            return Ok(SetResult::NotStored);
        }

        self.store_entry(
            sb,
            LeafEntry {
                key: key.clone(),
                state: EntryState::Live(ValueRecord {
                    value: value.clone(),
                    flags,
                    exptime,
                    cas: stamp_cas,
                    recency,
                }),
            },
        )?;
        Ok(SetResult::Stored)
    }

    fn apply_concat(
        &mut self,
        sb: &mut Superblock,
        key: &Key,
        piece: &Bytes,
        append: bool,
        stamp_cas: Cas,
        recency: RepliTimestamp,
    ) -> Result<AppendPrependResult, BTreeError> {
        let Some(existing) = self.read_live(sb, key)? else {
            return Ok(AppendPrependResult::NotFound);
        };
        if existing.value.len() + piece.len() > MAX_VALUE_LENGTH {
            return Ok(AppendPrependResult::TooLarge);
        }

        let mut buf = Vec::with_capacity(existing.value.len() + piece.len());
        if append {
            buf.extend_from_slice(&existing.value);
            buf.extend_from_slice(piece);
        } else {
            buf.extend_from_slice(piece);
            buf.extend_from_slice(&existing.value);
        }

        self.store_entry(
            sb,
            LeafEntry {
                key: key.clone(),
                state: EntryState::Live(ValueRecord {
                    value: Bytes::from(buf),
                    flags: existing.flags,
                    exptime: existing.exptime,
                    cas: stamp_cas,
                    recency,
                }),
            },
        )?;
        Ok(AppendPrependResult::Success)
    }

    fn apply_arith(
        &mut self,
        sb: &mut Superblock,
        key: &Key,
        amount: u64,
        incr: bool,
        stamp_cas: Cas,
        recency: RepliTimestamp,
    ) -> Result<IncrDecrResult, BTreeError> {
        let Some(existing) = self.read_live(sb, key)? else {
            return Ok(IncrDecrResult::NotFound);
        };
        let Some(current) = std::str::from_utf8(&existing.value)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        else {
            return Ok(IncrDecrResult::NotNumeric);
        };

        let updated = if incr {
            current.wrapping_add(amount)
        } else {
            current.saturating_sub(amount)
        };

        self.store_entry(
            sb,
            LeafEntry {
                key: key.clone(),
                state: EntryState::Live(ValueRecord {
                    value: Bytes::from(updated.to_string()),
                    flags: existing.flags,
                    exptime: existing.exptime,
                    cas: stamp_cas,
                    recency,
                }),
            },
        )?;
        Ok(IncrDecrResult::Success(updated))
    }

    fn apply_delete(
        &mut self,
        sb: &mut Superblock,
        key: &Key,
        recency: RepliTimestamp,
    ) -> Result<DeleteResult, BTreeError> {
        if self.read_live(sb, key)?.is_none() {
            return Ok(DeleteResult::NotFound);
        }
        self.store_entry(
            sb,
            LeafEntry {
                key: key.clone(),
                state: EntryState::Tombstone { recency },
            },
        )?;
        Ok(DeleteResult::Deleted)
    }

    /// The live record for `key`, if any (tombstones read as absent).
    fn read_live(
        &mut self,
        sb: &Superblock,
        key: &Key,
    ) -> Result<Option<ValueRecord>, BTreeError> {
        let Some(root) = sb.root else {
            return Ok(None);
        };
        let leaf_id = self.find_leaf(root, key, 0)?;
        let leaf = LeafNode::from_page(self.cache.get(leaf_id)?)?;
        Ok(leaf.get(key).and_then(|entry| match &entry.state {
            EntryState::Live(record) => Some(record.clone()),
            EntryState::Tombstone { .. } => None,
        }))
    }

    // ========================================================================
    // Tree plumbing
    // ========================================================================

    fn find_leaf(&mut self, page_id: PageId, key: &Key, depth: u32) -> Result<PageId, BTreeError> {
        if depth >= MAX_TREE_DEPTH {
            return Err(BTreeError::NodeCorrupted("tree too deep".into()));
        }
        let page = self.cache.get(page_id)?;
        match page.page_type() {
            PageType::Leaf => Ok(page_id),
            PageType::Internal => {
                let child = InternalNode::from_page(page)?.find_child(key);
                self.find_leaf(child, key, depth + 1)
            }
            PageType::Free => Err(BTreeError::NodeCorrupted("hit a free page during search".into())),
        }
    }

    /// Inserts or replaces an entry, splitting up the spine as needed.
    fn store_entry(&mut self, sb: &mut Superblock, entry: LeafEntry) -> Result<(), BTreeError> {
        match sb.root {
            None => {
                let root_id = self.cache.allocate(PageType::Leaf)?;
                let mut leaf = LeafNode::new();
                leaf.upsert(entry);
                leaf.to_page(self.cache.get_mut(root_id)?)?;
                sb.root = Some(root_id);
                sb.height = 1;
            }
            Some(root) => {
                if let Some((split_key, new_child)) = self.insert_descend(root, entry, 0)? {
                    let new_root_id = self.cache.allocate(PageType::Internal)?;
                    let node = InternalNode::from_split(root, split_key, new_child);
                    node.to_page(self.cache.get_mut(new_root_id)?)?;
                    sb.root = Some(new_root_id);
                    sb.height += 1;
                    tracing::debug!(height = sb.height, "root split");
                }
            }
        }
        Ok(())
    }

    fn insert_descend(
        &mut self,
        page_id: PageId,
        entry: LeafEntry,
        depth: u32,
    ) -> Result<Option<(Key, PageId)>, BTreeError> {
        if depth >= MAX_TREE_DEPTH {
            return Err(BTreeError::NodeCorrupted("tree too deep".into()));
        }
        let page = self.cache.get(page_id)?;
        match page.page_type() {
            PageType::Leaf => {
                let mut leaf = LeafNode::from_page(page)?;
                leaf.upsert(entry);
                if leaf.serialized_size() > MAX_PAYLOAD {
                    let (split_key, right) = leaf.split();
                    let right_id = self.cache.allocate(PageType::Leaf)?;
                    right.to_page(self.cache.get_mut(right_id)?)?;
                    leaf.to_page(self.cache.get_mut(page_id)?)?;
                    Ok(Some((split_key, right_id)))
                } else {
                    leaf.to_page(self.cache.get_mut(page_id)?)?;
                    Ok(None)
                }
            }
            PageType::Internal => {
                let child = InternalNode::from_page(page)?.find_child(&entry.key);
                let Some((split_key, new_child)) = self.insert_descend(child, entry, depth + 1)?
                else {
                    return Ok(None);
                };

                let mut node = InternalNode::from_page(self.cache.get(page_id)?)?;
                node.insert(split_key, new_child);
                if node.serialized_size() > MAX_PAYLOAD {
                    let (promoted, right) = node.split();
                    let right_id = self.cache.allocate(PageType::Internal)?;
                    right.to_page(self.cache.get_mut(right_id)?)?;
                    node.to_page(self.cache.get_mut(page_id)?)?;
                    Ok(Some((promoted, right_id)))
                } else {
                    node.to_page(self.cache.get_mut(page_id)?)?;
                    Ok(None)
                }
            }
            PageType::Free => Err(BTreeError::NodeCorrupted("hit a free page during insert".into())),
        }
    }

    /// Visits every leaf whose key range may intersect `region`, in key
    /// order, passing the separator bounds the leaf sits between.
    fn for_each_leaf_in<F>(
        &mut self,
        sb: &Superblock,
        region: &Region,
        visit: &mut F,
    ) -> Result<(), BTreeError>
    where
        F: FnMut(PageId, &LeafNode, Option<&Key>, Option<&Key>) -> Result<(), BTreeError>,
    {
        let Some(root) = sb.root else {
            return Ok(());
        };
        self.visit_subtree(root, region, None, None, visit, 0)
    }

    fn visit_subtree<F>(
        &mut self,
        page_id: PageId,
        region: &Region,
        lower: Option<&Key>,
        upper: Option<&Key>,
        visit: &mut F,
        depth: u32,
    ) -> Result<(), BTreeError>
    where
        F: FnMut(PageId, &LeafNode, Option<&Key>, Option<&Key>) -> Result<(), BTreeError>,
    {
        if depth >= MAX_TREE_DEPTH {
            return Err(BTreeError::NodeCorrupted("tree too deep".into()));
        }
        let page = self.cache.get(page_id)?;
        match page.page_type() {
            PageType::Leaf => {
                let leaf = LeafNode::from_page(page)?;
                visit(page_id, &leaf, lower, upper)
            }
            PageType::Internal => {
                let node = InternalNode::from_page(page)?;
                let children: Vec<(PageId, Option<Key>, Option<Key>)> = node
                    .children()
                    .into_iter()
                    .map(|(child, lo, hi)| (child, lo.cloned(), hi.cloned()))
                    .collect();

                for (child, child_lower, child_upper) in children {
                    // Tighten inherited bounds with this node's separators.
                    let lo = child_lower.as_ref().or(lower);
                    let hi = child_upper.as_ref().or(upper);

                    // Skip subtrees entirely outside the region.
                    if let Some(hi) = hi {
                        if hi <= region.left() {
                            continue;
                        }
                    }
                    if let (Some(right), Some(lo)) = (region.right(), lo) {
                        if right <= lo {
                            continue;
                        }
                    }
                    self.visit_subtree(child, region, lo, hi, visit, depth + 1)?;
                }
                Ok(())
            }
            PageType::Free => Err(BTreeError::NodeCorrupted("hit a free page during walk".into())),
        }
    }
}

impl std::fmt::Debug for BTreeSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeSlice")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
