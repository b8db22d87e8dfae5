//! Read queries, their responses, and the read side of the router.

use std::collections::VecDeque;

use bytes::Bytes;
use gabbro_region::{BoundMode, Region};
use gabbro_types::{Cas, Exptime, Flags, Key};
use serde::{Deserialize, Serialize};

use crate::merge::MergeIterator;

// ============================================================================
// Queries
// ============================================================================

/// A read request against one logical key region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Read {
    /// Exact-key lookup.
    Get(GetQuery),
    /// Half-open range scan in ascending key order.
    Rget(RgetQuery),
}

/// Exact-key lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetQuery {
    pub key: Key,
}

/// Range scan, carried in wire form (explicit bound modes).
///
/// `left_key`/`right_key` are ignored when the corresponding mode is
/// [`BoundMode::None`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgetQuery {
    pub left_mode: BoundMode,
    pub left_key: Key,
    pub right_mode: BoundMode,
    pub right_key: Key,
}

impl RgetQuery {
    /// The region implied by the query's bounds.
    pub fn region(&self) -> Region {
        Region::new(self.left_mode, &self.left_key, self.right_mode, &self.right_key)
    }
}

// ============================================================================
// Responses
// ============================================================================

/// The payload of a successful exact-key lookup; `None` when the key is
/// absent (absence is a successful read, not a failure).
pub type GetResult = Option<GetValue>;

/// A value returned by `get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetValue {
    pub value: Bytes,
    pub flags: Flags,
    pub exptime: Exptime,
    pub cas: Cas,
}

/// One tuple of a range-scan result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgetAtom {
    pub key: Key,
    pub value: Bytes,
    pub flags: Flags,
    pub exptime: Exptime,
    pub cas: Cas,
}

/// A finite, ascending, single-owner sequence of range-scan tuples.
///
/// Not restartable: pulling consumes the sequence. Crossing a process
/// boundary requires the eager form ([`RgetResult::collect_atoms`]);
/// within the process the sequence stays lazy so a k-way merge over many
/// shards pulls one element per source at a time.
#[derive(Debug)]
pub struct RgetResult {
    source: RgetSource,
}

#[derive(Debug)]
enum RgetSource {
    /// A shard-local scan, already in key order.
    Atoms(VecDeque<RgetAtom>),
    /// A lazy merge over several shard results.
    Merge(MergeIterator),
}

impl RgetResult {
    /// An empty result.
    pub fn empty() -> Self {
        Self {
            source: RgetSource::Atoms(VecDeque::new()),
        }
    }

    /// Wraps a shard-local scan. `atoms` must already be in ascending
    /// key order.
    pub fn from_atoms(atoms: impl IntoIterator<Item = RgetAtom>) -> Self {
        Self {
            source: RgetSource::Atoms(atoms.into_iter().collect()),
        }
    }

    /// Wraps a lazy merge over several sub-results.
    pub fn from_merge(merge: MergeIterator) -> Self {
        Self {
            source: RgetSource::Merge(merge),
        }
    }

    /// Pulls every remaining tuple into a serializable vector.
    pub fn collect_atoms(self) -> Vec<RgetAtom> {
        self.collect()
    }
}

impl Iterator for RgetResult {
    type Item = RgetAtom;

    fn next(&mut self) -> Option<RgetAtom> {
        match &mut self.source {
            RgetSource::Atoms(atoms) => atoms.pop_front(),
            RgetSource::Merge(merge) => merge.next(),
        }
    }
}

/// Response to a [`Read`].
#[derive(Debug)]
pub enum ReadResponse {
    Get(GetResult),
    Rget(RgetResult),
}

impl ReadResponse {
    /// Unwraps a get result.
    ///
    /// # Panics
    ///
    /// Panics if this is a range-scan response.
    pub fn into_get(self) -> GetResult {
        match self {
            ReadResponse::Get(result) => result,
            ReadResponse::Rget(_) => panic!("expected a get response, found rget"),
        }
    }

    /// Unwraps a range-scan result.
    ///
    /// # Panics
    ///
    /// Panics if this is a get response.
    pub fn into_rget(self) -> RgetResult {
        match self {
            ReadResponse::Rget(result) => result,
            ReadResponse::Get(_) => panic!("expected an rget response, found get"),
        }
    }
}

// ============================================================================
// Read-side router
// ============================================================================

impl Read {
    /// The key region this read touches.
    pub fn get_region(&self) -> Region {
        match self {
            Read::Get(get) => Region::at_key(&get.key),
            Read::Rget(rget) => rget.region(),
        }
    }

    /// Restricts the read to `sub`, one shard's slice of its region.
    ///
    /// `sub` must be a subset of [`Read::get_region`]; for a get it must
    /// be exactly the key's point region. The caller (the router) is
    /// trusted; violations are debug-asserted.
    pub fn shard(&self, sub: &Region) -> Read {
        match self {
            Read::Get(get) => {
                debug_assert!(
                    *sub == Region::at_key(&get.key),
                    "get sharded onto a region other than its own key"
                );
                Read::Get(get.clone())
            }
            Read::Rget(rget) => {
                debug_assert!(
                    rget.region().is_superset(sub),
                    "rget sharded onto a region outside its range"
                );
                let (right_mode, right_key) = match sub.right() {
                    Some(right) => (BoundMode::Open, right.clone()),
                    None => (BoundMode::None, Key::min()),
                };
                Read::Rget(RgetQuery {
                    left_mode: BoundMode::Closed,
                    left_key: sub.left().clone(),
                    right_mode,
                    right_key,
                })
            }
        }
    }

    /// Recombines per-shard responses into one response.
    ///
    /// For a get there must be exactly one part, returned verbatim. For an
    /// rget the parts' sequences are merged lazily by key; the parts'
    /// regions are disjoint by construction, so no deduplication happens.
    pub fn unshard(&self, parts: Vec<ReadResponse>) -> ReadResponse {
        match self {
            Read::Get(_) => {
                debug_assert_eq!(parts.len(), 1, "get must unshard exactly one response");
                let part = parts
                    .into_iter()
                    .next()
                    .expect("get must unshard exactly one response");
                ReadResponse::Get(part.into_get())
            }
            Read::Rget(_) => {
                let sources = parts.into_iter().map(ReadResponse::into_rget).collect();
                ReadResponse::Rget(RgetResult::from_merge(MergeIterator::new(sources)))
            }
        }
    }
}
