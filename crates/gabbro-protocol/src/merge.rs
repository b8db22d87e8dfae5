//! Lazy k-way merge of per-shard range-scan results.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::query::{RgetAtom, RgetResult};

/// Merges several finite, individually-ordered [`RgetResult`] sequences
/// into one ascending sequence.
///
/// The merge is lazy: each source holds at most one buffered element (its
/// current head) and is pulled again only after that element is yielded.
/// Sources are assumed disjoint (the sharding router never splits a key
/// across shards), so no deduplication is performed; equal keys would be
/// yielded in source order.
#[derive(Debug)]
pub struct MergeIterator {
    sources: Vec<RgetResult>,
    heads: BinaryHeap<Head>,
}

/// A buffered source head, ordered ascending by (key, source index).
#[derive(Debug)]
struct Head {
    atom: RgetAtom,
    source: usize,
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.atom.key == other.atom.key && self.source == other.source
    }
}

impl Eq for Head {}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the smallest key surfaces.
        (&other.atom.key, other.source).cmp(&(&self.atom.key, self.source))
    }
}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl MergeIterator {
    /// Builds a merge over the given sources, pulling one head from each.
    pub fn new(mut sources: Vec<RgetResult>) -> Self {
        let mut heads = BinaryHeap::with_capacity(sources.len());
        for (index, source) in sources.iter_mut().enumerate() {
            if let Some(atom) = source.next() {
                heads.push(Head {
                    atom,
                    source: index,
                });
            }
        }
        Self { sources, heads }
    }
}

impl Iterator for MergeIterator {
    type Item = RgetAtom;

    fn next(&mut self) -> Option<RgetAtom> {
        let Head { atom, source } = self.heads.pop()?;
        if let Some(next) = self.sources[source].next() {
            self.heads.push(Head {
                atom: next,
                source,
            });
        }
        Some(atom)
    }
}
