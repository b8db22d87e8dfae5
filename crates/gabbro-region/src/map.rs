//! Region maps: a partition of a domain region into tagged sub-regions.
//!
//! A `RegionMap<V>` holds disjoint, contiguous (region, value) pairs in
//! key order. The replication layer uses `RegionMap<Bytes>` for the
//! per-shard version metadata and `RegionMap<StateTimestamp>` for backfill
//! start points.
//!
//! Constructing a map from overlapping or gapped pieces is a programming
//! error and panics; the callers (the store facade and the replication
//! controller above it) are trusted to hand over well-formed partitions.

use gabbro_types::Key;

use crate::region::Region;

/// A finite partition of a contiguous domain region, each piece tagged
/// with a value.
///
/// Invariants:
/// - pieces are non-empty, sorted by left bound, and pairwise disjoint
/// - consecutive pieces are adjacent (no gaps), so the union is the domain
/// - adjacent pieces with equal values are coalesced on construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMap<V> {
    entries: Vec<(Region, V)>,
}

impl<V: Clone + PartialEq> RegionMap<V> {
    /// Builds a map from a list of (region, value) pieces.
    ///
    /// # Panics
    ///
    /// Panics if any piece is empty, or if the pieces overlap or leave a
    /// gap: a malformed partition is a bug in the caller.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Region, V)>) -> Self {
        let mut entries: Vec<(Region, V)> = pairs.into_iter().collect();
        for (region, _) in &entries {
            assert!(!region.is_empty(), "empty piece in region map");
        }
        entries.sort_by(|(a, _), (b, _)| a.left().cmp(b.left()));

        for window in entries.windows(2) {
            let (prev, _) = &window[0];
            let (next, _) = &window[1];
            match prev.right() {
                Some(right) => {
                    assert!(
                        right == next.left(),
                        "region map pieces must tile: gap or overlap at {:?}",
                        next.left()
                    );
                }
                None => panic!("region map piece after an unbounded piece"),
            }
        }

        let mut map = Self { entries };
        map.coalesce();
        map
    }

    /// A map with a single piece covering `region`.
    pub fn single(region: Region, value: V) -> Self {
        assert!(!region.is_empty(), "empty piece in region map");
        Self {
            entries: vec![(region, value)],
        }
    }

    /// The contiguous region covered by this map.
    ///
    /// # Panics
    ///
    /// Panics on an empty map, which has no domain.
    pub fn domain(&self) -> Region {
        let first = self.entries.first().expect("empty region map has no domain");
        let last = self.entries.last().expect("empty region map has no domain");
        match last.0.right() {
            Some(right) => Region::half_open(first.0.left().clone(), right.clone()),
            None => Region::from_key_onward(first.0.left().clone()),
        }
    }

    /// Number of pieces.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the map has no pieces.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates pieces in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Region, &V)> {
        self.entries.iter().map(|(r, v)| (r, v))
    }

    /// The value governing `key`, if the key falls inside the domain.
    pub fn get(&self, key: &Key) -> Option<&V> {
        self.entries
            .iter()
            .find(|(r, _)| r.contains_key(key))
            .map(|(_, v)| v)
    }

    /// Restricts the map to `region`, dropping pieces outside it and
    /// trimming pieces that straddle its edges.
    pub fn mask(&self, region: &Region) -> Self {
        let entries = self
            .entries
            .iter()
            .filter_map(|(r, v)| {
                let cut = r.intersection(region);
                if cut.is_empty() {
                    None
                } else {
                    Some((cut, v.clone()))
                }
            })
            .collect();
        let mut map = Self { entries };
        map.coalesce();
        map
    }

    /// Overwrites this map with `other` on `other`'s domain, preserving
    /// values elsewhere.
    ///
    /// # Panics
    ///
    /// Panics if `other`'s domain is not contained in this map's domain.
    pub fn update(&mut self, other: &RegionMap<V>) {
        if other.is_empty() {
            return;
        }
        let incoming = other.domain();
        assert!(
            self.domain().is_superset(&incoming),
            "region map update outside the existing domain"
        );

        let mut entries: Vec<(Region, V)> = Vec::with_capacity(self.entries.len() + other.len());
        for (region, value) in &self.entries {
            for piece in region.difference(&incoming) {
                entries.push((piece, value.clone()));
            }
        }
        entries.extend(other.entries.iter().cloned());
        entries.sort_by(|(a, _), (b, _)| a.left().cmp(b.left()));

        self.entries = entries;
        self.coalesce();
    }

    /// Merges adjacent pieces carrying equal values.
    fn coalesce(&mut self) {
        let mut merged: Vec<(Region, V)> = Vec::with_capacity(self.entries.len());
        for (region, value) in self.entries.drain(..) {
            match merged.last_mut() {
                Some((prev, prev_value))
                    if *prev_value == value && prev.right() == Some(region.left()) =>
                {
                    *prev = match region.right() {
                        Some(right) => Region::half_open(prev.left().clone(), right.clone()),
                        None => Region::from_key_onward(prev.left().clone()),
                    };
                }
                _ => merged.push((region, value)),
            }
        }
        self.entries = merged;
    }
}

impl<V: Clone + PartialEq> IntoIterator for RegionMap<V> {
    type Item = (Region, V);
    type IntoIter = std::vec::IntoIter<(Region, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
