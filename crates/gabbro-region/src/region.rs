//! Key regions: half-open intervals over the ordered key space.
//!
//! # Normalized Form
//!
//! A region is stored as an inclusive left key plus an exclusive right key
//! (or +∞). The wire surface speaks in `{closed, open, none}` bound modes;
//! construction normalizes those by taking key successors, so two regions
//! describing the same key set always compare equal:
//!
//! ```text
//! (open "a", closed "m")  →  left = "a\0", right = "m\0"
//! (none, open "m")        →  left = ε,     right = "m"
//! (closed "k", closed "k")→  left = "k",   right = "k\0"   (a point)
//! ```

use gabbro_types::Key;
use serde::{Deserialize, Serialize};

/// Bound mode as it appears in range queries: closed (inclusive), open
/// (exclusive), or none (unbounded on that side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundMode {
    Closed,
    Open,
    None,
}

/// A contiguous region of the key space.
///
/// Invariant: `left <= right` (an empty region is representable but never
/// stored in a [`super::RegionMap`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    /// Inclusive lower bound. The empty key means −∞.
    left: Key,
    /// Exclusive upper bound; `None` means +∞.
    right: Option<Key>,
}

impl Region {
    /// Builds a region from wire-level bound modes, normalizing to the
    /// half-open form.
    pub fn new(left_mode: BoundMode, left_key: &Key, right_mode: BoundMode, right_key: &Key) -> Self {
        let left = match left_mode {
            BoundMode::Closed => left_key.clone(),
            BoundMode::Open => left_key.successor(),
            BoundMode::None => Key::min(),
        };
        let right = match right_mode {
            BoundMode::Closed => Some(right_key.successor()),
            BoundMode::Open => Some(right_key.clone()),
            BoundMode::None => None,
        };
        Self { left, right }
    }

    /// The half-open region `[left, right)`.
    pub fn half_open(left: Key, right: Key) -> Self {
        Self {
            left,
            right: Some(right),
        }
    }

    /// The region `[left, +∞)`.
    pub fn from_key_onward(left: Key) -> Self {
        Self { left, right: None }
    }

    /// The whole key space, `[ε, +∞)`.
    pub fn universe() -> Self {
        Self {
            left: Key::min(),
            right: None,
        }
    }

    /// The single-key region `[key, key]`.
    pub fn at_key(key: &Key) -> Self {
        Self {
            left: key.clone(),
            right: Some(key.successor()),
        }
    }

    /// Inclusive lower bound.
    pub fn left(&self) -> &Key {
        &self.left
    }

    /// Exclusive upper bound, `None` for +∞.
    pub fn right(&self) -> Option<&Key> {
        self.right.as_ref()
    }

    /// True if the right side is +∞.
    pub fn is_unbounded_right(&self) -> bool {
        self.right.is_none()
    }

    /// True if no key falls inside this region.
    pub fn is_empty(&self) -> bool {
        match &self.right {
            Some(right) => *right <= self.left,
            None => false,
        }
    }

    /// True if `key` falls inside this region.
    pub fn contains_key(&self, key: &Key) -> bool {
        if *key < self.left {
            return false;
        }
        match &self.right {
            Some(right) => key < right,
            None => true,
        }
    }

    /// True if every key of `other` also falls inside `self`.
    pub fn is_superset(&self, other: &Region) -> bool {
        if other.is_empty() {
            return true;
        }
        if other.left < self.left {
            return false;
        }
        match (&self.right, &other.right) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => b <= a,
        }
    }

    /// True if the two regions share at least one key.
    pub fn overlaps(&self, other: &Region) -> bool {
        !self.intersection(other).is_empty()
    }

    /// The intersection of two regions; may be empty.
    pub fn intersection(&self, other: &Region) -> Region {
        let left = if self.left >= other.left {
            self.left.clone()
        } else {
            other.left.clone()
        };
        let right = match (&self.right, &other.right) {
            (None, None) => None,
            (Some(r), None) | (None, Some(r)) => Some(r.clone()),
            (Some(a), Some(b)) => Some(if a <= b { a.clone() } else { b.clone() }),
        };
        // Clamp an inverted interval to an empty one at `left`.
        let right = match right {
            Some(r) if r < left => Some(left.clone()),
            other => other,
        };
        Region { left, right }
    }

    /// The up-to-two pieces of `self` not covered by `other`.
    ///
    /// Empty pieces are dropped; the result is in key order.
    pub fn difference(&self, other: &Region) -> Vec<Region> {
        let cut = self.intersection(other);
        if cut.is_empty() {
            return vec![self.clone()];
        }

        let mut pieces = Vec::with_capacity(2);
        let before = Region {
            left: self.left.clone(),
            right: Some(cut.left.clone()),
        };
        if !before.is_empty() {
            pieces.push(before);
        }
        if let Some(cut_right) = &cut.right {
            let after = Region {
                left: cut_right.clone(),
                right: self.right.clone(),
            };
            if !after.is_empty() {
                pieces.push(after);
            }
        }
        pieces
    }
}

// ============================================================================
// Stable binary codec
// ============================================================================
//
// Regions are persisted as superblock metainfo keys, so this encoding is
// part of the on-disk format. Shape:
//
//   [left_len: u16 LE][left bytes][right_tag: u8]
//   right_tag 0 → unbounded, nothing follows
//   right_tag 1 → [right_len: u16 LE][right bytes]

const RIGHT_UNBOUNDED: u8 = 0;
const RIGHT_BOUNDED: u8 = 1;

/// Errors decoding a persisted region key.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RegionCodecError {
    /// Not enough bytes for the declared structure.
    #[error("truncated region encoding")]
    Truncated,

    /// Unknown right-bound tag byte.
    #[error("invalid region bound tag {0:#04x}")]
    InvalidTag(u8),

    /// Bytes left over after a complete region.
    #[error("trailing bytes after region encoding")]
    TrailingBytes,
}

impl Region {
    /// Encodes the region to its stable byte form.
    pub fn encode(&self) -> Vec<u8> {
        let right_len = self.right.as_ref().map_or(0, Key::len);
        let mut buf = Vec::with_capacity(2 + self.left.len() + 1 + 2 + right_len);

        buf.extend_from_slice(&(self.left.len() as u16).to_le_bytes());
        buf.extend_from_slice(self.left.as_bytes());
        match &self.right {
            None => buf.push(RIGHT_UNBOUNDED),
            Some(right) => {
                buf.push(RIGHT_BOUNDED);
                buf.extend_from_slice(&(right.len() as u16).to_le_bytes());
                buf.extend_from_slice(right.as_bytes());
            }
        }
        buf
    }

    /// Decodes a region from its stable byte form, requiring the whole
    /// input to be consumed.
    pub fn decode(data: &[u8]) -> Result<Self, RegionCodecError> {
        let (left, rest) = decode_key(data)?;
        let (&tag, rest) = rest.split_first().ok_or(RegionCodecError::Truncated)?;
        let (right, rest) = match tag {
            RIGHT_UNBOUNDED => (None, rest),
            RIGHT_BOUNDED => {
                let (key, rest) = decode_key(rest)?;
                (Some(key), rest)
            }
            other => return Err(RegionCodecError::InvalidTag(other)),
        };
        if !rest.is_empty() {
            return Err(RegionCodecError::TrailingBytes);
        }
        Ok(Region { left, right })
    }
}

fn decode_key(data: &[u8]) -> Result<(Key, &[u8]), RegionCodecError> {
    if data.len() < 2 {
        return Err(RegionCodecError::Truncated);
    }
    let len = u16::from_le_bytes(data[0..2].try_into().unwrap()) as usize;
    if data.len() < 2 + len {
        return Err(RegionCodecError::Truncated);
    }
    let key = Key::from_bound_bytes(bytes::Bytes::copy_from_slice(&data[2..2 + len]));
    Ok((key, &data[2 + len..]))
}
