//! # gabbro-types: Core types for the Gabbro per-shard store
//!
//! This crate contains the data-model scalars shared across the Gabbro
//! system:
//! - Store keys ([`Key`]): opaque byte strings, lexicographically ordered
//! - Value metadata ([`Flags`], [`Exptime`], [`Cas`])
//! - Timestamps ([`RepliTimestamp`], [`StateTimestamp`], [`Castime`])

use std::fmt::{self, Debug, Display};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Maximum key length in bytes.
///
/// The memcached query surface caps keys at 250 bytes; the B-tree node
/// format relies on the same bound for its fanout math.
pub const MAX_KEY_LENGTH: usize = 250;

// ============================================================================
// Key
// ============================================================================

/// A key in the store.
///
/// Keys are arbitrary byte sequences up to [`MAX_KEY_LENGTH`] bytes,
/// compared lexicographically. The empty key is the minimum of the key
/// space.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Key(Bytes);

impl Key {
    /// Creates a new key from bytes.
    ///
    /// # Panics
    ///
    /// Debug builds panic if the key exceeds [`MAX_KEY_LENGTH`].
    pub fn new(data: impl Into<Bytes>) -> Self {
        let bytes = data.into();
        debug_assert!(
            bytes.len() <= MAX_KEY_LENGTH,
            "key length {} exceeds maximum {}",
            bytes.len(),
            MAX_KEY_LENGTH
        );
        Self(bytes)
    }

    /// Creates a key without the length debug check.
    ///
    /// Range bounds produced by [`Key::successor`] may exceed
    /// [`MAX_KEY_LENGTH`] by one byte; they are rebuilt through this path
    /// when decoded from persistent storage.
    pub fn from_bound_bytes(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    /// The minimum possible key (empty).
    pub fn min() -> Self {
        Self(Bytes::new())
    }

    /// Returns the key as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length of the key in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the key is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the underlying `Bytes`.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Returns the immediate successor of this key in lexicographic order.
    ///
    /// Appending a zero byte yields the smallest key strictly greater than
    /// `self`. Used to normalize open/closed range bounds; the result may
    /// exceed [`MAX_KEY_LENGTH`] by one byte, which is fine for a bound
    /// that is never stored as a data key.
    pub fn successor(&self) -> Self {
        let mut buf = Vec::with_capacity(self.0.len() + 1);
        buf.extend_from_slice(&self.0);
        buf.push(0);
        Self(Bytes::from(buf))
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(")?;
        for (i, byte) in self.0.iter().take(16).enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        if self.0.len() > 16 {
            write!(f, "...+{} more", self.0.len() - 16)?;
        }
        write!(f, ")")
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(s) = std::str::from_utf8(&self.0) {
            if s.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
                return write!(f, "{s}");
            }
        }
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<&[u8]> for Key {
    fn from(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }
}

impl From<Vec<u8>> for Key {
    fn from(data: Vec<u8>) -> Self {
        Self::new(Bytes::from(data))
    }
}

impl From<Bytes> for Key {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::new(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::new(Bytes::from(s))
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// ============================================================================
// Value metadata - All Copy (cheap scalar values)
// ============================================================================

/// Opaque client flags stored alongside a value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Flags(u32);

impl Flags {
    pub fn new(flags: u32) -> Self {
        Self(flags)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for Flags {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Flags> for u32 {
    fn from(flags: Flags) -> Self {
        flags.0
    }
}

/// Expiration time stored alongside a value.
///
/// Zero means "never expires". The core stores and returns the value
/// verbatim; expiry enforcement belongs to the query surface.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Exptime(u32);

impl Exptime {
    pub const NEVER: Exptime = Exptime(0);

    pub fn new(exptime: u32) -> Self {
        Self(exptime)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for Exptime {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// An opaque compare-and-swap token.
///
/// Zero means "no CAS stamped on this value". Clients use nonzero tokens
/// for optimistic concurrency.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Cas(u64);

impl Cas {
    pub const ZERO: Cas = Cas(0);

    pub fn new(cas: u64) -> Self {
        Self(cas)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true if a real CAS token is present.
    pub fn is_set(self) -> bool {
        self.0 != 0
    }
}

impl Display for Cas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Cas {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Cas> for u64 {
    fn from(cas: Cas) -> Self {
        cas.0
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Per-key recency timestamp, used by the B-tree to answer "changed
/// since" queries during backfill.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RepliTimestamp(u64);

impl RepliTimestamp {
    /// Earlier than every real timestamp; the recency of data whose
    /// history is unknown.
    pub const DISTANT_PAST: RepliTimestamp = RepliTimestamp(0);

    pub fn new(ts: u64) -> Self {
        Self(ts)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for RepliTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RepliTimestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Number of low-order [`StateTimestamp`] bits dropped when converting to
/// a [`RepliTimestamp`]. The conversion is deliberately coarse, so a
/// backfill source may re-send entries the sink already has; sinks must
/// be idempotent.
const REPLI_COARSENESS_SHIFT: u32 = 4;

/// A fine-grained transition timestamp assigned by the replication layer.
///
/// Each accepted write carries one. Ordered and dense, unlike the coarse
/// [`RepliTimestamp`] recency derived from it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct StateTimestamp(u64);

impl StateTimestamp {
    pub const ZERO: StateTimestamp = StateTimestamp(0);

    pub fn new(ts: u64) -> Self {
        Self(ts)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Converts to the coarse recency granularity. Lossy.
    pub fn to_repli(self) -> RepliTimestamp {
        RepliTimestamp(self.0 >> REPLI_COARSENESS_SHIFT)
    }
}

impl Display for StateTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for StateTimestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

// ============================================================================
// Castime
// ============================================================================

/// The (CAS, recency) pair stamped onto every mutation.
///
/// Writes arriving through the public surface carry the caller's proposed
/// CAS and the operation's transition timestamp; mutations applied by the
/// backfill sink use [`Castime::null`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Castime {
    pub cas: Cas,
    pub timestamp: RepliTimestamp,
}

impl Castime {
    pub fn new(cas: Cas, timestamp: RepliTimestamp) -> Self {
        Self { cas, timestamp }
    }

    /// A castime carrying no CAS and the distant past, used when
    /// applying replicated data that must not look newer than it is.
    pub fn null() -> Self {
        Self {
            cas: Cas::ZERO,
            timestamp: RepliTimestamp::DISTANT_PAST,
        }
    }
}
