//! Write mutations, their results, and the write side of the router.

use bytes::Bytes;
use gabbro_region::Region;
use gabbro_types::{Cas, Exptime, Flags, Key};
use serde::{Deserialize, Serialize};

// ============================================================================
// Mutations
// ============================================================================

/// A single-key mutation. Every variant carries the key it targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Unconditional store.
    Set {
        key: Key,
        value: Bytes,
        flags: Flags,
        exptime: Exptime,
    },
    /// Store only if the key is absent.
    Add {
        key: Key,
        value: Bytes,
        flags: Flags,
        exptime: Exptime,
    },
    /// Store only if the key is present.
    Replace {
        key: Key,
        value: Bytes,
        flags: Flags,
        exptime: Exptime,
    },
    /// Store only if the stored CAS token matches `expected`.
    Cas {
        key: Key,
        value: Bytes,
        flags: Flags,
        exptime: Exptime,
        expected: Cas,
    },
    /// Append bytes to an existing value.
    Append { key: Key, value: Bytes },
    /// Prepend bytes to an existing value.
    Prepend { key: Key, value: Bytes },
    /// Add to an ASCII-decimal counter, wrapping at `u64::MAX`.
    Incr { key: Key, amount: u64 },
    /// Subtract from an ASCII-decimal counter, saturating at zero.
    Decr { key: Key, amount: u64 },
    /// Remove the key, leaving a tombstone for replication.
    Delete { key: Key },
}

impl Mutation {
    /// The key this mutation targets.
    pub fn key(&self) -> &Key {
        match self {
            Mutation::Set { key, .. }
            | Mutation::Add { key, .. }
            | Mutation::Replace { key, .. }
            | Mutation::Cas { key, .. }
            | Mutation::Append { key, .. }
            | Mutation::Prepend { key, .. }
            | Mutation::Incr { key, .. }
            | Mutation::Decr { key, .. }
            | Mutation::Delete { key } => key,
        }
    }
}

/// A write request: a mutation plus the CAS token the client proposes for
/// the resulting value. Combined with the operation timestamp this
/// produces the castime stamped on the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Write {
    pub mutation: Mutation,
    pub proposed_cas: Cas,
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of the set family (`set`/`add`/`replace`/`cas`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetResult {
    /// The value was stored.
    Stored,
    /// An `add` found the key present, or a `replace` found it absent.
    NotStored,
    /// A `cas` found a different CAS token stored.
    Exists,
    /// A `cas` found the key absent.
    NotFound,
    /// The value exceeds the size cap.
    TooLarge,
}

/// Outcome of `append`/`prepend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppendPrependResult {
    Success,
    TooLarge,
    NotFound,
}

/// Outcome of `incr`/`decr`. `Success` carries the new counter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncrDecrResult {
    Success(u64),
    NotFound,
    /// The stored value is not an ASCII-decimal unsigned integer.
    NotNumeric,
}

/// Outcome of `delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteResult {
    Deleted,
    NotFound,
}

/// The tagged union of per-variant write outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationResult {
    Set(SetResult),
    AppendPrepend(AppendPrependResult),
    IncrDecr(IncrDecrResult),
    Delete(DeleteResult),
}

/// Response to a [`Write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
    pub result: MutationResult,
}

// ============================================================================
// Write-side router
// ============================================================================

impl Write {
    /// The key region this write touches: always the single-key region of
    /// its mutation's key.
    pub fn get_region(&self) -> Region {
        Region::at_key(self.mutation.key())
    }

    /// Restricts the write to `sub`.
    ///
    /// A write never spans shards, so `sub` must equal
    /// [`Write::get_region`]; the caller is trusted and violations are
    /// debug-asserted.
    pub fn shard(&self, sub: &Region) -> Write {
        debug_assert!(
            *sub == self.get_region(),
            "write sharded onto a region other than its own key"
        );
        self.clone()
    }

    /// Recombines per-shard responses: a write has exactly one part,
    /// returned verbatim.
    pub fn unshard(&self, parts: Vec<WriteResponse>) -> WriteResponse {
        debug_assert_eq!(parts.len(), 1, "write must unshard exactly one response");
        parts
            .into_iter()
            .next()
            .expect("write must unshard exactly one response")
    }
}
