//! Backfill chunks: the unit of catch-up replication.

use bytes::Bytes;
use gabbro_region::Region;
use gabbro_types::{Cas, Exptime, Flags, Key, RepliTimestamp};
use serde::{Deserialize, Serialize};

/// One live key-value pair emitted by a backfill source.
///
/// Carries everything the sink needs to reconstruct the value verbatim,
/// including the CAS token (or zero if none was stamped) and the key's
/// recency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillAtom {
    pub key: Key,
    pub value: Bytes,
    pub flags: Flags,
    pub exptime: Exptime,
    pub cas_or_zero: Cas,
    pub recency: RepliTimestamp,
}

/// One unit of backfill traffic.
///
/// A source emits, in region order: the deletion skeleton needed to
/// recreate sparse deletions (`DeleteRange`), per-key tombstones
/// (`DeleteKey`), and live values (`SetKey`). Sinks must apply `SetKey`
/// and `DeleteKey` idempotently: the source's timestamp conversion is
/// coarse and may re-send chunks the sink already has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackfillChunk {
    /// Erase every key in `region`.
    DeleteRange { region: Region },
    /// Tombstone one key. The recency accompanies the tombstone but is
    /// not currently consulted on apply.
    DeleteKey { key: Key, recency: RepliTimestamp },
    /// Store one live key-value pair verbatim.
    SetKey { atom: BackfillAtom },
}
