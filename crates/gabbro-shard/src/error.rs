//! Error types for store-facade operations.

use gabbro_btree::BTreeError;
use gabbro_region::RegionCodecError;

/// Errors surfaced by the store facade.
///
/// The facade recovers nothing locally: an `Interrupted` wait is the
/// caller's cue to retry or give up, and storage-layer failures pass
/// through unchanged. Precondition violations (router misuse, malformed
/// region maps) are panics, not error values.
#[derive(thiserror::Error, Debug)]
pub enum ShardError {
    /// The external cancellation signal fired while the operation was
    /// waiting for its FIFO turn. No state was changed.
    #[error("operation interrupted while waiting for its turn")]
    Interrupted,

    /// Propagated storage-layer failure (I/O, corruption).
    #[error(transparent)]
    BTree(#[from] BTreeError),

    /// A persisted metainfo region key failed to decode.
    #[error("corrupt metainfo region key: {0}")]
    MetainfoCodec(#[from] RegionCodecError),
}
