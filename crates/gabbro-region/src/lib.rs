//! # gabbro-region: Key-range algebra for the Gabbro per-shard store
//!
//! Every query against a shard carries an implicit key region; shards own
//! regions; replication metadata maps regions to version blobs. This crate
//! provides:
//!
//! - [`Region`]: a half-open interval over the key space, normalized to
//!   an inclusive left bound and an exclusive (or unbounded) right bound
//! - [`BoundMode`]: the wire-level `{closed, open, none}` bound modes
//! - [`RegionMap`]: a finite partition of a domain region into disjoint
//!   sub-regions, each tagged with a value
//! - A stable binary codec for regions ([`Region::encode`] /
//!   [`Region::decode`]); the encoding is part of the on-disk superblock
//!   format and must never change shape

mod map;
mod region;

#[cfg(test)]
mod tests;

pub use map::RegionMap;
pub use region::{BoundMode, Region, RegionCodecError};
