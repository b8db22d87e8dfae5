//! The region→version-blob metadata map persisted in the superblock.
//!
//! The replication layer tags every sub-region of a shard with an opaque
//! version blob. The map is stored as (serialized-region, blob) byte
//! pairs in the superblock's metainfo block; the region encoding is the
//! stable codec from `gabbro-region` and is part of the on-disk format.
//!
//! The expected-metainfo checks exist for debug builds: the caller (the
//! replication controller) already knows what the metainfo must be, and
//! a mismatch is a bug above us, not a runtime condition.

use bytes::Bytes;
use gabbro_btree::Superblock;
use gabbro_region::{Region, RegionCodecError, RegionMap};

use crate::error::ShardError;

/// The per-shard replication metadata: version blobs tiling the universe.
pub type Metainfo = RegionMap<Bytes>;

/// Decodes the full metainfo map from a superblock.
///
/// # Panics
///
/// Panics if the decoded pieces do not tile the universe region; the
/// store only ever persists complete maps, so a gap here is corruption
/// of our own making, not caller input.
pub(crate) fn decode_metainfo(sb: &Superblock) -> Result<Metainfo, ShardError> {
    let pairs = sb
        .metainfo_pairs()
        .iter()
        .map(|(key, value)| Ok((Region::decode(key)?, Bytes::copy_from_slice(value))))
        .collect::<Result<Vec<_>, RegionCodecError>>()?;

    let map = Metainfo::from_pairs(pairs);
    assert!(
        map.domain() == Region::universe(),
        "superblock metainfo does not tile the universe"
    );
    Ok(map)
}

/// Replaces the superblock's metainfo block with `map`.
pub(crate) fn write_metainfo(sb: &mut Superblock, map: &Metainfo) {
    sb.clear_metainfo();
    for (region, blob) in map.iter() {
        sb.set_metainfo_pair(region.encode(), blob.to_vec());
    }
}

/// Overwrites the stored map with `new` on `new`'s domain, preserving
/// values elsewhere.
pub(crate) fn update_metainfo(sb: &mut Superblock, new: &Metainfo) -> Result<(), ShardError> {
    let mut current = decode_metainfo(sb)?;
    current.update(new);
    write_metainfo(sb, &current);
    Ok(())
}

/// Debug-asserts that the stored map matches `expected` on its domain,
/// returning the stored map.
pub(crate) fn check_metainfo(
    sb: &Superblock,
    expected: &Metainfo,
) -> Result<Metainfo, ShardError> {
    let current = decode_metainfo(sb)?;
    debug_assert!(
        current.mask(&expected.domain()) == *expected,
        "stored metainfo diverged from the caller's expectation"
    );
    Ok(current)
}

/// `check_metainfo` then `update_metainfo` under one write view.
pub(crate) fn check_and_update_metainfo(
    sb: &mut Superblock,
    expected: &Metainfo,
    new: &Metainfo,
) -> Result<(), ShardError> {
    let mut current = check_metainfo(sb, expected)?;
    current.update(new);
    write_metainfo(sb, &current);
    Ok(())
}
