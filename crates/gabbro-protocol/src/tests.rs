//! Tests for the query model and the sharding router.

use bytes::Bytes;
use gabbro_region::{BoundMode, Region};
use gabbro_types::{Cas, Exptime, Flags, Key};

use crate::{
    GetQuery, GetValue, MergeIterator, Mutation, MutationResult, Read, ReadResponse, RgetAtom,
    RgetQuery, RgetResult, SetResult, Write, WriteResponse,
};

fn k(s: &str) -> Key {
    Key::from(s)
}

fn atom(key: &str, value: &str) -> RgetAtom {
    RgetAtom {
        key: k(key),
        value: Bytes::copy_from_slice(value.as_bytes()),
        flags: Flags::default(),
        exptime: Exptime::NEVER,
        cas: Cas::ZERO,
    }
}

fn rget(left: &str, right: &str) -> Read {
    Read::Rget(RgetQuery {
        left_mode: BoundMode::Closed,
        left_key: k(left),
        right_mode: BoundMode::Open,
        right_key: k(right),
    })
}

// ============================================================================
// Regions of queries
// ============================================================================

#[test]
fn get_region_of_get_is_its_key_point() {
    let read = Read::Get(GetQuery { key: k("apple") });
    assert_eq!(read.get_region(), Region::at_key(&k("apple")));
}

#[test]
fn get_region_of_rget_follows_its_bounds() {
    assert_eq!(
        rget("a", "z").get_region(),
        Region::half_open(k("a"), k("z"))
    );

    let unbounded = Read::Rget(RgetQuery {
        left_mode: BoundMode::None,
        left_key: k("ignored"),
        right_mode: BoundMode::None,
        right_key: k("ignored"),
    });
    assert_eq!(unbounded.get_region(), Region::universe());
}

#[test]
fn get_region_of_every_write_is_its_key_point() {
    let muts = vec![
        Mutation::Set {
            key: k("w"),
            value: Bytes::from("v"),
            flags: Flags::default(),
            exptime: Exptime::NEVER,
        },
        Mutation::Append {
            key: k("w"),
            value: Bytes::from("v"),
        },
        Mutation::Incr { key: k("w"), amount: 1 },
        Mutation::Delete { key: k("w") },
    ];
    for mutation in muts {
        let write = Write {
            mutation,
            proposed_cas: Cas::new(1),
        };
        assert_eq!(write.get_region(), Region::at_key(&k("w")));
    }
}

// ============================================================================
// Sharding
// ============================================================================

#[test]
fn sharding_a_get_onto_its_own_region_is_identity() {
    // E1: universe split at "m"; "apple" lands in the left shard.
    let read = Read::Get(GetQuery { key: k("apple") });
    let sharded = read.shard(&Region::at_key(&k("apple")));
    assert_eq!(sharded, read);
}

#[test]
#[should_panic]
#[cfg(debug_assertions)]
fn sharding_a_get_onto_the_wrong_shard_is_a_programming_error() {
    // E1: the right shard ["m", ∞) does not contain "apple".
    let read = Read::Get(GetQuery { key: k("apple") });
    let _ = read.shard(&Region::from_key_onward(k("m")));
}

#[test]
fn sharding_an_rget_clamps_bounds_to_the_shard() {
    // E2: Rget[closed "a", open "z") split at "m".
    let read = rget("a", "z");

    let left = read.shard(&Region::half_open(k("a"), k("m")));
    assert_eq!(left, rget("a", "m"));

    let right = read.shard(&Region::half_open(k("m"), k("z")));
    assert_eq!(right, rget("m", "z"));

    // Invariant 1: the sharded query's region is exactly the sub-region,
    // and is contained in the original's.
    for (sharded, sub) in [
        (&left, Region::half_open(k("a"), k("m"))),
        (&right, Region::half_open(k("m"), k("z"))),
    ] {
        assert_eq!(sharded.get_region(), sub);
        assert!(read.get_region().is_superset(&sharded.get_region()));
    }
}

#[test]
fn sharding_an_rget_onto_an_unbounded_shard_keeps_it_unbounded() {
    let read = Read::Rget(RgetQuery {
        left_mode: BoundMode::Closed,
        left_key: k("a"),
        right_mode: BoundMode::None,
        right_key: Key::min(),
    });
    let sharded = read.shard(&Region::from_key_onward(k("m")));
    assert_eq!(sharded.get_region(), Region::from_key_onward(k("m")));
}

#[test]
fn sharding_a_write_onto_its_region_is_identity() {
    let write = Write {
        mutation: Mutation::Delete { key: k("w") },
        proposed_cas: Cas::ZERO,
    };
    // Invariant 2: w.shard(w.get_region()) ≡ w.
    assert_eq!(write.shard(&write.get_region()), write);
}

// ============================================================================
// Unsharding
// ============================================================================

#[test]
fn unsharding_a_get_returns_the_single_payload() {
    let read = Read::Get(GetQuery { key: k("apple") });
    let payload = GetValue {
        value: Bytes::from("red"),
        flags: Flags::new(7),
        exptime: Exptime::NEVER,
        cas: Cas::new(42),
    };
    let merged = read.unshard(vec![ReadResponse::Get(Some(payload.clone()))]);
    assert_eq!(merged.into_get(), Some(payload));
}

#[test]
fn unsharding_empty_rget_parts_yields_an_empty_sequence() {
    // E2: unsharding two empty results yields an empty ordered sequence.
    let read = rget("a", "z");
    let merged = read.unshard(vec![
        ReadResponse::Rget(RgetResult::empty()),
        ReadResponse::Rget(RgetResult::empty()),
    ]);
    assert_eq!(merged.into_rget().collect_atoms(), vec![]);
}

#[test]
fn unsharding_interleaves_shard_results_in_key_order() {
    // Invariant 3: a partitioned rget, recombined, equals the unsharded
    // run of the original query.
    let read = rget("a", "z");
    let left = RgetResult::from_atoms(vec![atom("apple", "1"), atom("fig", "2")]);
    let right = RgetResult::from_atoms(vec![atom("mango", "3"), atom("pear", "4")]);

    let merged = read
        .unshard(vec![ReadResponse::Rget(left), ReadResponse::Rget(right)])
        .into_rget();

    let keys: Vec<Key> = merged.map(|a| a.key).collect();
    assert_eq!(keys, vec![k("apple"), k("fig"), k("mango"), k("pear")]);
}

#[test]
fn unsharding_a_write_returns_the_single_response() {
    let write = Write {
        mutation: Mutation::Delete { key: k("w") },
        proposed_cas: Cas::ZERO,
    };
    let response = WriteResponse {
        result: MutationResult::Set(SetResult::Stored),
    };
    assert_eq!(write.unshard(vec![response]), response);
}

// ============================================================================
// Merge iterator
// ============================================================================

#[test]
fn merge_yields_strictly_ascending_keys() {
    // Invariant 9 over a three-way split.
    let sources = vec![
        RgetResult::from_atoms(vec![atom("b", "1"), atom("e", "2"), atom("h", "3")]),
        RgetResult::from_atoms(vec![atom("a", "4"), atom("i", "5")]),
        RgetResult::from_atoms(vec![atom("c", "6"), atom("d", "7"), atom("z", "8")]),
    ];
    let merged: Vec<RgetAtom> = MergeIterator::new(sources).collect();

    for pair in merged.windows(2) {
        assert!(pair[0].key < pair[1].key, "keys must strictly ascend");
    }
    assert_eq!(merged.len(), 8);
    assert_eq!(merged[0].key, k("a"));
    assert_eq!(merged[7].key, k("z"));
}

#[test]
fn merge_is_lazy_per_source() {
    let sources = vec![
        RgetResult::from_atoms((0..100).map(|i| atom(&format!("a{i:03}"), "x"))),
        RgetResult::from_atoms(vec![atom("zzz", "last")]),
    ];
    let mut merged = MergeIterator::new(sources);

    // Pulling the first element must not drain the long source.
    assert_eq!(merged.next().unwrap().key, k("a000"));
    assert_eq!(merged.next().unwrap().key, k("a001"));
}

#[test]
fn merge_of_no_sources_is_empty() {
    let mut merged = MergeIterator::new(vec![]);
    assert!(merged.next().is_none());
}
