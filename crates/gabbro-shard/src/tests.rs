//! Integration tests for the store facade: metainfo round-trips, FIFO
//! visibility, cancellation, reset, and backfill between two stores.

use std::sync::Arc;

use bytes::Bytes;
use gabbro_protocol::{
    BackfillAtom, BackfillChunk, GetQuery, Mutation, MutationResult, Read, RgetQuery, SetResult,
    Write,
};
use gabbro_region::{BoundMode, Region, RegionMap};
use gabbro_types::{Cas, Exptime, Flags, Key, RepliTimestamp, StateTimestamp};
use tempfile::TempDir;

use crate::{Interruptor, Metainfo, ShardError, Store};

fn k(s: &str) -> Key {
    Key::from(s)
}

fn blob(byte: u8) -> Bytes {
    Bytes::copy_from_slice(&[byte])
}

/// The metainfo a freshly created store carries: an empty blob over the
/// whole key space.
fn initial_metainfo() -> Metainfo {
    RegionMap::single(Region::universe(), Bytes::new())
}

fn fresh_store() -> (Store, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::create(dir.path().join("shard.db")).unwrap();
    (store, dir)
}

async fn put(store: &Store, metainfo: &Metainfo, key: &str, value: &str, ts: u64) {
    let ticket = store.new_write_token();
    let write = Write {
        mutation: Mutation::Set {
            key: k(key),
            value: Bytes::copy_from_slice(value.as_bytes()),
            flags: Flags::default(),
            exptime: Exptime::NEVER,
        },
        proposed_cas: Cas::new(ts),
    };
    let response = store
        .write(
            metainfo,
            metainfo,
            &write,
            StateTimestamp::new(ts),
            ticket,
            &Interruptor::never(),
        )
        .await
        .unwrap();
    assert_eq!(response.result, MutationResult::Set(SetResult::Stored));
}

async fn get(store: &Store, metainfo: &Metainfo, key: &str) -> Option<Bytes> {
    let ticket = store.new_read_token();
    store
        .read(
            metainfo,
            &Read::Get(GetQuery { key: k(key) }),
            ticket,
            &Interruptor::never(),
        )
        .await
        .unwrap()
        .into_get()
        .map(|v| v.value)
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_fresh_store_has_empty_universe_metainfo() {
    let (store, _dir) = fresh_store();
    let metainfo = store
        .get_metainfo(store.new_read_token(), &Interruptor::never())
        .await
        .unwrap();
    assert_eq!(metainfo, initial_metainfo());
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shard.db");
    let metainfo = initial_metainfo();

    {
        let store = Store::create(&path).unwrap();
        put(&store, &metainfo, "durable", "yes", 16).await;
    }

    {
        let store = Store::new(&path, false).unwrap();
        assert_eq!(
            get(&store, &metainfo, "durable").await,
            Some(Bytes::from("yes"))
        );
    }
}

// ============================================================================
// Metainfo (E3)
// ============================================================================

#[tokio::test]
async fn test_metainfo_round_trip_and_partial_overwrite() {
    let (store, _dir) = fresh_store();

    let split = RegionMap::from_pairs(vec![
        (Region::half_open(Key::min(), k("m")), blob(0x01)),
        (Region::from_key_onward(k("m")), blob(0x02)),
    ]);
    store
        .set_metainfo(&split, store.new_write_token(), &Interruptor::never())
        .await
        .unwrap();

    let read_back = store
        .get_metainfo(store.new_read_token(), &Interruptor::never())
        .await
        .unwrap();
    assert_eq!(read_back, split);

    // Overwriting one half preserves the other.
    store
        .set_metainfo(
            &RegionMap::single(Region::from_key_onward(k("m")), blob(0x03)),
            store.new_write_token(),
            &Interruptor::never(),
        )
        .await
        .unwrap();

    let updated = store
        .get_metainfo(store.new_read_token(), &Interruptor::never())
        .await
        .unwrap();
    assert_eq!(
        updated,
        RegionMap::from_pairs(vec![
            (Region::half_open(Key::min(), k("m")), blob(0x01)),
            (Region::from_key_onward(k("m")), blob(0x03)),
        ])
    );
}

// ============================================================================
// FIFO ordering (E4, invariant 7)
// ============================================================================

#[tokio::test]
async fn test_read_issued_after_write_observes_it() {
    let (store, _dir) = fresh_store();
    let store = Arc::new(store);
    let metainfo = initial_metainfo();

    // Tickets fix the order: the write is accepted first.
    let write_ticket = store.new_write_token();
    let read_ticket = store.new_read_token();

    let write = Write {
        mutation: Mutation::Set {
            key: k("k"),
            value: Bytes::from("v1"),
            flags: Flags::default(),
            exptime: Exptime::NEVER,
        },
        proposed_cas: Cas::new(1),
    };

    // Run the read first; the gate must hold it until the write lands.
    let reader = {
        let store = Arc::clone(&store);
        let metainfo = metainfo.clone();
        tokio::spawn(async move {
            store
                .read(
                    &metainfo,
                    &Read::Get(GetQuery { key: k("k") }),
                    read_ticket,
                    &Interruptor::never(),
                )
                .await
                .unwrap()
        })
    };

    store
        .write(
            &metainfo,
            &metainfo,
            &write,
            StateTimestamp::new(16),
            write_ticket,
            &Interruptor::never(),
        )
        .await
        .unwrap();

    let observed = reader.await.unwrap().into_get().map(|v| v.value);
    assert_eq!(observed, Some(Bytes::from("v1")));
}

#[tokio::test]
async fn test_writes_apply_in_ticket_order() {
    let (store, _dir) = fresh_store();
    let store = Arc::new(store);
    let metainfo = initial_metainfo();

    let first = store.new_write_token();
    let second = store.new_write_token();

    let set = |value: &str, cas: u64| Write {
        mutation: Mutation::Set {
            key: k("k"),
            value: Bytes::copy_from_slice(value.as_bytes()),
            flags: Flags::default(),
            exptime: Exptime::NEVER,
        },
        proposed_cas: Cas::new(cas),
    };

    // Start the later write first; the gate reorders execution.
    let late = {
        let store = Arc::clone(&store);
        let metainfo = metainfo.clone();
        let write = set("v2", 2);
        tokio::spawn(async move {
            store
                .write(
                    &metainfo,
                    &metainfo,
                    &write,
                    StateTimestamp::new(32),
                    second,
                    &Interruptor::never(),
                )
                .await
                .unwrap()
        })
    };

    store
        .write(
            &metainfo,
            &metainfo,
            &set("v1", 1),
            StateTimestamp::new(16),
            first,
            &Interruptor::never(),
        )
        .await
        .unwrap();
    late.await.unwrap();

    // The second-issued write is the last one applied.
    assert_eq!(get(&store, &metainfo, "k").await, Some(Bytes::from("v2")));
}

// ============================================================================
// Sharded range scans
// ============================================================================

#[tokio::test]
async fn test_sharded_range_scan_recombines_in_order() {
    // Two stores own the two halves of the key space, as two shards of
    // one service would.
    let (left_store, _ldir) = fresh_store();
    let (right_store, _rdir) = fresh_store();
    let metainfo = initial_metainfo();

    put(&left_store, &metainfo, "apple", "1", 16).await;
    put(&left_store, &metainfo, "fig", "2", 32).await;
    put(&right_store, &metainfo, "mango", "3", 16).await;
    put(&right_store, &metainfo, "pear", "4", 32).await;

    let query = Read::Rget(RgetQuery {
        left_mode: BoundMode::Closed,
        left_key: k("a"),
        right_mode: BoundMode::Open,
        right_key: k("z"),
    });
    let split = [
        (&left_store, Region::half_open(k("a"), k("m"))),
        (&right_store, Region::half_open(k("m"), k("z"))),
    ];

    let mut parts = Vec::new();
    for (store, shard) in split {
        let sub = query.shard(&shard);
        parts.push(
            store
                .read(&metainfo, &sub, store.new_read_token(), &Interruptor::never())
                .await
                .unwrap(),
        );
    }

    let keys: Vec<String> = query
        .unshard(parts)
        .into_rget()
        .map(|atom| atom.key.to_string())
        .collect();
    assert_eq!(keys, vec!["apple", "fig", "mango", "pear"]);
}

// ============================================================================
// Cancellation (invariant 6)
// ============================================================================

#[tokio::test]
async fn test_interrupted_wait_surfaces_without_state_change() {
    let (store, _dir) = fresh_store();
    let metainfo = initial_metainfo();

    // Park a write ticket to hold the gate closed.
    let gate_holder = store.new_write_token();

    let interrupts = crate::InterruptSource::new();
    let interruptor = interrupts.interruptor();
    interrupts.fire();

    let blocked_read = store.new_read_token();
    let err = store
        .read(
            &metainfo,
            &Read::Get(GetQuery { key: k("k") }),
            blocked_read,
            &interruptor,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ShardError::Interrupted));

    // The cancelled ticket released its slot; later operations proceed
    // once the holder is gone.
    drop(gate_holder);
    assert_eq!(get(&store, &metainfo, "k").await, None);
}

#[tokio::test]
async fn test_cancelling_many_tickets_lets_the_last_proceed() {
    let (store, _dir) = fresh_store();
    let metainfo = initial_metainfo();

    // Issue N tickets and abandon the first N-1.
    let abandoned: Vec<_> = (0..5).map(|_| store.new_write_token()).collect();
    let survivor = store.new_write_token();
    drop(abandoned);

    let write = Write {
        mutation: Mutation::Set {
            key: k("k"),
            value: Bytes::from("made it"),
            flags: Flags::default(),
            exptime: Exptime::NEVER,
        },
        proposed_cas: Cas::new(1),
    };
    store
        .write(
            &metainfo,
            &metainfo,
            &write,
            StateTimestamp::new(16),
            survivor,
            &Interruptor::never(),
        )
        .await
        .unwrap();
    assert_eq!(
        get(&store, &metainfo, "k").await,
        Some(Bytes::from("made it"))
    );
}

// ============================================================================
// Reset (E5)
// ============================================================================

#[tokio::test]
async fn test_reset_data_erases_subregion_and_updates_metainfo() {
    let (store, _dir) = fresh_store();
    let metainfo = initial_metainfo();

    for (i, c) in (b'a'..=b'z').enumerate() {
        let key = String::from_utf8(vec![c]).unwrap();
        put(&store, &metainfo, &key, "v", (i as u64 + 1) * 16).await;
    }

    let wiped = Region::half_open(k("c"), k("g"));
    store
        .reset_data(
            &wiped,
            &RegionMap::single(wiped.clone(), blob(0x07)),
            store.new_write_token(),
            &Interruptor::never(),
        )
        .await
        .unwrap();

    let current = store
        .get_metainfo(store.new_read_token(), &Interruptor::never())
        .await
        .unwrap();
    assert_eq!(current.get(&k("d")), Some(&blob(0x07)));
    assert_eq!(current.get(&k("a")), Some(&Bytes::new()));

    for key in ["c", "d", "e", "f"] {
        assert_eq!(get(&store, &current, key).await, None, "{key} must be gone");
    }
    for key in ["a", "b", "g", "h", "z"] {
        assert!(
            get(&store, &current, key).await.is_some(),
            "{key} must remain"
        );
    }
}

// ============================================================================
// Backfill (E6, invariant 8)
// ============================================================================

async fn apply_chunks(store: &Store, chunks: &[BackfillChunk]) {
    for chunk in chunks {
        store
            .receive_backfill(chunk, store.new_write_token(), &Interruptor::never())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_backfill_chunk_stream_is_idempotent() {
    let (store, _dir) = fresh_store();
    let metainfo = initial_metainfo();

    let atom = BackfillAtom {
        key: k("x"),
        value: Bytes::from("1"),
        flags: Flags::default(),
        exptime: Exptime::NEVER,
        cas_or_zero: Cas::new(5),
        recency: RepliTimestamp::new(9),
    };
    let chunks = vec![
        BackfillChunk::SetKey { atom: atom.clone() },
        BackfillChunk::DeleteKey {
            key: k("x"),
            recency: RepliTimestamp::new(10),
        },
        BackfillChunk::SetKey { atom },
    ];

    // Applying the same stream twice ends in the same state as once.
    apply_chunks(&store, &chunks).await;
    apply_chunks(&store, &chunks).await;

    assert_eq!(get(&store, &metainfo, "x").await, Some(Bytes::from("1")));
}

#[tokio::test]
async fn test_backfill_declined_by_predicate() {
    let (store, _dir) = fresh_store();

    let mut chunks = Vec::new();
    let sent = store
        .send_backfill(
            &RegionMap::single(Region::universe(), StateTimestamp::ZERO),
            |_| false,
            |chunk| chunks.push(chunk),
            store.new_read_token(),
            &Interruptor::never(),
        )
        .await
        .unwrap();

    assert!(!sent);
    assert!(chunks.is_empty());
}

#[tokio::test]
async fn test_backfill_predicate_sees_current_metainfo() {
    let (store, _dir) = fresh_store();

    let mut observed = None;
    store
        .send_backfill(
            &RegionMap::single(Region::universe(), StateTimestamp::ZERO),
            |metainfo| {
                observed = Some(metainfo.clone());
                false
            },
            |_| {},
            store.new_read_token(),
            &Interruptor::never(),
        )
        .await
        .unwrap();

    assert_eq!(observed, Some(initial_metainfo()));
}

#[tokio::test]
async fn test_backfill_replicates_source_to_sink() {
    let (source, _sdir) = fresh_store();
    let (sink, _kdir) = fresh_store();
    let metainfo = initial_metainfo();

    put(&source, &metainfo, "apple", "red", 16).await;
    put(&source, &metainfo, "banana", "yellow", 32).await;
    put(&source, &metainfo, "cherry", "dark", 48).await;

    // Delete one key so a tombstone travels too.
    let delete = Write {
        mutation: Mutation::Delete { key: k("banana") },
        proposed_cas: Cas::ZERO,
    };
    source
        .write(
            &metainfo,
            &metainfo,
            &delete,
            StateTimestamp::new(64),
            source.new_write_token(),
            &Interruptor::never(),
        )
        .await
        .unwrap();

    // Seed the sink with stale state the tombstone must overwrite.
    put(&sink, &metainfo, "banana", "stale", 16).await;

    let mut chunks = Vec::new();
    let sent = source
        .send_backfill(
            &RegionMap::single(Region::universe(), StateTimestamp::ZERO),
            |_| true,
            |chunk| chunks.push(chunk),
            source.new_read_token(),
            &Interruptor::never(),
        )
        .await
        .unwrap();
    assert!(sent);
    assert!(!chunks.is_empty());

    apply_chunks(&sink, &chunks).await;

    assert_eq!(
        get(&sink, &metainfo, "apple").await,
        Some(Bytes::from("red"))
    );
    assert_eq!(get(&sink, &metainfo, "banana").await, None);
    assert_eq!(
        get(&sink, &metainfo, "cherry").await,
        Some(Bytes::from("dark"))
    );
}

#[tokio::test]
async fn test_backfill_skips_changes_older_than_start_point() {
    let (source, _dir) = fresh_store();
    let metainfo = initial_metainfo();

    put(&source, &metainfo, "old", "v", 16).await;
    put(&source, &metainfo, "new", "v", 4096).await;

    let mut keys = Vec::new();
    source
        .send_backfill(
            &RegionMap::single(Region::universe(), StateTimestamp::new(1024)),
            |_| true,
            |chunk| {
                if let BackfillChunk::SetKey { atom } = chunk {
                    keys.push(atom.key);
                }
            },
            source.new_read_token(),
            &Interruptor::never(),
        )
        .await
        .unwrap();

    assert_eq!(keys, vec![k("new")]);
}
