//! Tests for region algebra and region maps.

use bytes::Bytes;
use gabbro_types::Key;

use crate::{BoundMode, Region, RegionMap};

fn k(s: &str) -> Key {
    Key::from(s)
}

#[test]
fn bound_modes_normalize_to_equal_regions() {
    // (open "a", ...) and (closed "a\0", ...) describe the same key set.
    let open = Region::new(BoundMode::Open, &k("a"), BoundMode::Open, &k("z"));
    let closed = Region::new(BoundMode::Closed, &k("a").successor(), BoundMode::Open, &k("z"));
    assert_eq!(open, closed);

    // A closed right bound is a successor-exclusive right bound.
    let a = Region::new(BoundMode::Closed, &k("a"), BoundMode::Closed, &k("m"));
    let b = Region::half_open(k("a"), k("m").successor());
    assert_eq!(a, b);
}

#[test]
fn universe_contains_everything() {
    let u = Region::universe();
    assert!(u.contains_key(&Key::min()));
    assert!(u.contains_key(&k("zzz")));
    assert!(!u.is_empty());
    assert!(u.is_unbounded_right());
}

#[test]
fn point_region_contains_exactly_one_key() {
    let r = Region::at_key(&k("apple"));
    assert!(r.contains_key(&k("apple")));
    assert!(!r.contains_key(&k("apple0")));
    assert!(!r.contains_key(&k("appl")));
    assert!(!r.contains_key(&k("apple").successor()));
}

#[test]
fn containment_and_superset() {
    let outer = Region::half_open(k("a"), k("z"));
    let inner = Region::half_open(k("c"), k("g"));
    assert!(outer.is_superset(&inner));
    assert!(!inner.is_superset(&outer));
    assert!(outer.is_superset(&outer));

    let unbounded = Region::from_key_onward(k("m"));
    assert!(Region::universe().is_superset(&unbounded));
    assert!(!unbounded.is_superset(&Region::universe()));
}

#[test]
fn intersection_clamps_to_empty() {
    let a = Region::half_open(k("a"), k("f"));
    let b = Region::half_open(k("m"), k("z"));
    assert!(a.intersection(&b).is_empty());
    assert!(!a.overlaps(&b));

    let c = Region::half_open(k("d"), k("p"));
    let cut = a.intersection(&c);
    assert_eq!(cut, Region::half_open(k("d"), k("f")));
}

#[test]
fn difference_splits_around_a_cut() {
    let whole = Region::half_open(k("a"), k("z"));
    let cut = Region::half_open(k("f"), k("m"));
    let pieces = whole.difference(&cut);
    assert_eq!(
        pieces,
        vec![
            Region::half_open(k("a"), k("f")),
            Region::half_open(k("m"), k("z")),
        ]
    );

    // No overlap: difference returns the whole region.
    let apart = Region::half_open(k("0"), k("9"));
    assert_eq!(whole.difference(&apart), vec![whole.clone()]);

    // Unbounded cut swallows the right side.
    let tail = Region::from_key_onward(k("m"));
    assert_eq!(
        whole.difference(&tail),
        vec![Region::half_open(k("a"), k("m"))]
    );
}

#[test]
fn codec_round_trips_and_is_stable() {
    let samples = [
        Region::universe(),
        Region::half_open(k("a"), k("m")),
        Region::from_key_onward(k("m")),
        Region::at_key(&k("apple")),
        Region::half_open(Key::min(), k("m")),
    ];
    for region in &samples {
        let bytes = region.encode();
        assert_eq!(&Region::decode(&bytes).unwrap(), region);
        // Deterministic: re-encoding yields identical bytes.
        assert_eq!(region.encode(), bytes);
    }

    // The universe's exact byte form is pinned: it is an on-disk key.
    assert_eq!(Region::universe().encode(), vec![0x00, 0x00, 0x00]);
}

#[test]
fn codec_rejects_malformed_input() {
    use crate::RegionCodecError;

    assert_eq!(Region::decode(&[]), Err(RegionCodecError::Truncated));
    assert_eq!(
        Region::decode(&[0x02, 0x00, b'a']),
        Err(RegionCodecError::Truncated)
    );
    assert_eq!(
        Region::decode(&[0x00, 0x00, 0x07]),
        Err(RegionCodecError::InvalidTag(0x07))
    );
    assert_eq!(
        Region::decode(&[0x00, 0x00, 0x00, 0xff]),
        Err(RegionCodecError::TrailingBytes)
    );
}

// ============================================================================
// RegionMap
// ============================================================================

fn blob(byte: u8) -> Bytes {
    Bytes::copy_from_slice(&[byte])
}

fn split_universe_at(key: &str) -> RegionMap<Bytes> {
    RegionMap::from_pairs(vec![
        (Region::half_open(Key::min(), k(key)), blob(0x01)),
        (Region::from_key_onward(k(key)), blob(0x02)),
    ])
}

#[test]
fn map_construction_sorts_and_computes_domain() {
    // Deliberately out of order.
    let map = RegionMap::from_pairs(vec![
        (Region::from_key_onward(k("m")), blob(0x02)),
        (Region::half_open(Key::min(), k("m")), blob(0x01)),
    ]);
    assert_eq!(map.len(), 2);
    assert_eq!(map.domain(), Region::universe());
    assert_eq!(map.get(&k("a")), Some(&blob(0x01)));
    assert_eq!(map.get(&k("m")), Some(&blob(0x02)));
}

#[test]
#[should_panic(expected = "tile")]
fn map_construction_panics_on_gap() {
    let _ = RegionMap::from_pairs(vec![
        (Region::half_open(Key::min(), k("f")), blob(0x01)),
        (Region::from_key_onward(k("m")), blob(0x02)),
    ]);
}

#[test]
#[should_panic(expected = "tile")]
fn map_construction_panics_on_overlap() {
    let _ = RegionMap::from_pairs(vec![
        (Region::half_open(Key::min(), k("m")), blob(0x01)),
        (Region::from_key_onward(k("f")), blob(0x02)),
    ]);
}

#[test]
fn mask_restricts_and_trims() {
    let map = split_universe_at("m");
    let masked = map.mask(&Region::half_open(k("f"), k("t")));

    assert_eq!(masked.len(), 2);
    assert_eq!(masked.domain(), Region::half_open(k("f"), k("t")));
    assert_eq!(masked.get(&k("g")), Some(&blob(0x01)));
    assert_eq!(masked.get(&k("s")), Some(&blob(0x02)));
    assert_eq!(masked.get(&k("z")), None);
}

#[test]
fn update_overwrites_only_the_incoming_domain() {
    let mut map = split_universe_at("m");
    map.update(&RegionMap::single(Region::from_key_onward(k("m")), blob(0x03)));

    assert_eq!(map.get(&k("a")), Some(&blob(0x01)));
    assert_eq!(map.get(&k("m")), Some(&blob(0x03)));
    assert_eq!(map.domain(), Region::universe());
}

#[test]
fn update_splits_straddled_pieces() {
    let mut map = RegionMap::single(Region::universe(), blob(0x01));
    map.update(&RegionMap::single(
        Region::half_open(k("f"), k("m")),
        blob(0x09),
    ));

    assert_eq!(map.len(), 3);
    assert_eq!(map.get(&k("a")), Some(&blob(0x01)));
    assert_eq!(map.get(&k("g")), Some(&blob(0x09)));
    assert_eq!(map.get(&k("z")), Some(&blob(0x01)));
}

#[test]
fn update_coalesces_equal_neighbors() {
    let mut map = split_universe_at("m");
    map.update(&RegionMap::single(Region::from_key_onward(k("m")), blob(0x01)));
    // Both halves now carry 0x01 and collapse into one piece.
    assert_eq!(map.len(), 1);
    assert_eq!(map.domain(), Region::universe());
}

#[test]
#[should_panic(expected = "outside the existing domain")]
fn update_outside_domain_panics() {
    let mut map = RegionMap::single(Region::half_open(k("a"), k("m")), blob(0x01));
    map.update(&RegionMap::single(Region::from_key_onward(k("t")), blob(0x02)));
}

#[test]
fn mask_then_compare_is_pointwise_round_trip() {
    // set_metainfo/get_metainfo round-trip at the algebra level:
    // masking the full map by an update's domain returns the update.
    let mut map = split_universe_at("m");
    let update = RegionMap::single(Region::from_key_onward(k("m")), blob(0x03));
    map.update(&update);
    assert_eq!(map.mask(&update.domain()), update);
}
