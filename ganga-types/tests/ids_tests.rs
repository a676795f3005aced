use ganga_types::{ObjectId, BUCKET_SIZE};
use proptest::prelude::*;
use std::collections::HashSet;
use std::str::FromStr;

// ── ObjectId ──────────────────────────────────────────────────────

#[test]
fn object_id_raw_roundtrip() {
    let id = ObjectId::new(42);
    assert_eq!(id.get(), 42);
    assert_eq!(u64::from(id), 42);
    assert_eq!(ObjectId::from(42u64), id);
}

#[test]
fn object_id_display_and_parse() {
    let id = ObjectId::new(1234);
    let s = id.to_string();
    assert_eq!(s, "1234");
    assert_eq!(ObjectId::parse(&s).unwrap(), id);
}

#[test]
fn object_id_from_str() {
    let parsed = ObjectId::from_str("7").unwrap();
    assert_eq!(parsed, ObjectId::new(7));
}

#[test]
fn object_id_rejects_non_digits() {
    assert!(ObjectId::parse("").is_err());
    assert!(ObjectId::parse("12.index").is_err());
    assert!(ObjectId::parse("+3").is_err());
    assert!(ObjectId::parse("-1").is_err());
    assert!(ObjectId::parse("0xxx").is_err());
}

#[test]
fn object_id_rejects_overflow() {
    assert!(ObjectId::parse("99999999999999999999999").is_err());
}

#[test]
fn object_id_ordering() {
    assert!(ObjectId::new(1) < ObjectId::new(2));
    assert_eq!(ObjectId::new(9).next(), ObjectId::new(10));
}

#[test]
fn object_id_hash_and_eq() {
    let id = ObjectId::new(3);
    let mut set = HashSet::new();
    set.insert(id);
    set.insert(id); // duplicate
    assert_eq!(set.len(), 1);
}

#[test]
fn object_id_serialization_is_plain_number() {
    let id = ObjectId::new(17);
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "17");
    let parsed: ObjectId = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, id);
}

// ── Buckets ───────────────────────────────────────────────────────

#[test]
fn bucket_boundaries() {
    assert_eq!(ObjectId::new(0).bucket(), 0);
    assert_eq!(ObjectId::new(BUCKET_SIZE - 1).bucket(), 0);
    assert_eq!(ObjectId::new(BUCKET_SIZE).bucket(), 1);
    assert_eq!(ObjectId::new(12_345).bucket(), 12);
}

proptest! {
    #[test]
    fn parse_display_roundtrip(raw in any::<u64>()) {
        let id = ObjectId::new(raw);
        prop_assert_eq!(ObjectId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn bucket_contains_id(raw in 0u64..10_000_000) {
        let id = ObjectId::new(raw);
        let lo = id.bucket() * BUCKET_SIZE;
        prop_assert!(lo <= raw && raw < lo + BUCKET_SIZE);
    }
}
