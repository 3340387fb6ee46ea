//! Key enumeration and the opt-in append-log filter

use marten_lmdb::prelude::*;
use tempfile::TempDir;
use uuid::Uuid;

fn kw(name: &str) -> Value {
    Value::keyword(name)
}

fn create_test_store() -> (Store, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::connect(dir.path().join("db")).unwrap();
    (store, dir)
}

#[test]
fn test_empty_store_enumerates_nothing() {
    let (store, _dir) = create_test_store();
    assert!(store.keys().unwrap().is_empty());
}

#[test]
fn test_keys_carry_metadata_projection() {
    let (store, _dir) = create_test_store();

    store.assoc(kw("a"), Value::I64(1)).unwrap();
    store.bassoc(&kw("b"), &[1u8, 2u8][..]).unwrap();

    let mut entries = store.keys().unwrap();
    entries.sort_by_key(|e| e.key.to_string());

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].key, kw("a"));
    assert_eq!(entries[0].value_type, Some(Keyword::new("edn")));
    assert!(entries[0].last_write.is_some());
    assert_eq!(entries[1].key, kw("b"));
    assert_eq!(entries[1].value_type, Some(Keyword::new("binary")));
}

#[test]
fn test_raw_records_enumerate_with_empty_meta() {
    let (store, _dir) = create_test_store();

    store.raw().put(&kw("naked"), &Value::I64(1)).unwrap();
    let entries = store.keys().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].value_type, None);
    assert_eq!(entries[0].last_write, None);
}

fn write_append_log_record(store: &Store, key: &Value) {
    store
        .assoc_in_with(
            std::slice::from_ref(key),
            |_| Value::map(vec![(kw("type"), kw("append-log"))]),
            Value::I64(0),
        )
        .unwrap();
}

#[test]
fn test_append_log_filter_is_opt_in() {
    let (store, _dir) = create_test_store();

    let log_key = Value::Uuid(Uuid::new_v4());
    write_append_log_record(&store, &log_key);
    store.assoc(kw("plain"), Value::I64(1)).unwrap();

    // default enumeration includes everything
    assert_eq!(store.keys().unwrap().len(), 2);

    // the filter drops only UUID-keyed append-log records
    let filtered = store
        .keys_with(KeysOptions {
            skip_append_log: true,
        })
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].key, kw("plain"));
}

#[test]
fn test_append_log_filter_needs_both_conditions() {
    let (store, _dir) = create_test_store();

    // append-log type under a non-UUID key: kept
    write_append_log_record(&store, &kw("named-log"));
    // UUID key with a plain type: kept
    store
        .assoc(Value::Uuid(Uuid::new_v4()), Value::I64(1))
        .unwrap();

    let filtered = store
        .keys_with(KeysOptions {
            skip_append_log: true,
        })
        .unwrap();
    assert_eq!(filtered.len(), 2);
}
