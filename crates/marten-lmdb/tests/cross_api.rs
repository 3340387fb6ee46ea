//! Raw API behavior and wrapped/raw cross-API misuse

use marten_lmdb::prelude::*;
use tempfile::TempDir;

fn kw(name: &str) -> Value {
    Value::keyword(name)
}

fn create_test_store() -> (Store, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::connect(dir.path().join("db")).unwrap();
    (store, dir)
}

#[test]
fn test_raw_put_get_del() {
    let (store, _dir) = create_test_store();
    let raw = store.raw();

    raw.put(&kw("k"), &Value::Str("v".into())).unwrap();
    assert_eq!(raw.get(&kw("k")).unwrap(), Some(Value::Str("v".into())));

    assert!(raw.del(&kw("k")).unwrap());
    assert!(!raw.del(&kw("k")).unwrap());
    assert_eq!(raw.get(&kw("k")).unwrap(), None);
}

#[test]
fn test_raw_multi_put_and_multi_get() {
    let (store, _dir) = create_test_store();
    let raw = store.raw();

    raw.multi_put(vec![
        (kw("a"), Value::I64(1)),
        (kw("b"), Value::I64(2)),
    ])
    .unwrap();

    let got = raw.multi_get(&[kw("a"), kw("b"), kw("missing")]).unwrap();
    assert_eq!(got, vec![(kw("a"), Value::I64(1)), (kw("b"), Value::I64(2))]);
}

#[test]
fn test_wrapped_read_of_raw_record_fails() {
    let (store, _dir) = create_test_store();

    store.raw().put(&kw("k"), &Value::Str("v".into())).unwrap();

    match store.get(&kw("k")) {
        Err(MartenError::CrossApiMisuse { key, fields }) => {
            assert_eq!(key, ":k");
            assert!(fields.contains("string"), "fields were: {}", fields);
        }
        other => panic!("expected CrossApiMisuse, got {:?}", other),
    }

    // the composite read paths fail the same way
    assert!(matches!(
        store.multi_get(&[kw("k")]),
        Err(MartenError::CrossApiMisuse { .. })
    ));
    assert!(matches!(
        store.update_in(&[kw("k")], |v| v.unwrap_or(Value::Nil)),
        Err(MartenError::CrossApiMisuse { .. })
    ));
    assert!(matches!(
        store.bget(&kw("k"), |v| v.len()),
        Err(MartenError::CrossApiMisuse { .. })
    ));
}

#[test]
fn test_cross_api_error_names_observed_fields() {
    let (store, _dir) = create_test_store();

    // a raw map that superficially resembles a record but has no meta
    store
        .raw()
        .put(
            &kw("fake"),
            &Value::Map(vec![(Value::symbol("value"), Value::I64(1))]),
        )
        .unwrap();

    match store.get(&kw("fake")) {
        Err(MartenError::CrossApiMisuse { fields, .. }) => {
            assert!(fields.contains("value"), "fields were: {}", fields);
        }
        other => panic!("expected CrossApiMisuse, got {:?}", other),
    }
}

#[test]
fn test_raw_read_of_wrapped_record_sees_the_wrapper() {
    let (store, _dir) = create_test_store();

    store.assoc(kw("k"), Value::I64(1)).unwrap();

    // the raw reader has no cross-API detection: it simply decodes the
    // record mapping the wrapped writer produced
    let record = store.raw().get(&kw("k")).unwrap().unwrap();
    let entries = record.as_map().expect("wrapped record is a mapping");
    assert_eq!(entries[0].0, Value::symbol("meta"));
    assert_eq!(entries[1].0, Value::symbol("value"));
    assert_eq!(entries[1].1, Value::I64(1));
}

#[test]
fn test_exists_is_layout_agnostic() {
    let (store, _dir) = create_test_store();

    store.raw().put(&kw("r"), &Value::I64(1)).unwrap();
    store.assoc(kw("w"), Value::I64(2)).unwrap();

    assert!(store.exists(&kw("r")).unwrap());
    assert!(store.exists(&kw("w")).unwrap());
}
