//! Binary value operations: `bassoc` coercions and zero-copy `bget`

use std::fs;

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
fn test_bassoc_then_bget() {
    let (store, _dir) = create_test_store();

    store.bassoc(&kw("blob"), &[1u8, 2, 3, 4][..]).unwrap();

    let got = store
        .bget(&kw("blob"), |view| (view.len(), view.to_vec()))
        .unwrap()
        .unwrap();
    assert_eq!(got, (4, vec![1, 2, 3, 4]));
}

#[test]
fn test_bget_missing_key_is_none() {
    let (store, _dir) = create_test_store();
    assert_eq!(store.bget(&kw("nope"), |v| v.len()).unwrap(), None);
}

#[test]
fn test_bassoc_text_is_utf8() {
    let (store, _dir) = create_test_store();

    store.bassoc(&kw("text"), "héllo").unwrap();
    let bytes = store
        .bget(&kw("text"), |view| view.to_vec())
        .unwrap()
        .unwrap();
    assert_eq!(bytes, "héllo".as_bytes());
}

#[test]
fn test_bassoc_from_reader_and_path() {
    let (store, dir) = create_test_store();

    store
        .bassoc(&kw("streamed"), BinaryInput::reader(&b"from reader"[..]))
        .unwrap();
    assert_eq!(
        store
            .bget(&kw("streamed"), |v| v.to_vec())
            .unwrap()
            .unwrap(),
        b"from reader"
    );

    let file = dir.path().join("payload.bin");
    fs::write(&file, [9u8, 8, 7]).unwrap();
    store.bassoc(&kw("from-file"), file).unwrap();
    assert_eq!(
        store
            .bget(&kw("from-file"), |v| v.to_vec())
            .unwrap()
            .unwrap(),
        vec![9, 8, 7]
    );
}

#[test]
fn test_bassoc_sets_binary_type_tag() {
    let (store, _dir) = create_test_store();

    store.bassoc(&kw("blob"), vec![0u8; 16]).unwrap();
    let meta = store.get_meta(&kw("blob")).unwrap().unwrap();
    assert_eq!(meta.get(&kw("type")), Some(&kw("binary")));
}

#[test]
fn test_bassoc_returns_old_value() {
    let (store, _dir) = create_test_store();

    store.assoc(kw("k"), Value::I64(1)).unwrap();
    let (old, new) = store.bassoc(&kw("k"), vec![5u8]).unwrap();
    assert_eq!(old, Some(Value::I64(1)));
    assert_eq!(new, Value::Bytes(vec![5]));
}

#[test]
fn test_bget_on_structured_record_is_not_binary() {
    let (store, _dir) = create_test_store();

    store.assoc(kw("doc"), Value::I64(1)).unwrap();
    match store.bget(&kw("doc"), |v| v.len()) {
        Err(MartenError::NotBinary { key, actual }) => {
            assert_eq!(key, ":doc");
            assert_eq!(actual, "i64");
        }
        other => panic!("expected NotBinary, got {:?}", other),
    }
}

#[test]
fn test_unsupported_binary_input_from_value() {
    let err = BinaryInput::try_from(Value::List(vec![]));
    match err {
        Err(MartenError::UnsupportedBinaryInput { type_name }) => {
            assert_eq!(type_name, "list")
        }
        other => panic!("expected UnsupportedBinaryInput, got {:?}", other),
    }

    // bytes and strings funnel through
    let (store, _dir) = create_test_store();
    let input = BinaryInput::try_from(Value::Bytes(vec![1, 2])).unwrap();
    store.bassoc(&kw("ok"), input).unwrap();
}

#[test]
fn test_binary_value_also_reads_as_plain_get() {
    let (store, _dir) = create_test_store();

    store.bassoc(&kw("blob"), vec![1u8, 2]).unwrap();
    assert_eq!(
        store.get(&kw("blob")).unwrap(),
        Some(Value::Bytes(vec![1, 2]))
    );
}
