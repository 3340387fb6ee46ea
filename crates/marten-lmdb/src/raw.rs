//! Raw API
//!
//! The raw surface writes the naked codec value, without the `{meta value}`
//! wrapper, for performance-critical consumers that carry no per-entry
//! metadata. It shares the environment, codec, registry and buffer pool
//! with the wrapped surface, but the two are not interoperable on the same
//! key: a wrapped read of a raw record fails with a cross-API error.

use lmdb::WriteFlags;
use marten_core::codec;
use marten_core::error::Result;
use marten_core::value::Value;

use crate::store::{lmdb_err, Store};

/// Byte-level view over a [`Store`], obtained via [`Store::raw`].
#[derive(Debug, Clone, Copy)]
pub struct RawStore<'a> {
    store: &'a Store,
}

impl<'a> RawStore<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Store the encoded value itself under `key`.
    pub fn put(&self, key: &Value, value: &Value) -> Result<()> {
        let s = self.store;
        let kb = s.encode_key(key)?;
        let vb = codec::encode(value, s.reg(), &s.pool)?;
        s.with_rw(|txn| {
            txn.put(s.db, &kb, &vb, WriteFlags::empty())
                .map_err(|e| lmdb_err("put", e))
        })
    }

    /// Decode the stored value for `key`.
    pub fn get(&self, key: &Value) -> Result<Option<Value>> {
        let s = self.store;
        let kb = s.encode_key(key)?;
        let txn = s.ro_txn()?;
        match s.get_raw(&txn, &kb)? {
            Some(bytes) => codec::decode(bytes, s.reg()).map(Some),
            None => Ok(None),
        }
    }

    /// Delete `key`; `true` when it existed.
    pub fn del(&self, key: &Value) -> Result<bool> {
        let s = self.store;
        let kb = s.encode_key(key)?;
        s.with_rw(|txn| match txn.del(s.db, &kb, None) {
            Ok(()) => Ok(true),
            Err(lmdb::Error::NotFound) => Ok(false),
            Err(e) => Err(lmdb_err("del", e)),
        })
    }

    /// Fetch many keys under one read transaction; missing keys are
    /// omitted.
    pub fn multi_get(&self, keys: &[Value]) -> Result<Vec<(Value, Value)>> {
        let s = self.store;
        let txn = s.ro_txn()?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let kb = s.encode_key(key)?;
            if let Some(bytes) = s.get_raw(&txn, &kb)? {
                out.push((key.clone(), codec::decode(bytes, s.reg())?));
            }
        }
        Ok(out)
    }

    /// Write many entries under one write transaction.
    pub fn multi_put(&self, entries: Vec<(Value, Value)>) -> Result<()> {
        let s = self.store;
        s.with_rw(|txn| {
            for (key, value) in &entries {
                let kb = s.encode_key(key)?;
                let vb = codec::encode(value, s.reg(), &s.pool)?;
                txn.put(s.db, &kb, &vb, WriteFlags::empty())
                    .map_err(|e| lmdb_err("put", e))?;
            }
            Ok(())
        })
    }
}
