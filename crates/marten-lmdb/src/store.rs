//! LMDB-backed store
//!
//! A [`Store`] owns one LMDB environment with a single unnamed database,
//! a per-store buffer pool, the handler registry captured at open time,
//! and the write-hooks table. All operations are safe to call from
//! multiple threads: reads run under concurrent MVCC read transactions
//! and LMDB serializes writers internally, so no user-space locks are
//! taken around any LMDB call.
//!
//! Transaction discipline:
//! - read transactions are aborted (dropped) at scope exit; zero-copy
//!   views never escape the scope because decoded borrows are tied to the
//!   transaction's lifetime
//! - write transactions commit on the success path and abort on every
//!   error path via the transaction's destructor
//! - composite read-modify-write operations (`assoc_in`, `update_in`,
//!   `bassoc`, `multi_assoc`) do their read and their put inside a single
//!   write transaction, so no interleaving writer can change the observed
//!   old value

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lmdb::{
    Cursor, Database, DatabaseFlags, Environment, RoTransaction, RwTransaction, Transaction,
    WriteFlags,
};
use marten_core::codec::{self, BinaryProbe};
use marten_core::error::{MartenError, Result};
use marten_core::value::{Keyword, Value};
use marten_core::{BufferPool, HandlerRegistry};

use crate::binary::BinaryInput;
use crate::config::StoreOptions;
use crate::hooks::HookTable;
use crate::raw::RawStore;
use crate::record::{self, KeyEntry};

/// Translate an LMDB return into the workspace error, tagging the
/// originating call. `MDB_NOTFOUND` is never passed through here; call
/// sites convert it to a miss first.
pub(crate) fn lmdb_err(call: &'static str, e: lmdb::Error) -> MartenError {
    MartenError::Lmdb {
        call,
        code: e.to_err_code(),
        message: e.to_string(),
    }
}

/// Options for key enumeration.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeysOptions {
    /// Skip UUID-keyed records whose metadata type is `append-log`.
    /// Those records belong to external append-log subsystems layered on
    /// top of the store; plain enumeration includes them.
    pub skip_append_log: bool,
}

/// An embedded key-value store over one LMDB environment.
pub struct Store {
    pub(crate) env: Arc<Environment>,
    pub(crate) db: Database,
    pub(crate) pool: BufferPool,
    pub(crate) registry: Option<Arc<HandlerRegistry>>,
    hooks: HookTable,
    path: PathBuf,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("registry", &self.registry)
            .finish()
    }
}

// ----------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------

impl Store {
    /// Open the store at `path`, creating the directory if it is absent.
    pub fn connect<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::connect_opts(path, StoreOptions::default())
    }

    /// [`connect`](Self::connect) with explicit options.
    pub fn connect_opts<P: AsRef<Path>>(path: P, opts: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        Self::ensure_dir(path, &opts)?;
        Self::open_env(path, opts)
    }

    /// Open an existing store, failing with [`MartenError::StoreMissing`]
    /// when nothing is on disk at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_opts(path, StoreOptions::default())
    }

    /// [`open`](Self::open) with explicit options.
    pub fn open_opts<P: AsRef<Path>>(path: P, opts: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MartenError::StoreMissing {
                path: path.display().to_string(),
            });
        }
        Self::open_env(path, opts)
    }

    /// Create a fresh store, failing with [`MartenError::StoreExists`]
    /// when the directory is already present.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_opts(path, StoreOptions::default())
    }

    /// [`create`](Self::create) with explicit options.
    pub fn create_opts<P: AsRef<Path>>(path: P, opts: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(MartenError::StoreExists {
                path: path.display().to_string(),
            });
        }
        Self::ensure_dir(path, &opts)?;
        Self::open_env(path, opts)
    }

    fn ensure_dir(path: &Path, opts: &StoreOptions) -> Result<()> {
        if opts.config.no_subdir {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        } else {
            fs::create_dir_all(path)?;
        }
        Ok(())
    }

    fn open_env(path: &Path, opts: StoreOptions) -> Result<Self> {
        let StoreOptions { config, registry } = opts;

        let mut builder = Environment::new();
        builder.set_max_dbs(1);
        builder.set_map_size(config.map_size);
        builder.set_max_readers(config.max_readers);
        builder.set_flags(config.env_flags());

        let env = builder.open(path).map_err(|e| lmdb_err("env_open", e))?;

        // A writable environment requests MDB_CREATE for the default
        // database; a read-only one can only open it.
        let db = if config.read_only {
            env.open_db(None)
        } else {
            env.create_db(None, DatabaseFlags::empty())
        }
        .map_err(|e| lmdb_err("dbi_open", e))?;

        tracing::info!(path = %path.display(), map_size = config.map_size, "opened store");

        Ok(Self {
            env: Arc::new(env),
            db,
            pool: BufferPool::new(),
            registry,
            hooks: HookTable::new(),
            path: path.to_path_buf(),
        })
    }

    /// Close the store, releasing the LMDB environment. Consuming `self`
    /// makes use-after-close unrepresentable.
    pub fn release(self) {
        tracing::info!(path = %self.path.display(), "releasing store");
        drop(self);
    }

    /// Remove a released store's directory and all its contents.
    pub fn delete<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MartenError::StoreMissing {
                path: path.display().to_string(),
            });
        }
        fs::remove_dir_all(path)?;
        tracing::info!(path = %path.display(), "deleted store");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn registry(&self) -> Option<&Arc<HandlerRegistry>> {
        self.registry.as_ref()
    }

    /// The write-hooks table. The core store only carries it; invoking
    /// hooks is the business of outer layers.
    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    /// The raw API over the same environment. Raw and wrapped records are
    /// not interoperable on the same key.
    pub fn raw(&self) -> RawStore<'_> {
        RawStore::new(self)
    }

    /// Flush buffered writes to disk (`mdb_env_sync`); `force` flushes
    /// even when the environment was opened with `no_sync` or `map_async`.
    pub fn sync(&self, force: bool) -> Result<()> {
        self.env.sync(force).map_err(|e| lmdb_err("env_sync", e))
    }

    /// Number of entries in the database.
    pub fn entry_count(&self) -> Result<usize> {
        self.env
            .stat()
            .map(|s| s.entries())
            .map_err(|e| lmdb_err("env_stat", e))
    }
}

// ----------------------------------------------------------------------
// Transaction plumbing
// ----------------------------------------------------------------------

impl Store {
    pub(crate) fn reg(&self) -> Option<&HandlerRegistry> {
        self.registry.as_deref()
    }

    pub(crate) fn encode_key(&self, key: &Value) -> Result<Vec<u8>> {
        codec::encode(key, self.reg(), &self.pool)
    }

    pub(crate) fn ro_txn(&self) -> Result<RoTransaction<'_>> {
        self.env
            .begin_ro_txn()
            .map_err(|e| lmdb_err("txn_begin", e))
    }

    /// Run `f` inside a write transaction, committing on success. On any
    /// error the transaction's destructor aborts it, so resources are
    /// released on every path.
    pub(crate) fn with_rw<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut RwTransaction<'_>) -> Result<T>,
    {
        let mut txn = self
            .env
            .begin_rw_txn()
            .map_err(|e| lmdb_err("txn_begin", e))?;
        let out = f(&mut txn)?;
        txn.commit().map_err(|e| lmdb_err("txn_commit", e))?;
        Ok(out)
    }

    /// `get` with `MDB_NOTFOUND` folded into a miss. The returned view
    /// borrows the LMDB page and is only valid while `txn` lives.
    pub(crate) fn get_raw<'t, T: Transaction>(
        &self,
        txn: &'t T,
        key: &[u8],
    ) -> Result<Option<&'t [u8]>> {
        match txn.get(self.db, &key) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(lmdb_err("get", e)),
        }
    }

    /// Shared read-modify-write core of the wrapped write operations.
    ///
    /// Reads the old record (absent is fine), applies `meta_fn` to the old
    /// metadata and `xform` to the old sub-value at the path tail, writes
    /// the new wrapped record, and returns the old and new sub-values.
    fn rmw<M, X>(&self, path: &[Value], meta_fn: M, xform: X) -> Result<(Option<Value>, Value)>
    where
        M: FnOnce(Option<Value>) -> Value,
        X: FnOnce(Option<Value>) -> Value,
    {
        if path.is_empty() {
            return Err(MartenError::EmptyPath);
        }
        let key = &path[0];
        let tail = &path[1..];
        let kb = self.encode_key(key)?;

        self.with_rw(|txn| {
            let old_record = match self.get_raw(&*txn, &kb)? {
                Some(bytes) => Some(codec::decode(bytes, self.reg())?),
                None => None,
            };
            let (old_meta, old_value) = match old_record {
                Some(r) => {
                    let (m, v) = record::unwrap(r, key)?;
                    (Some(m), Some(v))
                }
                None => (None, None),
            };

            let old_sub = old_value
                .as_ref()
                .and_then(|v| v.get_in(tail))
                .cloned();
            let new_sub = xform(old_sub.clone());
            let new_value = if tail.is_empty() {
                new_sub.clone()
            } else {
                old_value
                    .unwrap_or(Value::Nil)
                    .assoc_in(tail, new_sub.clone())
            };

            let meta = meta_fn(old_meta);
            let bytes = codec::encode(&record::wrap(meta, new_value), self.reg(), &self.pool)?;
            txn.put(self.db, &kb, &bytes, WriteFlags::empty())
                .map_err(|e| lmdb_err("put", e))?;

            Ok((old_sub, new_sub))
        })
    }
}

// ----------------------------------------------------------------------
// Wrapped operations
// ----------------------------------------------------------------------

impl Store {
    /// Whether `key` is present.
    pub fn exists(&self, key: &Value) -> Result<bool> {
        let kb = self.encode_key(key)?;
        let txn = self.ro_txn()?;
        Ok(self.get_raw(&txn, &kb)?.is_some())
    }

    /// The stored value for `key`.
    pub fn get(&self, key: &Value) -> Result<Option<Value>> {
        self.get_in(std::slice::from_ref(key))
    }

    /// Nested lookup: the first path segment is the store key, the rest
    /// descends into the decoded value. Missing records decode to `None`;
    /// records written by the raw API fail with a cross-API error.
    pub fn get_in(&self, path: &[Value]) -> Result<Option<Value>> {
        if path.is_empty() {
            return Err(MartenError::EmptyPath);
        }
        let kb = self.encode_key(&path[0])?;
        let txn = self.ro_txn()?;
        let bytes = match self.get_raw(&txn, &kb)? {
            Some(b) => b,
            None => return Ok(None),
        };
        let recd = codec::decode(bytes, self.reg())?;
        let (_meta, value) = record::unwrap(recd, &path[0])?;
        Ok(value.get_in(&path[1..]).cloned())
    }

    /// Metadata-only projection for `key`; never decodes the value.
    /// Absent metadata is `None`, a valid if unusual state.
    pub fn get_meta(&self, key: &Value) -> Result<Option<Value>> {
        let kb = self.encode_key(key)?;
        let txn = self.ro_txn()?;
        match self.get_raw(&txn, &kb)? {
            Some(bytes) => codec::decode_meta(bytes, self.reg()),
            None => Ok(None),
        }
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn assoc(&self, key: Value, value: Value) -> Result<(Option<Value>, Value)> {
        self.assoc_in(std::slice::from_ref(&key), value)
    }

    /// Atomically replace the value at a nested path. With a single-element
    /// path the new value replaces the entire stored value; deeper paths
    /// update inside the decoded value, creating intermediate maps.
    /// Returns the old and new sub-values at the path.
    pub fn assoc_in(&self, path: &[Value], value: Value) -> Result<(Option<Value>, Value)> {
        self.assoc_in_with(
            path,
            |old| record::touch_meta(old, &path[0], record::type_edn()),
            value,
        )
    }

    /// [`assoc_in`](Self::assoc_in) with a caller-supplied meta updater,
    /// applied to the old metadata (or `None` for a fresh record).
    pub fn assoc_in_with<M>(
        &self,
        path: &[Value],
        meta_fn: M,
        value: Value,
    ) -> Result<(Option<Value>, Value)>
    where
        M: FnOnce(Option<Value>) -> Value,
    {
        self.rmw(path, meta_fn, |_| value)
    }

    /// Transform the stored value for `key` with `f`.
    pub fn update<X>(&self, key: Value, f: X) -> Result<(Option<Value>, Value)>
    where
        X: FnOnce(Option<Value>) -> Value,
    {
        self.update_in(std::slice::from_ref(&key), f)
    }

    /// Atomic read-modify-write at a nested path: the new sub-value is
    /// `f(current)` with `None` for an absent one. No interleaving write
    /// can run between the read and the put.
    pub fn update_in<X>(&self, path: &[Value], f: X) -> Result<(Option<Value>, Value)>
    where
        X: FnOnce(Option<Value>) -> Value,
    {
        self.update_in_with(
            path,
            |old| record::touch_meta(old, &path[0], record::type_edn()),
            f,
        )
    }

    /// [`update_in`](Self::update_in) with a caller-supplied meta updater.
    pub fn update_in_with<M, X>(
        &self,
        path: &[Value],
        meta_fn: M,
        f: X,
    ) -> Result<(Option<Value>, Value)>
    where
        M: FnOnce(Option<Value>) -> Value,
        X: FnOnce(Option<Value>) -> Value,
    {
        self.rmw(path, meta_fn, f)
    }

    /// Delete `key`; `true` when it existed.
    pub fn dissoc(&self, key: &Value) -> Result<bool> {
        let kb = self.encode_key(key)?;
        self.with_rw(|txn| match txn.del(self.db, &kb, None) {
            Ok(()) => Ok(true),
            Err(lmdb::Error::NotFound) => Ok(false),
            Err(e) => Err(lmdb_err("del", e)),
        })
    }

    /// Fetch many keys under one read transaction (a single consistent
    /// snapshot); missing keys are omitted. Returns the value component
    /// of each present record.
    pub fn multi_get(&self, keys: &[Value]) -> Result<Vec<(Value, Value)>> {
        let txn = self.ro_txn()?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let kb = self.encode_key(key)?;
            if let Some(bytes) = self.get_raw(&txn, &kb)? {
                let recd = codec::decode(bytes, self.reg())?;
                let (_meta, value) = record::unwrap(recd, key)?;
                out.push((key.clone(), value));
            }
        }
        Ok(out)
    }

    /// Write many entries under one write transaction; readers observe
    /// either none or all of them. Each key maps to `true` in the result.
    pub fn multi_assoc(&self, entries: Vec<(Value, Value)>) -> Result<Vec<(Value, bool)>> {
        self.multi_assoc_with(entries, |key, type_tag, old| {
            record::touch_meta(old, key, type_tag.clone())
        })
    }

    /// [`multi_assoc`](Self::multi_assoc) with a caller-supplied meta
    /// updater. Unlike the single-entry updaters, the batch updater
    /// receives `(key, type_tag, old_meta)` so it can differentiate
    /// entries within the batch.
    pub fn multi_assoc_with<M>(
        &self,
        entries: Vec<(Value, Value)>,
        mut meta_fn: M,
    ) -> Result<Vec<(Value, bool)>>
    where
        M: FnMut(&Value, &Keyword, Option<Value>) -> Value,
    {
        self.with_rw(|txn| {
            let mut out = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                let kb = self.encode_key(&key)?;
                let old_meta = match self.get_raw(&*txn, &kb)? {
                    Some(bytes) => codec::decode_meta(bytes, self.reg())?,
                    None => None,
                };
                let type_tag = match value {
                    Value::Bytes(_) => record::type_binary(),
                    _ => record::type_edn(),
                };
                let meta = meta_fn(&key, &type_tag, old_meta);
                let bytes =
                    codec::encode(&record::wrap(meta, value), self.reg(), &self.pool)?;
                txn.put(self.db, &kb, &bytes, WriteFlags::empty())
                    .map_err(|e| lmdb_err("put", e))?;
                out.push((key, true));
            }
            Ok(out)
        })
    }

    /// Delete many keys under one write transaction; each key maps to
    /// whether it existed.
    pub fn multi_dissoc(&self, keys: &[Value]) -> Result<Vec<(Value, bool)>> {
        self.with_rw(|txn| {
            let mut out = Vec::with_capacity(keys.len());
            for key in keys {
                let kb = self.encode_key(key)?;
                let existed = match txn.del(self.db, &kb, None) {
                    Ok(()) => true,
                    Err(lmdb::Error::NotFound) => false,
                    Err(e) => return Err(lmdb_err("del", e)),
                };
                out.push((key.clone(), existed));
            }
            Ok(out)
        })
    }

    /// Enumerate all keys with their metadata projection.
    pub fn keys(&self) -> Result<Vec<KeyEntry>> {
        self.keys_with(KeysOptions::default())
    }

    /// [`keys`](Self::keys) with options. The walk runs a cursor over the
    /// whole database and a metadata-only decode per record; entries whose
    /// key or metadata fail to decode are skipped with a warning rather
    /// than failing the enumeration.
    pub fn keys_with(&self, opts: KeysOptions) -> Result<Vec<KeyEntry>> {
        let txn = self.ro_txn()?;
        let mut out = Vec::new();
        let mut cursor = txn
            .open_ro_cursor(self.db)
            .map_err(|e| lmdb_err("cursor_open", e))?;
        for (kb, vb) in cursor.iter() {
            let key = match codec::decode(kb, self.reg()) {
                Ok(k) => k,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping entry with undecodable key");
                    continue;
                }
            };
            let meta = match codec::decode_meta(vb, self.reg()) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping entry with undecodable metadata");
                    continue;
                }
            };
            let value_type = meta.as_ref().and_then(record::meta_type).cloned();
            let last_write = meta.as_ref().and_then(record::meta_last_write);
            if opts.skip_append_log
                && matches!(key, Value::Uuid(_))
                && value_type.as_ref() == Some(&record::type_append_log())
            {
                continue;
            }
            out.push(KeyEntry {
                key,
                value_type,
                last_write,
            });
        }
        Ok(out)
    }

    /// Read a binary record, handing the sink a view of the stored bytes.
    /// The view borrows the LMDB page directly (no copy) and is only valid
    /// for the duration of the callback. `None` when the key is absent.
    pub fn bget<R>(&self, key: &Value, sink: impl FnOnce(&[u8]) -> R) -> Result<Option<R>> {
        let kb = self.encode_key(key)?;
        let txn = self.ro_txn()?;
        let bytes = match self.get_raw(&txn, &kb)? {
            Some(b) => b,
            None => return Ok(None),
        };
        match codec::binary_value(bytes, self.reg())? {
            BinaryProbe::Bytes(view) => Ok(Some(sink(view))),
            BinaryProbe::WrongType(actual) => Err(MartenError::NotBinary {
                key: key.to_string(),
                actual,
            }),
            BinaryProbe::Unwrapped => Err(MartenError::CrossApiMisuse {
                key: key.to_string(),
                fields: codec::top_level_fields(bytes, self.reg())?.join(", "),
            }),
        }
    }

    /// Coerce `input` to bytes and store it under `key` with the `binary`
    /// type tag, atomically. Returns the old stored value and the new one.
    pub fn bassoc(
        &self,
        key: &Value,
        input: impl Into<BinaryInput>,
    ) -> Result<(Option<Value>, Value)> {
        self.bassoc_with(
            key,
            |old| record::touch_meta(old, key, record::type_binary()),
            input,
        )
    }

    /// [`bassoc`](Self::bassoc) with a caller-supplied meta updater.
    pub fn bassoc_with<M>(
        &self,
        key: &Value,
        meta_fn: M,
        input: impl Into<BinaryInput>,
    ) -> Result<(Option<Value>, Value)>
    where
        M: FnOnce(Option<Value>) -> Value,
    {
        let bytes = input.into().into_bytes()?;
        self.rmw(std::slice::from_ref(key), meta_fn, move |_| {
            Value::Bytes(bytes)
        })
    }
}
