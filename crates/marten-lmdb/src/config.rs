//! Store configuration

use std::sync::Arc;

use lmdb::EnvironmentFlags;
use marten_core::HandlerRegistry;
use serde::{Deserialize, Serialize};

/// Configuration for an LMDB-backed store environment.
///
/// The flag booleans map one-to-one onto LMDB environment flags; they are
/// all off by default, which gives a durable on-disk store in its own
/// directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum map size in bytes (the database cannot grow past this).
    /// Default: 1 GiB.
    #[serde(default = "default_map_size")]
    pub map_size: usize,

    /// Maximum number of concurrent reader slots.
    /// Default: 126 (LMDB's own default).
    #[serde(default = "default_max_readers")]
    pub max_readers: u32,

    /// Open the environment read-only (`MDB_RDONLY`).
    #[serde(default)]
    pub read_only: bool,

    /// The path names a data file rather than a directory (`MDB_NOSUBDIR`).
    #[serde(default)]
    pub no_subdir: bool,

    /// Skip fsync on commit (`MDB_NOSYNC`); pair with [`Store::sync`]
    /// for explicit durability points.
    ///
    /// [`Store::sync`]: crate::Store::sync
    #[serde(default)]
    pub no_sync: bool,

    /// Use a writable memory map (`MDB_WRITEMAP`).
    #[serde(default)]
    pub write_map: bool,

    /// Asynchronous map flushes (`MDB_MAPASYNC`); implies `write_map`.
    #[serde(default)]
    pub map_async: bool,

    /// Tie reader slots to transactions instead of threads (`MDB_NOTLS`).
    #[serde(default)]
    pub no_tls: bool,

    /// Disable OS readahead (`MDB_NORDAHEAD`); helps random-access
    /// workloads larger than RAM.
    #[serde(default)]
    pub no_readahead: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            map_size: default_map_size(),
            max_readers: default_max_readers(),
            read_only: false,
            no_subdir: false,
            no_sync: false,
            write_map: false,
            map_async: false,
            no_tls: false,
            no_readahead: false,
        }
    }
}

impl StoreConfig {
    pub fn with_map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub(crate) fn env_flags(&self) -> EnvironmentFlags {
        let mut flags = EnvironmentFlags::empty();
        if self.read_only {
            flags |= EnvironmentFlags::READ_ONLY;
        }
        if self.no_subdir {
            flags |= EnvironmentFlags::NO_SUB_DIR;
        }
        if self.no_sync {
            flags |= EnvironmentFlags::NO_SYNC;
        }
        if self.write_map || self.map_async {
            flags |= EnvironmentFlags::WRITE_MAP;
        }
        if self.map_async {
            flags |= EnvironmentFlags::MAP_ASYNC;
        }
        if self.no_tls {
            flags |= EnvironmentFlags::NO_TLS;
        }
        if self.no_readahead {
            flags |= EnvironmentFlags::NO_READAHEAD;
        }
        flags
    }
}

fn default_map_size() -> usize {
    1024 * 1024 * 1024
}

fn default_max_readers() -> u32 {
    126
}

/// Open-time options: the serializable config plus the (non-serializable)
/// handler registry captured by the store for its whole lifetime.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub config: StoreConfig,
    pub registry: Option<Arc<HandlerRegistry>>,
}

impl StoreOptions {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            registry: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }
}
