//! Marten: an embedded key-value store on LMDB
//!
//! Marten layers two interoperable-free API surfaces over one LMDB
//! environment:
//! - **Wrapped**: every record is a `{meta value}` pair carrying a logical
//!   type tag, a last-write timestamp and the user key. Supports
//!   nested-path reads and atomic read-modify-writes, multi-key batches,
//!   binary values and key enumeration with a cheap metadata-only
//!   projection.
//! - **Raw**: the naked codec value, for consumers that need no per-entry
//!   metadata.
//!
//! Keys and values are encoded with a self-describing tagged binary codec
//! that user types can extend through a per-store handler registry.
//!
//! # Quick start
//!
//! ```no_run
//! use marten_lmdb::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let store = Store::connect("./data")?;
//!
//! store.assoc(Value::keyword("config"), Value::map(vec![
//!     (Value::keyword("host"), "localhost".into()),
//!     (Value::keyword("port"), 5432i64.into()),
//! ]))?;
//!
//! let host = store.get_in(&[Value::keyword("config"), Value::keyword("host")])?;
//! assert_eq!(host, Some(Value::Str("localhost".into())));
//!
//! store.release();
//! # Ok(())
//! # }
//! ```

pub mod binary;
pub mod config;
pub mod hooks;
pub mod raw;
pub mod record;
pub mod store;

pub mod prelude;

// Re-export core types
pub use marten_core::{
    codec, BigDec, BigInt, BufferPool, ExtValue, HandlerContext, HandlerRegistry, Keyword,
    MartenError, Ratio, Result, Symbol, TypeHandler, Value, USER_TAG_MIN,
};

pub use binary::BinaryInput;
pub use config::{StoreConfig, StoreOptions};
pub use hooks::{HookTable, WriteHook};
pub use raw::RawStore;
pub use record::KeyEntry;
pub use store::{KeysOptions, Store};
