//! Marten prelude
//!
//! Import this to get the commonly used types:
//!
//! ```
//! use marten_lmdb::prelude::*;
//! ```

pub use crate::{
    BinaryInput, KeyEntry, KeysOptions, MartenError, Result, Store, StoreConfig, StoreOptions,
};

pub use crate::{BigDec, BigInt, Keyword, Ratio, Symbol, Value};

pub use crate::{ExtValue, HandlerContext, HandlerRegistry, TypeHandler};
