use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MartenError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("LMDB {call} failed: {message} (code {code})")]
    Lmdb {
        call: &'static str,
        code: i32,
        message: String,
    },

    #[error("encoded value would exceed the 256 MiB limit ({attempted} bytes)")]
    EncodeOverflow { attempted: usize },

    #[error("no codec case or registered handler for type {type_name}")]
    UnsupportedType { type_name: &'static str },

    #[error("unknown codec tag 0x{tag:02X}")]
    UnknownTag { tag: u8 },

    #[error("record for key {key} has no meta field (written via the raw API?); top-level fields: [{fields}]")]
    CrossApiMisuse { key: String, fields: String },

    #[error("record for key {key} does not hold raw bytes (found {actual})")]
    NotBinary {
        key: String,
        actual: &'static str,
    },

    #[error("cannot coerce {type_name} to binary input")]
    UnsupportedBinaryInput { type_name: &'static str },

    #[error("store directory already exists: {path}")]
    StoreExists { path: String },

    #[error("store directory not found: {path}")]
    StoreMissing { path: String },

    #[error("corrupt record bytes: {detail}")]
    Corrupt { detail: String },

    #[error("value nesting exceeds the depth limit of {limit}")]
    DepthLimit { limit: usize },

    #[error("invalid handler registry: {reason}")]
    Registry { reason: String },

    #[error("key path must not be empty")]
    EmptyPath,
}

pub type Result<T> = std::result::Result<T, MartenError>;

impl MartenError {
    /// Shorthand used by decoders for truncated or malformed input.
    pub(crate) fn corrupt(detail: impl Into<String>) -> Self {
        MartenError::Corrupt {
            detail: detail.into(),
        }
    }
}
