//! Marten core: value model, binary codec, registry and buffer pool
//!
//! This crate holds everything the marten store needs that is independent
//! of LMDB:
//! - `Value`: the tagged sum of codec-representable types
//! - Codec: self-describing tagged binary encode/decode with metadata-only
//!   projection and a zero-copy binary probe
//! - `HandlerRegistry`: per-store extension table for user types
//! - `BufferPool`: reusable encode buffers with a bounded idle footprint
//! - `MartenError`: the workspace-wide error type
//!
//! Key properties:
//! - The tag table is the on-disk contract; decoders fail on reserved tags
//! - Decoding never mutates input and only copies blob payloads
//! - Registries are immutable after construction and shared by handle

pub mod buffer;
pub mod codec;
pub mod error;
pub mod registry;
pub mod value;

pub use buffer::BufferPool;
pub use codec::{decode, decode_meta, encode, tag, BinaryProbe, Decoder, Encoder};
pub use error::{MartenError, Result};
pub use registry::{HandlerContext, HandlerRegistry, TypeHandler, USER_TAG_MIN};
pub use value::{BigDec, BigInt, ExtValue, Keyword, Ratio, Symbol, Value};
