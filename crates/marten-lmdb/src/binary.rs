//! Binary input coercion for `bassoc`

use std::fs;
use std::io::Read;
use std::path::PathBuf;

use marten_core::error::{MartenError, Result};
use marten_core::value::Value;

/// The source shapes `bassoc` accepts. Everything coerces to a byte
/// vector before being stored under the `binary` type tag.
pub enum BinaryInput {
    Bytes(Vec<u8>),
    /// UTF-8 encoded on coercion.
    Text(String),
    /// Drained to the end on coercion.
    Reader(Box<dyn Read>),
    /// File contents read on coercion.
    Path(PathBuf),
}

impl BinaryInput {
    pub fn reader(r: impl Read + 'static) -> Self {
        BinaryInput::Reader(Box::new(r))
    }

    pub(crate) fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            BinaryInput::Bytes(b) => Ok(b),
            BinaryInput::Text(s) => Ok(s.into_bytes()),
            BinaryInput::Reader(mut r) => {
                let mut out = Vec::new();
                r.read_to_end(&mut out)?;
                Ok(out)
            }
            BinaryInput::Path(p) => Ok(fs::read(p)?),
        }
    }
}

impl std::fmt::Debug for BinaryInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryInput::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            BinaryInput::Text(s) => f.debug_tuple("Text").field(&s.len()).finish(),
            BinaryInput::Reader(_) => f.write_str("Reader(..)"),
            BinaryInput::Path(p) => f.debug_tuple("Path").field(p).finish(),
        }
    }
}

impl From<Vec<u8>> for BinaryInput {
    fn from(b: Vec<u8>) -> Self {
        BinaryInput::Bytes(b)
    }
}

impl From<&[u8]> for BinaryInput {
    fn from(b: &[u8]) -> Self {
        BinaryInput::Bytes(b.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for BinaryInput {
    fn from(b: &[u8; N]) -> Self {
        BinaryInput::Bytes(b.to_vec())
    }
}

impl From<String> for BinaryInput {
    fn from(s: String) -> Self {
        BinaryInput::Text(s)
    }
}

impl From<&str> for BinaryInput {
    fn from(s: &str) -> Self {
        BinaryInput::Text(s.to_string())
    }
}

impl From<PathBuf> for BinaryInput {
    fn from(p: PathBuf) -> Self {
        BinaryInput::Path(p)
    }
}

/// Funnel for dynamically typed callers: only byte and string values
/// coerce; anything else is an unsupported binary input.
impl TryFrom<Value> for BinaryInput {
    type Error = MartenError;

    fn try_from(v: Value) -> Result<Self> {
        match v {
            Value::Bytes(b) => Ok(BinaryInput::Bytes(b)),
            Value::Str(s) => Ok(BinaryInput::Text(s)),
            other => Err(MartenError::UnsupportedBinaryInput {
                type_name: other.type_name(),
            }),
        }
    }
}
