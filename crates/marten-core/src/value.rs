//! Value model for the marten codec
//!
//! This module defines:
//! - `Value`: the tagged sum of every codec-representable type
//! - `Keyword` / `Symbol`: optionally namespaced identifiers
//! - `BigInt` / `BigDec` / `Ratio`: arbitrary-precision numbers in their
//!   canonical byte forms
//! - `ExtValue`: the bridge trait for user types handled by a registry
//!
//! ## Equality
//!
//! `PartialEq` is structural. Different variants are never equal
//! (`I64(1) != F64(1.0)`), floats follow IEEE-754 (`NaN != NaN`,
//! `-0.0 == 0.0`), and maps and sets compare as unordered collections.
//! `Value` is deliberately not `Eq` because of the float variants.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// An optionally namespaced keyword, printed as `:name` or `:ns/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Keyword {
    ns: Option<String>,
    name: String,
}

/// An optionally namespaced symbol, printed as `name` or `ns/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    ns: Option<String>,
    name: String,
}

macro_rules! ident_impl {
    ($ty:ident) => {
        impl $ty {
            pub fn new(name: impl Into<String>) -> Self {
                Self {
                    ns: None,
                    name: name.into(),
                }
            }

            pub fn namespaced(ns: impl Into<String>, name: impl Into<String>) -> Self {
                Self {
                    ns: Some(ns.into()),
                    name: name.into(),
                }
            }

            /// Parse the qualified form `ns/name` (or a bare `name`).
            pub fn parse(qualified: &str) -> Self {
                match qualified.split_once('/') {
                    Some((ns, name)) if !ns.is_empty() => Self::namespaced(ns, name),
                    _ => Self::new(qualified),
                }
            }

            pub fn ns(&self) -> Option<&str> {
                self.ns.as_deref()
            }

            pub fn name(&self) -> &str {
                &self.name
            }

            /// The qualified form used by the codec: `ns/name` or `name`.
            pub fn qualified(&self) -> String {
                match &self.ns {
                    Some(ns) => format!("{}/{}", ns, self.name),
                    None => self.name.clone(),
                }
            }
        }
    };
}

ident_impl!(Keyword);
ident_impl!(Symbol);

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.qualified())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified())
    }
}

/// Arbitrary-precision integer held as its canonical two's-complement
/// big-endian byte form (minimal length, zero is a single `0x00`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BigInt {
    bytes: Vec<u8>,
}

impl BigInt {
    /// Canonicalize a two's-complement big-endian byte form by stripping
    /// redundant sign-extension bytes.
    pub fn from_signed_be_bytes(mut bytes: Vec<u8>) -> Self {
        while bytes.len() > 1 {
            let (sign, next) = (bytes[0], bytes[1]);
            if (sign == 0x00 && next < 0x80) || (sign == 0xFF && next >= 0x80) {
                bytes.remove(0);
            } else {
                break;
            }
        }
        if bytes.is_empty() {
            bytes.push(0);
        }
        BigInt { bytes }
    }

    pub fn from_i64(v: i64) -> Self {
        Self::from_signed_be_bytes(v.to_be_bytes().to_vec())
    }

    pub fn from_i128(v: i128) -> Self {
        Self::from_signed_be_bytes(v.to_be_bytes().to_vec())
    }

    pub fn to_be_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_negative(&self) -> bool {
        self.bytes[0] >= 0x80
    }

    /// Narrow back to `i128` when the magnitude allows it.
    pub fn to_i128(&self) -> Option<i128> {
        if self.bytes.len() > 16 {
            return None;
        }
        let fill = if self.is_negative() { 0xFF } else { 0x00 };
        let mut wide = [fill; 16];
        wide[16 - self.bytes.len()..].copy_from_slice(&self.bytes);
        Some(i128::from_be_bytes(wide))
    }
}

impl fmt::Display for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_i128() {
            Some(v) => write!(f, "{}N", v),
            None => {
                write!(f, "0x")?;
                for b in &self.bytes {
                    write!(f, "{:02X}", b)?;
                }
                write!(f, "N")
            }
        }
    }
}

/// Arbitrary-precision decimal: an unscaled integer and a base-10 scale,
/// denoting `unscaled * 10^-scale`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BigDec {
    pub scale: i32,
    pub unscaled: BigInt,
}

impl BigDec {
    pub fn new(unscaled: BigInt, scale: i32) -> Self {
        BigDec { scale, unscaled }
    }
}

impl fmt::Display for BigDec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}E-{}M", self.unscaled, self.scale)
    }
}

/// Exact rational number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ratio {
    pub numerator: BigInt,
    pub denominator: BigInt,
}

impl Ratio {
    pub fn new(numerator: BigInt, denominator: BigInt) -> Self {
        Ratio {
            numerator,
            denominator,
        }
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Bridge trait for user types carried through a handler registry.
///
/// Implementors convert to and from built-in values at the handler
/// boundary; the codec itself never inspects the concrete type.
pub trait ExtValue: fmt::Debug + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;

    fn type_name(&self) -> &'static str;

    /// Structural equality against another extension value. Implementors
    /// should downcast `other` and compare fields; a failed downcast is
    /// simply `false`.
    fn ext_eq(&self, other: &dyn ExtValue) -> bool;
}

/// The tagged sum of every codec-representable value.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    BigInt(BigInt),
    BigDec(BigDec),
    Ratio(Ratio),
    /// A single UTF-16 code unit; characters outside the basic
    /// multilingual plane are not representable.
    Char(char),
    Str(String),
    Keyword(Keyword),
    Symbol(Symbol),
    Uuid(Uuid),
    /// Millisecond-precision point in time.
    Instant(DateTime<Utc>),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Insertion-ordered association list. Order is preserved by the codec,
    /// which lets record layouts fix the position of well-known fields.
    Map(Vec<(Value, Value)>),
    /// Unique elements, insertion-ordered.
    Set(Vec<Value>),
    I16Array(Vec<i16>),
    I32Array(Vec<i32>),
    I64Array(Vec<i64>),
    F32Array(Vec<f32>),
    F64Array(Vec<f64>),
    BoolArray(Vec<bool>),
    CharArray(Vec<char>),
    /// A user type bridged through a handler registry.
    Ext(Arc<dyn ExtValue>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Bool(a), Bool(b)) => a == b,
            (I8(a), I8(b)) => a == b,
            (I16(a), I16(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            // IEEE-754: NaN != NaN, -0.0 == 0.0
            (F32(a), F32(b)) => a == b,
            (F64(a), F64(b)) => a == b,
            (BigInt(a), BigInt(b)) => a == b,
            (BigDec(a), BigDec(b)) => a == b,
            (Ratio(a), Ratio(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Keyword(a), Keyword(b)) => a == b,
            (Symbol(a), Symbol(b)) => a == b,
            (Uuid(a), Uuid(b)) => a == b,
            (Instant(a), Instant(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Map(a), Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.iter().any(|(bk, bv)| bk == k && bv == v))
            }
            (Set(a), Set(b)) => {
                a.len() == b.len() && a.iter().all(|v| b.contains(v))
            }
            (I16Array(a), I16Array(b)) => a == b,
            (I32Array(a), I32Array(b)) => a == b,
            (I64Array(a), I64Array(b)) => a == b,
            (F32Array(a), F32Array(b)) => a == b,
            (F64Array(a), F64Array(b)) => a == b,
            (BoolArray(a), BoolArray(b)) => a == b,
            (CharArray(a), CharArray(b)) => a == b,
            (Ext(a), Ext(b)) => a.ext_eq(b.as_ref()),
            // Different variants are never equal
            _ => false,
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::BigInt(_) => "bigint",
            Value::BigDec(_) => "bigdec",
            Value::Ratio(_) => "ratio",
            Value::Char(_) => "char",
            Value::Str(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::Symbol(_) => "symbol",
            Value::Uuid(_) => "uuid",
            Value::Instant(_) => "instant",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::I16Array(_) => "i16-array",
            Value::I32Array(_) => "i32-array",
            Value::I64Array(_) => "i64-array",
            Value::F32Array(_) => "f32-array",
            Value::F64Array(_) => "f64-array",
            Value::BoolArray(_) => "bool-array",
            Value::CharArray(_) => "char-array",
            Value::Ext(e) => e.type_name(),
        }
    }

    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// Keyword value from its qualified form (`"ns/name"` or `"name"`).
    pub fn keyword(qualified: &str) -> Value {
        Value::Keyword(Keyword::parse(qualified))
    }

    /// Symbol value from its qualified form.
    pub fn symbol(qualified: &str) -> Value {
        Value::Symbol(Symbol::parse(qualified))
    }

    /// Instant from epoch milliseconds.
    pub fn instant_millis(ms: i64) -> Value {
        Value::Instant(Utc.timestamp_millis_opt(ms).single().unwrap_or_default())
    }

    /// The current time, truncated to the codec's millisecond granularity.
    pub fn now() -> Value {
        Value::instant_millis(Utc::now().timestamp_millis())
    }

    /// Map from entries. Duplicate keys keep the first position and the
    /// last value.
    pub fn map(entries: Vec<(Value, Value)>) -> Value {
        let mut out: Vec<(Value, Value)> = Vec::with_capacity(entries.len());
        for (k, v) in entries {
            match out.iter_mut().find(|(ek, _)| *ek == k) {
                Some((_, ev)) => *ev = v,
                None => out.push((k, v)),
            }
        }
        Value::Map(out)
    }

    /// Set from elements, deduplicated preserving first occurrence.
    pub fn set(elems: Vec<Value>) -> Value {
        let mut out: Vec<Value> = Vec::with_capacity(elems.len());
        for e in elems {
            if !out.contains(&e) {
                out.push(e);
            }
        }
        Value::Set(out)
    }

    /// Wrap a user type for a registry-bound store.
    pub fn ext(v: impl ExtValue) -> Value {
        Value::Ext(Arc::new(v))
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Widening integer accessor over the fixed-width variants.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            Value::I32(v) => Some(*v as i64),
            Value::I16(v) => Some(*v as i64),
            Value::I8(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&Keyword> {
        match self {
            Value::Keyword(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Instant(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Downcast an `Ext` value to its concrete user type.
    pub fn as_ext<T: ExtValue>(&self) -> Option<&T> {
        match self {
            Value::Ext(e) => e.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Map navigation
    // ------------------------------------------------------------------

    /// Look up a key in a map value.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        match self {
            Value::Map(m) => m.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Follow a path of map keys. The empty path is the value itself.
    pub fn get_in(&self, path: &[Value]) -> Option<&Value> {
        let mut cur = self;
        for k in path {
            cur = cur.get(k)?;
        }
        Some(cur)
    }

    /// Replace the value at a nested path, creating intermediate maps for
    /// missing segments. A non-map intermediate is replaced by a fresh map.
    /// The empty path replaces the whole value.
    pub fn assoc_in(self, path: &[Value], v: Value) -> Value {
        match path.split_first() {
            None => v,
            Some((k, rest)) => {
                let mut entries = match self {
                    Value::Map(e) => e,
                    _ => Vec::new(),
                };
                match entries.iter_mut().find(|(ek, _)| ek == k) {
                    Some(entry) => {
                        let old = std::mem::replace(&mut entry.1, Value::Nil);
                        entry.1 = old.assoc_in(rest, v);
                    }
                    None => entries.push((k.clone(), Value::Nil.assoc_in(rest, v))),
                }
                Value::Map(entries)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn seq(f: &mut fmt::Formatter<'_>, items: &[Value], open: &str, close: &str) -> fmt::Result {
            write!(f, "{}", open)?;
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{}", v)?;
            }
            write!(f, "{}", close)
        }

        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::BigDec(v) => write!(f, "{}", v),
            Value::Ratio(v) => write!(f, "{}", v),
            Value::Char(c) => write!(f, "\\{}", c),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Keyword(k) => write!(f, "{}", k),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::Uuid(u) => write!(f, "#uuid \"{}\"", u),
            Value::Instant(t) => write!(f, "#inst \"{}\"", t.to_rfc3339()),
            Value::Bytes(b) => write!(f, "#bytes[{}]", b.len()),
            Value::List(l) => seq(f, l, "[", "]"),
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Set(s) => seq(f, s, "#{", "}"),
            Value::I16Array(a) => write!(f, "#i16[{}]", a.len()),
            Value::I32Array(a) => write!(f, "#i32[{}]", a.len()),
            Value::I64Array(a) => write!(f, "#i64[{}]", a.len()),
            Value::F32Array(a) => write!(f, "#f32[{}]", a.len()),
            Value::F64Array(a) => write!(f, "#f64[{}]", a.len()),
            Value::BoolArray(a) => write!(f, "#bool[{}]", a.len()),
            Value::CharArray(a) => write!(f, "#char[{}]", a.len()),
            Value::Ext(e) => write!(f, "#ext {:?}", e),
        }
    }
}

// ============================================================================
// From implementations for ergonomic API usage
// ============================================================================

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::I8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::I16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Char(c)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Keyword> for Value {
    fn from(k: Keyword) -> Self {
        Value::Keyword(k)
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Instant(t)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}
