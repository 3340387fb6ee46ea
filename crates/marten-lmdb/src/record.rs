//! Wrapped record layout
//!
//! A wrapped record is a two-field mapping `{meta value}` with `meta`
//! first. The fixed field order is what makes metadata-only projection
//! cheap: the projection decodes the first key, matches `meta`, and never
//! reaches the value blob.
//!
//! Metadata fields used by the store itself are `:type` (keyword `edn` or
//! `binary`), `:last-write` (instant) and `:key` (the user key). Any other
//! fields a caller's meta updater adds are carried opaquely.

use chrono::{DateTime, Utc};
use marten_core::error::{MartenError, Result};
use marten_core::value::{Keyword, Value};

/// Logical type tag for codec-structured values.
pub fn type_edn() -> Keyword {
    Keyword::new("edn")
}

/// Logical type tag for raw binary values.
pub fn type_binary() -> Keyword {
    Keyword::new("binary")
}

/// Logical type tag reserved by external append-log subsystems; see
/// [`KeysOptions`](crate::store::KeysOptions).
pub fn type_append_log() -> Keyword {
    Keyword::new("append-log")
}

fn meta_sym() -> Value {
    Value::symbol("meta")
}

fn value_sym() -> Value {
    Value::symbol("value")
}

fn type_kw() -> Value {
    Value::keyword("type")
}

fn last_write_kw() -> Value {
    Value::keyword("last-write")
}

fn key_kw() -> Value {
    Value::keyword("key")
}

/// Build the on-disk record value: `{meta <meta> value <value>}` with the
/// field order fixed.
pub fn wrap(meta: Value, value: Value) -> Value {
    Value::Map(vec![(meta_sym(), meta), (value_sym(), value)])
}

/// Split a decoded record into its meta and value. A record without a
/// `meta` field was produced by the raw API; reading it through the
/// wrapped API is a cross-API misuse.
pub fn unwrap(record: Value, key: &Value) -> Result<(Value, Value)> {
    let entries = match record {
        Value::Map(entries) => entries,
        other => {
            return Err(MartenError::CrossApiMisuse {
                key: key.to_string(),
                fields: format!("<{}>", other.type_name()),
            })
        }
    };
    let mut meta = None;
    let mut value = None;
    let mut fields = Vec::with_capacity(entries.len());
    for (k, v) in entries {
        fields.push(k.to_string());
        if k == meta_sym() {
            meta = Some(v);
        } else if k == value_sym() {
            value = Some(v);
        }
    }
    match meta {
        Some(meta) => Ok((meta, value.unwrap_or(Value::Nil))),
        None => Err(MartenError::CrossApiMisuse {
            key: key.to_string(),
            fields: fields.join(", "),
        }),
    }
}

/// Default meta updater: carry the old metadata forward, stamp
/// `:last-write` with the current time, and fill `:type` and `:key` when
/// absent.
pub fn touch_meta(old: Option<Value>, key: &Value, type_tag: Keyword) -> Value {
    let base = match old {
        Some(Value::Map(entries)) => Value::Map(entries),
        _ => Value::map(vec![
            (type_kw(), Value::Keyword(type_tag.clone())),
            (key_kw(), key.clone()),
        ]),
    };
    let base = if base.get(&type_kw()).is_none() {
        base.assoc_in(&[type_kw()], Value::Keyword(type_tag))
    } else {
        base
    };
    let base = if base.get(&key_kw()).is_none() {
        base.assoc_in(&[key_kw()], key.clone())
    } else {
        base
    };
    base.assoc_in(&[last_write_kw()], Value::now())
}

/// `:type` field of a metadata mapping.
pub fn meta_type(meta: &Value) -> Option<&Keyword> {
    meta.get(&type_kw()).and_then(Value::as_keyword)
}

/// `:last-write` field of a metadata mapping.
pub fn meta_last_write(meta: &Value) -> Option<DateTime<Utc>> {
    meta.get(&last_write_kw()).and_then(Value::as_instant)
}

/// One entry of a key enumeration: the user key plus the cheap metadata
/// projection.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyEntry {
    pub key: Value,
    pub value_type: Option<Keyword>,
    pub last_write: Option<DateTime<Utc>>,
}
