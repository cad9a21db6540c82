//! Thin helpers over [ciborium] used by the wire structures in [crate::definitions].
//!
//! ISO/IEC 18013-5 structures are built and taken apart as [Value] trees so the exact
//! byte layout (map key order, embedded `#6.24` items) stays under our control.
use std::fmt::Write;
use std::io::Cursor;

use ciborium::Value;
use serde::{de, Serialize};
use thiserror::Error;

/// Tag number for an embedded CBOR data item (`#6.24(bstr .cbor T)`).
pub const TAG_ENCODED_CBOR: u64 = 24;
/// Tag number for an RFC 3339 date-time text string.
pub const TAG_TDATE: u64 = 0;
/// Tag number for an RFC 8943 full-date text string.
pub const TAG_FULL_DATE: u64 = 1004;

#[derive(Debug, Error)]
pub enum CborError {
    /// CBOR decoding failure.
    #[error("CBOR decoding failure: {0}")]
    DecodeFailed(String),
    /// CBOR encoding failure.
    #[error("CBOR encoding failure: {0}")]
    EncodeFailed(String),
    /// Unexpected CBOR item encountered (got, want).
    #[error("unexpected item: {0}, want {1}")]
    UnexpectedItem(&'static str, &'static str),
    /// A required map entry was absent.
    #[error("missing map entry: {0}")]
    MissingEntry(String),
}

pub fn to_vec<T>(value: &T) -> Result<Vec<u8>, CborError>
where
    T: Serialize,
{
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CborError::EncodeFailed(e.to_string()))?;
    Ok(buf)
}

pub fn from_slice<T>(slice: &[u8]) -> Result<T, CborError>
where
    T: de::DeserializeOwned,
{
    ciborium::from_reader(Cursor::new(slice)).map_err(|e| CborError::DecodeFailed(e.to_string()))
}

/// Wraps already encoded CBOR into a `#6.24` byte string item.
pub fn tag24(encoded: Vec<u8>) -> Value {
    Value::Tag(TAG_ENCODED_CBOR, Box::new(Value::Bytes(encoded)))
}

/// Returns the bytes embedded in a `#6.24` item.
pub fn untag24(value: &Value) -> Result<&[u8], CborError> {
    match value {
        Value::Tag(TAG_ENCODED_CBOR, inner) => match inner.as_ref() {
            Value::Bytes(bytes) => Ok(bytes),
            other => Err(CborError::UnexpectedItem(kind(other), "bstr")),
        },
        other => Err(CborError::UnexpectedItem(kind(other), "tag 24")),
    }
}

/// Encodes `value` and wraps the result in a `#6.24` item.
pub fn embed(value: &Value) -> Result<Value, CborError> {
    Ok(tag24(to_vec(value)?))
}

/// Looks up a map entry by key.
pub fn lookup<'a>(map: &'a [(Value, Value)], key: &Value) -> Option<&'a Value> {
    map.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

pub fn lookup_text<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::Text(t) if t == key))
        .map(|(_, v)| v)
}

pub fn lookup_int(map: &[(Value, Value)], key: i64) -> Option<&Value> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::Integer(i) if i128::from(*i) == i128::from(key)))
        .map(|(_, v)| v)
}

pub fn require_text<'a>(map: &'a [(Value, Value)], key: &str) -> Result<&'a Value, CborError> {
    lookup_text(map, key).ok_or_else(|| CborError::MissingEntry(key.to_string()))
}

pub fn as_map(value: &Value) -> Result<&[(Value, Value)], CborError> {
    match value {
        Value::Map(map) => Ok(map),
        other => Err(CborError::UnexpectedItem(kind(other), "map")),
    }
}

pub fn as_array(value: &Value) -> Result<&[Value], CborError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(CborError::UnexpectedItem(kind(other), "array")),
    }
}

pub fn as_text(value: &Value) -> Result<&str, CborError> {
    match value {
        Value::Text(text) => Ok(text),
        other => Err(CborError::UnexpectedItem(kind(other), "tstr")),
    }
}

pub fn as_bytes(value: &Value) -> Result<&[u8], CborError> {
    match value {
        Value::Bytes(bytes) => Ok(bytes),
        other => Err(CborError::UnexpectedItem(kind(other), "bstr")),
    }
}

pub fn as_u64(value: &Value) -> Result<u64, CborError> {
    match value {
        Value::Integer(i) => u64::try_from(*i).map_err(|_| CborError::UnexpectedItem("nint", "uint")),
        other => Err(CborError::UnexpectedItem(kind(other), "uint")),
    }
}

pub fn kind(value: &Value) -> &'static str {
    match value {
        Value::Integer(_) => "int",
        Value::Bytes(_) => "bstr",
        Value::Float(_) => "float",
        Value::Text(_) => "tstr",
        Value::Bool(_) => "bool",
        Value::Null => "null",
        Value::Tag(_, _) => "tag",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        _ => "unknown",
    }
}

/// Renders `value` in pretty-printed CBOR diagnostic notation.
///
/// Byte strings are summarised by length, and `#6.24` items are decoded and shown inline
/// as `<< ... >>` when they contain well formed CBOR.
pub fn diagnostic(value: &Value) -> String {
    let mut out = String::new();
    write_diagnostic(&mut out, value, 0);
    out
}

fn write_diagnostic(out: &mut String, value: &Value, indent: usize) {
    let pad = "  ".repeat(indent);
    let inner_pad = "  ".repeat(indent + 1);
    match value {
        Value::Integer(i) => {
            let _ = write!(out, "{}", i128::from(*i));
        }
        Value::Bytes(bytes) => {
            let _ = write!(out, "<{} bytes>", bytes.len());
        }
        Value::Float(f) => {
            let _ = write!(out, "{f}");
        }
        Value::Text(text) => {
            let _ = write!(out, "{text:?}");
        }
        Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Null => out.push_str("null"),
        Value::Tag(TAG_ENCODED_CBOR, inner) => match inner.as_ref() {
            Value::Bytes(bytes) => match from_slice::<Value>(bytes) {
                Ok(embedded) => {
                    out.push_str("24(<< ");
                    write_diagnostic(out, &embedded, indent);
                    out.push_str(" >>)");
                }
                Err(_) => {
                    let _ = write!(out, "24(<{} bytes>)", bytes.len());
                }
            },
            other => {
                out.push_str("24(");
                write_diagnostic(out, other, indent);
                out.push(')');
            }
        },
        Value::Tag(tag, inner) => {
            let _ = write!(out, "{tag}(");
            write_diagnostic(out, inner, indent);
            out.push(')');
        }
        Value::Array(items) if items.is_empty() => out.push_str("[]"),
        Value::Array(items) => {
            out.push_str("[\n");
            for (i, item) in items.iter().enumerate() {
                out.push_str(&inner_pad);
                write_diagnostic(out, item, indent + 1);
                if i + 1 < items.len() {
                    out.push(',');
                }
                out.push('\n');
            }
            out.push_str(&pad);
            out.push(']');
        }
        Value::Map(entries) if entries.is_empty() => out.push_str("{}"),
        Value::Map(entries) => {
            out.push_str("{\n");
            for (i, (k, v)) in entries.iter().enumerate() {
                out.push_str(&inner_pad);
                write_diagnostic(out, k, indent + 1);
                out.push_str(": ");
                write_diagnostic(out, v, indent + 1);
                if i + 1 < entries.len() {
                    out.push(',');
                }
                out.push('\n');
            }
            out.push_str(&pad);
            out.push('}');
        }
        _ => out.push_str("undefined"),
    }
}
