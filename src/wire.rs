//! # Wire Value Model
//!
//! This module defines the tagged tree of primitive values that every message
//! exchanged by the framework is ultimately reduced to before it crosses the
//! Unix-domain-socket transport. It is deliberately the lowest layer in the
//! crate: the [`codec`](crate::codec) module builds typed encoding/decoding on
//! top of it, but `Value` itself knows nothing about user types.
//!
//! ## Design Considerations
//!
//! - **Self-describing**: every leaf carries its own tag, so a `Value` tree
//!   can be inspected without a schema.
//! - **Structural equality**: two trees are equal iff their shapes and leaf
//!   values match, independent of dictionary insertion order.
//! - **Single-owner file descriptors**: [`Value::Fd`] wraps an [`OwnedFd`], so
//!   the "duplicated on materialization, closed by the caller" contract from
//!   the data model is enforced by the type system rather than a comment.

use std::ffi::CString;
use std::fmt;
use std::os::fd::OwnedFd;

use uuid::Uuid;

use crate::codec::{KeyedEncoder as _, SequenceEncoder as _};

/// Errors produced when a typed accessor disagrees with the observed tag.
///
/// This is the wire-level half of the codec's `type-mismatch` /
/// `key-not-found` / `value-not-found` taxonomy (see
/// [`crate::error::CodecError`]); it exists as its own small type so the
/// wire-value model has no dependency on the rest of the crate's error stack.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("expected a {expected} value, found a {found} value")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("dictionary has no key {0:?}")]
    KeyNotFound(CString),
}

/// A tagged, self-describing primitive value.
///
/// Mirrors the transport's native message representation: booleans,
/// signed/unsigned 64-bit integers, doubles, UTF-8 strings, UUIDs,
/// nanosecond-precision dates, opaque byte blobs, file descriptors, endpoint
/// handles, ordered arrays, and C-string-keyed dictionaries.
#[derive(Debug)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Uuid(Uuid),
    /// Nanoseconds since the Unix epoch.
    Date(i64),
    Blob(Vec<u8>),
    /// Non-copyable; duplicated on materialization by [`Value::into_fd`].
    Fd(OwnedFd),
    /// Opaque, hashable by the transport. See [`crate::endpoint`].
    Endpoint(crate::endpoint::EndpointHandle),
    Array(Vec<Value>),
    Dict(Dict),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I64(_) => "i64",
            Value::U64(_) => "u64",
            Value::F64(_) => "f64",
            Value::Str(_) => "string",
            Value::Uuid(_) => "uuid",
            Value::Date(_) => "date",
            Value::Blob(_) => "blob",
            Value::Fd(_) => "fd",
            Value::Endpoint(_) => "endpoint",
            Value::Array(_) => "array",
            Value::Dict(_) => "dict",
        }
    }

    pub fn as_bool(&self) -> Result<bool, WireError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(WireError::TypeMismatch {
                expected: "bool",
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_i64(&self) -> Result<i64, WireError> {
        match self {
            Value::I64(v) => Ok(*v),
            other => Err(WireError::TypeMismatch {
                expected: "i64",
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_u64(&self) -> Result<u64, WireError> {
        match self {
            Value::U64(v) => Ok(*v),
            other => Err(WireError::TypeMismatch {
                expected: "u64",
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_f64(&self) -> Result<f64, WireError> {
        match self {
            Value::F64(v) => Ok(*v),
            other => Err(WireError::TypeMismatch {
                expected: "f64",
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_str(&self) -> Result<&str, WireError> {
        match self {
            Value::Str(s) => Ok(s.as_str()),
            other => Err(WireError::TypeMismatch {
                expected: "string",
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_uuid(&self) -> Result<Uuid, WireError> {
        match self {
            Value::Uuid(u) => Ok(*u),
            other => Err(WireError::TypeMismatch {
                expected: "uuid",
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_date_nanos(&self) -> Result<i64, WireError> {
        match self {
            Value::Date(n) => Ok(*n),
            other => Err(WireError::TypeMismatch {
                expected: "date",
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_blob(&self) -> Result<&[u8], WireError> {
        match self {
            Value::Blob(b) => Ok(b.as_slice()),
            other => Err(WireError::TypeMismatch {
                expected: "blob",
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_array(&self) -> Result<&[Value], WireError> {
        match self {
            Value::Array(a) => Ok(a.as_slice()),
            other => Err(WireError::TypeMismatch {
                expected: "array",
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_dict(&self) -> Result<&Dict, WireError> {
        match self {
            Value::Dict(d) => Ok(d),
            other => Err(WireError::TypeMismatch {
                expected: "dict",
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_endpoint(&self) -> Result<&crate::endpoint::EndpointHandle, WireError> {
        match self {
            Value::Endpoint(e) => Ok(e),
            other => Err(WireError::TypeMismatch {
                expected: "endpoint",
                found: other.kind_name(),
            }),
        }
    }

    /// Consumes the value, yielding the owned file descriptor.
    ///
    /// The returned [`OwnedFd`] is an independent duplicate produced during
    /// decode; the caller owns it and is responsible for closing it (which
    /// happens automatically on drop).
    pub fn into_fd(self) -> Result<OwnedFd, WireError> {
        match self {
            Value::Fd(fd) => Ok(fd),
            other => Err(WireError::TypeMismatch {
                expected: "fd",
                found: other.kind_name(),
            }),
        }
    }
}

impl Clone for Value {
    fn clone(&self) -> Self {
        match self {
            Value::Null => Value::Null,
            Value::Bool(b) => Value::Bool(*b),
            Value::I64(v) => Value::I64(*v),
            Value::U64(v) => Value::U64(*v),
            Value::F64(v) => Value::F64(*v),
            Value::Str(s) => Value::Str(s.clone()),
            Value::Uuid(u) => Value::Uuid(*u),
            Value::Date(n) => Value::Date(*n),
            Value::Blob(b) => Value::Blob(b.clone()),
            Value::Fd(fd) => {
                // Duplicating is the only sound way to "clone" an owned handle.
                let dup = nix_dup(fd).expect("failed to duplicate file descriptor");
                Value::Fd(dup)
            }
            Value::Endpoint(e) => Value::Endpoint(e.clone()),
            Value::Array(a) => Value::Array(a.clone()),
            Value::Dict(d) => Value::Dict(d.clone()),
        }
    }
}

/// Duplicates a raw file descriptor via `dup(2)`.
fn nix_dup(fd: &OwnedFd) -> std::io::Result<OwnedFd> {
    use std::os::fd::{AsRawFd, FromRawFd};
    // SAFETY: `dup` returns a new, independently-owned descriptor referring to
    // the same open file description; `from_raw_fd` takes ownership of it.
    let raw = unsafe { libc::dup(fd.as_raw_fd()) };
    if raw < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            // File descriptors have no meaningful value identity; two `Fd`
            // leaves are structurally equal iff both are present.
            (Value::Fd(_), Value::Fd(_)) => true,
            (Value::Endpoint(a), Value::Endpoint(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    /// A bounded-size, redacted preview suitable for logging.
    ///
    /// Blob and file-descriptor payloads are never printed in full; only
    /// their length/presence is shown.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_preview(self, f, 0)
    }
}

const PREVIEW_MAX_DEPTH: usize = 4;
const PREVIEW_MAX_STRING: usize = 64;

fn fmt_preview(value: &Value, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    if depth >= PREVIEW_MAX_DEPTH {
        return write!(f, "…");
    }
    match value {
        Value::Null => write!(f, "null"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::I64(v) => write!(f, "{v}"),
        Value::U64(v) => write!(f, "{v}"),
        Value::F64(v) => write!(f, "{v}"),
        Value::Str(s) if s.len() <= PREVIEW_MAX_STRING => write!(f, "{s:?}"),
        Value::Str(s) => write!(f, "{:?}…", &s[..PREVIEW_MAX_STRING]),
        Value::Uuid(u) => write!(f, "{u}"),
        Value::Date(n) => write!(f, "date({n}ns)"),
        Value::Blob(b) => write!(f, "blob({} bytes)", b.len()),
        Value::Fd(_) => write!(f, "fd(<redacted>)"),
        Value::Endpoint(_) => write!(f, "endpoint(<opaque>)"),
        Value::Array(items) => {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                fmt_preview(item, f, depth + 1)?;
            }
            write!(f, "]")
        }
        Value::Dict(dict) => {
            write!(f, "{{")?;
            for (i, (key, val)) in dict.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:?}: ", key.to_string_lossy())?;
                fmt_preview(val, f, depth + 1)?;
            }
            write!(f, "}}")
        }
    }
}

/// A dictionary keyed by NUL-terminated ASCII strings.
///
/// Insertion order is preserved for deterministic debug output but plays no
/// role in equality. Duplicate keys are rejected by [`Dict::insert`].
#[derive(Debug, Default, Clone)]
pub struct Dict {
    entries: Vec<(CString, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Inserts a key/value pair.
    ///
    /// # Panics
    ///
    /// Panics if `key` is already present — the data model states duplicate
    /// keys are not allowed, and allowing a silent overwrite would hide a
    /// caller bug rather than surface it.
    pub fn insert(&mut self, key: impl Into<CString>, value: Value) {
        let key = key.into();
        assert!(
            self.get(&key).is_none(),
            "duplicate dictionary key {key:?}"
        );
        self.entries.push((key, value));
    }

    /// Returns the value for `key`, or `None` if absent.
    ///
    /// This distinguishes "no value" from "value present but wrong type" —
    /// callers use [`Value`]'s typed accessors on the returned reference to
    /// detect the latter.
    pub fn get(&self, key: &CString) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&Value> {
        let key = CString::new(key).expect("dictionary keys must not contain interior NULs");
        self.get(&key)
    }

    /// Removes and returns the value for `key`, or `None` if absent.
    ///
    /// Used by the keyed decoder, which consumes each field at most once.
    pub fn take(&mut self, key: &str) -> Option<Value> {
        let key = CString::new(key).expect("dictionary keys must not contain interior NULs");
        let index = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CString, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        self.entries
            .iter()
            .all(|(k, v)| other.get(k).is_some_and(|ov| ov == v))
    }
}

impl FromIterator<(CString, Value)> for Dict {
    fn from_iter<I: IntoIterator<Item = (CString, Value)>>(iter: I) -> Self {
        let mut dict = Dict::new();
        for (k, v) in iter {
            dict.insert(k, v);
        }
        dict
    }
}

/// Passes an already-built `Value` tree through the codec unchanged.
///
/// Used for payload fields (e.g. an envelope's `__payload`) whose shape is
/// determined by the route rather than by `Value` itself. File descriptors
/// are duplicated on encode, matching [`Value`]'s own [`Clone`] semantics.
impl crate::codec::Encodable for Value {
    fn encode(&self, encoder: &mut dyn crate::codec::Encoder) -> Result<(), crate::error::CodecError> {
        match self {
            Value::Null => encoder.encode_null(),
            Value::Bool(b) => encoder.encode_bool(*b),
            Value::I64(v) => encoder.encode_i64(*v),
            Value::U64(v) => encoder.encode_u64(*v),
            Value::F64(v) => encoder.encode_f64(*v),
            Value::Str(s) => encoder.encode_str(s),
            Value::Uuid(u) => encoder.encode_uuid(*u),
            Value::Date(n) => encoder.encode_date_nanos(*n),
            Value::Blob(b) => encoder.encode_blob(b),
            Value::Fd(fd) => {
                let dup = nix_dup(fd).map_err(|e| crate::error::CodecError::Encoding(e.to_string()))?;
                encoder.encode_fd(dup)
            }
            Value::Endpoint(e) => encoder.encode_endpoint(e.clone()),
            Value::Array(items) => {
                let mut seq = encoder.begin_sequence()?;
                for item in items {
                    seq.encode_element(item)?;
                }
                Ok(())
            }
            Value::Dict(dict) => {
                let mut keyed = encoder.begin_keyed()?;
                for (key, value) in dict.iter() {
                    keyed.encode_field(&key.to_string_lossy(), value)?;
                }
                Ok(())
            }
        }
    }
}

impl crate::codec::Decodable for Value {
    fn decode(decoder: &mut dyn crate::codec::Decoder) -> Result<Self, crate::error::CodecError> {
        decoder.decode_any()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_equality_ignores_dict_order() {
        let mut a = Dict::new();
        a.insert("x", Value::I64(1));
        a.insert("y", Value::I64(2));

        let mut b = Dict::new();
        b.insert("y", Value::I64(2));
        b.insert("x", Value::I64(1));

        assert_eq!(Value::Dict(a), Value::Dict(b));
    }

    #[test]
    fn typed_accessor_mismatch_is_classified() {
        let v = Value::I64(1);
        let err = v.as_str().unwrap_err();
        assert!(matches!(
            err,
            WireError::TypeMismatch {
                expected: "string",
                found: "i64"
            }
        ));
    }

    #[test]
    #[should_panic(expected = "duplicate dictionary key")]
    fn duplicate_keys_panic() {
        let mut d = Dict::new();
        d.insert("x", Value::Null);
        d.insert("x", Value::Null);
    }

    #[test]
    fn get_distinguishes_absent_from_wrong_type() {
        let mut d = Dict::new();
        d.insert("x", Value::Bool(true));
        assert!(d.get_str("missing").is_none());
        assert!(d.get_str("x").unwrap().as_i64().is_err());
    }

    #[test]
    fn value_passes_through_the_codec_unchanged() {
        let mut dict = Dict::new();
        dict.insert("name", Value::Str("héllo 🌀".to_string()));
        dict.insert("counts", Value::Array(vec![Value::I64(1), Value::I64(-2)]));
        let original = Value::Dict(dict);

        let encoded = crate::codec::encode_to_value(&original).unwrap();
        let decoded: Value =
            crate::codec::decode_from_value(encoded, crate::codec::CodingContext::new()).unwrap();
        assert_eq!(original, decoded);
    }
}
