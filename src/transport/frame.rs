//! Wire-safe projection of [`Value`] used only for transport framing.
//!
//! [`Value`] itself is not `Serialize`/`Deserialize` — its `Fd` variant holds
//! a non-serializable `OwnedFd`, and `Endpoint` wraps a local handle rather
//! than bytes. [`WireFrame`] is the subset that can actually cross the wire
//! in this binding: it mirrors `Value` one-for-one except `Fd`. Transferring
//! a descriptor would require `SCM_RIGHTS` ancillary data riding alongside
//! the plain length-prefixed byte stream this binding reads and writes;
//! nothing in [`crate::transport::uds`] sends or receives ancillary data, so
//! any `Value::Fd` reaching this conversion is rejected rather than silently
//! dropped.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::wire::{Dict, Value};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("file descriptors cannot be transferred by this transport binding")]
    FdNotTransferable,
    #[error("dictionary key {0:?} is not valid for transmission")]
    InvalidKey(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireFrame {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Uuid(Uuid),
    Date(i64),
    Blob(Vec<u8>),
    Endpoint(String),
    Array(Vec<WireFrame>),
    Dict(Vec<(String, WireFrame)>),
}

impl TryFrom<&Value> for WireFrame {
    type Error = FrameError;

    fn try_from(value: &Value) -> Result<Self, FrameError> {
        Ok(match value {
            Value::Null => WireFrame::Null,
            Value::Bool(b) => WireFrame::Bool(*b),
            Value::I64(v) => WireFrame::I64(*v),
            Value::U64(v) => WireFrame::U64(*v),
            Value::F64(v) => WireFrame::F64(*v),
            Value::Str(s) => WireFrame::Str(s.clone()),
            Value::Uuid(u) => WireFrame::Uuid(*u),
            Value::Date(n) => WireFrame::Date(*n),
            Value::Blob(b) => WireFrame::Blob(b.clone()),
            Value::Fd(_) => return Err(FrameError::FdNotTransferable),
            Value::Endpoint(e) => WireFrame::Endpoint(e.socket_path().to_string_lossy().into_owned()),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(WireFrame::try_from(item)?);
                }
                WireFrame::Array(out)
            }
            Value::Dict(dict) => {
                let mut out = Vec::with_capacity(dict.len());
                for (key, value) in dict.iter() {
                    out.push((key.to_string_lossy().into_owned(), WireFrame::try_from(value)?));
                }
                WireFrame::Dict(out)
            }
        })
    }
}

impl TryFrom<WireFrame> for Value {
    type Error = FrameError;

    fn try_from(frame: WireFrame) -> Result<Self, FrameError> {
        Ok(match frame {
            WireFrame::Null => Value::Null,
            WireFrame::Bool(b) => Value::Bool(b),
            WireFrame::I64(v) => Value::I64(v),
            WireFrame::U64(v) => Value::U64(v),
            WireFrame::F64(v) => Value::F64(v),
            WireFrame::Str(s) => Value::Str(s),
            WireFrame::Uuid(u) => Value::Uuid(u),
            WireFrame::Date(n) => Value::Date(n),
            WireFrame::Blob(b) => Value::Blob(b),
            WireFrame::Endpoint(path) => {
                Value::Endpoint(crate::endpoint::EndpointHandle::new(path.into()))
            }
            WireFrame::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(Value::try_from(item)?);
                }
                Value::Array(out)
            }
            WireFrame::Dict(entries) => {
                let mut dict = Dict::new();
                for (key, value) in entries {
                    let key = std::ffi::CString::new(key.clone())
                        .map_err(|_| FrameError::InvalidKey(key))?;
                    dict.insert(key, Value::try_from(value)?);
                }
                Value::Dict(dict)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bincode() {
        let mut dict = Dict::new();
        dict.insert("name", Value::Str("héllo 🌀".to_string()));
        dict.insert("n", Value::I64(-7));
        let original = Value::Dict(dict);

        let frame = WireFrame::try_from(&original).unwrap();
        let bytes = bincode::serialize(&frame).unwrap();
        let decoded_frame: WireFrame = bincode::deserialize(&bytes).unwrap();
        let decoded = Value::try_from(decoded_frame).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn fd_values_refuse_to_frame() {
        let devnull = std::fs::File::open("/dev/null").unwrap();
        let owned: std::os::fd::OwnedFd = devnull.into();
        let value = Value::Fd(owned);
        assert!(matches!(WireFrame::try_from(&value), Err(FrameError::FdNotTransferable)));
    }
}
