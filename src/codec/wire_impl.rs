//! The framework's one concrete [`Encoder`]/[`Decoder`] implementation,
//! building and consuming [`Value`] trees directly.

use std::os::fd::OwnedFd;

use uuid::Uuid;

use super::{
    CodingContext, Decodable, Decoder, Encoder, FrameworkToken, KeyedDecoder, KeyedEncoder,
    SequenceDecoder, SequenceEncoder,
};
use crate::endpoint::EndpointHandle;
use crate::error::CodecError;
use crate::wire::{Dict, Value};

/// Encodes a user value into a standalone [`Value`] tree.
pub struct WireEncoder {
    output: Option<Value>,
}

impl WireEncoder {
    pub fn new() -> Self {
        Self { output: None }
    }

    pub fn into_value(self) -> Result<Value, CodecError> {
        self.output
            .ok_or_else(|| CodecError::Encoding("no value was written".to_owned()))
    }
}

impl Default for WireEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for WireEncoder {
    fn framework_token(&self) -> Option<FrameworkToken> {
        Some(FrameworkToken::new())
    }

    fn encode_null(&mut self) -> Result<(), CodecError> {
        self.output = Some(Value::Null);
        Ok(())
    }

    fn encode_bool(&mut self, value: bool) -> Result<(), CodecError> {
        self.output = Some(Value::Bool(value));
        Ok(())
    }

    fn encode_i64(&mut self, value: i64) -> Result<(), CodecError> {
        self.output = Some(Value::I64(value));
        Ok(())
    }

    fn encode_u64(&mut self, value: u64) -> Result<(), CodecError> {
        self.output = Some(Value::U64(value));
        Ok(())
    }

    fn encode_f64(&mut self, value: f64) -> Result<(), CodecError> {
        self.output = Some(Value::F64(value));
        Ok(())
    }

    fn encode_str(&mut self, value: &str) -> Result<(), CodecError> {
        self.output = Some(Value::Str(value.to_owned()));
        Ok(())
    }

    fn encode_uuid(&mut self, value: Uuid) -> Result<(), CodecError> {
        self.output = Some(Value::Uuid(value));
        Ok(())
    }

    fn encode_date_nanos(&mut self, value: i64) -> Result<(), CodecError> {
        self.output = Some(Value::Date(value));
        Ok(())
    }

    fn encode_blob(&mut self, value: &[u8]) -> Result<(), CodecError> {
        self.output = Some(Value::Blob(value.to_vec()));
        Ok(())
    }

    fn encode_fd(&mut self, value: OwnedFd) -> Result<(), CodecError> {
        self.output = Some(Value::Fd(value));
        Ok(())
    }

    fn encode_endpoint(&mut self, value: EndpointHandle) -> Result<(), CodecError> {
        self.output = Some(Value::Endpoint(value));
        Ok(())
    }

    fn begin_sequence(&mut self) -> Result<Box<dyn SequenceEncoder + '_>, CodecError> {
        Ok(Box::new(WireSequenceEncoder {
            output: &mut self.output,
            items: Vec::new(),
        }))
    }

    fn begin_keyed(&mut self) -> Result<Box<dyn KeyedEncoder + '_>, CodecError> {
        Ok(Box::new(WireKeyedEncoder {
            output: &mut self.output,
            dict: Dict::new(),
        }))
    }
}

struct WireSequenceEncoder<'a> {
    output: &'a mut Option<Value>,
    items: Vec<Value>,
}

impl SequenceEncoder for WireSequenceEncoder<'_> {
    fn encode_element(&mut self, value: &dyn super::Encodable) -> Result<(), CodecError> {
        let mut encoder = WireEncoder::new();
        value.encode(&mut encoder)?;
        self.items.push(encoder.into_value()?);
        Ok(())
    }
}

impl Drop for WireSequenceEncoder<'_> {
    fn drop(&mut self) {
        *self.output = Some(Value::Array(std::mem::take(&mut self.items)));
    }
}

struct WireKeyedEncoder<'a> {
    output: &'a mut Option<Value>,
    dict: Dict,
}

impl KeyedEncoder for WireKeyedEncoder<'_> {
    fn encode_field(&mut self, name: &str, value: &dyn super::Encodable) -> Result<(), CodecError> {
        let mut encoder = WireEncoder::new();
        value.encode(&mut encoder)?;
        let encoded = encoder.into_value()?;
        let key = std::ffi::CString::new(name)
            .map_err(|_| CodecError::Encoding(format!("field name {name:?} has an interior NUL")))?;
        self.dict.insert(key, encoded);
        Ok(())
    }
}

impl Drop for WireKeyedEncoder<'_> {
    fn drop(&mut self) {
        *self.output = Some(Value::Dict(std::mem::take(&mut self.dict)));
    }
}

/// Decodes a user value out of a standalone [`Value`] tree.
pub struct WireDecoder {
    value: Option<Value>,
    context: CodingContext,
}

impl WireDecoder {
    pub fn new(value: Value, context: CodingContext) -> Self {
        Self {
            value: Some(value),
            context,
        }
    }

    fn take(&mut self) -> Result<Value, CodecError> {
        self.value.take().ok_or(CodecError::ValueNotFound)
    }
}

impl Decoder for WireDecoder {
    fn framework_token(&self) -> Option<FrameworkToken> {
        Some(FrameworkToken::new())
    }

    fn context(&self) -> &CodingContext {
        &self.context
    }

    fn decode_bool(&mut self) -> Result<bool, CodecError> {
        match self.take()? {
            Value::Bool(b) => Ok(b),
            other => Err(CodecError::TypeMismatch {
                expected: "bool",
                found: other.kind_name(),
            }),
        }
    }

    fn decode_i64(&mut self) -> Result<i64, CodecError> {
        match self.take()? {
            Value::I64(v) => Ok(v),
            other => Err(CodecError::TypeMismatch {
                expected: "i64",
                found: other.kind_name(),
            }),
        }
    }

    fn decode_u64(&mut self) -> Result<u64, CodecError> {
        match self.take()? {
            Value::U64(v) => Ok(v),
            other => Err(CodecError::TypeMismatch {
                expected: "u64",
                found: other.kind_name(),
            }),
        }
    }

    fn decode_f64(&mut self) -> Result<f64, CodecError> {
        match self.take()? {
            Value::F64(v) => Ok(v),
            other => Err(CodecError::TypeMismatch {
                expected: "f64",
                found: other.kind_name(),
            }),
        }
    }

    fn decode_str(&mut self) -> Result<String, CodecError> {
        match self.take()? {
            Value::Str(s) => Ok(s),
            other => Err(CodecError::TypeMismatch {
                expected: "string",
                found: other.kind_name(),
            }),
        }
    }

    fn decode_uuid(&mut self) -> Result<Uuid, CodecError> {
        match self.take()? {
            Value::Uuid(u) => Ok(u),
            other => Err(CodecError::TypeMismatch {
                expected: "uuid",
                found: other.kind_name(),
            }),
        }
    }

    fn decode_date_nanos(&mut self) -> Result<i64, CodecError> {
        match self.take()? {
            Value::Date(n) => Ok(n),
            other => Err(CodecError::TypeMismatch {
                expected: "date",
                found: other.kind_name(),
            }),
        }
    }

    fn decode_blob(&mut self) -> Result<Vec<u8>, CodecError> {
        match self.take()? {
            Value::Blob(b) => Ok(b),
            other => Err(CodecError::TypeMismatch {
                expected: "blob",
                found: other.kind_name(),
            }),
        }
    }

    fn decode_fd(&mut self) -> Result<OwnedFd, CodecError> {
        match self.take()? {
            Value::Fd(fd) => Ok(fd),
            other => Err(CodecError::TypeMismatch {
                expected: "fd",
                found: other.kind_name(),
            }),
        }
    }

    fn decode_endpoint(&mut self) -> Result<EndpointHandle, CodecError> {
        match self.take()? {
            Value::Endpoint(e) => Ok(e),
            other => Err(CodecError::TypeMismatch {
                expected: "endpoint",
                found: other.kind_name(),
            }),
        }
    }

    fn is_null(&mut self) -> Result<bool, CodecError> {
        match self.value.as_ref() {
            Some(Value::Null) => Ok(true),
            Some(_) => Ok(false),
            None => Err(CodecError::ValueNotFound),
        }
    }

    fn begin_sequence(&mut self) -> Result<WireSequenceDecoder, CodecError> {
        match self.take()? {
            Value::Array(items) => Ok(WireSequenceDecoder {
                items: items.into_iter(),
                context: self.context.clone(),
            }),
            other => Err(CodecError::TypeMismatch {
                expected: "array",
                found: other.kind_name(),
            }),
        }
    }

    fn begin_keyed(&mut self) -> Result<WireKeyedDecoder, CodecError> {
        match self.take()? {
            Value::Dict(dict) => Ok(WireKeyedDecoder {
                dict,
                context: self.context.clone(),
            }),
            other => Err(CodecError::TypeMismatch {
                expected: "dict",
                found: other.kind_name(),
            }),
        }
    }

    fn decode_any(&mut self) -> Result<Value, CodecError> {
        self.take()
    }
}

pub struct WireSequenceDecoder {
    items: std::vec::IntoIter<Value>,
    context: CodingContext,
}

impl SequenceDecoder for WireSequenceDecoder {
    fn decode_element<T: Decodable>(&mut self) -> Result<T, CodecError> {
        let value = self.items.next().ok_or(CodecError::ValueNotFound)?;
        let mut decoder = WireDecoder::new(value, self.context.clone());
        T::decode(&mut decoder)
    }

    fn remaining(&self) -> usize {
        self.items.len()
    }
}

pub struct WireKeyedDecoder {
    dict: Dict,
    context: CodingContext,
}

impl WireKeyedDecoder {
    fn take_field(&mut self, name: &str) -> Option<Value> {
        self.dict.take(name)
    }
}

impl KeyedDecoder for WireKeyedDecoder {
    fn decode_field<T: Decodable>(&mut self, name: &str) -> Result<T, CodecError> {
        let value = self
            .take_field(name)
            .ok_or_else(|| CodecError::KeyNotFound(name.to_owned()))?;
        let mut decoder = WireDecoder::new(value, self.context.clone());
        T::decode(&mut decoder)
    }

    fn decode_field_opt<T: Decodable>(&mut self, name: &str) -> Result<Option<T>, CodecError> {
        match self.take_field(name) {
            Some(value) => {
                let mut decoder = WireDecoder::new(value, self.context.clone());
                Ok(Some(T::decode(&mut decoder)?))
            }
            None => Ok(None),
        }
    }
}
