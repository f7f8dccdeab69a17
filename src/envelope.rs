//! # Request/Response Envelope
//!
//! The dictionary schema every message is packaged into before crossing the
//! transport: `{__route, __request_id, __payload?, __client_bookmark}` for
//! requests, `{__request_id, __payload | __error | neither}` for responses.

use uuid::Uuid;

use crate::codec::{Decodable, Decoder, Encodable, Encoder, KeyedDecoder as _, KeyedEncoder as _};
use crate::error::{CodecError, HandlerError};
use crate::route::TransmittedRoute;
use crate::wire::Value;

/// A request as packaged for transmission.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub route: TransmittedRoute,
    pub request_id: Uuid,
    /// Present iff the route has a message.
    pub payload: Option<Value>,
    /// Opaque host bookmark of the client's own bundle, consulted only
    /// during peer-trust evaluation via the sandbox-expansion hook.
    pub client_bookmark: Vec<u8>,
}

impl Encodable for RequestEnvelope {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        let mut keyed = encoder.begin_keyed()?;
        keyed.encode_field("__route", &self.route)?;
        keyed.encode_field("__request_id", &self.request_id)?;
        if let Some(payload) = &self.payload {
            keyed.encode_field("__payload", payload)?;
        }
        keyed.encode_field("__client_bookmark", &self.client_bookmark)?;
        Ok(())
    }
}

impl Decodable for RequestEnvelope {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
        let mut keyed = decoder.begin_keyed()?;
        Ok(Self {
            route: keyed.decode_field("__route")?,
            request_id: keyed.decode_field("__request_id")?,
            payload: keyed.decode_field_opt("__payload")?,
            client_bookmark: keyed.decode_field("__client_bookmark")?,
        })
    }
}

/// What a response envelope carries: exactly one of a payload or an error,
/// or neither (the streaming "finished" sentinel).
#[derive(Debug, Clone)]
pub enum ResponseOutcome {
    Payload(Value),
    Error(ErrorPayload),
    Finished,
}

#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub request_id: Uuid,
    pub outcome: ResponseOutcome,
}

impl ResponseEnvelope {
    pub fn payload(request_id: Uuid, value: Value) -> Self {
        Self {
            request_id,
            outcome: ResponseOutcome::Payload(value),
        }
    }

    pub fn error(request_id: Uuid, error: ErrorPayload) -> Self {
        Self {
            request_id,
            outcome: ResponseOutcome::Error(error),
        }
    }

    pub fn finished(request_id: Uuid) -> Self {
        Self {
            request_id,
            outcome: ResponseOutcome::Finished,
        }
    }
}

impl Encodable for ResponseEnvelope {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        let mut keyed = encoder.begin_keyed()?;
        keyed.encode_field("__request_id", &self.request_id)?;
        match &self.outcome {
            ResponseOutcome::Payload(value) => keyed.encode_field("__payload", value)?,
            ResponseOutcome::Error(error) => keyed.encode_field("__error", error)?,
            ResponseOutcome::Finished => {}
        }
        Ok(())
    }
}

impl Decodable for ResponseEnvelope {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
        let mut keyed = decoder.begin_keyed()?;
        let request_id = keyed.decode_field("__request_id")?;
        let payload: Option<Value> = keyed.decode_field_opt("__payload")?;
        let error: Option<ErrorPayload> = keyed.decode_field_opt("__error")?;
        let outcome = match (payload, error) {
            (Some(value), None) => ResponseOutcome::Payload(value),
            (None, Some(error)) => ResponseOutcome::Error(error),
            (None, None) => ResponseOutcome::Finished,
            (Some(_), Some(_)) => {
                return Err(CodecError::DataCorrupted(
                    "response envelope carries both __payload and __error".to_string(),
                ))
            }
        };
        Ok(Self { request_id, outcome })
    }
}

/// The wire form of a handler-thrown error: spec §6's `localizedDescription`
/// / `typeName` / `underlyingError`.
#[derive(Debug, Clone)]
pub struct ErrorPayload {
    pub localized_description: String,
    pub type_name: String,
    pub underlying_error: Option<Value>,
}

impl Encodable for ErrorPayload {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        let mut keyed = encoder.begin_keyed()?;
        keyed.encode_field("localizedDescription", &self.localized_description)?;
        keyed.encode_field("typeName", &self.type_name)?;
        if let Some(underlying) = &self.underlying_error {
            keyed.encode_field("underlyingError", underlying)?;
        }
        Ok(())
    }
}

impl Decodable for ErrorPayload {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
        let mut keyed = decoder.begin_keyed()?;
        Ok(Self {
            localized_description: keyed.decode_field("localizedDescription")?,
            type_name: keyed.decode_field("typeName")?,
            underlying_error: keyed.decode_field_opt("underlyingError")?,
        })
    }
}

impl From<&HandlerError> for ErrorPayload {
    fn from(err: &HandlerError) -> Self {
        Self {
            localized_description: err.localized_description.clone(),
            type_name: err.type_name.clone(),
            underlying_error: err.underlying.clone(),
        }
    }
}

impl From<ErrorPayload> for HandlerError {
    fn from(payload: ErrorPayload) -> Self {
        Self {
            localized_description: payload.localized_description,
            type_name: payload.type_name,
            underlying: payload.underlying_error,
            reconstructed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_from_value, encode_to_value, CodingContext};
    use crate::route::named;

    #[test]
    fn request_envelope_omits_payload_key_when_absent() {
        let route = named(["ping"]).to_transmitted();
        let envelope = RequestEnvelope {
            route,
            request_id: Uuid::new_v4(),
            payload: None,
            client_bookmark: Vec::new(),
        };
        let encoded = encode_to_value(&envelope).unwrap();
        match &encoded {
            Value::Dict(dict) => assert!(dict.get_str("__payload").is_none()),
            other => panic!("expected a dict, got {other:?}"),
        }
        let decoded: RequestEnvelope = decode_from_value(encoded, CodingContext::new()).unwrap();
        assert!(decoded.payload.is_none());
    }

    #[test]
    fn response_envelope_round_trips_each_outcome() {
        let id = Uuid::new_v4();
        for envelope in [
            ResponseEnvelope::payload(id, Value::I64(7)),
            ResponseEnvelope::error(
                id,
                ErrorPayload {
                    localized_description: "boom".to_string(),
                    type_name: "ConfigError".to_string(),
                    underlying_error: None,
                },
            ),
            ResponseEnvelope::finished(id),
        ] {
            let encoded = encode_to_value(&envelope).unwrap();
            let decoded: ResponseEnvelope = decode_from_value(encoded, CodingContext::new()).unwrap();
            assert_eq!(decoded.request_id, id);
            match (&envelope.outcome, &decoded.outcome) {
                (ResponseOutcome::Payload(a), ResponseOutcome::Payload(b)) => assert_eq!(a, b),
                (ResponseOutcome::Error(a), ResponseOutcome::Error(b)) => {
                    assert_eq!(a.type_name, b.type_name)
                }
                (ResponseOutcome::Finished, ResponseOutcome::Finished) => {}
                other => panic!("outcome mismatch: {other:?}"),
            }
        }
    }
}
