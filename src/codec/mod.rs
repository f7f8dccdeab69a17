//! # Codec
//!
//! Recursive, bidirectional mapping between arbitrary user-defined composite
//! values and the [`Value`](crate::wire::Value) tree, with strongly-typed
//! single/sequence/keyed sub-containers and a capability-token mechanism that
//! lets a short, closed set of transport-only types (endpoints, file
//! descriptors) refuse to cross any coder but the framework's own.
//!
//! The encoder/decoder side of this module is expressed as object-safe
//! traits (`dyn Encoder`/`dyn Decoder`) rather than a generic, serde-style
//! `Serializer`, because [`Encodable::encode`] itself must be callable
//! through a trait object from within a sequence/keyed sub-container writer
//! — the framework only ever ships one concrete implementation
//! ([`wire_impl::WireEncoder`]/[`wire_impl::WireDecoder`]), so there is no
//! benefit to a fully generic format abstraction, only cost.
//!
//! [`SequenceDecoder`]/[`KeyedDecoder`] declare generic `decode_element`/
//! `decode_field` methods, which rules out `dyn SequenceDecoder` the same
//! way a generic method rules out any trait object. [`Decoder::begin_sequence`]/
//! [`Decoder::begin_keyed`] therefore return the concrete
//! [`WireSequenceDecoder`]/[`WireKeyedDecoder`] types rather than boxed trait
//! objects — the encoder side can stay boxed because [`SequenceEncoder`]/
//! [`KeyedEncoder`] take `&dyn Encodable`, not a generic parameter.

mod context;
mod pod;
mod primitives;
mod wire_impl;

pub use context::CodingContext;
pub use pod::{Pod, PodArray};
pub use wire_impl::{WireDecoder, WireEncoder, WireKeyedDecoder, WireSequenceDecoder};

use crate::error::CodecError;

/// A capability token proving its holder is the framework's own coder.
///
/// Constructible only from within this crate; a coder implemented outside
/// `xpc_rpc` can never produce one, which is what makes
/// [`Encoder::framework_token`] returning `None` by default a real
/// restriction rather than a formality.
#[derive(Clone, Copy)]
pub struct FrameworkToken(());

impl FrameworkToken {
    pub(crate) fn new() -> Self {
        FrameworkToken(())
    }
}

/// Writes one leaf value or recurses into a sub-container.
pub trait Encoder {
    /// `Some` only for the framework's own coder implementations.
    fn framework_token(&self) -> Option<FrameworkToken> {
        None
    }

    fn encode_null(&mut self) -> Result<(), CodecError>;
    fn encode_bool(&mut self, value: bool) -> Result<(), CodecError>;
    fn encode_i64(&mut self, value: i64) -> Result<(), CodecError>;
    fn encode_u64(&mut self, value: u64) -> Result<(), CodecError>;
    fn encode_f64(&mut self, value: f64) -> Result<(), CodecError>;
    fn encode_str(&mut self, value: &str) -> Result<(), CodecError>;
    fn encode_uuid(&mut self, value: uuid::Uuid) -> Result<(), CodecError>;
    fn encode_date_nanos(&mut self, value: i64) -> Result<(), CodecError>;
    fn encode_blob(&mut self, value: &[u8]) -> Result<(), CodecError>;

    /// Encodes a transport-only file descriptor. Only the framework's coder
    /// implements this to succeed; all others must return
    /// [`CodecError::OnlyEncodableByFramework`].
    fn encode_fd(&mut self, value: std::os::fd::OwnedFd) -> Result<(), CodecError>;
    fn encode_endpoint(&mut self, value: crate::endpoint::EndpointHandle) -> Result<(), CodecError>;

    fn begin_sequence(&mut self) -> Result<Box<dyn SequenceEncoder + '_>, CodecError>;
    fn begin_keyed(&mut self) -> Result<Box<dyn KeyedEncoder + '_>, CodecError>;
}

/// Writes an ordered list, appended in insertion order.
pub trait SequenceEncoder {
    fn encode_element(&mut self, value: &dyn Encodable) -> Result<(), CodecError>;
}

/// Writes a dictionary keyed by the user's field names.
pub trait KeyedEncoder {
    fn encode_field(&mut self, name: &str, value: &dyn Encodable) -> Result<(), CodecError>;
}

/// Dual of [`Encoder`]: reads one leaf value or descends into a
/// sub-container.
pub trait Decoder {
    fn framework_token(&self) -> Option<FrameworkToken> {
        None
    }

    /// The coding context side channel (e.g. the current route, used by the
    /// error decoder to find declared error types).
    fn context(&self) -> &CodingContext;

    fn decode_bool(&mut self) -> Result<bool, CodecError>;
    fn decode_i64(&mut self) -> Result<i64, CodecError>;
    fn decode_u64(&mut self) -> Result<u64, CodecError>;
    fn decode_f64(&mut self) -> Result<f64, CodecError>;
    fn decode_str(&mut self) -> Result<String, CodecError>;
    fn decode_uuid(&mut self) -> Result<uuid::Uuid, CodecError>;
    fn decode_date_nanos(&mut self) -> Result<i64, CodecError>;
    fn decode_blob(&mut self) -> Result<Vec<u8>, CodecError>;
    fn decode_fd(&mut self) -> Result<std::os::fd::OwnedFd, CodecError>;
    fn decode_endpoint(&mut self) -> Result<crate::endpoint::EndpointHandle, CodecError>;

    /// `true` iff the next value to decode is a `null` leaf (used by
    /// `Option<T>`'s decode implementation).
    fn is_null(&mut self) -> Result<bool, CodecError>;

    fn begin_sequence(&mut self) -> Result<WireSequenceDecoder, CodecError>;
    fn begin_keyed(&mut self) -> Result<WireKeyedDecoder, CodecError>;

    /// Decodes whatever value comes next without committing to a leaf type
    /// in advance. Only the framework's own coder can do this meaningfully
    /// — it is used for payload passthrough (e.g. an envelope's `__payload`,
    /// whose shape is determined by the route, not by `Value` itself), not
    /// by ordinary user codec implementations.
    fn decode_any(&mut self) -> Result<crate::wire::Value, CodecError> {
        Err(CodecError::OnlyDecodableByFramework)
    }
}

/// Reads an ordered list one element at a time.
pub trait SequenceDecoder {
    /// Decodes the next element, or `Err(ValueNotFound)` past the end.
    fn decode_element<T: Decodable>(&mut self) -> Result<T, CodecError>;
    fn remaining(&self) -> usize;
}

/// Reads a dictionary by field name.
pub trait KeyedDecoder {
    /// Decodes the named field, or `Err(KeyNotFound)` if absent.
    fn decode_field<T: Decodable>(&mut self, name: &str) -> Result<T, CodecError>;
    /// Like [`KeyedDecoder::decode_field`] but returns `Ok(None)` instead of
    /// erroring when the key is absent, distinguishing "no value" from
    /// "value present but wrong type".
    fn decode_field_opt<T: Decodable>(&mut self, name: &str) -> Result<Option<T>, CodecError>;
}

/// A user value that knows how to write itself into an [`Encoder`].
pub trait Encodable {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError>;
}

/// A user value that knows how to read itself out of a [`Decoder`].
pub trait Decodable: Sized {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError>;
}

/// Convenience entry point: encode a value to a standalone [`Value`] tree.
pub fn encode_to_value<T: Encodable>(value: &T) -> Result<crate::wire::Value, CodecError> {
    let mut encoder = WireEncoder::new();
    value.encode(&mut encoder)?;
    encoder.into_value()
}

/// Convenience entry point: decode a value from a standalone [`Value`] tree.
pub fn decode_from_value<T: Decodable>(
    value: crate::wire::Value,
    context: CodingContext,
) -> Result<T, CodecError> {
    let mut decoder = WireDecoder::new(value, context);
    T::decode(&mut decoder)
}
