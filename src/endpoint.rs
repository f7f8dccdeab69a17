//! # Endpoint and Capability Forwarding
//!
//! An endpoint is an opaque, portable handle minted from a listener's
//! accept-side socket path. It can be sent as a wire value
//! ([`crate::wire::Value::Endpoint`]) and materialized on the receiving end
//! into a new client connection of the same service kind.
//!
//! On this crate's Unix-domain-socket binding there is no host-managed
//! service-container analog, so every listener this crate creates is
//! treated as mintable (the Open Question from the endpoint-forwarding
//! module is resolved this way; see `DESIGN.md`).

use std::path::PathBuf;

use crate::codec::{Decodable, Decoder, Encodable, Encoder};
use crate::error::CodecError;

/// A portable handle to a listener, forwardable over the wire and usable to
/// construct a new client of the same service.
///
/// Hashable and equality-comparable by the socket path it names, matching
/// the data model's "opaque, hashable by the transport" requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointHandle {
    socket_path: PathBuf,
}

impl EndpointHandle {
    pub(crate) fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    pub fn socket_path(&self) -> &std::path::Path {
        &self.socket_path
    }
}

impl Encodable for EndpointHandle {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        if encoder.framework_token().is_none() {
            return Err(CodecError::OnlyEncodableByFramework);
        }
        encoder.encode_endpoint(self.clone())
    }
}

impl Decodable for EndpointHandle {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
        if decoder.framework_token().is_none() {
            return Err(CodecError::OnlyDecodableByFramework);
        }
        decoder.decode_endpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_from_value, encode_to_value, CodingContext};

    #[test]
    fn round_trips_through_the_framework_coder() {
        let endpoint = EndpointHandle::new(PathBuf::from("/tmp/xpc-rpc-test.sock"));
        let encoded = encode_to_value(&endpoint).unwrap();
        let decoded: EndpointHandle = decode_from_value(encoded, CodingContext::new()).unwrap();
        assert_eq!(endpoint, decoded);
    }
}
