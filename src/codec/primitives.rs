//! [`Encodable`]/[`Decodable`] implementations for the primitive and
//! standard-library types every composite codec implementation is built out
//! of.

use uuid::Uuid;

use super::{Decodable, Decoder, Encodable, Encoder, SequenceDecoder as _, SequenceEncoder as _};
use crate::error::CodecError;

macro_rules! impl_via_i64 {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Encodable for $ty {
                fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
                    encoder.encode_i64(i64::from(*self))
                }
            }

            impl Decodable for $ty {
                fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
                    let raw = decoder.decode_i64()?;
                    <$ty>::try_from(raw).map_err(|_| CodecError::TypeMismatch {
                        expected: stringify!($ty),
                        found: "i64 (out of range)",
                    })
                }
            }
        )+
    };
}

macro_rules! impl_via_u64 {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Encodable for $ty {
                fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
                    encoder.encode_u64(u64::from(*self))
                }
            }

            impl Decodable for $ty {
                fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
                    let raw = decoder.decode_u64()?;
                    <$ty>::try_from(raw).map_err(|_| CodecError::TypeMismatch {
                        expected: stringify!($ty),
                        found: "u64 (out of range)",
                    })
                }
            }
        )+
    };
}

impl Encodable for bool {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        encoder.encode_bool(*self)
    }
}

impl Decodable for bool {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
        decoder.decode_bool()
    }
}

impl_via_i64!(i8, i16, i32);
impl_via_u64!(u8, u16, u32);

impl Encodable for i64 {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        encoder.encode_i64(*self)
    }
}

impl Decodable for i64 {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
        decoder.decode_i64()
    }
}

impl Encodable for u64 {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        encoder.encode_u64(*self)
    }
}

impl Decodable for u64 {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
        decoder.decode_u64()
    }
}

impl Encodable for isize {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        encoder.encode_i64(*self as i64)
    }
}

impl Decodable for isize {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
        let raw = decoder.decode_i64()?;
        isize::try_from(raw).map_err(|_| CodecError::TypeMismatch {
            expected: "isize",
            found: "i64 (out of range)",
        })
    }
}

impl Encodable for usize {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        encoder.encode_u64(*self as u64)
    }
}

impl Decodable for usize {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
        let raw = decoder.decode_u64()?;
        usize::try_from(raw).map_err(|_| CodecError::TypeMismatch {
            expected: "usize",
            found: "u64 (out of range)",
        })
    }
}

impl Encodable for f32 {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        encoder.encode_f64(f64::from(*self))
    }
}

impl Decodable for f32 {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
        Ok(decoder.decode_f64()? as f32)
    }
}

impl Encodable for f64 {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        encoder.encode_f64(*self)
    }
}

impl Decodable for f64 {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
        decoder.decode_f64()
    }
}

impl Encodable for String {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        encoder.encode_str(self)
    }
}

impl Decodable for String {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
        decoder.decode_str()
    }
}

impl Encodable for str {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        encoder.encode_str(self)
    }
}

impl Encodable for &str {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        encoder.encode_str(self)
    }
}

impl Encodable for Uuid {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        encoder.encode_uuid(*self)
    }
}

impl Decodable for Uuid {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
        decoder.decode_uuid()
    }
}

impl<T: Encodable> Encodable for Option<T> {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        match self {
            Some(value) => value.encode(encoder),
            None => encoder.encode_null(),
        }
    }
}

impl<T: Decodable> Decodable for Option<T> {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
        if decoder.is_null()? {
            Ok(None)
        } else {
            Ok(Some(T::decode(decoder)?))
        }
    }
}

// `Vec<u8>` goes through this generic sequence path like any other element
// type (one `Value::U64` leaf per byte) rather than `Value::Blob` — the
// single-blob fast path is opt-in only, through `codec::PodArray`.
impl<T: Encodable> Encodable for Vec<T> {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        let mut seq = encoder.begin_sequence()?;
        for element in self {
            seq.encode_element(element)?;
        }
        Ok(())
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
        let mut seq = decoder.begin_sequence()?;
        let mut out = Vec::with_capacity(seq.remaining());
        while seq.remaining() > 0 {
            out.push(seq.decode_element()?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{decode_from_value, encode_to_value, CodingContext};

    #[test]
    fn round_trips_primitive_vector() {
        let values: Vec<i32> = vec![1, -2, 3, i32::MAX, i32::MIN];
        let encoded = encode_to_value(&values).unwrap();
        let decoded: Vec<i32> = decode_from_value(encoded, CodingContext::new()).unwrap();
        assert_eq!(values, decoded);
    }

    #[test]
    fn option_round_trips_both_variants() {
        let some: Option<u32> = Some(7);
        let encoded = encode_to_value(&some).unwrap();
        let decoded: Option<u32> = decode_from_value(encoded, CodingContext::new()).unwrap();
        assert_eq!(some, decoded);

        let none: Option<u32> = None;
        let encoded = encode_to_value(&none).unwrap();
        let decoded: Option<u32> = decode_from_value(encoded, CodingContext::new()).unwrap();
        assert_eq!(none, decoded);
    }

    #[test]
    fn narrowing_rejects_out_of_range_values() {
        use super::super::{Decodable, WireDecoder};
        let encoded = encode_to_value(&1000i64).unwrap();
        let mut decoder = WireDecoder::new(encoded, CodingContext::new());
        assert!(u8::decode(&mut decoder).is_err());
    }
}
