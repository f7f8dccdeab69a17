//! Trivial-array fast path.
//!
//! Encoding a `Vec<T>` the ordinary way walks [`SequenceEncoder`] one element
//! at a time, which is wasteful for large arrays of plain-old-data. Wrapping
//! such a vector in [`PodArray`] instead encodes it as a single
//! [`Value::Blob`](crate::wire::Value::Blob) of `len * size_of::<T>()` raw
//! bytes. This path is never taken implicitly — a caller opts in by using
//! `PodArray<T>` instead of `Vec<T>` at the field site.

use super::{Decodable, Decoder, Encodable, Encoder};
use crate::error::CodecError;

/// Marker for types whose in-memory representation is safe to copy
/// byte-for-byte: no padding-dependent invariants, no pointers, no `Drop`.
///
/// # Safety
///
/// Implementors must be `Copy` and must have no bit pattern that is invalid
/// for the type (i.e. every possible byte sequence of the right length must
/// be a legal value), since [`PodArray`] reconstructs values straight out of
/// a byte blob without validation.
pub unsafe trait Pod: Copy {}

unsafe impl Pod for u8 {}
unsafe impl Pod for i8 {}
unsafe impl Pod for u16 {}
unsafe impl Pod for i16 {}
unsafe impl Pod for u32 {}
unsafe impl Pod for i32 {}
unsafe impl Pod for u64 {}
unsafe impl Pod for i64 {}
unsafe impl Pod for f32 {}
unsafe impl Pod for f64 {}

/// A vector of [`Pod`] elements that encodes/decodes as a single blob.
#[derive(Debug, Clone, PartialEq)]
pub struct PodArray<T: Pod>(pub Vec<T>);

impl<T: Pod> PodArray<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self(items)
    }

    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T: Pod> Encodable for PodArray<T> {
    fn encode(&self, encoder: &mut dyn Encoder) -> Result<(), CodecError> {
        let stride = std::mem::size_of::<T>();
        let mut bytes = Vec::with_capacity(self.0.len() * stride);
        for item in &self.0 {
            // SAFETY: `T: Pod` guarantees a stable, padding-free byte
            // representation of exactly `stride` bytes.
            let item_bytes = unsafe {
                std::slice::from_raw_parts((item as *const T).cast::<u8>(), stride)
            };
            bytes.extend_from_slice(item_bytes);
        }
        encoder.encode_blob(&bytes)
    }
}

impl<T: Pod> Decodable for PodArray<T> {
    fn decode(decoder: &mut dyn Decoder) -> Result<Self, CodecError> {
        let bytes = decoder.decode_blob()?;
        let stride = std::mem::size_of::<T>();
        if stride == 0 || bytes.len() % stride != 0 {
            return Err(CodecError::DataCorrupted(format!(
                "blob of {} bytes is not a whole number of {}-byte elements",
                bytes.len(),
                stride
            )));
        }
        let count = bytes.len() / stride;
        let mut out = Vec::<T>::with_capacity(count);
        // SAFETY: `out` is allocated with `T`'s alignment and at least
        // `bytes.len()` bytes of capacity; `T: Pod` guarantees every byte
        // pattern of the right length is a valid `T`.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), out.as_mut_ptr().cast::<u8>(), bytes.len());
            out.set_len(count);
        }
        Ok(Self(out))
    }
}

#[cfg(test)]
mod tests {
    use super::super::{decode_from_value, encode_to_value, CodingContext};
    use super::PodArray;

    #[test]
    fn round_trips_as_single_blob() {
        let items = PodArray::new(vec![1u32, 2, 3, 4, 5]);
        let encoded = encode_to_value(&items).unwrap();
        match &encoded {
            crate::wire::Value::Blob(b) => assert_eq!(b.len(), 5 * 4),
            other => panic!("expected a blob, got {other:?}"),
        }
        let decoded: PodArray<u32> = decode_from_value(encoded, CodingContext::new()).unwrap();
        assert_eq!(decoded.into_inner(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn rejects_misaligned_blob_length() {
        use super::super::{Decodable, WireDecoder};
        let encoded = crate::wire::Value::Blob(vec![1, 2, 3]);
        let mut decoder = WireDecoder::new(encoded, CodingContext::new());
        assert!(PodArray::<u32>::decode(&mut decoder).is_err());
    }
}
