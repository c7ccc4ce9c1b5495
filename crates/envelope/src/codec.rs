//! Fixed-width bit-packed encoding of [`Envelope`](crate::Envelope) values (component E, §4.E).

use thiserror::Error;

use crate::Envelope;

/// Bits used per coordinate when writing to a fresh database. Must be even so that four
/// values take up a whole number of bytes.
pub const DEFAULT_BITS_PER_COORDINATE: u32 = 20;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bits-per-coordinate must be even and non-zero, got {0}")]
    OddBitWidth(u32),
    #[error("encoded buffer has length {actual}, expected {expected}")]
    WrongLength { expected: usize, actual: usize },
    #[error("coordinate {value} is out of range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
}

/// Encodes and decodes `(w, s, e, n)` envelopes as fixed-width big-endian byte strings.
///
/// Each coordinate is scaled to an unsigned integer of `bits_per_coordinate` bits, where 0
/// represents the minimum value for that axis (e.g. -180 for longitude) and the all-ones value
/// represents the maximum (e.g. 180). `w` and `s` round down (floor) and `e` and `n` round up
/// (ceil) during encoding, so that the decoded rectangle always contains the original: this
/// asymmetric rounding is what makes the codec conservative rather than merely approximate.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCodec {
    bits_per_coordinate: u32,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        EnvelopeCodec::new(DEFAULT_BITS_PER_COORDINATE).expect("default bit width is valid")
    }
}

impl EnvelopeCodec {
    pub fn new(bits_per_coordinate: u32) -> Result<Self, CodecError> {
        if bits_per_coordinate == 0 || bits_per_coordinate % 2 != 0 {
            return Err(CodecError::OddBitWidth(bits_per_coordinate));
        }
        Ok(EnvelopeCodec { bits_per_coordinate })
    }

    pub fn bits_per_coordinate(&self) -> u32 {
        self.bits_per_coordinate
    }

    pub fn bits_per_envelope(&self) -> u32 {
        4 * self.bits_per_coordinate
    }

    pub fn bytes_per_envelope(&self) -> usize {
        (self.bits_per_envelope() / 8) as usize
    }

    fn value_max_int(&self) -> u128 {
        (1u128 << self.bits_per_coordinate) - 1
    }

    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        let w = self.encode_value(envelope.w, -180.0, 180.0, Rounding::Floor)?;
        let s = self.encode_value(envelope.s, -90.0, 90.0, Rounding::Floor)?;
        let e = self.encode_value(envelope.e, -180.0, 180.0, Rounding::Ceil)?;
        let n = self.encode_value(envelope.n, -90.0, 90.0, Rounding::Ceil)?;

        let mut integer: u128 = w;
        integer = (integer << self.bits_per_coordinate) | s;
        integer = (integer << self.bits_per_coordinate) | e;
        integer = (integer << self.bits_per_coordinate) | n;

        let bytes_len = self.bytes_per_envelope();
        let full = integer.to_be_bytes();
        Ok(full[full.len() - bytes_len..].to_vec())
    }

    pub fn decode(&self, encoded: &[u8]) -> Result<Envelope, CodecError> {
        let expected = self.bytes_per_envelope();
        if encoded.len() != expected {
            return Err(CodecError::WrongLength {
                expected,
                actual: encoded.len(),
            });
        }

        let mut buf = [0u8; 16];
        buf[16 - expected..].copy_from_slice(encoded);
        let mut integer = u128::from_be_bytes(buf);

        let mask = self.value_max_int();
        let n = self.decode_value(integer & mask, -90.0, 90.0);
        integer >>= self.bits_per_coordinate;
        let e = self.decode_value(integer & mask, -180.0, 180.0);
        integer >>= self.bits_per_coordinate;
        let s = self.decode_value(integer & mask, -90.0, 90.0);
        integer >>= self.bits_per_coordinate;
        let w = self.decode_value(integer & mask, -180.0, 180.0);

        Ok(Envelope::new(w, s, e, n))
    }

    fn encode_value(
        &self,
        value: f64,
        min: f64,
        max: f64,
        rounding: Rounding,
    ) -> Result<u128, CodecError> {
        if !(min..=max).contains(&value) {
            return Err(CodecError::OutOfRange { value, min, max });
        }
        let normalised = (value - min) / (max - min);
        let scaled = normalised * self.value_max_int() as f64;
        let rounded = match rounding {
            Rounding::Floor => scaled.floor(),
            Rounding::Ceil => scaled.ceil(),
        };
        Ok((rounded as u128).clamp(0, self.value_max_int()))
    }

    fn decode_value(&self, encoded: u128, min: f64, max: f64) -> f64 {
        let normalised = encoded as f64 / self.value_max_int() as f64;
        normalised * (max - min) + min
    }
}

#[derive(Clone, Copy)]
enum Rounding {
    Floor,
    Ceil,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rejects_odd_bit_width() {
        assert!(matches!(EnvelopeCodec::new(19), Err(CodecError::OddBitWidth(19))));
    }

    #[test]
    fn bytes_per_envelope_matches_default() {
        let codec = EnvelopeCodec::default();
        assert_eq!(codec.bytes_per_envelope(), 10); // 4 * 20 bits / 8
    }

    /// P1: decoding an encoded envelope always yields a superset of the original (conservative
    /// overapproximation from the asymmetric floor/ceil rounding).
    #[test]
    fn decode_of_encode_is_a_superset() {
        let codec = EnvelopeCodec::default();
        let original = Envelope::new(12.3456, -5.6789, 98.7654, 45.1111);
        let encoded = codec.encode(&original).unwrap();
        let decoded = codec.decode(&encoded).unwrap();

        assert!(decoded.w <= original.w + 1e-9);
        assert!(decoded.s <= original.s + 1e-9);
        assert!(decoded.e >= original.e - 1e-9);
        assert!(decoded.n >= original.n - 1e-9);
    }

    #[test]
    fn round_trips_extremes_exactly() {
        let codec = EnvelopeCodec::default();
        let full = Envelope::new(-180.0, -90.0, 180.0, 90.0);
        let encoded = codec.encode(&full).unwrap();
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, full);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let codec = EnvelopeCodec::default();
        assert!(matches!(
            codec.decode(&[0u8; 3]),
            Err(CodecError::WrongLength { expected: 10, actual: 3 })
        ));
    }

    #[test]
    fn out_of_range_value_is_rejected() {
        let codec = EnvelopeCodec::default();
        let bad = Envelope::new(-200.0, 0.0, 0.0, 0.0);
        assert!(matches!(codec.encode(&bad), Err(CodecError::OutOfRange { .. })));
    }
}
