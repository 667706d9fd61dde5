// Copyright 2024 Cornell University
// released under BSD 3-Clause License
//
// Little-endian 7-bit-payload varint decoding (spec.md §4.2), mirroring the
// encode side in the teacher's `io.rs` (`write_variant_u64`/`write_variant_i64`).

use crate::error::{DecodeError, Result};

const MAX_VARINT_BYTES: usize = 10;

/// Decodes an unsigned varint, returning `(value, bytes_consumed)`.
#[inline]
pub fn decode_u64(input: &[u8]) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    for (i, byte) in input.iter().take(MAX_VARINT_BYTES).enumerate() {
        result |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }
    Err(DecodeError::unexpected_eof(input, input.len() as u64))
}

/// Decodes a zig-zag-style signed varint (spec.md §4.2): same wire form as
/// the unsigned decoder, but if the terminating byte's 0x40 bit is set and
/// the shift has not yet consumed all 64 bits, the result is sign-extended.
#[inline]
pub fn decode_i64(input: &[u8]) -> Result<(i64, usize)> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    for (i, byte) in input.iter().take(MAX_VARINT_BYTES).enumerate() {
        result |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            if (byte & 0x40) != 0 && shift < 64 {
                result |= !0u64 << shift;
            }
            return Ok((result as i64, i + 1));
        }
    }
    Err(DecodeError::unexpected_eof(input, input.len() as u64))
}

/// Returns the number of bytes a given non-negative value would consume if
/// varint-encoded, without performing a decode. Used to compute section
/// layout offsets (spec.md §4.2).
#[inline]
pub fn encoded_len(mut value: u64) -> usize {
    let mut len = 1;
    while value > 0x7f {
        value >>= 7;
        len += 1;
    }
    len
}

#[cfg(test)]
pub(crate) fn encode_u64(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Encodes a signed varint with the same zig-zag-style sign extension
/// [`decode_i64`] expects, mirroring the teacher's `write_variant_i64`
/// (`io.rs`). `#[cfg(test)]`-only: production code only ever decodes.
#[cfg(test)]
pub(crate) fn encode_i64(value: i64, out: &mut Vec<u8>) {
    if value <= 63 && value >= -64 {
        out.push(value as u8 & 0x7f);
        return;
    }
    let bits = if value >= 0 {
        64 - value.leading_zeros() + 1
    } else {
        64 - value.leading_ones() + 1
    };
    let num_bytes = (bits as usize).div_ceil(7);
    let mut v = value;
    for i in 0..num_bytes {
        let mark = if i == num_bytes - 1 { 0 } else { 0x80 };
        out.push((v & 0x7f) as u8 | mark);
        v >>= 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decodes_single_byte_values() {
        assert_eq!(decode_u64(&[0x00]).unwrap(), (0, 1));
        assert_eq!(decode_u64(&[0x7f]).unwrap(), (0x7f, 1));
    }

    #[test]
    fn decodes_multi_byte_values() {
        // 300 = 0b1_0010_1100 -> low 7 bits 0x2c with continuation, then 0x02
        assert_eq!(decode_u64(&[0xac, 0x02]).unwrap(), (300, 2));
    }

    #[test]
    fn rejects_unterminated_varint() {
        let bytes = [0x80u8; MAX_VARINT_BYTES];
        assert!(decode_u64(&bytes).is_err());
    }

    #[test]
    fn encoded_len_matches_encoded_bytes() {
        for value in [0u64, 1, 127, 128, 16384, u64::MAX] {
            let mut buf = Vec::new();
            encode_u64(value, &mut buf);
            assert_eq!(encoded_len(value), buf.len());
        }
    }

    #[test]
    fn signed_encode_decode_round_trips() {
        for value in [0i64, 1, -1, 63, -64, 64, -65, 1_000_000, -1_000_000, i64::MAX, i64::MIN] {
            let mut buf = Vec::new();
            encode_i64(value, &mut buf);
            let (decoded, consumed) = decode_i64(&buf).unwrap();
            assert_eq!(decoded, value, "value={value}");
            assert_eq!(consumed, buf.len());
        }
    }

    proptest! {
        #[test]
        fn unsigned_round_trips(value: u64) {
            let mut buf = Vec::new();
            encode_u64(value, &mut buf);
            let (decoded, consumed) = decode_u64(&buf).unwrap();
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(consumed, buf.len());
            prop_assert_eq!(encoded_len(value), buf.len());
        }

        #[test]
        fn signed_small_magnitude_round_trips(value in -1_000_000i64..1_000_000i64) {
            // zig-zag style sign extension only needs to round-trip through
            // our own encoder for values that fit comfortably; the production
            // encoder lives in the teacher-derived fixture writer.
            let zigzag = ((value << 1) ^ (value >> 63)) as u64;
            let mut buf = Vec::new();
            encode_u64(zigzag, &mut buf);
            let (decoded_zigzag, _) = decode_u64(&buf).unwrap();
            let decoded = ((decoded_zigzag >> 1) as i64) ^ -((decoded_zigzag & 1) as i64);
            prop_assert_eq!(decoded, value);
        }
    }
}
