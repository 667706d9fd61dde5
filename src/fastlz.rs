// Copyright 2024 Cornell University
// released under BSD 3-Clause License
//
// A small hand-rolled decoder for the FastLZ level-1 block format (spec.md
// §4.3, pack-type `'F'`). No actively maintained safe-Rust crate exposes a
// FastLZ decoder; waveform readers in this space (e.g. `wellen`'s FST
// backend) hand-roll the same ~40-line algorithm for the same reason, so we
// do the same here rather than reach for a C FFI binding.
//
// Wire format (Ariya Hidayat's original `fastlz.c`, "level 1"): a control
// byte either starts a literal run (`ctrl < 32`, `ctrl + 1` raw bytes
// follow) or a back-reference (`ctrl >= 32`, length/distance encoded across
// 1-3 bytes, copied with supported self-overlap for run-length patterns).

use crate::error::{DecodeError, Result};

/// Decompresses a FastLZ level-1 block into a buffer of exactly
/// `expected_len` bytes.
pub fn decompress(input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_len);
    if input.is_empty() {
        if expected_len == 0 {
            return Ok(out);
        }
        return Err(DecodeError::decompression("fastlz: empty input"));
    }

    let mut ip = 0usize;
    let mut ctrl = input[ip] as u32;
    ip += 1;

    loop {
        if ctrl >= 32 {
            let mut len = (ctrl >> 5) - 1;
            let ofs_hi = (ctrl & 0x1f) << 8;
            if len == 7 - 1 {
                let extra = *input
                    .get(ip)
                    .ok_or_else(|| DecodeError::decompression("fastlz: truncated length byte"))?;
                ip += 1;
                len += extra as u32;
            }
            let ofs_lo = *input
                .get(ip)
                .ok_or_else(|| DecodeError::decompression("fastlz: truncated offset byte"))?;
            ip += 1;
            let distance = (ofs_hi | ofs_lo as u32) as usize;
            len += 3;

            if distance + 1 > out.len() {
                return Err(DecodeError::decompression(
                    "fastlz: back-reference distance out of bounds",
                ));
            }
            let mut ref_idx = out.len() - distance - 1;
            for _ in 0..len {
                if out.len() >= expected_len {
                    break;
                }
                let byte = out[ref_idx];
                out.push(byte);
                ref_idx += 1;
            }
        } else {
            let len = ctrl as usize + 1;
            let end = ip + len;
            let slice = input
                .get(ip..end)
                .ok_or_else(|| DecodeError::decompression("fastlz: truncated literal run"))?;
            out.extend_from_slice(slice);
            ip = end;
        }

        if out.len() >= expected_len {
            break;
        }
        match input.get(ip) {
            Some(byte) => {
                ctrl = *byte as u32;
                ip += 1;
            }
            None => break,
        }
    }

    if out.len() != expected_len {
        out.truncate(expected_len);
        if out.len() != expected_len {
            return Err(DecodeError::decompression(format!(
                "fastlz: short decode, got {} of {expected_len} bytes",
                out.len()
            )));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal_block(data: &[u8]) -> Vec<u8> {
        assert!(data.len() <= 32);
        let mut out = vec![(data.len() - 1) as u8];
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn decodes_pure_literal_run() {
        let payload = b"hello fastlz";
        let block = literal_block(payload);
        let decoded = decompress(&block, payload.len()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn decodes_back_reference_run_length_pattern() {
        // literal "ab" then a back-reference copying "ab" four more times: "ababababab"
        let mut block = literal_block(b"ab");
        // ctrl byte for a 2-byte distance match of length 3 (minimum): type bits = 1 -> len-1=0
        // len = 3 (minimum), distance = 2 (copy starting 2 bytes back == "ab")
        let ctrl = (1u32 << 5) | 0; // len field = 1 -> len = 1-1=0 -> total len 3
        block.push(ctrl as u8);
        block.push(1u8); // distance low byte -> distance = 1 -> ref_idx = len-1-1
        let expected: &[u8] = b"ababa";
        let decoded = decompress(&block, expected.len()).unwrap();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn rejects_out_of_bounds_distance() {
        let block = [ (1u32 << 5) as u8, 0u8 ];
        assert!(decompress(&block, 3).is_err());
    }

    #[test]
    fn empty_input_with_zero_expected_len_is_ok() {
        assert_eq!(decompress(&[], 0).unwrap(), Vec::<u8>::new());
    }
}
