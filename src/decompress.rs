// Copyright 2024 Cornell University
// released under BSD 3-Clause License
//
// Uniform decompression gateway (spec.md §4.3), inverting the compression
// dispatch in `0xtaruhi-wavefst`'s `encode_chain_payload`/`PackType` and the
// teacher's `ZlibEncoder` usage in `io.rs`'s hierarchy-section writer.

use std::io::Read;

use crate::error::{DecodeError, Result};

/// Compression algorithm tag (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    None,
    Zlib,
    Gzip,
    Lz4,
    Lz4Duo,
    FastLz,
}

/// Outcome of a decompression attempt that produced fewer bytes than
/// declared because the underlying algorithm has no way to request more
/// input (spec.md §4.3 "Partial output" policy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortDecode {
    pub produced: Vec<u8>,
    pub declared_len: usize,
}

/// Result of a gateway call: either the full declared length, or a
/// short-decode condition the caller must explicitly accept or reject.
pub enum Decompressed {
    Full(Vec<u8>),
    Short(ShortDecode),
}

/// Decompresses `compressed` into exactly `declared_len` bytes using `algo`.
///
/// Callers that cannot tolerate a short decode (value-change chunks) should
/// call [`expect_full`] on the result; callers that can (frame sections)
/// may accept a [`Decompressed::Short`] as-is.
pub fn decompress(algo: Algorithm, compressed: &[u8], declared_len: usize) -> Result<Decompressed> {
    match algo {
        Algorithm::None => {
            if compressed.len() != declared_len {
                return Err(DecodeError::decompression(format!(
                    "uncompressed section length mismatch: got {}, declared {}",
                    compressed.len(),
                    declared_len
                )));
            }
            Ok(Decompressed::Full(compressed.to_vec()))
        }
        Algorithm::Zlib => zlib_decompress(compressed, declared_len),
        Algorithm::Gzip => gzip_decompress(compressed, declared_len),
        Algorithm::Lz4 => lz4_decompress(compressed, declared_len),
        Algorithm::Lz4Duo => lz4_duo_decompress(compressed, declared_len),
        Algorithm::FastLz => {
            let out = crate::fastlz::decompress(compressed, declared_len)?;
            Ok(Decompressed::Full(out))
        }
    }
}

/// Rejects a [`Decompressed::Short`] outcome, turning it into an error. Used
/// by value-change chunk decoding, which has no tolerance for short output
/// (spec.md §4.3, §4.12 "decompression shortfall in a value-change chunk").
pub fn expect_full(result: Decompressed) -> Result<Vec<u8>> {
    match result {
        Decompressed::Full(bytes) => Ok(bytes),
        Decompressed::Short(short) => Err(DecodeError::decompression(format!(
            "short decode: produced {} of {} declared bytes",
            short.produced.len(),
            short.declared_len
        ))),
    }
}

/// Accepts a short decode by zero-padding (or truncating) to the declared
/// length, for callers that tolerate it (spec.md §4.3 frame-section policy).
pub fn accept_partial(result: Decompressed) -> Vec<u8> {
    match result {
        Decompressed::Full(bytes) => bytes,
        Decompressed::Short(mut short) => {
            short.produced.resize(short.declared_len, 0);
            short.produced
        }
    }
}

fn zlib_decompress(compressed: &[u8], declared_len: usize) -> Result<Decompressed> {
    let mut decoder = flate2::read::ZlibDecoder::new(compressed);
    let mut out = Vec::with_capacity(declared_len);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| DecodeError::decompression(format!("zlib: {e}")))?;
    Ok(wrap(out, declared_len))
}

fn gzip_decompress(compressed: &[u8], declared_len: usize) -> Result<Decompressed> {
    let mut decoder = flate2::read::GzDecoder::new(compressed);
    let mut out = Vec::with_capacity(declared_len);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| DecodeError::decompression(format!("gzip: {e}")))?;
    Ok(wrap(out, declared_len))
}

fn lz4_decompress(compressed: &[u8], declared_len: usize) -> Result<Decompressed> {
    match lz4_flex::block::decompress(compressed, declared_len) {
        Ok(out) => Ok(wrap(out, declared_len)),
        Err(e) => {
            // lz4_flex cannot produce a partial buffer on error, so any
            // failure here is reported as a short decode of zero bytes
            // rather than a hard error, leaving the accept/reject decision
            // to the caller per spec.md §4.3.
            let _ = e;
            Ok(Decompressed::Short(ShortDecode {
                produced: Vec::new(),
                declared_len,
            }))
        }
    }
}

/// Dual-stage LZ4 (spec.md §4.3): decompress into an intermediate buffer
/// sized at >= 4x the input, then decompress again into the declared size.
fn lz4_duo_decompress(compressed: &[u8], declared_len: usize) -> Result<Decompressed> {
    let intermediate_cap = (compressed.len() * 4).max(declared_len).max(64);
    let stage1 = lz4_flex::block::decompress(compressed, intermediate_cap)
        .map_err(|e| DecodeError::decompression(format!("lz4-duo stage 1: {e}")))?;
    lz4_decompress(&stage1, declared_len)
}

fn wrap(out: Vec<u8>, declared_len: usize) -> Decompressed {
    if out.len() == declared_len {
        Decompressed::Full(out)
    } else {
        Decompressed::Short(ShortDecode {
            produced: out,
            declared_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn none_requires_exact_length() {
        let data = b"abcd";
        assert!(matches!(
            decompress(Algorithm::None, data, 4).unwrap(),
            Decompressed::Full(_)
        ));
        assert!(decompress(Algorithm::None, data, 5).is_err());
    }

    #[test]
    fn zlib_round_trips() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(4);
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();
        let out = expect_full(decompress(Algorithm::Zlib, &compressed, payload.len()).unwrap())
            .unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn lz4_round_trips() {
        let payload = b"waveform waveform waveform waveform".to_vec();
        let compressed = lz4_flex::block::compress(&payload);
        let out =
            expect_full(decompress(Algorithm::Lz4, &compressed, payload.len()).unwrap()).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn short_decode_can_be_accepted_with_padding() {
        let short = Decompressed::Short(ShortDecode {
            produced: vec![1, 2, 3],
            declared_len: 5,
        });
        assert_eq!(accept_partial(short), vec![1, 2, 3, 0, 0]);
    }

    #[test]
    fn short_decode_is_rejected_by_expect_full() {
        let short = Decompressed::Short(ShortDecode {
            produced: vec![1, 2, 3],
            declared_len: 5,
        });
        assert!(expect_full(short).is_err());
    }
}
