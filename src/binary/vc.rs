// Copyright 2024 Cornell University
// released under BSD 3-Clause License
//
// Binary value-change block decoder (spec.md §4.10, component C11). Each
// block is framed in reverse: trailer, chain-trailer, time section, chain
// section, then the frame/VC-header/VC-data region read forward from the
// block's start. Section boundaries mirror the teacher's write-side counts
// (`write_value_change_section_start`/`write_value_change_section` in
// `io.rs`); the chain-table varint scheme itself is grounded on
// `0xtaruhi-wavefst`'s `encode_chain_index`, since the teacher's own
// `write_offset_table`/`write_value_changes` are `todo!()` stubs.

use std::collections::HashMap;

use crate::binary::header::GeometryEntry;
use crate::byte_table;
use crate::decompress::{self, Algorithm};
use crate::error::{DecodeError, Result};
use crate::model::{DataType, Sample};
use crate::reader::ArrayReader;

/// Pack-type byte from the VC header (spec.md §4.10 step 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackType {
    Zlib,
    Lz4,
    FastLz,
}

impl PackType {
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            b'Z' => Ok(Self::Zlib),
            b'4' => Ok(Self::Lz4),
            b'F' => Ok(Self::FastLz),
            other => Err(DecodeError::unsupported(format!(
                "unknown value-change pack type byte {other:#x}"
            ))),
        }
    }

    fn to_algorithm(self) -> Algorithm {
        match self {
            Self::Zlib => Algorithm::Zlib,
            Self::Lz4 => Algorithm::Lz4,
            Self::FastLz => Algorithm::FastLz,
        }
    }
}

/// Which alias scheme a block's chain table uses; re-exported here so
/// callers only need `binary::vc` for chain decoding.
pub use crate::binary::framer::VcVariant;

/// Everything extracted from a value-change block's reverse-layout sections
/// (spec.md §4.10 steps 1-7), ready for chain and chunk decoding.
#[derive(Debug, Clone)]
pub struct VcBlock {
    pub begin_time: u64,
    pub end_time: u64,
    pub frame_max_handle: u64,
    pub vc_max_handle: u64,
    pub pack_type: PackType,
    /// Decompressed frame payload; short decodes are zero-padded (spec.md
    /// §4.3 frame-section policy) rather than rejected.
    pub frame: Vec<u8>,
    pub vc_data: Vec<u8>,
    pub chain_bytes: Vec<u8>,
    /// Absolute timestamps reconstructed from the time section, indexed by
    /// the `time-index` a VC-chunk record advances into (spec.md §4.10
    /// "Time decoding").
    pub timestamps: Vec<u64>,
}

fn be_u64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes(bytes.try_into().unwrap())
}

/// Parses one value-change block's payload (spec.md §4.10). `time_zero` is
/// the header's signed `time_zero` field, added to every reconstructed
/// timestamp.
pub fn parse(payload: &[u8], time_zero: i64) -> Result<VcBlock> {
    let mut prefix = ArrayReader::new(payload);
    let begin_time = prefix.take_u64_be()?;
    let end_time = prefix.take_u64_be()?;
    let _reserved = prefix.take_u64_be()?; // memory-hint field, unused on decode
    let body = prefix.remaining();

    if body.len() < 24 {
        return Err(DecodeError::unexpected_eof(body, 24));
    }
    let trailer_start = body.len() - 24;
    let time_uncompressed_len = be_u64(&body[trailer_start..trailer_start + 8]);
    let time_compressed_len = be_u64(&body[trailer_start + 8..trailer_start + 16]);
    let time_entry_count = be_u64(&body[trailer_start + 16..trailer_start + 24]);

    let time_section_start = trailer_start
        .checked_sub(time_compressed_len as usize)
        .ok_or_else(|| DecodeError::invariant(body, trailer_start as u64, "time section underflows block"))?;
    if time_section_start < 8 {
        return Err(DecodeError::invariant(
            body,
            time_section_start as u64,
            "chain trailer underflows block",
        ));
    }
    let chain_trailer_start = time_section_start - 8;
    let chain_compressed_size = be_u64(&body[chain_trailer_start..chain_trailer_start + 8]);
    let chain_section_start = chain_trailer_start
        .checked_sub(chain_compressed_size as usize)
        .ok_or_else(|| {
            DecodeError::invariant(body, chain_trailer_start as u64, "chain section underflows block")
        })?;

    let time_bytes = &body[time_section_start..trailer_start];
    let chain_bytes = &body[chain_section_start..chain_trailer_start];

    let mut fr = ArrayReader::new(body);
    let frame_uncompressed_len = fr.take_varint_u64()?;
    let frame_compressed_len = fr.take_varint_u64()?;
    let frame_max_handle = fr.take_varint_u64()?;
    let frame_compressed = fr.take(frame_compressed_len as usize)?;
    let frame_algo = if frame_compressed_len == frame_uncompressed_len {
        Algorithm::None
    } else {
        Algorithm::Zlib
    };
    let frame = decompress::accept_partial(decompress::decompress(
        frame_algo,
        frame_compressed,
        frame_uncompressed_len as usize,
    )?);

    let vc_max_handle = fr.take_varint_u64()?;
    let pack_type = PackType::from_byte(fr.take_u8()?)?;
    let vc_header_end = fr.position();
    if vc_header_end > chain_section_start {
        return Err(DecodeError::invariant(
            body,
            vc_header_end as u64,
            "vc header overruns chain section",
        ));
    }
    let vc_data = body[vc_header_end..chain_section_start].to_vec();

    let time_algo = if time_compressed_len == time_uncompressed_len {
        Algorithm::None
    } else {
        Algorithm::Zlib
    };
    let time_payload = decompress::expect_full(decompress::decompress(
        time_algo,
        time_bytes,
        time_uncompressed_len as usize,
    )?)?;
    let mut tr = ArrayReader::new(&time_payload);
    let mut timestamps = Vec::with_capacity(time_entry_count as usize);
    let mut acc: i64 = time_zero;
    for _ in 0..time_entry_count {
        let delta = tr.take_varint_u64()?;
        acc = acc.saturating_add(delta as i64);
        timestamps.push(acc.max(0) as u64);
    }

    Ok(VcBlock {
        begin_time,
        end_time,
        frame_max_handle,
        vc_max_handle,
        pack_type,
        frame,
        vc_data,
        chain_bytes: chain_bytes.to_vec(),
        timestamps,
    })
}

/// One handle's resolved chain-table entry (spec.md §4.10 "Chain decoding
/// produces two parallel arrays... `chunkOffset`/`chunkLength`"), folded
/// into a single enum since every code path inspects both together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainSlot {
    Empty,
    Data { offset: u64, length: u64 },
    Alias { target: u32 },
}

/// Decodes a block's chain table, indexed `1..=vc_max_handle` (index `0` is
/// unused padding so handles can index directly).
pub fn build_chain(
    variant: VcVariant,
    chain_bytes: &[u8],
    vc_max_handle: u64,
    vc_data_len: u64,
) -> Result<Vec<ChainSlot>> {
    match variant {
        VcVariant::Plain => Err(DecodeError::unsupported(
            "plain (non-alias) value-change blocks are unverified by fixtures in this corpus",
        )),
        VcVariant::DynAlias => build_chain_dyn_alias(chain_bytes, vc_max_handle, vc_data_len),
        VcVariant::DynAlias2 => build_chain_dyn_alias2(chain_bytes, vc_max_handle, vc_data_len),
    }
}

fn close_last(slots: &mut [ChainSlot], last_data: Option<u64>, vc_data_len: u64) {
    if let Some(h) = last_data {
        if let ChainSlot::Data { offset, length } = &mut slots[h as usize] {
            *length = vc_data_len.saturating_sub(*offset - 1);
        }
    }
}

fn build_chain_dyn_alias(chain_bytes: &[u8], vc_max_handle: u64, vc_data_len: u64) -> Result<Vec<ChainSlot>> {
    let mut slots = vec![ChainSlot::Empty; (vc_max_handle + 1) as usize];
    let mut r = ArrayReader::new(chain_bytes);
    let mut handle = 1u64;
    let mut accumulator = 0u64;
    let mut last_data: Option<u64> = None;
    while handle <= vc_max_handle && !r.is_empty() {
        let val = r.take_varint_u64()?;
        if val == 0 {
            let target = r.take_varint_u64()?;
            slots[handle as usize] = ChainSlot::Alias { target: target as u32 };
            handle += 1;
        } else if val & 1 == 1 {
            accumulator += val >> 1;
            slots[handle as usize] = ChainSlot::Data { offset: accumulator, length: 0 };
            if let Some(prev) = last_data {
                if let ChainSlot::Data { offset: prev_off, length } = &mut slots[prev as usize] {
                    *length = accumulator - *prev_off;
                }
            }
            last_data = Some(handle);
            handle += 1;
        } else {
            let skip = val >> 1;
            handle += skip;
        }
    }
    close_last(&mut slots, last_data, vc_data_len);
    Ok(slots)
}

fn build_chain_dyn_alias2(chain_bytes: &[u8], vc_max_handle: u64, vc_data_len: u64) -> Result<Vec<ChainSlot>> {
    let mut slots = vec![ChainSlot::Empty; (vc_max_handle + 1) as usize];
    let mut r = ArrayReader::new(chain_bytes);
    let mut handle = 1u64;
    let mut accumulator: u64 = 0;
    let mut last_data: Option<u64> = None;
    let mut prev_alias: i64 = 0;
    while handle <= vc_max_handle && !r.is_empty() {
        let v = r.take_varint_i64()?;
        let tag = v & 1;
        let magnitude = v >> 1;
        if tag == 1 {
            if magnitude > 0 {
                accumulator = accumulator.saturating_add(magnitude as u64);
                slots[handle as usize] = ChainSlot::Data { offset: accumulator, length: 0 };
                if let Some(prev) = last_data {
                    if let ChainSlot::Data { offset: prev_off, length } = &mut slots[prev as usize] {
                        *length = accumulator - *prev_off;
                    }
                }
                last_data = Some(handle);
            } else if magnitude < 0 {
                prev_alias = magnitude;
                slots[handle as usize] = ChainSlot::Alias { target: (-magnitude) as u32 };
            } else {
                slots[handle as usize] = ChainSlot::Alias { target: (-prev_alias) as u32 };
            }
            handle += 1;
        } else {
            let skip = magnitude.max(0) as u64;
            handle += skip.max(1);
        }
    }
    close_last(&mut slots, last_data, vc_data_len);
    Ok(slots)
}

/// Decodes a block's frame section into a per-handle initial-value map
/// (spec.md §4.10 "Frame decoding"). Handles with a zero-width geometry
/// entry carry no frame footprint and are absent from the result.
pub fn decode_frame(
    frame: &[u8],
    frame_max_handle: u64,
    geometry: &[GeometryEntry],
    little_endian: bool,
) -> Result<HashMap<u32, Sample>> {
    let mut r = ArrayReader::new(frame);
    let mut out = HashMap::new();
    for handle in 1..=frame_max_handle {
        let geom = geometry
            .get((handle - 1) as usize)
            .copied()
            .unwrap_or(GeometryEntry::ZeroWidth);
        match geom {
            GeometryEntry::Real => {
                let value = r.take_f64_native_endian(little_endian)?;
                out.insert(handle as u32, Sample::Float(value));
            }
            GeometryEntry::ZeroWidth => {}
            GeometryEntry::Logic(width) => {
                let bits = r.take(width as usize)?.to_vec();
                let tagged = is_tagged(&bits);
                out.insert(handle as u32, Sample::Logic { bits, tagged });
            }
        }
    }
    Ok(out)
}

fn is_tagged(bits: &[u8]) -> bool {
    bits.iter()
        .any(|&b| byte_table::classify(b).state.is_some_and(|s| s.is_x_like()))
}

/// Decodes one handle's VC chunk (spec.md §4.10 "VC-chunk decoding") and
/// invokes `emit` for every change record in chunk order.
#[allow(clippy::too_many_arguments)]
pub fn decode_chunk(
    vc_data: &[u8],
    offset: u64,
    length: u64,
    pack_type: PackType,
    geometry: GeometryEntry,
    data_type: DataType,
    timestamps: &[u64],
    little_endian: bool,
    mut emit: impl FnMut(u64, Sample) -> Result<()>,
) -> Result<()> {
    let start = (offset - 1) as usize;
    let end = start
        .checked_add(length as usize)
        .filter(|&e| e <= vc_data.len())
        .ok_or_else(|| DecodeError::invariant(vc_data, start as u64, "vc chunk range out of bounds"))?;
    let raw_chunk = &vc_data[start..end];

    let mut hr = ArrayReader::new(raw_chunk);
    let u = hr.take_varint_u64()?;
    let rest = hr.remaining();
    let stream = if u == 0 {
        rest.to_vec()
    } else {
        decompress::expect_full(decompress::decompress(pack_type.to_algorithm(), rest, u as usize)?)?
    };

    let mut sr = ArrayReader::new(&stream);
    let mut time_index: usize = 0;
    let lookup = |idx: usize| -> Result<u64> {
        timestamps
            .get(idx)
            .copied()
            .ok_or_else(|| DecodeError::invariant(&stream, idx as u64, "time index out of range"))
    };

    while !sr.is_empty() {
        let vli = sr.take_varint_u64()?;
        match geometry {
            GeometryEntry::Real => {
                time_index += (vli >> 1) as usize;
                let t = lookup(time_index)?;
                let value = sr.take_f64_native_endian(little_endian)?;
                emit(t, Sample::Float(value))?;
            }
            GeometryEntry::ZeroWidth => {
                time_index += (vli >> 1) as usize;
                let t = lookup(time_index)?;
                let len = sr.take_varint_u64()?;
                let payload = sr.take(len as usize)?;
                let sample = match data_type {
                    DataType::Event => Sample::Event { tagged: false },
                    _ => Sample::Text(String::from_utf8_lossy(payload).into_owned()),
                };
                emit(t, sample)?;
            }
            GeometryEntry::Logic(1) => {
                let tag = vli & 1;
                let shift = if tag == 0 { 2 } else { 4 };
                time_index += (vli >> shift) as usize;
                let t = lookup(time_index)?;
                let byte = if tag == 0 {
                    b'0' + (((vli >> 1) & 1) as u8)
                } else {
                    let code = ((vli >> 1) & 0x7) as u8;
                    byte_table::decode_state_nibble(code)
                        .map(|s| s.to_byte())
                        .ok_or_else(|| {
                            DecodeError::invariant(&stream, sr.position() as u64, "invalid single-bit state code")
                        })?
                };
                let tagged = is_tagged(&[byte]);
                emit(t, Sample::Logic { bits: vec![byte], tagged })?;
            }
            GeometryEntry::Logic(width) => {
                time_index += (vli >> 1) as usize;
                let t = lookup(time_index)?;
                let bits = if vli & 1 == 0 {
                    let nbytes = (width as usize).div_ceil(8);
                    let packed = sr.take(nbytes)?;
                    let mut bits = vec![0u8; width as usize];
                    for (ii, bit) in bits.iter_mut().enumerate() {
                        let byte_idx = ii / 8;
                        let bit_id = 7 - (ii & 0x7);
                        *bit = b'0' + ((packed[byte_idx] >> bit_id) & 1);
                    }
                    bits
                } else {
                    sr.take(width as usize)?.to_vec()
                };
                let tagged = is_tagged(&bits);
                emit(t, Sample::Logic { bits, tagged })?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varint::encode_i64;

    fn varint_i64(value: i64) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_i64(value, &mut buf);
        buf
    }

    #[test]
    fn dyn_alias2_skip_then_offset_scenario_6() {
        // spec.md §8 scenario 6: svarint +2 (even -> skip 1), svarint +3
        // (odd -> offset delta +1), across two handles.
        let mut chain = Vec::new();
        chain.extend(varint_i64(2));
        chain.extend(varint_i64(3));
        let slots = build_chain_dyn_alias2(&chain, 2, 100).unwrap();
        assert_eq!(slots[1], ChainSlot::Empty);
        assert_eq!(slots[2], ChainSlot::Data { offset: 1, length: 100 });
    }

    #[test]
    fn dyn_alias2_negative_magnitude_is_an_alias() {
        let mut chain = Vec::new();
        // handle 1: real data at offset 5
        chain.extend(varint_i64(11)); // tag=1, magnitude=5
        // handle 2: alias of handle 1
        chain.extend(varint_i64(-1)); // tag=1, magnitude=-1 -> target 1
        let slots = build_chain_dyn_alias2(&chain, 2, 100).unwrap();
        assert_eq!(slots[1], ChainSlot::Data { offset: 5, length: 96 });
        assert_eq!(slots[2], ChainSlot::Alias { target: 1 });
    }

    #[test]
    fn dyn_alias_offset_and_skip() {
        let mut chain = Vec::new();
        crate::varint::encode_u64(3, &mut chain); // odd -> offset delta 1
        crate::varint::encode_u64(2, &mut chain); // even nonzero -> skip 1
        let slots = build_chain_dyn_alias(&chain, 2, 50).unwrap();
        assert_eq!(slots[1], ChainSlot::Data { offset: 1, length: 50 });
        assert_eq!(slots[2], ChainSlot::Empty);
    }

    #[test]
    fn dyn_alias_zero_marks_alias_target() {
        let mut chain = Vec::new();
        crate::varint::encode_u64(0, &mut chain);
        crate::varint::encode_u64(7, &mut chain); // alias target handle 7
        let slots = build_chain_dyn_alias(&chain, 1, 10).unwrap();
        assert_eq!(slots[1], ChainSlot::Alias { target: 7 });
    }

    #[test]
    fn decode_chunk_single_bit_two_state() {
        // time_index delta 0, value '1': vli = (0 << 2) | (1 << 1) = 2
        let mut stream = Vec::new();
        crate::varint::encode_u64(2, &mut stream);
        let mut vc_data = Vec::new();
        crate::varint::encode_u64(0, &mut vc_data); // u == 0: raw stream follows
        vc_data.extend(&stream);
        let timestamps = vec![42u64];
        let mut seen = Vec::new();
        decode_chunk(
            &vc_data,
            1,
            vc_data.len() as u64,
            PackType::Zlib,
            GeometryEntry::Logic(1),
            DataType::Logic,
            &timestamps,
            true,
            |t, s| {
                seen.push((t, s));
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(seen, vec![(42, Sample::Logic { bits: vec![b'1'], tagged: false })]);
    }

    #[test]
    fn decode_chunk_multi_bit_packed() {
        // width 4, packed bits "1010" at time index 0: vli = (0 << 1) | 0 = 0
        let mut stream = Vec::new();
        crate::varint::encode_u64(0, &mut stream);
        stream.push(0b1010_0000); // MSB-first: bits 1,0,1,0 in the top nibble
        let mut vc_data = Vec::new();
        crate::varint::encode_u64(0, &mut vc_data);
        vc_data.extend(&stream);
        let timestamps = vec![0u64];
        let mut seen = Vec::new();
        decode_chunk(
            &vc_data,
            1,
            vc_data.len() as u64,
            PackType::Zlib,
            GeometryEntry::Logic(4),
            DataType::Logic,
            &timestamps,
            true,
            |t, s| {
                seen.push((t, s));
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(
            seen,
            vec![(0, Sample::Logic { bits: b"1010".to_vec(), tagged: false })]
        );
    }

    #[test]
    fn decode_frame_reads_real_and_logic_handles() {
        let mut frame = Vec::new();
        frame.extend(1.5f64.to_le_bytes());
        frame.extend(b"01");
        let geometry = vec![GeometryEntry::Real, GeometryEntry::Logic(2)];
        let values = decode_frame(&frame, 2, &geometry, true).unwrap();
        assert_eq!(values.get(&1), Some(&Sample::Float(1.5)));
        assert_eq!(
            values.get(&2),
            Some(&Sample::Logic { bits: b"01".to_vec(), tagged: false })
        );
    }
}
