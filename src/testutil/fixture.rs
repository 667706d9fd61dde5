// Copyright 2024 Cornell University
// released under BSD 3-Clause License
//
// Synthesizes minimal binary (FST-style) traces for `binary::tests`. The
// teacher's own write-side (`io.rs`'s `write_offset_table`/
// `write_value_changes`) is a pair of `todo!()` stubs, so the chain-table
// and VC-data encoding here is hand-built to match `binary::vc`'s decode
// exactly rather than adapted from teacher code; the header/geometry/
// hierarchy section shapes still follow `write_header`/`write_geometry`/
// `write_hierarchy_var`.

use std::io::Write;

use crate::varint::{encode_i64, encode_u64};

const HEADER_VERSION_MAX_LEN: usize = crate::binary::header::HEADER_VERSION_MAX_LEN;
const HEADER_DATE_MAX_LEN: usize = crate::binary::header::HEADER_DATE_MAX_LEN;

struct VarSpec {
    name: String,
    declared_handle: u32,
}

/// Builds a single-scope, scalar-only binary trace byte-for-byte, one
/// value-change block per call to [`FixtureBuilder::start_new_vc_block`].
/// Every variable is a single-bit `Wire`; aliasing is exercised through the
/// hierarchy's `declared_handle` field, not the chain-table alias schemes
/// (those are covered directly in `binary::vc`'s own unit tests).
pub struct FixtureBuilder {
    next_handle: u32,
    vars: Vec<VarSpec>,
    blocks: Vec<Vec<(u64, u32, u8)>>,
}

impl FixtureBuilder {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            vars: Vec::new(),
            blocks: vec![Vec::new()],
        }
    }

    /// Declares a scalar `Wire` variable. `declared_handle == 0` allocates a
    /// fresh handle; a non-zero value reuses that handle (spec.md §3 "a
    /// non-zero declared handle means alias to an existing handle"). Returns
    /// the variable's resolved handle.
    pub fn add_scalar_var(&mut self, name: &str, declared_handle: u32) -> u32 {
        let handle = if declared_handle == 0 {
            let h = self.next_handle;
            self.next_handle += 1;
            h
        } else {
            declared_handle
        };
        self.vars.push(VarSpec {
            name: name.to_string(),
            declared_handle,
        });
        handle
    }

    /// Records a single-bit change (`bit` must be `b'0'` or `b'1'`) on
    /// `handle` at `time`, in the current value-change block.
    pub fn add_change(&mut self, time: u64, handle: u32, bit: &[u8]) {
        self.blocks
            .last_mut()
            .expect("always at least one block")
            .push((time, handle, bit[0]));
    }

    /// Ends the current value-change block and starts a new one.
    pub fn start_new_vc_block(&mut self) {
        self.blocks.push(Vec::new());
    }

    pub fn build(&self) -> Vec<u8> {
        let max_handle = (self.next_handle.saturating_sub(1)) as u64;
        let non_empty: Vec<&Vec<(u64, u32, u8)>> =
            self.blocks.iter().filter(|b| !b.is_empty()).collect();

        let mut out = Vec::new();
        out.extend(self.header_block(max_handle, non_empty.len() as u64));
        out.extend(self.geometry_block(max_handle));
        out.extend(self.hierarchy_block());
        for block in non_empty {
            out.extend(Self::vc_block(block, max_handle));
        }
        out
    }

    fn wrap_block(type_byte: u8, payload: Vec<u8>) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 9);
        out.push(type_byte);
        out.extend(((payload.len() + 9) as u64).to_be_bytes());
        out.extend(payload);
        out
    }

    fn header_block(&self, max_handle: u64, section_count: u64) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend(0u64.to_be_bytes()); // start_time
        payload.extend(0u64.to_be_bytes()); // end_time
        payload.extend(std::f64::consts::E.to_be_bytes()); // endian test, big-endian
        payload.extend(0u64.to_be_bytes()); // memory_hint
        payload.extend(1u64.to_be_bytes()); // scope_count
        payload.extend((self.vars.len() as u64).to_be_bytes()); // var_count
        payload.extend(max_handle.to_be_bytes());
        payload.extend(section_count.to_be_bytes());
        payload.push(-9i8 as u8); // timescale exponent: ns
        payload.extend(vec![0u8; HEADER_VERSION_MAX_LEN]);
        payload.extend(vec![0u8; HEADER_DATE_MAX_LEN]);
        payload.push(0); // file_type
        payload.extend(0u64.to_be_bytes()); // time_zero
        Self::wrap_block(0, payload)
    }

    fn geometry_block(&self, max_handle: u64) -> Vec<u8> {
        let mut table = Vec::new();
        for _ in 0..max_handle {
            encode_u64(1, &mut table); // every variable here is a single-bit Wire
        }
        let mut payload = Vec::new();
        payload.extend((table.len() as u64).to_be_bytes());
        payload.extend(max_handle.to_be_bytes());
        payload.extend(table);
        Self::wrap_block(3, payload)
    }

    fn hierarchy_block(&self) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.push(254); // scope open
        raw.push(0); // kind
        raw.extend(b"top");
        raw.push(0);
        raw.push(0); // empty component cstr
        for var in &self.vars {
            raw.push(16); // VarTypeCode::Wire
            raw.push(0); // direction
            raw.extend(var.name.as_bytes());
            raw.push(0);
            encode_u64(1, &mut raw); // width
            encode_u64(var.declared_handle as u64, &mut raw);
        }
        raw.push(255); // scope close

        let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&raw).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut payload = Vec::new();
        payload.extend((raw.len() as u64).to_be_bytes());
        payload.extend(compressed);
        Self::wrap_block(4, payload)
    }

    /// Builds one `VcDataDynamicAlias2` block. Every declared handle gets a
    /// chain entry (`Data` for handles with changes in this block, a
    /// one-handle `skip` otherwise); the frame section is left empty
    /// (`frame_max_handle == 0`), so every sample in the fixture arrives
    /// through the chain/chunk path rather than an initial frame value.
    fn vc_block(changes: &[(u64, u32, u8)], max_handle: u64) -> Vec<u8> {
        let mut times: Vec<u64> = changes.iter().map(|c| c.0).collect();
        times.sort_unstable();
        times.dedup();
        let time_index_of = |t: u64| times.iter().position(|&x| x == t).unwrap();

        let mut handle_streams: Vec<Vec<u8>> = vec![Vec::new(); (max_handle + 1) as usize];
        let mut cursor: Vec<usize> = vec![0; (max_handle + 1) as usize];
        for &(t, h, bit) in changes {
            let idx = time_index_of(t);
            let delta = (idx - cursor[h as usize]) as u64;
            cursor[h as usize] = idx;
            let bitval = (bit == b'1') as u64;
            let vli = (delta << 2) | (bitval << 1);
            encode_u64(vli, &mut handle_streams[h as usize]);
        }

        let mut vc_data = Vec::new();
        let mut chain = Vec::new();
        let mut accumulator: u64 = 0;
        for h in 1..=max_handle {
            let stream = &handle_streams[h as usize];
            if stream.is_empty() {
                encode_i64(2, &mut chain); // tag=0 (skip), magnitude=1
                continue;
            }
            let start = vc_data.len() as u64;
            encode_u64(0, &mut vc_data); // u == 0: raw chunk bytes follow
            vc_data.extend(stream);
            let desired_offset = start + 1;
            let delta = (desired_offset - accumulator) as i64;
            accumulator = desired_offset;
            encode_i64((delta << 1) | 1, &mut chain); // tag=1 (data)
        }

        let mut time_bytes = Vec::new();
        let mut prev: i64 = 0;
        for &t in &times {
            let delta = t as i64 - prev;
            prev = t as i64;
            encode_u64(delta as u64, &mut time_bytes);
        }

        let mut body = Vec::new();
        encode_u64(0, &mut body); // frame_uncompressed_len
        encode_u64(0, &mut body); // frame_compressed_len
        encode_u64(0, &mut body); // frame_max_handle
        encode_u64(max_handle, &mut body);
        body.push(b'Z'); // pack_type (unused: every chunk is stored raw)
        body.extend(&vc_data);
        body.extend(&chain);
        body.extend((chain.len() as u64).to_be_bytes()); // chain trailer
        body.extend(&time_bytes);
        body.extend((time_bytes.len() as u64).to_be_bytes()); // time_uncompressed_len
        body.extend((time_bytes.len() as u64).to_be_bytes()); // time_compressed_len
        body.extend((times.len() as u64).to_be_bytes()); // time_entry_count

        let mut payload = Vec::new();
        payload.extend(times.first().copied().unwrap_or(0).to_be_bytes());
        payload.extend(times.last().copied().unwrap_or(0).to_be_bytes());
        payload.extend(0u64.to_be_bytes()); // reserved / memory-hint
        payload.extend(body);

        Self::wrap_block(8, payload) // VcDataDynamicAlias2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::framer;

    #[test]
    fn builds_a_frameable_block_stream() {
        let mut fixture = FixtureBuilder::new();
        let a = fixture.add_scalar_var("a", 0);
        fixture.add_change(10, a, b"1");
        let bytes = fixture.build();
        let blocks = framer::frame_blocks(&bytes).unwrap();
        assert_eq!(blocks.len(), 4); // header, geometry, hierarchy, one vc block
    }
}
