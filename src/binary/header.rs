// Copyright 2024 Cornell University
// released under BSD 3-Clause License
//
// Binary header / geometry / hierarchy decoding (spec.md §4.9, component
// C10). Fixed big-endian layout for the header block, a varint-per-handle
// geometry table (possibly zlib-compressed), and a tag-prefixed hierarchy
// entry stream (scopes, attributes, variable declarations). Mirrors the
// teacher's write-side counterparts (`write_header`, `write_geometry`,
// `write_hierarchy_scope`/`write_hierarchy_var` in `io.rs`), inverted.

use crate::decompress::{self, Algorithm};
use crate::error::{DecodeError, Result};
use crate::external::ConsolePort;
use crate::model::{DataType, Handle, Record, ScopeId, WaveformVariable};
use crate::reader::ArrayReader;
use crate::registry::VariableRegistry;

pub const HEADER_VERSION_MAX_LEN: usize = 128;
pub const HEADER_DATE_MAX_LEN: usize = 119;

/// Decoded fixed-layout header block (spec.md §4.9).
#[derive(Debug, Clone)]
pub struct BinHeader {
    pub start_time: u64,
    pub end_time: u64,
    /// Resolved byte order of the endian-test double; every other
    /// multi-byte field in the header (and the binary format generally,
    /// aside from varints) is big-endian regardless.
    pub little_endian: bool,
    pub memory_hint: u64,
    pub scope_count: u64,
    pub var_count: u64,
    pub max_handle: u64,
    pub section_count: u64,
    pub timescale_exponent: i8,
    pub version: String,
    pub date: String,
    pub file_type: u8,
    pub time_zero: i64,
    pub effective_start: u64,
    pub effective_end: u64,
}

const ENDIAN_TEST_VALUE: f64 = std::f64::consts::E;

/// Decodes the fixed-layout header block payload (the bytes after the
/// generic type+length the framer already consumed).
pub fn decode_header(bytes: &[u8]) -> Result<BinHeader> {
    let mut r = ArrayReader::new(bytes);
    let start_time = r.take_u64_be()?;
    let end_time = r.take_u64_be()?;

    let endian_bytes: [u8; 8] = r.take(8)?.try_into().unwrap();
    let little_endian = if f64::from_be_bytes(endian_bytes) == ENDIAN_TEST_VALUE {
        false
    } else if f64::from_le_bytes(endian_bytes) == ENDIAN_TEST_VALUE {
        true
    } else {
        return Err(DecodeError::invariant(
            bytes,
            16,
            "header endian-test double did not match e in either byte order",
        ));
    };

    let memory_hint = r.take_u64_be()?;
    let scope_count = r.take_u64_be()?;
    let var_count = r.take_u64_be()?;
    let max_handle = r.take_u64_be()?;
    let section_count = r.take_u64_be()?;
    let timescale_exponent = r.take_i8()?;
    let version = fixed_c_string(r.take(HEADER_VERSION_MAX_LEN)?);
    let date = fixed_c_string(r.take(HEADER_DATE_MAX_LEN)?);
    let file_type = r.take_u8()?;
    let time_zero = r.take_u64_be()? as i64;

    let effective_start = (start_time as i64 + time_zero).max(0) as u64;
    let effective_end = (end_time as i64 + 1 + time_zero).max(0) as u64;

    Ok(BinHeader {
        start_time,
        end_time,
        little_endian,
        memory_hint,
        scope_count,
        var_count,
        max_handle,
        section_count,
        timescale_exponent,
        version,
        date,
        file_type,
        time_zero,
        effective_start,
        effective_end,
    })
}

fn fixed_c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// One handle's width classification from the geometry block (spec.md
/// §4.9): real signals carry no bit width, zero-width logic covers both
/// declared-zero-width logic vectors and variable-length text/event
/// handles (disambiguated by the hierarchy's `VarTypeCode`), and every
/// other value is a logic bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryEntry {
    Real,
    ZeroWidth,
    Logic(u32),
}

impl GeometryEntry {
    pub fn from_varint(value: u64) -> Self {
        match value {
            0 => GeometryEntry::Real,
            0xFFFF_FFFF => GeometryEntry::ZeroWidth,
            width => GeometryEntry::Logic(width as u32),
        }
    }

    /// Number of bytes this handle's value occupies in a per-block frame
    /// section (spec.md §4.10 "Frame decoding"): 8 for real, one ASCII
    /// state byte per bit for logic, none for zero-width/variable-length.
    pub fn frame_bytes(&self) -> usize {
        match self {
            GeometryEntry::Real => 8,
            GeometryEntry::ZeroWidth => 0,
            GeometryEntry::Logic(width) => *width as usize,
        }
    }

    pub fn bit_width(&self) -> u32 {
        match self {
            GeometryEntry::Real => 0,
            GeometryEntry::ZeroWidth => 0,
            GeometryEntry::Logic(width) => *width,
        }
    }
}

/// Decodes one geometry block's payload, appending entries to `out` and
/// advancing `out` past any handles already assigned by an earlier block
/// (spec.md §4.9: "Geometry may be split across multiple blocks").
pub fn decode_geometry(bytes: &[u8], out: &mut Vec<GeometryEntry>) -> Result<()> {
    let mut r = ArrayReader::new(bytes);
    let uncompressed_len = r.take_u64_be()? as usize;
    let _max_handle_hint = r.take_u64_be()?;
    let compressed = r.remaining();

    let algo = if compressed.len() == uncompressed_len {
        Algorithm::None
    } else {
        Algorithm::Zlib
    };
    let payload = decompress::expect_full(decompress::decompress(algo, compressed, uncompressed_len)?)?;

    let mut pr = ArrayReader::new(&payload);
    while !pr.is_empty() {
        let value = pr.take_varint_u64()?;
        out.push(GeometryEntry::from_varint(value));
    }
    Ok(())
}

/// Hierarchy variable-type codes (spec.md §4.9/SPEC_FULL.md §4.9 addition),
/// enumerated exhaustively as the real FST wire format defines them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarTypeCode {
    Event,
    Integer,
    Parameter,
    Real,
    RealParameter,
    Reg,
    Supply0,
    Supply1,
    Time,
    Tri,
    TriAnd,
    TriOr,
    TriReg,
    Tri0,
    Tri1,
    WAnd,
    Wire,
    WOr,
    Port,
    SparseArray,
    RealTime,
    GenString,
    SvBit,
    SvLogic,
    SvInt,
    SvShortInt,
    SvLongInt,
    SvByte,
    SvEnum,
    SvShortReal,
}

impl VarTypeCode {
    pub fn from_code(code: u8) -> Result<Self> {
        use VarTypeCode::*;
        Ok(match code {
            0 => Event,
            1 => Integer,
            2 => Parameter,
            3 => Real,
            4 => RealParameter,
            5 => Reg,
            6 => Supply0,
            7 => Supply1,
            8 => Time,
            9 => Tri,
            10 => TriAnd,
            11 => TriOr,
            12 => TriReg,
            13 => Tri0,
            14 => Tri1,
            15 => WAnd,
            16 => Wire,
            17 => WOr,
            18 => Port,
            19 => SparseArray,
            20 => RealTime,
            21 => GenString,
            22 => SvBit,
            23 => SvLogic,
            24 => SvInt,
            25 => SvShortInt,
            26 => SvLongInt,
            27 => SvByte,
            28 => SvEnum,
            29 => SvShortReal,
            other => return Err(DecodeError::unsupported(format!("unknown variable type code {other}"))),
        })
    }

    pub fn data_type(self) -> DataType {
        use VarTypeCode::*;
        match self {
            Event => DataType::Event,
            Real | RealParameter | RealTime | SvShortReal => DataType::Real,
            GenString => DataType::Text,
            Integer | Parameter | Reg | Supply0 | Supply1 | Time | Tri | TriAnd | TriOr
            | TriReg | Tri0 | Tri1 | WAnd | Wire | WOr | Port | SparseArray | SvBit | SvLogic
            | SvInt | SvShortInt | SvLongInt | SvByte | SvEnum => DataType::Logic,
        }
    }
}

const TAG_SCOPE_OPEN: u8 = 254;
const TAG_SCOPE_CLOSE: u8 = 255;
const TAG_ATTR_OPEN: u8 = 252;
const TAG_ATTR_CLOSE: u8 = 253;

/// Parser state threaded through hierarchy entry dispatch, the binary
/// analogue of the text decoder's `HeaderState` (spec.md §9 "explicit
/// parser state struct").
pub struct HierState {
    pub scope_stack: Vec<ScopeId>,
    pub next_handle: u32,
}

impl HierState {
    pub fn new(root: ScopeId) -> Self {
        Self {
            scope_stack: vec![root],
            next_handle: 1,
        }
    }

    fn current_scope(&self) -> ScopeId {
        *self.scope_stack.last().expect("root scope always present")
    }
}

/// Decompresses a hierarchy block payload per the block-type-implied
/// algorithm (plain zlib for `Hierarchy`, single/dual-stage LZ4 for the
/// `HierarchyLZ4`/`HierarchyLZ4Duo` variants).
pub fn decompress_hierarchy(bytes: &[u8], algo: Algorithm) -> Result<Vec<u8>> {
    let mut r = ArrayReader::new(bytes);
    let uncompressed_len = r.take_u64_be()? as usize;
    let compressed = r.remaining();
    decompress::expect_full(decompress::decompress(algo, compressed, uncompressed_len)?)
}

/// Walks one decompressed hierarchy entry stream, registering scopes and
/// variables (spec.md §4.9). Variables with `declared_handle == 0` get the
/// next sequential handle; a non-zero declared handle means the variable
/// shares that handle's data with a previously declared one (spec.md §3
/// "non-zero declared handle...means alias to an existing handle").
///
/// Attribute entries and unrecognized entry tags are logged through
/// `console` to match the recoverable/fatal split in spec.md §4.12
/// ("unknown attribute tag" is recoverable; a genuinely unknown tag still
/// aborts the decode, since its payload length isn't known and the stream
/// can't be resumed past it, but the warning is emitted before bailing).
pub fn decode_hierarchy(
    payload: &[u8],
    record: &mut Record,
    registry: &mut VariableRegistry,
    state: &mut HierState,
    console: &mut dyn ConsolePort,
) -> Result<()> {
    let mut r = ArrayReader::new(payload);
    while !r.is_empty() {
        let tag = r.take_u8()?;
        match tag {
            TAG_SCOPE_OPEN => {
                let _kind = r.take_u8()?;
                let name = r.take_c_str()?.to_string();
                let _component = r.take_c_str()?;
                let parent = state.current_scope();
                let child = match record.find_child(parent, &name) {
                    Some(existing) => existing,
                    None => record.add_scope(parent, name),
                };
                state.scope_stack.push(child);
            }
            TAG_SCOPE_CLOSE => {
                if state.scope_stack.len() > 1 {
                    state.scope_stack.pop();
                }
            }
            TAG_ATTR_OPEN => {
                let kind = r.take_u8()?;
                let _sub_kind = r.take_u8()?;
                let name = r.take_c_str()?.to_string();
                let _argument = r.take_varint_u64()?;
                console.warning(&format!(
                    "hierarchy attribute (kind {kind}, name '{name}') recognized but applied as advisory only"
                ));
            }
            TAG_ATTR_CLOSE => {}
            code if code <= 29 => {
                let var_type = VarTypeCode::from_code(code)?;
                let _direction = r.take_u8()?;
                let raw_name = r.take_c_str()?.to_string();
                let width = r.take_varint_u64()? as u32;
                let declared_handle = r.take_varint_u64()? as u32;

                let (name, range) = crate::text::header::split_bit_range(&raw_name)
                    .map_err(|(msg,)| DecodeError::invariant(payload, r.position() as u64, msg))?;

                let handle = if declared_handle == 0 {
                    let h = state.next_handle;
                    state.next_handle += 1;
                    h
                } else {
                    declared_handle
                };
                let shared = declared_handle != 0;

                let scope = state.current_scope();
                let variable = WaveformVariable {
                    name: name.to_string(),
                    handle: Handle::Binary(handle),
                    data_type: var_type.data_type(),
                    bit_width: width,
                    range,
                    scope,
                    shared,
                    type_description: format!("{var_type:?}"),
                    index_base_name: None,
                };
                variable.validate()?;
                registry.push(scope, variable);
            }
            other => {
                console.warning(&format!(
                    "unrecognized hierarchy entry tag {other}, aborting decode (payload length unknown)"
                ));
                return Err(DecodeError::unsupported(format!(
                    "unrecognized hierarchy entry tag {other}"
                )));
            }
        }
    }
    Ok(())
}
