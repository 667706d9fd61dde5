// Copyright 2024 Cornell University
// released under BSD 3-Clause License
//
// Text value-change parser (spec.md §4.7, component C8): turns a decoded
// state/id/payload token triple into a `Sample`, then multiplexes it to
// every writer bound to the handle (spec.md §3 "two variables may share the
// same token"). The left-extension rule mirrors the teacher's
// `expand_special_vector_cases` (`buffer.rs`), inverted for decode: `0`/`1`
// zero-extend, any other state character extends with itself.

use crate::byte_table::LogicState;
use crate::error::Result;
use crate::model::{DataType, HandleBinding, Record, Sample};

fn write_to_all(record: &mut Record, binding: &HandleBinding, time: u64, sample: Sample) -> Result<()> {
    for &idx in &binding.writer_indices {
        record.writer_mut(idx).write(time, sample.clone())?;
    }
    Ok(())
}

/// Scalar change (spec.md §4.7): a single state character applied to a
/// handle. For multi-bit logic writers this is a single-bit vector update
/// with the higher bits forced to `0` ("preceding state = 0").
pub fn emit_scalar(
    record: &mut Record,
    binding: &HandleBinding,
    time: u64,
    state: LogicState,
) -> Result<()> {
    let tagged = state.is_x_like();
    let sample = match binding.data_type {
        DataType::Event => Sample::Event { tagged },
        DataType::Logic if binding.bit_width > 1 => {
            let mut bits = vec![b'0'; binding.bit_width as usize];
            *bits.last_mut().unwrap() = state.to_byte();
            Sample::Logic { bits, tagged }
        }
        DataType::Logic => Sample::Logic {
            bits: vec![state.to_byte()],
            tagged,
        },
        // real/text scalars are not produced by this token shape; treat the
        // state byte as a one-character textual value defensively.
        DataType::Real => Sample::Float(0.0),
        DataType::Text => Sample::Text((state.to_byte() as char).to_string()),
    };
    write_to_all(record, binding, time, sample)
}

/// Vector change (spec.md §4.7): `states` are the raw state characters as
/// received (MSB-first, possibly shorter than `binding.bit_width`).
pub fn emit_vector(
    record: &mut Record,
    binding: &HandleBinding,
    time: u64,
    states: &[LogicState],
) -> Result<()> {
    let width = binding.bit_width.max(1) as usize;
    // drop high (leading) bits if the received vector is over-wide.
    let truncated: &[LogicState] = if states.len() > width {
        &states[states.len() - width..]
    } else {
        states
    };
    let tagged = truncated.iter().any(|s| s.is_x_like());

    if matches!(binding.data_type, DataType::Event) {
        return write_to_all(record, binding, time, Sample::Event { tagged });
    }

    let mut bits = Vec::with_capacity(width);
    if truncated.len() < width {
        let lead = truncated.first().copied().unwrap_or(LogicState::Zero);
        let fill = match lead {
            LogicState::Zero | LogicState::One => LogicState::Zero,
            other => other,
        };
        bits.resize(width - truncated.len(), fill.to_byte());
    }
    bits.extend(truncated.iter().map(|s| s.to_byte()));
    write_to_all(record, binding, time, Sample::Logic { bits, tagged })
}

/// Real change (spec.md §4.7).
pub fn emit_real(record: &mut Record, binding: &HandleBinding, time: u64, value: f64) -> Result<()> {
    write_to_all(record, binding, time, Sample::Float(value))
}

/// String change (spec.md §4.7).
pub fn emit_string(record: &mut Record, binding: &HandleBinding, time: u64, payload: &str) -> Result<()> {
    write_to_all(
        record,
        binding,
        time,
        Sample::Text(payload.to_string()),
    )
}
