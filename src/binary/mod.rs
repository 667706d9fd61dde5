// Copyright 2024 Cornell University
// released under BSD 3-Clause License
//
// Binary Trace Decoder (spec.md §1 Core B): the two-pass driver (spec.md
// §4.11) that ties the block framer (C9), header/geometry/hierarchy decoder
// (C10), value-change block decoder (C11) and alias propagator (C12)
// together into one `decode()` call. Phase 1 frames every block, decodes
// the header/geometry/hierarchy, builds the handle index and creates
// signals/writers; phase 2 walks the queued value-change blocks in file
// order and emits samples, because geometry/hierarchy can follow
// value-change blocks in file order but widths and handles must be known
// before a value-change chunk can be interpreted.

pub mod alias;
pub mod framer;
pub mod header;
pub mod vc;

use std::io::Read;

use crate::error::{DecodeError, Result};
use crate::external::{AcceptAll, Collaborators, DecodeConfig, RejectAll};
use crate::ident_index::IdentIndex;
use crate::model::{Base, BlackoutInterval, HandleBinding, Record};
use crate::reader::ArrayReader;
use crate::registry::VariableRegistry;

use framer::{BlockKind, VcVariant};
use header::{BinHeader, GeometryEntry, HierState};
use vc::{ChainSlot, PackType};

/// The binary trace decoder (Core B, spec.md §1/§4.8-§4.11).
pub struct BinaryDecoder<'c, R: Read> {
    producer: R,
    config: &'c DecodeConfig,
    collab: Collaborators<'c>,
}

impl<'c, R: Read> BinaryDecoder<'c, R> {
    pub fn new(producer: R, config: &'c DecodeConfig, collab: Collaborators<'c>) -> Self {
        Self {
            producer,
            config,
            collab,
        }
    }

    /// Runs the decoder to completion, returning the sealed record.
    pub fn decode(self) -> Result<Record> {
        let BinaryDecoder {
            producer,
            config,
            mut collab,
        } = self;

        let mut bin_header: Option<BinHeader> = None;
        let mut record: Option<Record> = None;
        let mut hier_state: Option<HierState> = None;
        let mut registry = VariableRegistry::new();
        let mut geometry: Vec<GeometryEntry> = Vec::new();
        let mut queued_vc: Vec<(VcVariant, Vec<u8>)> = Vec::new();
        let mut blackouts: Vec<BlackoutInterval> = Vec::new();

        // ---- phase 1: frame every block, decode header/geometry/hierarchy,
        // queue value-change blocks for the second pass (spec.md §4.11).
        framer::frame_stream(producer, |block| {
            if collab.progress.is_cancelled() {
                return Err(DecodeError::CancelRequested);
            }
            match block {
                BlockKind::Header(bytes) => {
                    if bin_header.is_some() {
                        return Err(DecodeError::invariant(&bytes, 0, "duplicate header block"));
                    }
                    let h = header::decode_header(&bytes)?;
                    let (unit, factor) = crate::model::TimeUnit::from_exponent_base(h.timescale_exponent)
                        .ok_or_else(|| {
                            DecodeError::invariant(&bytes, 0, "unsupported timescale exponent")
                        })?;
                    let base = Base { factor, unit };
                    let rec = collab.record_factory.create("", base);
                    hier_state = Some(HierState::new(rec.root()));
                    bin_header = Some(h);
                    record = Some(rec);
                    Ok(())
                }
                BlockKind::Geometry(bytes) => {
                    header::decode_geometry(&bytes, &mut geometry)?;
                    Ok(())
                }
                BlockKind::Hierarchy(bytes, algo) => {
                    let (record, hier_state) = record
                        .as_mut()
                        .zip(hier_state.as_mut())
                        .ok_or_else(|| DecodeError::invariant(&bytes, 0, "hierarchy block before header"))?;
                    let payload = header::decompress_hierarchy(&bytes, algo)?;
                    header::decode_hierarchy(&payload, record, &mut registry, hier_state, collab.console)
                }
                BlockKind::ValueChange(variant, bytes) => {
                    if record.is_none() {
                        return Err(DecodeError::invariant(&bytes, 0, "value-change block before header"));
                    }
                    queued_vc.push((variant, bytes));
                    Ok(())
                }
                BlockKind::Blackout(bytes) => {
                    blackouts.extend(decode_blackout(&bytes)?);
                    Ok(())
                }
                BlockKind::Skip => Ok(()),
                BlockKind::Unknown(code) => {
                    collab
                        .console
                        .warning(&format!("unrecognized block type {code}, skipping"));
                    Ok(())
                }
            }
        })?;

        let bin_header = bin_header
            .ok_or_else(|| DecodeError::invariant(&[], 0, "no header block observed"))?;
        let mut record = record.ok_or_else(|| DecodeError::invariant(&[], 0, "no header block observed"))?;
        let queued_count = queued_vc.len();

        // ---- spec.md §4.7 steps 2-4 analogue: group, create signals, create
        // writers, build the handle index (spec.md §4.5, component C5).
        collab
            .grouper
            .group(registry.per_scope_mut(), config.vector_grouping);
        let flat = registry.flatten();
        let include = config.include.as_deref().unwrap_or(&AcceptAll);
        let exclude = config.exclude.as_deref().unwrap_or(&RejectAll);
        let accepted = collab
            .signal_creator
            .create_signals(&mut record, record.base, &flat, include, exclude);

        let mut handle_nums: Vec<u64> = Vec::new();
        for (accept, (_, var)) in accepted.iter().zip(flat.iter()) {
            if *accept {
                handle_nums.push(var.handle.as_index());
            }
        }
        let (mut handle_index, index_kind) = IdentIndex::<HandleBinding>::from_handles(handle_nums);
        collab.console.info(&format!(
            "binary decode: identifier index selected {index_kind:?} for {} handles",
            accepted.iter().filter(|a| **a).count()
        ));

        for (accept, (_, var)) in accepted.into_iter().zip(flat.into_iter()) {
            if !accept {
                continue;
            }
            let writer = collab.writer_factory.make_writer(&var);
            let idx = record.push_writer(writer);
            let handle_idx = var.handle.as_index();
            match handle_index.get_mut(handle_idx) {
                Some(binding) => binding.writer_indices.push(idx),
                None => handle_index.insert(
                    handle_idx,
                    HandleBinding {
                        writer_indices: vec![idx],
                        data_type: var.data_type,
                        bit_width: var.bit_width,
                    },
                ),
            }
        }

        if !config.keep_empty_scopes {
            record.prune_empty_scopes();
        }

        let effective_start = config.apply_time_transform(bin_header.effective_start);
        let effective_end = config.apply_time_transform(bin_header.effective_end);
        record.open(effective_start);
        let mut last_time = effective_start;

        // ---- phase 2: walk the queued value-change blocks in file order
        // and emit samples (spec.md §4.10/§4.11).
        for (variant, payload) in &queued_vc {
            if collab.progress.is_cancelled() {
                return Err(DecodeError::CancelRequested);
            }
            let block = vc::parse(payload, bin_header.time_zero)?;
            let chain = match vc::build_chain(*variant, &block.chain_bytes, block.vc_max_handle, block.vc_data.len() as u64) {
                Ok(chain) => chain,
                Err(DecodeError::UnsupportedFeature { message }) => {
                    collab
                        .console
                        .warning(&format!("skipping unsupported value-change block: {message}"));
                    continue;
                }
                Err(e) => return Err(e),
            };
            let alias_map = alias::build_alias_map(&chain)?;

            let begin_time = config.apply_time_transform(
                (block.begin_time as i64 + bin_header.time_zero).max(0) as u64,
            );
            last_time = last_time.max(begin_time);

            let initial = vc::decode_frame(&block.frame, block.frame_max_handle, &geometry, bin_header.little_endian)?;
            for (&handle, sample) in &initial {
                if !config.in_window(begin_time) {
                    continue;
                }
                if let Some(binding) = handle_index.get_mut(handle as u64) {
                    for &idx in &binding.writer_indices {
                        record.writer_mut(idx).write(begin_time, sample.clone())?;
                    }
                }
            }

            for (handle, slot) in chain.iter().enumerate().skip(1) {
                let ChainSlot::Data { offset, length } = *slot else { continue };
                if length == 0 {
                    continue;
                }
                let handle = handle as u32;
                let Some(binding) = handle_index.get(handle as u64).cloned() else { continue };
                let geom = geometry
                    .get((handle - 1) as usize)
                    .copied()
                    .unwrap_or(GeometryEntry::ZeroWidth);
                let targets: Vec<u32> = std::iter::once(handle)
                    .chain(alias_map.get(&handle).into_iter().flatten().copied())
                    .collect();

                let decode_result = decode_one_chunk(
                    &block.vc_data,
                    offset,
                    length,
                    pack_type_of(*variant, &block),
                    geom,
                    binding.data_type,
                    &block.timestamps,
                    bin_header.little_endian,
                    config,
                    &mut |t, sample| {
                        for &target in &targets {
                            if let Some(tbinding) = handle_index.get_mut(target as u64) {
                                for &idx in &tbinding.writer_indices {
                                    record.writer_mut(idx).write(t, sample.clone())?;
                                }
                            }
                        }
                        Ok(())
                    },
                );
                match decode_result {
                    Ok(()) => {}
                    Err(e) => {
                        collab
                            .console
                            .warning(&format!("skipping handle {handle} after decode error: {e}"));
                    }
                }
            }
            if let Some(&last_ts) = block.timestamps.last() {
                last_time = last_time.max(config.apply_time_transform(last_ts));
            }
        }

        debug_assert_eq!(queued_count, queued_vc.len());

        let close_at = config.end.unwrap_or(effective_end.max(last_time));
        if record.is_open() {
            record.close(close_at);
        }
        let _ = blackouts; // parsed, never applied (spec.md §9 open question)
        Ok(record)
    }
}

/// Resolves the pack type for a value-change block. `vc::parse` already
/// decoded it from the block's VC header; re-derived here only for the
/// rare case a future variant needs per-chunk overrides.
fn pack_type_of(_variant: VcVariant, block: &vc::VcBlock) -> PackType {
    block.pack_type
}

/// Decodes one handle's chunk and applies the configured time transform
/// and `[start, end]` window (spec.md §6) to every emitted sample before
/// invoking `emit`.
#[allow(clippy::too_many_arguments)]
fn decode_one_chunk(
    vc_data: &[u8],
    offset: u64,
    length: u64,
    pack_type: PackType,
    geometry: GeometryEntry,
    data_type: crate::model::DataType,
    timestamps: &[u64],
    little_endian: bool,
    config: &DecodeConfig,
    emit: &mut dyn FnMut(u64, crate::model::Sample) -> Result<()>,
) -> Result<()> {
    vc::decode_chunk(
        vc_data,
        offset,
        length,
        pack_type,
        geometry,
        data_type,
        timestamps,
        little_endian,
        |t, sample| {
            let transformed = config.apply_time_transform(t);
            if !config.in_window(transformed) {
                return Ok(());
            }
            emit(transformed, sample)
        },
    )
}

/// Decodes a blackout block's payload: a varint count followed by that many
/// `(active: u8, delta-time: varint)` pairs, the deltas accumulating into
/// absolute timestamps. Recognized per spec.md §4.8/§9 but never applied —
/// see [`crate::model::BlackoutInterval`].
fn decode_blackout(bytes: &[u8]) -> Result<Vec<BlackoutInterval>> {
    let mut r = ArrayReader::new(bytes);
    if r.is_empty() {
        return Ok(Vec::new());
    }
    let count = r.take_varint_u64()?;
    let mut out = Vec::with_capacity(count as usize);
    let mut acc = 0u64;
    for _ in 0..count {
        let active = r.take_u8()? != 0;
        let delta = r.take_varint_u64()?;
        acc = acc.saturating_add(delta);
        out.push(BlackoutInterval { active, time: acc });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{
        Collaborators, DecimalDomainBaseParser, DefaultRecordFactory, DefaultSignalCreator,
        DefaultWriterFactory, NoGrouping, NullConsole, NullProgress,
    };
    use crate::model::{Sample, VecWriter};
    use crate::testutil::fixture::FixtureBuilder;

    fn decode_fixture(bytes: &[u8], config: &DecodeConfig) -> Record {
        let mut record_factory = DefaultRecordFactory;
        let mut grouper = NoGrouping;
        let mut signal_creator = DefaultSignalCreator;
        let mut writer_factory = DefaultWriterFactory;
        let mut domain_parser = DecimalDomainBaseParser;
        let mut progress = NullProgress;
        let mut console = NullConsole;
        let collab = Collaborators {
            record_factory: &mut record_factory,
            grouper: &mut grouper,
            signal_creator: &mut signal_creator,
            writer_factory: &mut writer_factory,
            domain_parser: &mut domain_parser,
            progress: &mut progress,
            console: &mut console,
        };
        let decoder = BinaryDecoder::new(bytes, config, collab);
        decoder.decode().unwrap()
    }

    fn samples(record: &Record, idx: usize) -> Vec<(u64, Sample)> {
        record
            .writer(idx)
            .as_any()
            .downcast_ref::<VecWriter>()
            .unwrap()
            .samples
            .clone()
    }

    // spec.md §8 scenario 5: smallest alias — handle 2 declared as an alias
    // of handle 1; emissions on handle 1's chunk appear identically on
    // signal 2.
    #[test]
    fn scenario_5_smallest_alias() {
        let mut fixture = FixtureBuilder::new();
        let a = fixture.add_scalar_var("a", 0);
        let _b = fixture.add_scalar_var("b", a); // declared_handle = a: shares a's handle
        fixture.add_change(10, a, b"1");
        fixture.add_change(20, a, b"0");
        let bytes = fixture.build();

        let config = DecodeConfig::default();
        let record = decode_fixture(&bytes, &config);
        let a = samples(&record, 0);
        let b = samples(&record, 1);
        assert_eq!(a, b);
        assert!(a.iter().any(|(t, _)| *t == 10));
        assert!(a.iter().any(|(t, _)| *t == 20));
    }

    #[test]
    fn phase_two_consumes_every_queued_block() {
        // spec.md §8 universal invariant: queued == consumed. Exercised
        // indirectly: a two-block trace must not panic and must emit
        // samples from both blocks.
        let mut fixture = FixtureBuilder::new();
        let a = fixture.add_scalar_var("a", 0);
        fixture.add_change(5, a, b"1");
        fixture.start_new_vc_block();
        fixture.add_change(15, a, b"0");
        let bytes = fixture.build();
        let record = decode_fixture(&bytes, &DecodeConfig::default());
        let a = samples(&record, 0);
        assert!(a.iter().any(|(t, _)| *t == 5));
        assert!(a.iter().any(|(t, _)| *t == 15));
    }
}
