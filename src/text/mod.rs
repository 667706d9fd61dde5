// Copyright 2024 Cornell University
// released under BSD 3-Clause License
//
// Text Dump Decoder (spec.md §1 Core A): the streaming driver that ties the
// byte tokenizer, header command parser (C7, `header.rs`) and value-change
// parser (C8, `values.rs`) together over a refillable `StreamReader` (C4).
// Partial-token handling across buffer refills (spec.md §4.7) lives in
// [`next_token`]; everything downstream operates on fully-read tokens.

pub mod header;
pub mod values;

use std::collections::HashMap;
use std::io::Read;

use crate::byte_table::{classify, LogicState, TokenClass};
use crate::error::{DecodeError, Result};
use crate::external::{AcceptAll, Collaborators, DecodeConfig, RejectAll};
use crate::ident_index::IdentIndex;
use crate::model::{Handle, HandleBinding, Record};
use crate::reader::{StreamReader, TEXT_BUFFER_CAP};
use crate::registry::VariableRegistry;
use header::{CommandOutcome, HeaderState};

/// Outcome of reading one whitespace-delimited token from the stream.
enum TokenOutcome<'a> {
    Token(&'a [u8]),
    /// No complete token available yet; caller should refill and retry.
    NeedMore,
    /// True end-of-input with nothing left to tokenize.
    End,
}

/// Scans `buf` for the next whitespace-delimited token (spec.md §4.7
/// partial-token handling). Returns the number of bytes that are safe to
/// consume immediately (always true for skipped whitespace; only true for
/// the token body once it is known to be complete) alongside the outcome.
///
/// When `eof` is true, a token that runs to the end of `buf` without a
/// trailing whitespace byte is still considered complete — this is the
/// "caller appends a synthetic whitespace byte" rule from spec.md §4.7,
/// implemented here as "treat true end-of-input as a terminator" rather
/// than literally mutating the buffer.
fn next_token(buf: &[u8], eof: bool) -> (usize, TokenOutcome<'_>) {
    let mut i = 0;
    while i < buf.len() && classify(buf[i]).class == TokenClass::Whitespace {
        i += 1;
    }
    if i == buf.len() {
        return (i, if eof { TokenOutcome::End } else { TokenOutcome::NeedMore });
    }
    let start = i;
    while i < buf.len() && classify(buf[i]).class != TokenClass::Whitespace {
        i += 1;
    }
    if i == buf.len() && !eof {
        return (start, TokenOutcome::NeedMore);
    }
    (i, TokenOutcome::Token(&buf[start..i]))
}

/// Top-level command names whose body is a free-form parameter block
/// terminated by the literal `$end` token (spec.md §4.6).
fn is_param_block_command(name: &str) -> bool {
    matches!(
        name,
        "date" | "version" | "comment" | "timescale" | "timezero" | "scope" | "upscope" | "var"
            | "enddefinitions"
    )
}

/// Top-level command names whose body is a sequence of ordinary
/// value-change tokens terminated by the literal `$end` token (spec.md
/// §4.6: `dumpvars`/`dumpall`/`dumpon`/`dumpoff`).
fn is_value_block_command(name: &str) -> bool {
    matches!(name, "dumpvars" | "dumpall" | "dumpon" | "dumpoff")
}

/// The streaming text-dump decoder (Core A, spec.md §1/§4.6/§4.7).
pub struct TextDecoder<'c, R: Read> {
    reader: StreamReader<R>,
    demand: usize,
    config: &'c DecodeConfig,
    collab: Collaborators<'c>,

    header: HeaderState,
    registry: VariableRegistry,
    record: Option<Record>,
    handles: HashMap<u64, HandleBinding>,
    initialized: bool,
    enddefs_seen: bool,
    current_time: u64,
    byte_offset: u64,
}

impl<'c, R: Read> TextDecoder<'c, R> {
    pub fn new(producer: R, config: &'c DecodeConfig, collab: Collaborators<'c>) -> Self {
        // root scope id is fixed (0) regardless of which Record eventually
        // gets constructed; HeaderState is reseeded once the Record exists.
        Self {
            reader: StreamReader::new(producer, TEXT_BUFFER_CAP),
            demand: 1,
            config,
            collab,
            header: HeaderState::new(crate::model::ScopeId(0)),
            registry: VariableRegistry::new(),
            record: None,
            handles: HashMap::new(),
            initialized: false,
            enddefs_seen: false,
            current_time: 0,
            byte_offset: 0,
        }
    }

    /// Runs the decoder to completion, returning the sealed record.
    pub fn decode(mut self) -> Result<Record> {
        loop {
            let Some(token) = self.read_token()? else { break };
            if self.enddefs_seen {
                self.process_value_token(&token)?;
            } else {
                self.process_header_token(&token)?;
            }
            if self.collab.progress.is_cancelled() {
                return Err(DecodeError::CancelRequested);
            }
        }
        let mut record = self
            .record
            .take()
            .ok_or_else(|| DecodeError::invariant(&[], 0, "no timescale/variables observed"))?;
        let close_at = self.config.end.unwrap_or(self.current_time);
        if record.is_open() {
            record.close(close_at);
        }
        Ok(record)
    }

    fn read_token(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let have = self.reader.ensure_available(self.demand)?;
            let eof = self.reader.is_eof();
            let buf = self.reader.available();
            let (consumed, outcome) = next_token(buf, eof);
            self.byte_offset += consumed as u64;
            self.reader.consume(consumed);
            match outcome {
                TokenOutcome::Token(tok) => return Ok(Some(tok.to_vec())),
                TokenOutcome::End => return Ok(None),
                TokenOutcome::NeedMore => {
                    self.demand = (have + 64).max(self.demand * 2);
                }
            }
        }
    }

    fn read_token_required(&mut self) -> Result<Vec<u8>> {
        self.read_token()?.ok_or_else(|| {
            DecodeError::unexpected_eof(&[], self.byte_offset)
        })
    }

    // ---- header phase -----------------------------------------------

    fn process_header_token(&mut self, token: &[u8]) -> Result<()> {
        if token.is_empty() {
            return Ok(());
        }
        if classify(token[0]).class == TokenClass::CommandStart {
            self.dispatch_command_token(token)
        } else if classify(token[0]).class == TokenClass::TimeStart {
            // a time marker before $enddefinitions is unusual but legal in
            // some dumps that skip $enddefinitions entirely.
            self.process_value_token(token)
        } else {
            Err(DecodeError::invalid_token(token, self.byte_offset))
        }
    }

    fn dispatch_command_token(&mut self, token: &[u8]) -> Result<()> {
        let name = String::from_utf8_lossy(&token[1..]).to_string();
        if is_param_block_command(&name) {
            let params = self.read_params_until_end()?;
            self.run_header_command(&name, &params)?;
        } else if is_value_block_command(&name) {
            self.run_value_block_command(&name)?;
        } else {
            // forward-compatible: swallow an unrecognized command's
            // parameter block rather than failing the whole decode.
            self.collab
                .console
                .warning(&format!("unrecognized command ${name}, ignoring"));
            let _ = self.read_params_until_end()?;
        }
        Ok(())
    }

    fn read_params_until_end(&mut self) -> Result<Vec<String>> {
        let mut params = Vec::new();
        loop {
            let tok = self.read_token_required()?;
            if tok == b"$end" {
                return Ok(params);
            }
            params.push(String::from_utf8_lossy(&tok).to_string());
        }
    }

    fn run_header_command(&mut self, name: &str, params: &[String]) -> Result<()> {
        self.ensure_record_exists_if_needed(name, params)?;
        let record = self
            .record
            .as_mut()
            .ok_or_else(|| DecodeError::invariant(&[], self.byte_offset, "Domain Base not set"))?;
        let outcome = header::dispatch_command(
            &mut self.header,
            record,
            &mut self.registry,
            &[],
            self.byte_offset,
            name,
            params,
        )?;
        match outcome {
            CommandOutcome::Continue => {}
            CommandOutcome::EndDefinitions => self.enddefs_seen = true,
            CommandOutcome::RequestInit => self.maybe_initialize()?,
        }
        Ok(())
    }

    /// `$timescale` is the one command that needs a `Record` to not yet
    /// exist (it is what creates one); every other header command needs it
    /// to already exist. We lazily build the record right before parsing
    /// `timescale`'s own parameters complete, i.e. here.
    fn ensure_record_exists_if_needed(&mut self, name: &str, params: &[String]) -> Result<()> {
        if name != "timescale" || self.record.is_some() {
            return Ok(());
        }
        // peek the base the same way header::dispatch_command will, so the
        // record can exist before dispatch mutates header.scope_stack.
        let joined = params.join(" ");
        let joined = joined.trim();
        let split_at = joined
            .find(|c: char| c.is_alphabetic())
            .ok_or_else(|| DecodeError::invalid_numeric(&[], self.byte_offset))?;
        let (factor_str, unit_str) = joined.split_at(split_at);
        let factor_val: u64 = factor_str
            .trim()
            .parse()
            .map_err(|_| DecodeError::invalid_numeric(&[], self.byte_offset))?;
        let factor = crate::model::BaseFactor::from_int(factor_val)
            .ok_or_else(|| DecodeError::invalid_numeric(&[], self.byte_offset))?;
        let unit = crate::model::TimeUnit::from_str(unit_str.trim())
            .ok_or_else(|| DecodeError::invalid_command(&[], self.byte_offset))?;
        let base = crate::model::Base { factor, unit };
        let record = self.collab.record_factory.create("", base);
        self.header = HeaderState::new(record.root());
        self.record = Some(record);
        Ok(())
    }

    fn run_value_block_command(&mut self, name: &str) -> Result<()> {
        if name == "dumpvars" {
            self.maybe_initialize()?;
        }
        loop {
            let tok = self.read_token_required()?;
            if tok == b"$end" {
                return Ok(());
            }
            self.process_value_token(&tok)?;
        }
    }

    // ---- initialization (spec.md §4.7 steps 1-6) ----------------------

    fn maybe_initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let base = {
            let record = self
                .record
                .as_ref()
                .ok_or_else(|| DecodeError::invariant(&[], self.byte_offset, "no $timescale seen"))?;
            record.base
        };

        self.collab
            .grouper
            .group(self.registry.per_scope_mut(), self.config.vector_grouping);

        let flat = self.registry.flatten();
        let include = self.config.include.as_deref().unwrap_or(&AcceptAll);
        let exclude = self.config.exclude.as_deref().unwrap_or(&RejectAll);
        let record = self.record.as_mut().unwrap();
        let accepted = self
            .collab
            .signal_creator
            .create_signals(record, base, &flat, include, exclude);

        for (accept, (_, var)) in accepted.into_iter().zip(flat.into_iter()) {
            if !accept {
                continue;
            }
            let writer = self.collab.writer_factory.make_writer(&var);
            let idx = record.push_writer(writer);
            let handle_idx = var.handle.as_index();
            self.handles
                .entry(handle_idx)
                .and_modify(|b| b.writer_indices.push(idx))
                .or_insert_with(|| HandleBinding {
                    writer_indices: vec![idx],
                    data_type: var.data_type,
                    bit_width: var.bit_width,
                });
        }

        if !self.config.keep_empty_scopes {
            record.prune_empty_scopes();
        }

        // `$dumpvars` can trigger initialization before any `#time` marker
        // is seen (spec.md §4.7 "Record initialization occurs on the first
        // time marker or explicit dumpvars command"); `handle_time_marker`
        // only opens the record from its own call site, so open it here too
        // at the effective start (time 0 when no marker has run yet) or the
        // initial values inside the dumpvars block would have nowhere to
        // land (`should_emit` requires an open record).
        if !record.is_open() && record.closed_at().is_none() {
            let after_start = self.config.start.map_or(true, |s| self.current_time >= s);
            if after_start {
                record.open(self.current_time);
            }
        }

        self.initialized = true;
        Ok(())
    }

    // ---- value-change phase (spec.md §4.7, component C8) --------------

    fn process_value_token(&mut self, token: &[u8]) -> Result<()> {
        if token.is_empty() {
            return Ok(());
        }
        let entry = classify(token[0]);
        match entry.class {
            TokenClass::TimeStart => self.handle_time_marker(token),
            TokenClass::CommandStart => {
                if token == b"$end" {
                    // a bare terminator outside a block we opened; ignore.
                    Ok(())
                } else {
                    self.dispatch_command_token(token)
                }
            }
            TokenClass::Scalar2State | TokenClass::Scalar4State | TokenClass::Scalar16State => {
                let state = entry.state.unwrap();
                let id = &token[1..];
                self.apply_scalar(state, id)
            }
            TokenClass::VectorStart => {
                let states = parse_state_run(&token[1..], self.byte_offset)?;
                let id = self.read_token_required()?;
                self.apply_vector(&states, &id)
            }
            TokenClass::RealStart => {
                let text = std::str::from_utf8(&token[1..])
                    .map_err(|_| DecodeError::invalid_numeric(token, self.byte_offset))?;
                let value: f64 = text
                    .parse()
                    .map_err(|_| DecodeError::invalid_numeric(token, self.byte_offset))?;
                let id = self.read_token_required()?;
                self.apply_real(value, &id)
            }
            TokenClass::StringStart => {
                let payload = String::from_utf8_lossy(&token[1..]).to_string();
                let id = self.read_token_required()?;
                self.apply_string(&payload, &id)
            }
            TokenClass::Whitespace | TokenClass::Invalid => {
                Err(DecodeError::invalid_token(token, self.byte_offset))
            }
        }
    }

    fn handle_time_marker(&mut self, token: &[u8]) -> Result<()> {
        let digits = std::str::from_utf8(&token[1..])
            .map_err(|_| DecodeError::invalid_numeric(token, self.byte_offset))?;
        let raw: u64 = digits
            .parse()
            .map_err(|_| DecodeError::invalid_numeric(token, self.byte_offset))?;
        let extra_delay = self.header.timezero;
        let current = self.config.apply_time_transform_with_extra_delay(raw, extra_delay);
        self.current_time = current;

        if !self.initialized {
            self.maybe_initialize()?;
        }
        self.collab.progress.update(self.byte_offset, None);

        let Some(record) = self.record.as_mut() else {
            return Ok(());
        };
        if !record.is_open() && record.closed_at().is_none() {
            let after_start = self.config.start.map_or(true, |s| current >= s);
            if after_start {
                record.open(current);
            }
        }
        if record.is_open() {
            if let Some(end) = self.config.end {
                if current > end {
                    record.close(current);
                }
            }
        }
        Ok(())
    }

    fn should_emit(&self) -> bool {
        self.initialized
            && self
                .record
                .as_ref()
                .map(|r| r.is_open())
                .unwrap_or(false)
            && self.config.in_window(self.current_time)
    }

    fn apply_scalar(&mut self, state: LogicState, id: &[u8]) -> Result<()> {
        if !self.should_emit() {
            return Ok(());
        }
        let handle = Handle::text_token_to_index(id);
        let Some(binding) = self.handles.get(&handle).cloned() else {
            return Ok(());
        };
        let record = self.record.as_mut().unwrap();
        values::emit_scalar(record, &binding, self.current_time, state)
    }

    fn apply_vector(&mut self, states: &[LogicState], id: &[u8]) -> Result<()> {
        if !self.should_emit() {
            return Ok(());
        }
        let handle = Handle::text_token_to_index(id);
        let Some(binding) = self.handles.get(&handle).cloned() else {
            return Ok(());
        };
        let record = self.record.as_mut().unwrap();
        values::emit_vector(record, &binding, self.current_time, states)
    }

    fn apply_real(&mut self, value: f64, id: &[u8]) -> Result<()> {
        if !self.should_emit() {
            return Ok(());
        }
        let handle = Handle::text_token_to_index(id);
        let Some(binding) = self.handles.get(&handle).cloned() else {
            return Ok(());
        };
        let record = self.record.as_mut().unwrap();
        values::emit_real(record, &binding, self.current_time, value)
    }

    fn apply_string(&mut self, payload: &str, id: &[u8]) -> Result<()> {
        if !self.should_emit() {
            return Ok(());
        }
        let handle = Handle::text_token_to_index(id);
        let Some(binding) = self.handles.get(&handle).cloned() else {
            return Ok(());
        };
        let record = self.record.as_mut().unwrap();
        values::emit_string(record, &binding, self.current_time, payload)
    }
}

fn parse_state_run(bytes: &[u8], offset: u64) -> Result<Vec<LogicState>> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        let entry = classify(b);
        match entry.state {
            Some(state)
                if matches!(
                    entry.class,
                    TokenClass::Scalar2State | TokenClass::Scalar4State | TokenClass::Scalar16State
                ) =>
            {
                out.push(state)
            }
            _ => return Err(DecodeError::invalid_token(bytes, offset)),
        }
    }
    Ok(out)
}

/// Silences the unused-import warning for [`IdentIndex`]; the text decoder
/// deliberately uses a plain `HashMap` for its (typically sparse, base-94)
/// handle space instead — see `binary::vc` for the dense-array path this
/// type exists for.
#[allow(dead_code)]
fn _unused_ident_index_marker() -> Option<IdentIndex<()>> {
    None
}
