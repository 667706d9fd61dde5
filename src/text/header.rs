// Copyright 2024 Cornell University
// released under BSD 3-Clause License
//
// Text header command parser (spec.md §4.6, component C7). Recognizes the
// VCD command set, builds the scope tree, and accumulates Waveform Variable
// declarations into the shared registry (C6). Modeled as an explicit parser
// state struct per spec.md §9's redesign note ("mutable shared scope
// pointer... model as an explicit parser state struct").

use std::collections::HashMap;

use crate::error::{DecodeError, Result};
use crate::model::{BaseFactor, BitRange, DataType, Handle, Record, ScopeId, TimeUnit, WaveformVariable};
use crate::registry::VariableRegistry;

/// What the driving loop should do after dispatching one `$command` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// No header-level transition; keep reading header commands.
    Continue,
    /// `$enddefinitions` seen: header section is over.
    EndDefinitions,
    /// `$dumpvars` seen and initialization has not yet occurred: the driver
    /// must run record initialization (spec.md §4.7) before applying any
    /// value changes that follow in the same block.
    RequestInit,
}

/// Mutable parser state threaded through header command dispatch
/// (spec.md §9 "explicit parser state struct").
pub struct HeaderState {
    pub scope_stack: Vec<ScopeId>,
    pub base: Option<crate::model::Base>,
    /// Raw `$timezero` offset, added to every later raw timestamp
    /// (spec.md §4.6), applied after delay/dilate per spec.md §4.7.
    pub timezero: i64,
    /// Tracks spec.md §4.6's "If any scope is nested under root, hierarchy
    /// resolution mode is disabled" rule: true once any `$scope` has been
    /// pushed under a non-root scope.
    pub nested_scope_seen: bool,
    /// Handle (text index) -> declared bit width, used to enforce the
    /// "shared handles must have matching widths" invariant.
    shared_widths: HashMap<u64, u32>,
    pub enddefinitions_seen: bool,
}

impl HeaderState {
    pub fn new(root: ScopeId) -> Self {
        Self {
            scope_stack: vec![root],
            base: None,
            timezero: 0,
            nested_scope_seen: false,
            shared_widths: HashMap::new(),
            enddefinitions_seen: false,
        }
    }

    pub fn current_scope(&self) -> ScopeId {
        *self.scope_stack.last().expect("root scope always present")
    }
}

/// Splits a trailing `[n]` or `[n:m]` bit-range suffix off a reference name
/// (spec.md §4.6). Returns the bare name and, if present, the parsed range.
pub(crate) fn split_bit_range(
    raw: &str,
) -> std::result::Result<(&str, Option<BitRange>), (&'static str,)> {
    let trimmed = raw.trim_end();
    if !trimmed.ends_with(']') {
        return Ok((trimmed, None));
    }
    let Some(open) = trimmed.rfind('[') else {
        return Ok((trimmed, None));
    };
    let name = trimmed[..open].trim_end();
    let inner = &trimmed[open + 1..trimmed.len() - 1];
    if let Some((hi, lo)) = inner.split_once(':') {
        let hi: i64 = hi.trim().parse().map_err(|_| ("bad bit-range high index",))?;
        let lo: i64 = lo.trim().parse().map_err(|_| ("bad bit-range low index",))?;
        Ok((name, Some(BitRange::from_pair(hi, lo))))
    } else {
        let n: i64 = inner.trim().parse().map_err(|_| ("bad bit-range index",))?;
        Ok((name, Some(BitRange::from_pair(n, n))))
    }
}

/// Dispatches one fully-read `$command ... $end` block (spec.md §4.6).
/// `params` holds the whitespace-delimited tokens between the command name
/// and the literal `$end`, already joined with single spaces where the
/// grammar treats them as free text (reference name + bit-range).
pub fn dispatch_command(
    state: &mut HeaderState,
    record: &mut Record,
    registry: &mut VariableRegistry,
    bytes_for_errors: &[u8],
    offset: u64,
    name: &str,
    params: &[String],
) -> Result<CommandOutcome> {
    match name {
        "date" | "version" | "comment" => Ok(CommandOutcome::Continue),
        "timescale" => {
            parse_timescale(state, bytes_for_errors, offset, params)?;
            Ok(CommandOutcome::Continue)
        }
        "timezero" => {
            let raw = params
                .first()
                .ok_or_else(|| DecodeError::invalid_command(bytes_for_errors, offset))?;
            state.timezero = raw
                .trim()
                .parse()
                .map_err(|_| DecodeError::invalid_numeric(bytes_for_errors, offset))?;
            Ok(CommandOutcome::Continue)
        }
        "scope" => {
            if params.len() < 2 {
                return Err(DecodeError::invalid_command(bytes_for_errors, offset));
            }
            let scope_name = &params[1];
            let parent = state.current_scope();
            let child = match record.find_child(parent, scope_name) {
                Some(existing) => existing,
                None => record.add_scope(parent, scope_name.clone()),
            };
            if parent != record.root() {
                state.nested_scope_seen = true;
            }
            state.scope_stack.push(child);
            Ok(CommandOutcome::Continue)
        }
        "upscope" => {
            if state.scope_stack.len() > 1 {
                state.scope_stack.pop();
            }
            Ok(CommandOutcome::Continue)
        }
        "var" => {
            parse_var(state, record, registry, bytes_for_errors, offset, params)?;
            Ok(CommandOutcome::Continue)
        }
        "enddefinitions" => {
            state.enddefinitions_seen = true;
            Ok(CommandOutcome::EndDefinitions)
        }
        "dumpvars" => Ok(CommandOutcome::RequestInit),
        "dumpall" | "dumpon" | "dumpoff" => Ok(CommandOutcome::Continue),
        _ => Err(DecodeError::invalid_command(bytes_for_errors, offset)),
    }
}

fn parse_timescale(
    state: &mut HeaderState,
    bytes: &[u8],
    offset: u64,
    params: &[String],
) -> Result<()> {
    // accepted forms: "1ns" as one token, or "1 ns" as two tokens.
    let joined = params.join(" ");
    let joined = joined.trim();
    let split_at = joined
        .find(|c: char| c.is_alphabetic())
        .ok_or_else(|| DecodeError::invalid_numeric(bytes, offset))?;
    let (factor_str, unit_str) = joined.split_at(split_at);
    let factor_val: u64 = factor_str
        .trim()
        .parse()
        .map_err(|_| DecodeError::invalid_numeric(bytes, offset))?;
    let factor = BaseFactor::from_int(factor_val)
        .ok_or_else(|| DecodeError::invalid_numeric(bytes, offset))?;
    let unit = TimeUnit::from_str(unit_str.trim())
        .ok_or_else(|| DecodeError::invalid_command(bytes, offset))?;
    if state.base.is_some() {
        return Err(DecodeError::invariant(
            bytes,
            offset,
            "Domain Base may only be set once",
        ));
    }
    state.base = Some(crate::model::Base { factor, unit });
    Ok(())
}

fn parse_var(
    state: &mut HeaderState,
    record: &mut Record,
    registry: &mut VariableRegistry,
    bytes: &[u8],
    offset: u64,
    params: &[String],
) -> Result<()> {
    if params.len() < 4 {
        return Err(DecodeError::invalid_command(bytes, offset));
    }
    let data_type = match params[0].as_str() {
        "event" => DataType::Event,
        "real" => DataType::Real,
        "string" => DataType::Text,
        _ => DataType::Logic,
    };
    let width: u32 = params[1]
        .trim()
        .parse()
        .map_err(|_| DecodeError::invalid_numeric(bytes, offset))?;
    let id_token = params[2].as_bytes();
    let handle_index = Handle::text_token_to_index(id_token);

    let rest = params[3..].join(" ");
    let (name, range) = split_bit_range(&rest)
        .map_err(|(msg,)| DecodeError::invariant(bytes, offset, msg))?;

    if matches!(data_type, DataType::Real | DataType::Text) && range.is_some() {
        return Err(DecodeError::invariant(
            bytes,
            offset,
            format!("variable '{name}' of type {data_type:?} must not declare bit indices"),
        ));
    }

    let shared = if let Some(&prev_width) = state.shared_widths.get(&handle_index) {
        if prev_width != width {
            return Err(DecodeError::invariant(
                bytes,
                offset,
                format!(
                    "shared handle has mismatched widths: {prev_width} vs {width} for '{name}'"
                ),
            ));
        }
        true
    } else {
        state.shared_widths.insert(handle_index, width);
        false
    };
    // a handle seen a second time means *both* declarations are shared;
    // mark_existing_shared retro-fixes the first one the first time we
    // learn a handle is reused.
    let newly_shared = shared;

    let scope = state.current_scope();
    let variable = WaveformVariable {
        name: name.to_string(),
        handle: Handle::Text(handle_index),
        data_type,
        bit_width: width,
        range,
        scope,
        shared: newly_shared,
        type_description: params[0].clone(),
        index_base_name: None,
    };
    variable.validate()?;
    if newly_shared {
        mark_existing_shared(registry, handle_index);
    }
    registry.push(scope, variable);
    Ok(())
}

fn mark_existing_shared(registry: &mut VariableRegistry, handle_index: u64) {
    for (_, vars) in registry.per_scope_mut().iter_mut() {
        for v in vars.iter_mut() {
            if matches!(v.handle, Handle::Text(idx) if idx == handle_index) {
                v.shared = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_vector_bit_range() {
        let (name, range) = split_bit_range("data[7:0]").unwrap();
        assert_eq!(name, "data");
        let r = range.unwrap();
        assert_eq!((r.high, r.low), (7, 0));
    }

    #[test]
    fn splits_single_index() {
        let (name, range) = split_bit_range("q[3]").unwrap();
        assert_eq!(name, "q");
        assert_eq!(range.unwrap().width(), 1);
    }

    #[test]
    fn bare_name_has_no_range() {
        let (name, range) = split_bit_range("clk").unwrap();
        assert_eq!(name, "clk");
        assert!(range.is_none());
    }

    #[test]
    fn dispatch_var_rejects_mismatched_shared_width() {
        let mut record = Record::new(crate::model::Base {
            factor: BaseFactor::One,
            unit: TimeUnit::Ns,
        });
        let root = record.root();
        let mut state = HeaderState::new(root);
        let mut registry = VariableRegistry::new();
        dispatch_command(
            &mut state,
            &mut record,
            &mut registry,
            b"",
            0,
            "var",
            &["wire".into(), "1".into(), "!".into(), "a".into()],
        )
        .unwrap();
        let err = dispatch_command(
            &mut state,
            &mut record,
            &mut registry,
            b"",
            0,
            "var",
            &["wire".into(), "2".into(), "!".into(), "b".into()],
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::InvariantViolation { .. }));
    }

    #[test]
    fn dispatch_var_marks_both_declarations_shared() {
        let mut record = Record::new(crate::model::Base {
            factor: BaseFactor::One,
            unit: TimeUnit::Ns,
        });
        let root = record.root();
        let mut state = HeaderState::new(root);
        let mut registry = VariableRegistry::new();
        dispatch_command(
            &mut state,
            &mut record,
            &mut registry,
            b"",
            0,
            "var",
            &["wire".into(), "1".into(), "!".into(), "a".into()],
        )
        .unwrap();
        dispatch_command(
            &mut state,
            &mut record,
            &mut registry,
            b"",
            0,
            "var",
            &["wire".into(), "1".into(), "!".into(), "b".into()],
        )
        .unwrap();
        let flat = registry.flatten();
        assert!(flat.iter().all(|(_, v)| v.shared));
    }
}
