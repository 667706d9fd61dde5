// Copyright 2024 Cornell University
// released under BSD 3-Clause License
//
// External collaborator contracts (spec.md §6). These are the seams the
// decoders consume from surrounding infrastructure that spec.md explicitly
// puts out of scope: the record/signal store, sample writers, filter
// expressions, console logging, progress/cancellation. The decoders only
// ever hold `&mut dyn Trait` references to these; production wiring
// (regex-based filters, a real logger, a real record store) is not part of
// this crate.

use crate::model::{Base, Record, Sample, SampleWriter, ScopeId, WaveformVariable};

/// Recognized configuration keys and effects (spec.md §6).
///
/// No `Debug`/`Clone` derive: `include`/`exclude` hold `Box<dyn FilterExpr>`,
/// and `FilterExpr` carries neither bound. Used only behind `&DecodeConfig`,
/// so there is no need for either.
pub struct DecodeConfig {
    /// Non-empty regex string: split variable names to build extra scope
    /// levels after initial parse.
    pub hierarchy_regex: Option<String>,
    /// Enable vector grouping of single-bit declarations.
    pub vector_grouping: bool,
    /// If false, prune scopes that have no signals under them.
    pub keep_empty_scopes: bool,
    pub include: Option<Box<dyn FilterExpr>>,
    pub exclude: Option<Box<dyn FilterExpr>>,
    /// Time bounds in Domain Base units; `None` means unbounded.
    pub start: Option<u64>,
    pub end: Option<u64>,
    /// Integer offset in Domain Base units, added to every raw timestamp.
    pub delay: i64,
    /// Floating-point multiplier applied after delay.
    pub dilate: f64,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            hierarchy_regex: None,
            vector_grouping: false,
            keep_empty_scopes: true,
            include: None,
            exclude: None,
            start: None,
            end: None,
            delay: 0,
            dilate: 1.0,
        }
    }
}

impl DecodeConfig {
    /// Applies the delay/dilate time transform (spec.md §4.7, §6):
    /// `effective = (raw + delay) * dilate` when `dilate != 1`, else
    /// `raw + delay`.
    pub fn apply_time_transform(&self, raw: u64) -> u64 {
        self.apply_time_transform_with_extra_delay(raw, 0)
    }

    /// As [`Self::apply_time_transform`], but with an additional delay
    /// folded in before dilation (spec.md §4.7: "delay is the configured
    /// delay plus timezero").
    pub fn apply_time_transform_with_extra_delay(&self, raw: u64, extra_delay: i64) -> u64 {
        let shifted = (raw as i64)
            .saturating_add(self.delay)
            .saturating_add(extra_delay);
        if self.dilate != 1.0 {
            ((shifted as f64) * self.dilate).round() as u64
        } else {
            shifted.max(0) as u64
        }
    }

    /// Whether `time` (already transformed) falls within the configured
    /// `[start, end]` window.
    pub fn in_window(&self, time: u64) -> bool {
        if let Some(start) = self.start {
            if time < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if time > end {
                return false;
            }
        }
        true
    }
}

/// Constructed from a string as a union of regex and literal patterns;
/// tested against a variable's hierarchical name (spec.md §6).
pub trait FilterExpr {
    fn matches(&self, hierarchical_name: &str) -> bool;
}

/// A filter that accepts every name, used when no include/exclude
/// expression is configured.
pub struct AcceptAll;
impl FilterExpr for AcceptAll {
    fn matches(&self, _hierarchical_name: &str) -> bool {
        true
    }
}

/// A filter that accepts nothing, used as the default `exclude` expression
/// (excluding nothing) when none is configured.
pub struct RejectAll;
impl FilterExpr for RejectAll {
    fn matches(&self, _hierarchical_name: &str) -> bool {
        false
    }
}

/// Cooperative cancellation + progress reporting (spec.md §5, §6).
pub trait ProgressPort {
    fn is_cancelled(&self) -> bool {
        false
    }
    fn update(&mut self, _bytes_consumed: u64, _bytes_total: Option<u64>) {}
}

/// A `ProgressPort` that never cancels and ignores updates.
pub struct NullProgress;
impl ProgressPort for NullProgress {}

/// Leveled, positional-argument logging (spec.md §6). The crate never
/// links a logging backend itself — callers supply one, which is also how
/// the ambient "logging" concern from spec.md §2/§9 is carried without
/// introducing a dependency the teacher does not have.
pub trait ConsolePort {
    fn info(&mut self, message: &str);
    fn warning(&mut self, message: &str);
    fn error(&mut self, message: &str);
}

/// A `ConsolePort` that discards everything.
pub struct NullConsole;
impl ConsolePort for NullConsole {
    fn info(&mut self, _message: &str) {}
    fn warning(&mut self, _message: &str) {}
    fn error(&mut self, _message: &str) {}
}

/// Given a name and a [`Base`], create a record with a root scope
/// (spec.md §6 "Record factory").
pub trait RecordFactory {
    fn create(&mut self, name: &str, base: Base) -> Record;
}

/// Default factory: ignores `name`, builds a plain in-memory `Record`.
pub struct DefaultRecordFactory;
impl RecordFactory for DefaultRecordFactory {
    fn create(&mut self, _name: &str, base: Base) -> Record {
        Record::new(base)
    }
}

/// Identifies runs of compatible single-bit variables sharing a base name
/// and marks them as group members (spec.md §6 "Variable grouper").
pub trait VariableGrouper {
    fn group(&mut self, per_scope: &mut [(ScopeId, Vec<WaveformVariable>)], vector_resolution: bool);
}

/// Default grouper: a no-op, since grouping heuristics are genuinely
/// external per spec.md §1 ("Shared infrastructure... is OUT of scope").
pub struct NoGrouping;
impl VariableGrouper for NoGrouping {
    fn group(&mut self, _per_scope: &mut [(ScopeId, Vec<WaveformVariable>)], _vector_resolution: bool) {}
}

/// Creates one impulse signal per accepted variable, applying
/// include/exclude filters (spec.md §6 "Signal creator").
pub trait SignalCreator {
    fn create_signals(
        &mut self,
        record: &mut Record,
        base: Base,
        variables: &[(ScopeId, WaveformVariable)],
        include: &dyn FilterExpr,
        exclude: &dyn FilterExpr,
    ) -> Vec<bool>; // parallel to `variables`: true if accepted
}

/// Default signal creator: accepts a variable unless `exclude` matches it
/// and (when `include` is configured) `include` also matches it.
pub struct DefaultSignalCreator;
impl SignalCreator for DefaultSignalCreator {
    fn create_signals(
        &mut self,
        _record: &mut Record,
        _base: Base,
        variables: &[(ScopeId, WaveformVariable)],
        include: &dyn FilterExpr,
        exclude: &dyn FilterExpr,
    ) -> Vec<bool> {
        variables
            .iter()
            .map(|(_, v)| include.matches(&v.name) && !exclude.matches(&v.name))
            .collect()
    }
}

/// Produces sample writers for created signals, indexed by handle
/// (spec.md §6 "Writer factory").
pub trait WriterFactory {
    fn make_writer(&mut self, variable: &WaveformVariable) -> Box<dyn SampleWriter>;
}

/// Default factory: an in-memory [`crate::model::VecWriter`] per signal.
pub struct DefaultWriterFactory;
impl WriterFactory for DefaultWriterFactory {
    fn make_writer(&mut self, _variable: &WaveformVariable) -> Box<dyn SampleWriter> {
        Box::new(crate::model::VecWriter::default())
    }
}

/// Parses numeric configuration values (start/end/delay) expressed in the
/// Domain Base's unit (spec.md §6 "Domain-base parser").
pub trait DomainBaseParser {
    fn parse(&self, text: &str, base: Base) -> Option<u64>;
}

/// Default parser: plain decimal integer, ignoring `base` (unit-aware
/// parsing of human-entered strings like "10 ns" is genuinely external).
pub struct DecimalDomainBaseParser;
impl DomainBaseParser for DecimalDomainBaseParser {
    fn parse(&self, text: &str, _base: Base) -> Option<u64> {
        text.trim().parse().ok()
    }
}

/// Bundles every external collaborator a decoder needs for one run
/// (spec.md §6). Grouped into a single struct so the decoder constructors
/// take one argument instead of seven.
pub struct Collaborators<'c> {
    pub record_factory: &'c mut dyn RecordFactory,
    pub grouper: &'c mut dyn VariableGrouper,
    pub signal_creator: &'c mut dyn SignalCreator,
    pub writer_factory: &'c mut dyn WriterFactory,
    pub domain_parser: &'c mut dyn DomainBaseParser,
    pub progress: &'c mut dyn ProgressPort,
    pub console: &'c mut dyn ConsolePort,
}

#[allow(dead_code)]
fn assert_sample_shape(_: &Sample) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_signal_creator_applies_include_exclude() {
        struct Only(&'static str);
        impl FilterExpr for Only {
            fn matches(&self, name: &str) -> bool {
                name.contains(self.0)
            }
        }
        let mut creator = DefaultSignalCreator;
        let mut record = Record::new(Base {
            factor: crate::model::BaseFactor::One,
            unit: crate::model::TimeUnit::Ns,
        });
        let scope = record.root();
        let vars = vec![
            (
                scope,
                WaveformVariable {
                    name: "top.clk".into(),
                    handle: crate::model::Handle::Binary(1),
                    data_type: crate::model::DataType::Logic,
                    bit_width: 1,
                    range: None,
                    scope,
                    shared: false,
                    type_description: String::new(),
                    index_base_name: None,
                },
            ),
            (
                scope,
                WaveformVariable {
                    name: "top.rst".into(),
                    handle: crate::model::Handle::Binary(2),
                    data_type: crate::model::DataType::Logic,
                    bit_width: 1,
                    range: None,
                    scope,
                    shared: false,
                    type_description: String::new(),
                    index_base_name: None,
                },
            ),
        ];
        let include = Only("clk");
        let exclude = AcceptAll; // overridden below to "accept none"
        struct None_;
        impl FilterExpr for None_ {
            fn matches(&self, _name: &str) -> bool {
                false
            }
        }
        let _ = exclude;
        let accepted = creator.create_signals(&mut record, record.base, &vars, &include, &None_);
        assert_eq!(accepted, vec![true, false]);
    }

    #[test]
    fn time_transform_applies_delay_then_dilate() {
        let cfg = DecodeConfig {
            delay: 5,
            dilate: 2.0,
            ..Default::default()
        };
        assert_eq!(cfg.apply_time_transform(0), 10);
        assert_eq!(cfg.apply_time_transform(3), 16);
        assert_eq!(cfg.apply_time_transform(5), 20);
    }

    #[test]
    fn window_rejects_outside_bounds() {
        let cfg = DecodeConfig {
            start: Some(10),
            end: Some(20),
            ..Default::default()
        };
        assert!(!cfg.in_window(9));
        assert!(cfg.in_window(10));
        assert!(cfg.in_window(20));
        assert!(!cfg.in_window(21));
    }
}
