// Copyright 2024 Cornell University
// released under BSD 3-Clause License
//
// Streaming decoders for VCD text dumps (Core A) and FST binary traces
// (Core B), sharing the byte-token table, varint codec, decompression
// gateway, byte-range reader, identifier index and record/signal model
// (spec.md §1-§3).

mod binary;
mod byte_table;
mod decompress;
mod error;
mod external;
mod fastlz;
mod ident_index;
mod model;
mod reader;
mod registry;
mod text;
mod varint;

#[cfg(test)]
mod testutil;

pub use binary::BinaryDecoder;
pub use error::{ByteContext, DecodeError, Result};
pub use external::{
    AcceptAll, Collaborators, DecimalDomainBaseParser, DecodeConfig, DefaultRecordFactory,
    DefaultSignalCreator, DefaultWriterFactory, DomainBaseParser, FilterExpr, NoGrouping,
    NullConsole, NullProgress, ProgressPort, ConsolePort, RecordFactory, RejectAll,
    SignalCreator, VariableGrouper, WriterFactory,
};
pub use model::{
    Base, BaseFactor, BitRange, BlackoutInterval, DataType, Handle, HandleBinding, Record, Sample,
    SampleWriter, Scope, ScopeId, TimeUnit, VecWriter, WaveformVariable,
};
pub use text::TextDecoder;
