// Copyright 2024 Cornell University
// released under BSD 3-Clause License
//
// Small utility that reads a VCD text dump or an FST binary trace and
// prints its domain base, lifecycle bounds and scope tree. Mirrors the
// teacher's `2fst.rs`: a one-screen `clap` front end over the library,
// nothing more.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

use clap::Parser;
use wavedump_decode::{
    BinaryDecoder, Collaborators, DecimalDomainBaseParser, DecodeConfig, DefaultRecordFactory,
    DefaultSignalCreator, DefaultWriterFactory, NoGrouping, NullProgress, Record, Scope, ScopeId,
};

#[derive(Parser, Debug)]
#[command(name = "wave-info")]
#[command(author = "Kevin Laeufer <laeufer@cornell.edu>")]
#[command(version)]
#[command(about = "Prints the scope tree and lifecycle bounds of a VCD or FST trace.")]
struct Args {
    #[arg(value_name = "INPUT", index = 1)]
    input: PathBuf,
    /// Force VCD text parsing instead of sniffing the first byte.
    #[arg(long)]
    vcd: bool,
    /// Force FST binary parsing instead of sniffing the first byte.
    #[arg(long)]
    fst: bool,
}

/// Logs warnings/errors to stderr, info to stdout; the ambient console
/// backend a real caller would supply (spec.md §6 "the crate never links a
/// logging backend itself").
struct StderrConsole;
impl wavedump_decode::ConsolePort for StderrConsole {
    fn info(&mut self, message: &str) {
        println!("info: {message}");
    }
    fn warning(&mut self, message: &str) {
        eprintln!("warning: {message}");
    }
    fn error(&mut self, message: &str) {
        eprintln!("error: {message}");
    }
}

fn looks_binary(first_byte: u8) -> bool {
    // every binary block starts with a small type tag (0-8, 254, 255);
    // every VCD text dump starts with whitespace or a `$` command.
    matches!(first_byte, 0..=8 | 254 | 255)
}

fn print_scope(record: &Record, id: ScopeId, depth: usize) {
    let scope: &Scope = record.scope(id);
    if scope.parent.is_some() {
        println!("{}{}", "  ".repeat(depth), scope.name);
    }
    let next_depth = if scope.parent.is_some() { depth + 1 } else { depth };
    for &child in &scope.children {
        print_scope(record, child, next_depth);
    }
}

fn main() -> std::io::Result<()> {
    let args = Args::parse();

    let mut file = BufReader::new(File::open(&args.input)?);
    let mut sniff = [0u8; 1];
    let n = file.read(&mut sniff)?;
    let is_binary = if args.fst {
        true
    } else if args.vcd {
        false
    } else {
        n == 1 && looks_binary(sniff[0])
    };

    let config = DecodeConfig::default();
    let mut record_factory = DefaultRecordFactory;
    let mut grouper = NoGrouping;
    let mut signal_creator = DefaultSignalCreator;
    let mut writer_factory = DefaultWriterFactory;
    let mut domain_parser = DecimalDomainBaseParser;
    let mut progress = NullProgress;
    let mut console = StderrConsole;
    let collab = Collaborators {
        record_factory: &mut record_factory,
        grouper: &mut grouper,
        signal_creator: &mut signal_creator,
        writer_factory: &mut writer_factory,
        domain_parser: &mut domain_parser,
        progress: &mut progress,
        console: &mut console,
    };

    // Re-stitch the byte we already sniffed back onto the front of the
    // stream so the decoder sees the whole file.
    let rest = std::io::Cursor::new(sniff[..n].to_vec()).chain(file);
    let record = if is_binary {
        BinaryDecoder::new(rest, &config, collab)
            .decode()
            .unwrap_or_else(|e| {
                eprintln!("error: {e}");
                std::process::exit(1);
            })
    } else {
        wavedump_decode::TextDecoder::new(rest, &config, collab)
            .decode()
            .unwrap_or_else(|e| {
                eprintln!("error: {e}");
                std::process::exit(1);
            })
    };

    println!("format: {}", if is_binary { "fst" } else { "vcd" });
    println!("base: {:?} {:?}", record.base.factor, record.base.unit);
    println!("opened_at: {:?}", record.opened_at());
    println!("closed_at: {:?}", record.closed_at());
    println!("scopes:");
    print_scope(&record, record.root(), 0);
    Ok(())
}
