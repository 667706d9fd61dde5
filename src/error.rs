// Copyright 2024 Cornell University
// released under BSD 3-Clause License

use std::fmt;

/// Byte offset plus a one-line snippet with a `|` marker at the offending byte.
///
/// Every error that can be tied to a position in the input carries one of
/// these so that a caller can render a useful diagnostic without re-reading
/// the input itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteContext {
    pub offset: u64,
    pub snippet: String,
}

impl ByteContext {
    /// Builds a context from the raw bytes surrounding `offset`, truncating
    /// to a single printable line and inserting a `|` marker at the byte.
    pub fn new(bytes: &[u8], offset: u64) -> Self {
        const WINDOW: usize = 32;
        let pos = offset as usize;
        let start = pos.saturating_sub(WINDOW);
        let end = (pos + WINDOW).min(bytes.len());
        let mut snippet = String::new();
        for (i, b) in bytes[start..end].iter().enumerate() {
            if start + i == pos {
                snippet.push('|');
            }
            snippet.push(printable(*b));
        }
        if pos >= end {
            snippet.push('|');
        }
        Self { offset, snippet }
    }
}

fn printable(b: u8) -> char {
    if b.is_ascii_graphic() || b == b' ' {
        b as char
    } else {
        '.'
    }
}

impl fmt::Display for ByteContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at byte {}: {}", self.offset, self.snippet)
    }
}

/// The full error taxonomy for both decoder cores (spec.md §7).
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid token {ctx}")]
    InvalidToken { ctx: ByteContext },

    #[error("invalid command {ctx}")]
    InvalidCommand { ctx: ByteContext },

    #[error("invalid numeric value {ctx}")]
    InvalidNumeric { ctx: ByteContext },

    #[error("unexpected end of input {ctx}")]
    UnexpectedEof { ctx: ByteContext },

    #[error("invariant violation: {message} {ctx}")]
    InvariantViolation { message: String, ctx: ByteContext },

    #[error("decompression failure: {message}")]
    DecompressionFailure { message: String },

    #[error("unsupported feature: {message}")]
    UnsupportedFeature { message: String },

    #[error("decode cancelled")]
    CancelRequested,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    pub fn invalid_token(bytes: &[u8], offset: u64) -> Self {
        Self::InvalidToken {
            ctx: ByteContext::new(bytes, offset),
        }
    }

    pub fn invalid_command(bytes: &[u8], offset: u64) -> Self {
        Self::InvalidCommand {
            ctx: ByteContext::new(bytes, offset),
        }
    }

    pub fn invalid_numeric(bytes: &[u8], offset: u64) -> Self {
        Self::InvalidNumeric {
            ctx: ByteContext::new(bytes, offset),
        }
    }

    pub fn unexpected_eof(bytes: &[u8], offset: u64) -> Self {
        Self::UnexpectedEof {
            ctx: ByteContext::new(bytes, offset),
        }
    }

    pub fn invariant(bytes: &[u8], offset: u64, message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
            ctx: ByteContext::new(bytes, offset),
        }
    }

    pub fn decompression(message: impl Into<String>) -> Self {
        Self::DecompressionFailure {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            message: message.into(),
        }
    }

    /// True for the "recoverable" category of §4.12/§7: callers may log and
    /// continue decoding other signals/blocks rather than aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DecompressionFailure { .. })
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;
