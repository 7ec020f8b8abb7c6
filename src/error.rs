//! Crate error type.
//!
//! Pattern-level failures (parse, encoding) are collected during compilation
//! rather than aborting it; a compile succeeds as long as at least one
//! pattern survives. I/O failures and internal layout miscounts abort.

use std::io;

/// Errors surfaced by compilation and search.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A pattern failed to parse. Carries the caller-supplied pattern index
    /// and the offending text so batch intake can report precisely.
    #[error("pattern {index} ({pattern:?}): {msg}")]
    PatternParse {
        index: u32,
        pattern: String,
        msg: String,
    },

    /// A pattern contains a code point the declared encoding cannot express,
    /// or names an unknown encoding.
    #[error("pattern {index} ({pattern:?}): encoding {encoding}: {msg}")]
    Encoding {
        index: u32,
        pattern: String,
        encoding: String,
        msg: String,
    },

    /// No pattern compiled; there is nothing to search for.
    #[error("no patterns compiled")]
    EmptyPatternSet,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal miscount during code generation. Indicates a bug, not bad
    /// input.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
