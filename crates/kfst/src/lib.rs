//! KFST finite state transducer engine.
//!
//! This crate loads and executes weighted finite state transducers compiled
//! for morphological analysis, compatible with transducers produced by the
//! HFST toolchain. Given an input word it enumerates every output string the
//! transducer accepts, together with its weight, honoring flag diacritics
//! and epsilon transitions.
//!
//! # Architecture
//!
//! - [`flags`] -- Flag diacritic operations (P, N, R, D, C, U) and the
//!   per-path flag state
//! - [`symbols`] -- Symbol table (text-to-id interning, classification,
//!   input tokenization)
//! - [`transducer`] -- Immutable transducer store and the public API
//! - [`text`] -- Tabular (ATT) format codec
//! - [`binary`] -- Compressed binary (KFST) format codec
//! - [`lookup`] -- Backtracking lookup engine

pub mod binary;
pub mod flags;
pub mod lookup;
pub mod symbols;
pub mod text;
pub mod transducer;

pub use lookup::LookupOptions;
pub use symbols::{SymbolKind, SymbolTable, Token};
pub use transducer::{Transducer, Transition};

/// Error type for transducer parsing, serialization and lookup.
#[derive(Debug, thiserror::Error)]
pub enum KfstError {
    #[error("invalid magic bytes in KFST header")]
    BadMagic,
    #[error("unsupported KFST format version {0}")]
    UnsupportedVersion(u16),
    #[error("input too short: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    #[error("unknown symbol {0:?}")]
    UnknownSymbol(String),
    #[error("invalid flag diacritic: {0}")]
    MalformedFlagDiacritic(String),
    #[error("symbol id {symbol} out of range for a table of {count} symbols")]
    SymbolCountMismatch { symbol: u16, count: usize },
    #[error("invalid compressed payload: {0}")]
    InvalidPayload(String),
    #[error("input cannot be tokenized at character {position}")]
    UntokenizableInput { position: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
