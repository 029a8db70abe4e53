//! Swath reader error types
//!
//! Every variant means the same thing to callers: the file could not be
//! read. The index builder skips such files, the query engine reports them.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while opening or reading a swath file
#[derive(Error, Debug)]
pub enum SwathError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Data corruption detected (checksum mismatch, invalid magic, etc.)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// File layout is not what the reader expects
    #[error("Invalid swath format: {0}")]
    InvalidFormat(String),

    /// Requested variable does not exist in the file
    #[error("Variable not found: {0}")]
    MissingVariable(String),

    /// No reader handles this file type
    #[error("Unsupported swath file: {0:?}")]
    Unsupported(PathBuf),

    /// Row range outside the along-track extent
    #[error("Row range {start}..{end} out of bounds for {rows} rows")]
    RowRange {
        start: usize,
        end: usize,
        rows: usize,
    },
}

impl From<bincode::Error> for SwathError {
    fn from(err: bincode::Error) -> Self {
        SwathError::Serialization(err.to_string())
    }
}

/// Result type alias for swath reader operations
pub type SwathResult<T> = Result<T, SwathError>;
