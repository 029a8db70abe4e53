//! Index error types
//!
//! Defines all errors that can occur while building, persisting or loading
//! the tile index.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the index layer
#[derive(Error, Debug)]
pub enum IndexError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (checksum mismatch, invalid magic, etc.)
    #[error("Corrupt index: {0}")]
    Corruption(String),

    /// Index artifact was written by an incompatible schema
    #[error("Index schema version {found} is not supported (expected {expected})")]
    SchemaVersion { found: u16, expected: u16 },

    /// Existing index was built with a different tile size
    #[error("Index was built with tile_size {existing}, requested {requested}; rebuild required")]
    TileSizeMismatch { existing: usize, requested: usize },

    /// Index file does not exist
    #[error("Index file not found: {0:?}")]
    NotFound(PathBuf),

    /// Data directory missing or not a directory
    #[error("Invalid data directory: {0:?}")]
    InvalidDataDir(PathBuf),

    /// tile_size must be positive
    #[error("Invalid tile size: {0}")]
    InvalidTileSize(usize),

    /// File name pattern could not be compiled
    #[error("Invalid file pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Build interrupted before completion
    #[error("Build cancelled")]
    Cancelled,
}

impl IndexError {
    /// Whether this error means the artifact is incompatible rather than broken
    pub fn is_version_mismatch(&self) -> bool {
        matches!(
            self,
            IndexError::SchemaVersion { .. } | IndexError::TileSizeMismatch { .. }
        )
    }
}

impl From<bincode::Error> for IndexError {
    fn from(err: bincode::Error) -> Self {
        IndexError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Serialization(err.to_string())
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;
