//! Query error types
//!
//! Invalid queries are fatal. Missing and unreadable files are not: the
//! engine turns them into [`QueryWarning`]s and keeps going.

use crate::swath::SwathError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// Malformed request (inverted bounds, non-finite values, bad timestamp)
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Indexed file is gone from the base path
    #[error("File not found: {0:?}")]
    MissingFile(PathBuf),

    /// Indexed file exists but could not be read
    #[error("Cannot read {path:?}: {source}")]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: SwathError,
    },

    /// Writing the result failed
    #[error("Output error: {0}")]
    Output(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<csv::Error> for QueryError {
    fn from(err: csv::Error) -> Self {
        QueryError::Output(err.to_string())
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Output(err.to_string())
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Kind of per-file problem reported alongside a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    MissingFile,
    UnreadableFile,
}

/// A file the query had to leave out
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryWarning {
    /// Relative path as stored in the index
    pub file: String,
    pub kind: WarningKind,
    pub message: String,
}

impl QueryWarning {
    /// Classify a per-file error. Returns `None` for errors that are not
    /// per-file and must abort the query.
    pub fn from_error(file: &str, err: &QueryError) -> Option<Self> {
        let kind = match err {
            QueryError::MissingFile(_) => WarningKind::MissingFile,
            QueryError::UnreadableFile { .. } => WarningKind::UnreadableFile,
            _ => return None,
        };
        Some(Self {
            file: file.to_string(),
            kind,
            message: err.to_string(),
        })
    }
}

impl fmt::Display for QueryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.file, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_classification() {
        let err = QueryError::MissingFile(PathBuf::from("/data/a.swath"));
        let warning = QueryWarning::from_error("a.swath", &err).unwrap();
        assert_eq!(warning.kind, WarningKind::MissingFile);
        assert!(warning.to_string().starts_with("a.swath: File not found"));

        let err = QueryError::UnreadableFile {
            path: PathBuf::from("/data/b.swath"),
            source: SwathError::MissingVariable("ssha".into()),
        };
        let warning = QueryWarning::from_error("b.swath", &err).unwrap();
        assert_eq!(warning.kind, WarningKind::UnreadableFile);
        assert!(warning.message.contains("Variable not found: ssha"));

        let err = QueryError::InvalidQuery("lat_min > lat_max".into());
        assert!(QueryWarning::from_error("c.swath", &err).is_none());
    }
}
