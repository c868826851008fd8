use std::path::PathBuf;

use thiserror::Error;

/// Main error type for geodex operations
#[derive(Error, Debug)]
pub enum GeodexError {
    #[error("Document {identifier:?} out of order: expected number {expected}, got {found}")]
    OutOfOrder {
        expected: u64,
        found: u64,
        identifier: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Corrupt segment {path:?}: {reason}")]
    CorruptSegment { path: PathBuf, reason: String },

    #[error("Corrupt data: {0}")]
    Corrupt(String),

    #[error("Part {0} is not available on every segment")]
    UnsupportedPart(String),

    #[error("Merge error: {0}")]
    Merge(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Index is closed")]
    Closed,
}

/// Result type alias for geodex operations
pub type Result<T> = std::result::Result<T, GeodexError>;

impl GeodexError {
    /// Attach a segment path to a low-level decoding failure
    pub fn corrupt_segment(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        GeodexError::CorruptSegment {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error means the producer contract is broken and ingestion must stop.
    ///
    /// Every other error aborts only the operation that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GeodexError::OutOfOrder { .. } | GeodexError::Closed)
    }
}

impl From<serde_json::Error> for GeodexError {
    fn from(err: serde_json::Error) -> Self {
        GeodexError::Config(err.to_string())
    }
}

impl From<fst::Error> for GeodexError {
    fn from(err: fst::Error) -> Self {
        GeodexError::Corrupt(err.to_string())
    }
}
