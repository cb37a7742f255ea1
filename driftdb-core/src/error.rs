//! Error types for DriftDB

use thiserror::Error;

/// Result type alias for DriftDB operations
pub type Result<T> = std::result::Result<T, DriftError>;

/// DriftDB error types
#[derive(Error, Debug)]
pub enum DriftError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// A segment in the middle of the index range lost one of its files
    #[error("Missing {kind} file for segment {index}")]
    MissingFile { index: u32, kind: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller supplied an unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Keymap operation failed
    #[error("Keymap error: {0}")]
    Keymap(String),

    /// A shard value file grew past what a 32-bit offset can address
    #[error("Shard {shard} of segment {index} is full (offset {offset})")]
    AddressOverflow { index: u32, shard: u32, offset: u64 },

    /// The table hit an unrecoverable error earlier and refuses further work
    #[error("Table is in a fatal state: {0}")]
    Fatal(String),

    /// The table has been closed
    #[error("Table is closed")]
    Closed,

    /// Another process holds the table lock
    #[error("Table is locked: {0}")]
    Locked(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DriftError {
    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            DriftError::Corruption(_) | DriftError::MissingFile { .. } | DriftError::InvalidFormat(_)
        )
    }

    /// Check if error means the table can no longer make progress
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriftError::Fatal(_))
    }
}
