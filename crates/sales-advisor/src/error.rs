//! Error Types

use thiserror::Error;

/// Result type alias for advisor operations
pub type Result<T> = std::result::Result<T, AdvisorError>;

/// Sales advisor error types
#[derive(Error, Debug)]
pub enum AdvisorError {
    /// SQL store error
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The store mutex was poisoned by a panicking holder
    #[error("store lock poisoned")]
    LockPoisoned,

    /// Embedded dataset failed to parse
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Chart-script evaluation failed
    #[error("{0}")]
    Sandbox(String),
}
