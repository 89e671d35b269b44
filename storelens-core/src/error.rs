//! Error types for storelens-core

use thiserror::Error;

/// Main error type for the storelens-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error (missing or invalid threshold, bad ledger settings)
    #[error("configuration error: {0}")]
    Config(String),

    /// Event store query or transport failure
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Purchase ledger query or transport failure
    #[error("ledger error: {0}")]
    Ledger(String),

    /// An optional column is absent from the event store.
    ///
    /// The event fetcher recovers from this by switching to a reduced projection.
    #[error("column {column} does not exist on {table}")]
    MissingColumn { table: String, column: String },

    /// Report request could not be served as asked
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Whether this error is the recoverable "column does not exist" condition.
    pub fn is_missing_column(&self) -> bool {
        matches!(self, Error::MissingColumn { .. })
    }
}

/// Result type alias for storelens-core
pub type Result<T> = std::result::Result<T, Error>;
