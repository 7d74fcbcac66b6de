//! Error type shared by every trace store operation.

use thiserror::Error;

/// Errors returned by the writer, reader and stores
#[derive(Error, Debug)]
pub enum TraceStoreError {
    /// Malformed input, such as a missing start time or a bad trace ID
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// No spans exist for the requested trace
    #[error("Trace not found: {0}")]
    TraceNotFound(String),

    /// The operation is not supported by this store
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// The backing store failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// A payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The writer no longer accepts spans
    #[error("Span writer is closed")]
    WriterClosed,

    /// A blocking task panicked or was cancelled
    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for trace store operations
pub type Result<T> = std::result::Result<T, TraceStoreError>;

impl TraceStoreError {
    /// Creates a new invalid query error
    pub fn invalid_query<S: Into<String>>(msg: S) -> Self {
        Self::InvalidQuery(msg.into())
    }

    /// Creates a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Creates a new serialization error
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true if this is the "no spans for this trace" condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TraceNotFound(_))
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidQuery(_) => "invalid_query",
            Self::TraceNotFound(_) => "not_found",
            Self::NotImplemented(_) => "not_implemented",
            Self::Storage(_) | Self::Io(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
            Self::WriterClosed => "writer",
            Self::Join(_) => "async",
        }
    }
}

impl From<rusqlite::Error> for TraceStoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for TraceStoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for TraceStoreError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
