/// Core error types for Playlog
use std::time::Duration;
use thiserror::Error;

/// Result type alias using `PlaylogError`
pub type Result<T> = std::result::Result<T, PlaylogError>;

/// Core error type for Playlog
#[derive(Error, Debug)]
pub enum PlaylogError {
    /// Ingestion payload is missing a required field or carries a bad value
    #[error("Validation error: {0}")]
    Validation(String),

    /// The ephemeral keyed store could not be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Durable upsert failed; the record stays buffered
    #[error("Durable write failed: {0}")]
    DurableWrite(String),

    /// Reading play history from durable storage failed
    #[error("Durable read failed: {0}")]
    DurableRead(String),

    /// A buffered field map could not be turned into a record
    #[error("Malformed buffered record {key}: {reason}")]
    MalformedRecord { key: String, reason: String },

    /// A flush pass ran past its deadline and was abandoned
    #[error("Flush pass timed out after {0:?}")]
    PassTimedOut(Duration),
}

impl PlaylogError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a store-unavailable error
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create a durable write error
    pub fn durable_write(msg: impl Into<String>) -> Self {
        Self::DurableWrite(msg.into())
    }

    /// Create a durable read error
    pub fn durable_read(msg: impl Into<String>) -> Self {
        Self::DurableRead(msg.into())
    }

    /// Create a malformed-record error
    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
