//! Error types shared between client and server.
//!
//! The `StreamError` enum unifies common failure cases for I/O, serialization,
//! channel communication, validation, and internal logic, allowing crates to
//! propagate a single error type.
use std::io;
use std::sync::PoisonError;

use thiserror::Error;

/// Unified error type shared by client and server.
#[derive(Error, Debug)]
pub enum StreamError {
    /// I/O error originating from the standard library or sockets.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failure while encoding/decoding JSON via serde_json.
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A request violated a validation rule (symbol shape, count bounds).
    /// The request is rejected atomically; no partial change is applied.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A structurally valid frame that the protocol cannot act on
    /// (unexpected direction, oversized line, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Crossbeam/channel send failed (e.g., receiver dropped); contains a short context string.
    #[error("Channel send failed: {0}")]
    ChannelSend(String),

    /// Crossbeam/channel receive failed (e.g., sender closed); contains a short context string.
    #[error("Channel receive failed: {0}")]
    ChannelRecv(String),

    /// Error indicating a poisoned mutex/lock was encountered.
    #[error("Mutex Lock Poisoned: {0}")]
    MutexLock(String),

    /// Transport-level failure (connect timeout, broken connection).
    #[error("Transport error: {0}")]
    Transport(String),
}

impl StreamError {
    /// Code carried in a wire `error` frame answering a failed request.
    ///
    /// Validation failures and malformed frames are distinguished so a client
    /// can tell "my request was out of bounds" from "my frame did not parse".
    pub fn wire_code(&self) -> &'static str {
        match self {
            StreamError::InvalidRequest(_) => "invalid_request",
            StreamError::Json(_) | StreamError::Protocol(_) => "malformed_message",
            _ => "internal_error",
        }
    }
}

impl<T> From<PoisonError<T>> for StreamError {
    fn from(err: PoisonError<T>) -> Self {
        StreamError::MutexLock(err.to_string())
    }
}
