//! Unified error types for the Tether core.
//!
//! Three layers fail independently and are kept apart:
//!
//! | Layer | Error | Typical cause |
//! |-------|-------|---------------|
//! | Transport | [`TransportError`] | relay binary missing, socket refused, pipe closed |
//! | Wire codec | [`CodecError`] | a line that is not a JSON-RPC frame |
//! | Request correlation | [`RpcError`] | timeout, relay-side error, session stopped |

use serde_json::Value;
use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors raised while opening or driving a relay connection.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connecting to a remote relay failed.
    #[error("connection failed: {url} - {reason}")]
    ConnectionFailed {
        /// The address that was dialled.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// The relay binary could not be located on `PATH`.
    #[error("could not find `{binary}` on PATH")]
    RelayNotFound {
        /// Name of the binary that was looked up.
        binary: String,
    },

    /// The relay binary was found but could not be started.
    #[error("failed to spawn relay `{path}`: {reason}")]
    SpawnFailed {
        /// Path of the binary.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// The connection string names a scheme with no transport behind it.
    #[error("connection scheme '{scheme}' has not been implemented (recognized: {supported})")]
    UnsupportedScheme {
        /// The scheme that was requested.
        scheme: String,
        /// Comma separated list of recognised schemes.
        supported: String,
    },

    /// The connection string could not be parsed.
    #[error("invalid connection string '{input}': {reason}")]
    InvalidConnectionString {
        /// The raw connection string.
        input: String,
        /// Reason for failure.
        reason: String,
    },

    /// The channel was closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// Writing a frame failed.
    #[error("failed to send frame: {0}")]
    SendFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Creates a closed-connection error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Creates an invalid connection string error.
    pub fn invalid_connection(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConnectionString {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Codec Errors
// =============================================================================

/// Errors raised while decoding or encoding one wire line.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// The line held only whitespace.
    #[error("empty line")]
    Empty,

    /// The line is not valid JSON.
    #[error("malformed JSON: {0}")]
    Malformed(String),

    /// The line is valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// A notification without a `method` member.
    #[error("notification frame has no method")]
    MissingMethod,

    /// Serializing an outbound frame failed.
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

// =============================================================================
// RPC Errors
// =============================================================================

/// Failure of one request/response exchange with the relay.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// No response arrived within the correlator timeout.
    #[error("request id {request_id} timed out")]
    Timeout {
        /// Id of the request that expired.
        request_id: String,
    },

    /// The relay answered with an `error` object.
    #[error("relay error ({code}): {message}")]
    Relay {
        /// JSON-RPC error code.
        code: i64,
        /// Human readable message.
        message: String,
        /// The complete `error` member as received.
        body: Value,
    },

    /// The session stopped before the request was answered.
    #[error("request cancelled")]
    Cancelled,

    /// The request could not be written.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Parameters could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Caller supplied an argument combination the relay would reject.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl RpcError {
    /// Returns `true` for [`RpcError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type for RPC calls.
pub type RpcResult<T> = Result<T, RpcError>;
