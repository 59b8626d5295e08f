//! Session error types.

use thiserror::Error;

use tether_core::TransportError;

use crate::config::ConfigError;

/// Errors that can occur while building or running a session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The relay could not be reached or the stream failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// `run` was called while the session was already running.
    #[error("Session is already running")]
    AlreadyRunning,

    /// `run` was called after the session stopped.
    #[error("Session has been stopped")]
    Stopped,

    /// Installing a shutdown signal handler failed.
    #[error("Failed to listen for shutdown signals: {0}")]
    Signal(#[source] std::io::Error),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
