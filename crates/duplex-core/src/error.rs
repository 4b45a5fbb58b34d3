//! Model-session error taxonomy.
//!
//! Transport failures (connection lost/reset, broken pipe) are the only
//! reconnectable errors. Everything else is an application error and ends the
//! conversation.

use std::io;

/// Errors raised by a model session.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    /// The transport dropped or could not be (re)established.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The peer reset the connection.
    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    /// Write to a closed transport.
    #[error("Broken pipe: {0}")]
    BrokenPipe(String),

    /// Bad input handed to the session.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not valid in the session's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The provider sent something the session could not interpret.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Any other provider-side failure.
    #[error("{0}")]
    Runtime(String),
}

impl SessionError {
    /// Whether re-establishing the session could recover from this error.
    pub fn is_reconnectable(&self) -> bool {
        match self {
            Self::ConnectionLost(_) | Self::ConnectionReset(_) | Self::BrokenPipe(_) => true,
            Self::InvalidArgument(_)
            | Self::InvalidState(_)
            | Self::Protocol(_)
            | Self::Runtime(_) => false,
        }
    }

    /// Error category string for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ConnectionLost(_) => "connection_lost",
            Self::ConnectionReset(_) => "connection_reset",
            Self::BrokenPipe(_) => "broken_pipe",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::InvalidState(_) => "invalid_state",
            Self::Protocol(_) => "protocol",
            Self::Runtime(_) => "runtime",
        }
    }
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        let message = err.to_string();
        match err.kind() {
            io::ErrorKind::ConnectionReset => Self::ConnectionReset(message),
            io::ErrorKind::BrokenPipe => Self::BrokenPipe(message),
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => Self::ConnectionLost(message),
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
                Self::InvalidArgument(message)
            }
            _ => Self::Runtime(message),
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
