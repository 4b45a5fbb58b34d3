//! Errors returned by the agent facade.

use duplex_core::SessionError;

/// Message for `start()` while a conversation is running.
pub(crate) const ALREADY_ACTIVE: &str = "Conversation already active. Call end() first.";

/// Message for operations that need a running conversation.
pub(crate) const NOT_ACTIVE: &str = "No active conversation. Call start() first.";

/// Message for untyped input of an unknown shape.
pub(crate) const INPUT_SHAPES: &str = "Input must be either a string (text), AudioInputEvent \
(dict with audioData, format, sampleRate, channels), or ImageInputEvent \
(dict with imageData, mimeType, encoding)";

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The call is not valid in the agent's current lifecycle state.
    #[error("{0}")]
    InvalidState(String),

    /// Caller-supplied input was rejected before reaching the model.
    #[error("{0}")]
    InvalidInput(String),

    /// The model session failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// An input or output callable of `run()` failed.
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

impl AgentError {
    /// Error category string for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidState(_) => "invalid_state",
            Self::InvalidInput(_) => "invalid_input",
            Self::Session(e) => e.category(),
            Self::Io(_) => "io",
        }
    }
}
