//! Model session trait: the contract every streaming model backend fulfils.
//!
//! A session is a long-lived, bidirectional channel to a provider: inputs are
//! pushed with the `send_*` methods while output events are pulled with
//! [`ModelSession::receive`]. The event loop shares one session between its
//! tasks, so every method takes `&self`.

use async_trait::async_trait;
use duplex_core::types::{AudioInput, ImageInput, Message, ModelEvent, ToolResult, ToolSpec};
use duplex_core::SessionError;

/// A live, bidirectional connection to a model provider.
#[async_trait]
pub trait ModelSession: Send + Sync {
    /// Establish (or re-establish) the provider connection.
    ///
    /// Reconnection calls this again after [`close`](Self::close) with the
    /// full system prompt, tool list, and message history, so implementations
    /// must treat it as a fresh start rather than a resume.
    async fn connect(
        &self,
        system_prompt: Option<&str>,
        tools: &[ToolSpec],
        messages: &[Message],
    ) -> Result<(), SessionError>;

    /// Next output event.
    ///
    /// `Ok(None)` means the provider ended the stream (or the session was
    /// closed). Transport failures surface as reconnectable [`SessionError`]s.
    async fn receive(&self) -> Result<Option<ModelEvent>, SessionError>;

    /// Send user text.
    async fn send_text(&self, text: &str) -> Result<(), SessionError>;

    /// Send a chunk of user audio.
    async fn send_audio(&self, audio: &AudioInput) -> Result<(), SessionError>;

    /// Send an image.
    async fn send_image(&self, image: &ImageInput) -> Result<(), SessionError>;

    /// Deliver the result of a tool the model asked for.
    async fn send_tool_result(&self, result: &ToolResult) -> Result<(), SessionError>;

    /// Ask the provider to stop the response in progress.
    async fn send_interrupt(&self) -> Result<(), SessionError>;

    /// Close the connection. Best effort: failures are logged, never returned.
    async fn close(&self);

    /// Display name for logging.
    fn display_name(&self) -> &str;
}
