//! Duplex Core: shared types, errors, queues, and configuration.
//!
//! - **types**: model events, conversation messages, tool specs/uses/results, input payloads
//! - **error**: model-session error taxonomy and reconnectability
//! - **queue**: async FIFO shared between event-loop tasks
//! - **config**: JSON config schema, loader, env overrides

pub mod config;
pub mod error;
pub mod queue;
pub mod types;
pub mod utils;

pub use error::SessionError;
pub use queue::EventQueue;
pub use types::{
    AudioInput, AudioStreamEvent, ImageInput, InputEvent, InterruptionEvent, Message, ModelEvent,
    PartialToolUse, Role, ToolResult, ToolResultStatus, ToolSpec, ToolUse, ToolUseStreamEvent,
    TranscriptEvent,
};
