//! Configuration schema.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! Every field has a default, so partial files are fine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of reconnection attempts after a transport failure.
pub const DEFAULT_MAX_RECONNECTION_ATTEMPTS: u32 = 3;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration: loaded from `~/.duplex/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentConfig,
}

// ─────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────

/// Settings for a bidirectional agent and its connection.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// System prompt sent on every (re)connect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Re-establish the model session after transport failures.
    pub enable_reconnection: bool,
    /// Connect attempts per reconnection.
    pub max_reconnection_attempts: u32,
    /// Delay between reconnection attempts, in milliseconds.
    pub reconnect_backoff_ms: u64,
    /// Upper bound on each output-queue poll in `receive()`, in milliseconds.
    pub receive_poll_interval_ms: u64,
    /// Per-tool execution timeout, in seconds.
    pub tool_timeout_secs: u64,
    /// How long `end()` lets in-flight tools finish before aborting them.
    pub shutdown_grace_ms: u64,
    /// Maximum buffered audio output chunks (oldest dropped first).
    pub audio_buffer_limit: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            enable_reconnection: true,
            max_reconnection_attempts: DEFAULT_MAX_RECONNECTION_ATTEMPTS,
            reconnect_backoff_ms: 250,
            receive_poll_interval_ms: 100,
            tool_timeout_secs: 60,
            shutdown_grace_ms: 200,
            audio_buffer_limit: 512,
        }
    }
}

impl AgentConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn receive_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receive_poll_interval_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
