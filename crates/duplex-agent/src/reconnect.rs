//! Connection-error handling and bounded reconnection.
//!
//! Only transport failures are retried. Each attempt closes the model
//! session and connects it again with the system prompt, every tool spec and
//! the full conversation history, so the provider resumes with full context.

use duplex_core::SessionError;
use tracing::{debug, info, warn};

use crate::connection::BidirectionalConnection;

/// Whether re-establishing the session could recover from `error`.
pub fn is_reconnectable(error: &SessionError) -> bool {
    error.is_reconnectable()
}

/// Decide what a session error means for the conversation.
///
/// - `Ok(true)`: the session was re-established, keep consuming events.
/// - `Ok(false)`: not recoverable, reconnection disabled, or the conversation
///   is being torn down; the connection is now inactive.
/// - `Err(e)`: every reconnection attempt failed; the connection is now
///   inactive and `e` is the last attempt's error.
pub async fn handle_connection_error(
    conn: &BidirectionalConnection,
    error: SessionError,
) -> Result<bool, SessionError> {
    // A closed socket reports a transport error; after end() that is expected.
    if conn.is_closing() || !conn.is_active() {
        debug!(category = error.category(), "session error during teardown");
        return Ok(false);
    }

    if !is_reconnectable(&error) {
        conn.record_failure(error);
        return Ok(false);
    }

    let enabled = conn
        .agent()
        .map(|agent| agent.config.enable_reconnection)
        .unwrap_or(false);
    if !enabled {
        info!(category = error.category(), "reconnection disabled");
        conn.record_failure(error);
        return Ok(false);
    }

    warn!(category = error.category(), error = %error, "connection dropped, reconnecting");
    match reconnect(conn).await {
        Ok(()) => Ok(true),
        Err(_) if conn.is_closing() => Ok(false),
        Err(last) => {
            conn.record_failure(last.clone());
            Err(last)
        }
    }
}

/// Re-establish the model session underneath `conn`.
///
/// Makes up to `max_reconnection_attempts` attempts (at least one), waiting
/// `reconnect_backoff_ms` between them. A non-reconnectable error stops
/// immediately, and so does teardown: a session opened while `end()` runs is
/// closed again before returning.
pub async fn reconnect(conn: &BidirectionalConnection) -> Result<(), SessionError> {
    let agent = conn
        .agent()
        .ok_or_else(|| SessionError::InvalidState("agent was dropped".into()))?;
    let attempts = agent.config.max_reconnection_attempts.max(1);
    let backoff = agent.config.reconnect_backoff();
    let tools = agent.tools.get_all_tool_specs();

    let mut last_error = None;
    for attempt in 1..=attempts {
        if conn.is_closing() {
            return Err(closed());
        }
        conn.model.close().await;

        let messages = agent.messages.read().await.clone();
        match conn
            .model
            .connect(agent.system_prompt.as_deref(), &tools, &messages)
            .await
        {
            Ok(()) if conn.is_closing() => {
                conn.model.close().await;
                return Err(closed());
            }
            Ok(()) => {
                conn.mark_reconnected();
                info!(
                    model = conn.model.display_name(),
                    attempt,
                    history = messages.len(),
                    "reconnected"
                );
                return Ok(());
            }
            Err(e) if e.is_reconnectable() => {
                warn!(attempt, max_attempts = attempts, error = %e, "reconnect attempt failed");
                last_error = Some(e);
                if attempt < attempts && !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
            }
            Err(e) => {
                warn!(attempt, category = e.category(), error = %e, "reconnect aborted");
                return Err(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| SessionError::ConnectionLost("reconnection failed".into())))
}

fn closed() -> SessionError {
    SessionError::InvalidState("conversation ended during reconnect".into())
}
