//! Event loop: background tasks that drive one conversation.
//!
//! Two supervised tasks run per connection:
//!
//! 1. **Event consumer**: pulls provider events, classifies them (interruption,
//!    tool use, transcript, audio, other), applies their side effects and
//!    forwards every event, in order, to the agent's output queue. Transport
//!    errors go through [`handle_connection_error`].
//! 2. **Tool dispatcher**: pops complete tool uses and spawns one task per
//!    call, so tools run concurrently with each other and with event
//!    consumption. A panicking tool still answers with an error result.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use duplex_core::types::{Message, ModelEvent, Role, ToolResult, ToolUse};
use futures_util::FutureExt;
use tracing::{debug, info, warn};

use crate::connection::BidirectionalConnection;
use crate::reconnect::handle_connection_error;
use crate::tools::ToolExecutor;

/// Spawn the consumer and dispatcher tasks for `conn`.
pub(crate) fn spawn(conn: &Arc<BidirectionalConnection>) {
    let consumer = tokio::spawn(run_event_consumer(Arc::clone(conn)));
    let dispatcher = tokio::spawn(run_tool_dispatcher(Arc::clone(conn)));
    conn.supervise(consumer);
    conn.supervise(dispatcher);
}

// ─────────────────────────────────────────────
// Event consumer
// ─────────────────────────────────────────────

async fn run_event_consumer(conn: Arc<BidirectionalConnection>) {
    let mut shutdown = conn.shutdown_signal();
    debug!(model = conn.model.display_name(), "event consumer started");

    while conn.is_active() {
        let next = tokio::select! {
            biased;
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
            next = conn.model.receive() => next,
        };

        match next {
            Ok(Some(event)) => handle_event(&conn, event).await,
            Ok(None) => {
                info!("model stream ended");
                conn.set_active(false);
            }
            Err(error) => match handle_connection_error(&conn, error).await {
                Ok(true) => continue,
                Ok(false) | Err(_) => break,
            },
        }
    }

    debug!("event consumer stopped");
}

/// Apply one provider event's side effects, then forward it to the output
/// queue unchanged.
pub(crate) async fn handle_event(conn: &BidirectionalConnection, event: ModelEvent) {
    let Some(agent) = conn.agent() else {
        return;
    };

    match &event {
        ModelEvent::Interruption(interruption) => {
            conn.begin_interruption().await;
            info!(reason = %interruption.reason, "response interrupted");
        }
        ModelEvent::ToolUse(stream) => {
            if let Some(tool_use) = stream.current_tool_use.complete() {
                if conn.mark_tool_use_seen(&tool_use.tool_use_id) {
                    debug!(
                        tool = %tool_use.name,
                        tool_use_id = %tool_use.tool_use_id,
                        "tool use queued"
                    );
                    conn.tool_queue.push(tool_use);
                }
            }
        }
        ModelEvent::Transcript(transcript) => {
            if transcript.source == Role::User && transcript.is_final {
                agent
                    .messages
                    .write()
                    .await
                    .push(Message::user(transcript.text.clone()));
                debug!(
                    text = %duplex_core::utils::truncate_string(&transcript.text, 60),
                    "user turn recorded"
                );
            }
        }
        ModelEvent::AudioStream(audio) => {
            if !conn.queue_audio(audio.clone()).await {
                debug!("audio buffer full, dropped oldest chunk");
            }
        }
        ModelEvent::Other(_) => {}
    }

    agent.output_queue.push(event);
}

// ─────────────────────────────────────────────
// Tool dispatcher
// ─────────────────────────────────────────────

async fn run_tool_dispatcher(conn: Arc<BidirectionalConnection>) {
    let mut shutdown = conn.shutdown_signal();

    loop {
        let tool_use = tokio::select! {
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
            next = conn.tool_queue.pop() => match next {
                Some(tool_use) => tool_use,
                None => break,
            },
        };
        dispatch_tool(&conn, tool_use).await;
    }

    debug!("tool dispatcher stopped");
}

/// Run `tool_use` in its own task, tracked in the connection's pending map.
pub(crate) async fn dispatch_tool(conn: &Arc<BidirectionalConnection>, tool_use: ToolUse) {
    let Some(agent) = conn.agent() else {
        return;
    };
    let executor = Arc::clone(&agent.executor);
    let task_conn = Arc::clone(conn);
    let id = tool_use.tool_use_id.clone();

    conn.track_tool_task(id, move || {
        tokio::spawn(run_tool(task_conn, executor, tool_use))
    })
    .await;
}

async fn run_tool(
    conn: Arc<BidirectionalConnection>,
    executor: Arc<dyn ToolExecutor>,
    tool_use: ToolUse,
) {
    let result = match AssertUnwindSafe(executor.execute(&tool_use))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic_message(&*panic);
            warn!(
                tool = %tool_use.name,
                tool_use_id = %tool_use.tool_use_id,
                reason = %reason,
                "tool panicked"
            );
            ToolResult::error(
                &tool_use.tool_use_id,
                format!("Tool '{}' panicked: {reason}", tool_use.name),
            )
        }
    };
    conn.finish_tool_task(&tool_use.tool_use_id).await;
    deliver_tool_result(&conn, &tool_use.name, result).await;
}

/// Send `result` into the session. A transport failure waits for the
/// reconnect in progress and retries once on the new session.
async fn deliver_tool_result(conn: &BidirectionalConnection, tool: &str, result: ToolResult) {
    let mut retried = false;
    loop {
        if !conn.is_active() {
            debug!(tool_use_id = %result.tool_use_id, "conversation ended, dropping tool result");
            return;
        }

        let epoch = conn.session_epoch();
        match conn.model.send_tool_result(&result).await {
            Ok(()) => {
                debug!(
                    tool,
                    tool_use_id = %result.tool_use_id,
                    is_error = result.is_error(),
                    "tool result sent"
                );
                return;
            }
            Err(e) if e.is_reconnectable() && !retried => {
                debug!(
                    tool,
                    tool_use_id = %result.tool_use_id,
                    error = %e,
                    "tool result held until reconnect"
                );
                retried = true;
                if !conn.wait_for_reconnect(epoch).await {
                    warn!(tool, tool_use_id = %result.tool_use_id, "session gone, tool result dropped");
                    return;
                }
            }
            Err(e) => {
                warn!(
                    tool,
                    tool_use_id = %result.tool_use_id,
                    error = %e,
                    "failed to send tool result"
                );
                return;
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use duplex_core::config::AgentConfig;
    use duplex_core::types::{
        AudioInput, ImageInput, PartialToolUse, ToolSpec, ToolUseStreamEvent,
    };
    use duplex_core::SessionError;
    use duplex_models::{ModelSession, ScriptedSession};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use crate::agent::AgentState;
    use crate::tools::Tool;

    fn setup() -> (Arc<AgentState>, Arc<ScriptedSession>, Arc<BidirectionalConnection>) {
        let state = AgentState::for_tests(AgentConfig {
            reconnect_backoff_ms: 0,
            ..Default::default()
        });
        let session = Arc::new(ScriptedSession::new());
        let conn = Arc::new(BidirectionalConnection::new(session.clone(), &state));
        (state, session, conn)
    }

    fn calculator_use(id: &str) -> ToolUse {
        ToolUse::new(id, "calculator", json!({"operation": "add", "x": 2, "y": 2}))
    }

    #[tokio::test]
    async fn test_interruption_sets_flag_and_forwards() {
        let (state, _session, conn) = setup();
        let event = ModelEvent::interruption("user_speech");

        handle_event(&conn, event.clone()).await;

        assert!(conn.is_interrupted().await);
        let forwarded = state.output_queue.pop().await.unwrap();
        assert_eq!(forwarded.event_type(), event.event_type());
        assert_eq!(forwarded, event);
    }

    #[tokio::test]
    async fn test_complete_tool_use_queued_and_forwarded() {
        let (state, _session, conn) = setup();
        let event = ModelEvent::tool_use(calculator_use("t1"));

        handle_event(&conn, event.clone()).await;

        assert_eq!(conn.tool_queue.pop().await, Some(calculator_use("t1")));
        assert_eq!(state.output_queue.pop().await, Some(event));
    }

    #[tokio::test]
    async fn test_partial_tool_use_forwarded_not_queued() {
        let (state, _session, conn) = setup();
        let event = ModelEvent::ToolUse(ToolUseStreamEvent {
            current_tool_use: PartialToolUse {
                tool_use_id: Some("t1".into()),
                name: Some("calculator".into()),
                input: None,
            },
            delta: None,
        });

        handle_event(&conn, event).await;

        assert!(conn.tool_queue.is_empty());
        assert_eq!(state.output_queue.len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_tool_use_queued_once() {
        let (state, _session, conn) = setup();
        handle_event(&conn, ModelEvent::tool_use(calculator_use("t1"))).await;
        handle_event(&conn, ModelEvent::tool_use(calculator_use("t1"))).await;

        assert_eq!(conn.tool_queue.len(), 1);
        assert_eq!(state.output_queue.len(), 2);
    }

    #[tokio::test]
    async fn test_final_user_transcript_appends_once() {
        let (state, _session, conn) = setup();

        handle_event(&conn, ModelEvent::transcript(Role::User, "What is", false)).await;
        handle_event(&conn, ModelEvent::transcript(Role::User, "What is 2+2?", true)).await;

        assert_eq!(*state.messages.read().await, vec![Message::user("What is 2+2?")]);
        assert_eq!(state.output_queue.len(), 2);
    }

    #[tokio::test]
    async fn test_assistant_transcript_appends_nothing() {
        let (state, _session, conn) = setup();

        handle_event(&conn, ModelEvent::transcript(Role::Assistant, "The answer is 4.", true)).await;

        assert!(state.messages.read().await.is_empty());
        assert_eq!(state.output_queue.len(), 1);
    }

    #[tokio::test]
    async fn test_audio_resets_interruption_without_touching_history() {
        let (state, _session, conn) = setup();
        handle_event(&conn, ModelEvent::interruption("barge_in")).await;
        handle_event(&conn, ModelEvent::audio("AAAA", "pcm", 16000, 1)).await;

        assert!(!conn.is_interrupted().await);
        assert!(state.messages.read().await.is_empty());
        assert!(conn.tool_queue.is_empty());
        assert_eq!(conn.buffered_audio(), 1);
    }

    #[tokio::test]
    async fn test_other_event_forwarded_verbatim() {
        let (state, _session, conn) = setup();
        let event = ModelEvent::from_value(json!({"type": "usage", "tokens": 12}));

        handle_event(&conn, event.clone()).await;

        assert_eq!(state.output_queue.pop().await, Some(event));
    }

    #[tokio::test]
    async fn test_dispatched_tool_sends_result() {
        let (state, session, conn) = setup();
        session
            .connect(None, &state.tools.get_all_tool_specs(), &[])
            .await
            .unwrap();

        // The scripted session only accepts results for ids it issued.
        session.send_text("What is 2+2?").await.unwrap();
        let tool_use = loop {
            match session.receive().await.unwrap().unwrap() {
                ModelEvent::ToolUse(stream) => {
                    if let Some(tool_use) = stream.current_tool_use.complete() {
                        break tool_use;
                    }
                }
                _ => continue,
            }
        };
        let id = tool_use.tool_use_id.clone();

        dispatch_tool(&conn, tool_use).await;

        tokio::time::timeout(Duration::from_secs(2), async {
            while session.tool_results().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(session.tool_results(), vec![ToolResult::success(id, "4")]);
        assert_eq!(conn.pending_tool_count().await, 0);
    }

    #[tokio::test]
    async fn test_consumer_stops_on_fatal_error() {
        let (_state, session, conn) = setup();
        session.connect(None, &[], &[]).await.unwrap();
        spawn(&conn);

        session.inject_error(SessionError::Protocol("garbled".into()));

        tokio::time::timeout(Duration::from_secs(2), async {
            while conn.is_active() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(conn.last_error(), Some(SessionError::Protocol("garbled".into())));
        conn.shutdown(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_consumer_survives_transport_drop() {
        let (state, session, conn) = setup();
        session.connect(None, &[], &[]).await.unwrap();
        spawn(&conn);

        session.inject_error(SessionError::ConnectionReset("peer".into()));
        tokio::time::timeout(Duration::from_secs(2), async {
            while session.connect_count() < 2 || !session.is_open() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(conn.is_active());

        session.send_text("hello").await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(ModelEvent::Transcript(t)) = state.output_queue.pop().await {
                    if t.source == Role::Assistant && t.is_final {
                        break t.text;
                    }
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(reply, "You said: hello");
        assert_eq!(*state.messages.read().await, vec![Message::user("hello")]);
        conn.shutdown(Duration::from_millis(50)).await;
    }

    // ── Concurrent tools ──

    /// Session that records tool results and replays injected events.
    struct RecordingSession {
        events_tx: mpsc::UnboundedSender<ModelEvent>,
        events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ModelEvent>>,
        results: StdMutex<Vec<ToolResult>>,
        send_attempts: AtomicUsize,
        failing_sends: AtomicUsize,
    }

    impl RecordingSession {
        fn new() -> Arc<Self> {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            Arc::new(Self {
                events_tx,
                events_rx: tokio::sync::Mutex::new(events_rx),
                results: StdMutex::new(Vec::new()),
                send_attempts: AtomicUsize::new(0),
                failing_sends: AtomicUsize::new(0),
            })
        }

        fn emit(&self, event: ModelEvent) {
            self.events_tx.send(event).unwrap();
        }

        fn results(&self) -> Vec<ToolResult> {
            self.results.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelSession for RecordingSession {
        async fn connect(
            &self,
            _system_prompt: Option<&str>,
            _tools: &[ToolSpec],
            _messages: &[Message],
        ) -> Result<(), SessionError> {
            Ok(())
        }

        async fn receive(&self) -> Result<Option<ModelEvent>, SessionError> {
            Ok(self.events_rx.lock().await.recv().await)
        }

        async fn send_text(&self, _text: &str) -> Result<(), SessionError> {
            Ok(())
        }

        async fn send_audio(&self, _audio: &AudioInput) -> Result<(), SessionError> {
            Ok(())
        }

        async fn send_image(&self, _image: &ImageInput) -> Result<(), SessionError> {
            Ok(())
        }

        async fn send_tool_result(&self, result: &ToolResult) -> Result<(), SessionError> {
            self.send_attempts.fetch_add(1, Ordering::SeqCst);
            if self.failing_sends.load(Ordering::SeqCst) > 0 {
                self.failing_sends.fetch_sub(1, Ordering::SeqCst);
                return Err(SessionError::ConnectionLost("socket closed".into()));
            }
            self.results.lock().unwrap().push(result.clone());
            Ok(())
        }

        async fn send_interrupt(&self) -> Result<(), SessionError> {
            Ok(())
        }

        async fn close(&self) {}

        fn display_name(&self) -> &str {
            "recording"
        }
    }

    struct SleepTool {
        name: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl Tool for SleepTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Sleeps, then reports back"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _params: HashMap<String, Value>) -> anyhow::Result<String> {
            tokio::time::sleep(self.delay).await;
            Ok(format!("{} done", self.name))
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "boom"
        }

        fn description(&self) -> &str {
            "Always panics"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _params: HashMap<String, Value>) -> anyhow::Result<String> {
            panic!("detonated");
        }
    }

    fn recording_setup(
        tools: Vec<Arc<dyn Tool>>,
    ) -> (Arc<AgentState>, Arc<RecordingSession>, Arc<BidirectionalConnection>) {
        let state = AgentState::with_tools(
            AgentConfig {
                reconnect_backoff_ms: 0,
                ..Default::default()
            },
            tools,
        );
        let session = RecordingSession::new();
        let conn = Arc::new(BidirectionalConnection::new(session.clone(), &state));
        (state, session, conn)
    }

    async fn wait_for_results(session: &RecordingSession, count: usize) -> Vec<ToolResult> {
        tokio::time::timeout(Duration::from_secs(3), async {
            while session.results().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        session.results()
    }

    #[tokio::test]
    async fn test_tools_run_concurrently_and_finish_out_of_order() {
        let (state, session, conn) = recording_setup(vec![
            Arc::new(SleepTool { name: "slow", delay: Duration::from_millis(300) }),
            Arc::new(SleepTool { name: "fast", delay: Duration::from_millis(80) }),
        ]);
        spawn(&conn);

        session.emit(ModelEvent::tool_use(ToolUse::new("t-slow", "slow", json!({}))));
        session.emit(ModelEvent::tool_use(ToolUse::new("t-fast", "fast", json!({}))));
        session.emit(ModelEvent::transcript(Role::User, "still talking", true));

        // The transcript is consumed while both tools are still running.
        let transcript = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Some(ModelEvent::Transcript(t)) = state.output_queue.pop().await {
                    break t.text;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(transcript, "still talking");
        assert!(session.results().is_empty());

        let results = wait_for_results(&session, 2).await;
        let ids: Vec<&str> = results.iter().map(|r| r.tool_use_id.as_str()).collect();
        assert_eq!(ids, vec!["t-fast", "t-slow"]);
        assert_eq!(results[0], ToolResult::success("t-fast", "fast done"));
        assert_eq!(conn.pending_tool_count().await, 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.results().len(), 2);
        conn.shutdown(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_panicking_tool_answers_with_error() {
        let (_state, session, conn) = recording_setup(vec![Arc::new(PanicTool)]);

        dispatch_tool(&conn, ToolUse::new("t-boom", "boom", json!({}))).await;

        let results = wait_for_results(&session, 1).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].tool_use_id, "t-boom");
        assert!(results[0].is_error());
        assert!(results[0].content.contains("detonated"));
        assert_eq!(conn.pending_tool_count().await, 0);
    }

    #[tokio::test]
    async fn test_tool_result_resent_after_reconnect() {
        let (_state, session, conn) =
            recording_setup(vec![Arc::new(crate::tools::CalculatorTool::new())]);
        session.failing_sends.store(1, Ordering::SeqCst);

        dispatch_tool(&conn, calculator_use("t1")).await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while session.send_attempts.load(Ordering::SeqCst) < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(session.results().is_empty());

        let lost = SessionError::ConnectionLost("socket closed".into());
        assert_eq!(handle_connection_error(&conn, lost).await, Ok(true));

        let results = wait_for_results(&session, 1).await;
        assert_eq!(results, vec![ToolResult::success("t1", "4")]);
        assert_eq!(session.send_attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_held_tool_result_dropped_on_teardown() {
        let (_state, session, conn) =
            recording_setup(vec![Arc::new(crate::tools::CalculatorTool::new())]);
        session.failing_sends.store(1, Ordering::SeqCst);

        dispatch_tool(&conn, calculator_use("t1")).await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while session.send_attempts.load(Ordering::SeqCst) < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        conn.shutdown(Duration::from_millis(20)).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(session.results().is_empty());
        assert_eq!(session.send_attempts.load(Ordering::SeqCst), 1);
    }
}
