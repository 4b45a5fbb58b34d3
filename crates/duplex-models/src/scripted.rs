//! Scripted model session: a deterministic, in-process stand-in for a
//! streaming provider.
//!
//! Behaviour:
//! - every `send_text` is echoed back as a final user transcript;
//! - simple arithmetic ("What is 2+2?", "25 times 8") triggers a streamed
//!   `calculator` tool call when that tool was offered on connect, and the
//!   answer is spoken once the tool result arrives;
//! - anything else gets a short assistant reply with an audio chunk;
//! - `send_interrupt` produces an interruption event.
//!
//! Tests drive failure paths through [`ScriptedSession::inject_error`] and
//! [`ScriptedSession::fail_next_connects`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use duplex_core::types::{
    AudioInput, ImageInput, Message, ModelEvent, PartialToolUse, Role, ToolResult, ToolSpec,
    ToolUseStreamEvent,
};
use duplex_core::SessionError;

use crate::traits::ModelSession;

/// Name of the tool the script knows how to call.
pub const CALCULATOR_TOOL: &str = "calculator";

/// Base64 of three zero bytes; one unit of fake PCM audio.
const SILENCE_UNIT: &str = "AAAA";

type EventResult = Result<ModelEvent, SessionError>;

/// What the last successful `connect` was given.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectRecord {
    pub system_prompt: Option<String>,
    pub tool_names: Vec<String>,
    pub messages: Vec<Message>,
}

#[derive(Default)]
struct ScriptState {
    connect_calls: usize,
    connect_failures: VecDeque<SessionError>,
    last_connect: Option<ConnectRecord>,
    next_tool_id: usize,
    /// Tool-use id → the arithmetic it was asked to solve.
    pending_tools: HashMap<String, String>,
    sent_texts: Vec<String>,
    tool_results: Vec<ToolResult>,
    audio_chunks: usize,
    images: usize,
    interrupts: usize,
    closes: usize,
}

/// Deterministic [`ModelSession`] driven by simple rules.
pub struct ScriptedSession {
    events_tx: mpsc::UnboundedSender<EventResult>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<EventResult>>,
    open: watch::Sender<bool>,
    state: Mutex<ScriptState>,
}

impl ScriptedSession {
    /// Create a disconnected session.
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (open, _) = watch::channel(false);
        Self {
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            open,
            state: Mutex::new(ScriptState::default()),
        }
    }

    // ── Test hooks ──

    /// Queue an arbitrary event for `receive()`.
    pub fn inject(&self, event: ModelEvent) {
        self.emit(event);
    }

    /// Make a later `receive()` fail with `error` (e.g. a dropped socket).
    pub fn inject_error(&self, error: SessionError) {
        let _ = self.events_tx.send(Err(error));
    }

    /// Make the next `connect()` calls fail with these errors, in order.
    pub fn fail_next_connects(&self, errors: impl IntoIterator<Item = SessionError>) {
        self.state().connect_failures.extend(errors);
    }

    /// Number of `connect()` calls so far, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.state().connect_calls
    }

    /// Arguments of the last successful `connect()`.
    pub fn last_connect(&self) -> Option<ConnectRecord> {
        self.state().last_connect.clone()
    }

    /// Texts received through `send_text()`.
    pub fn sent_texts(&self) -> Vec<String> {
        self.state().sent_texts.clone()
    }

    /// Tool results received through `send_tool_result()`.
    pub fn tool_results(&self) -> Vec<ToolResult> {
        self.state().tool_results.clone()
    }

    pub fn audio_chunk_count(&self) -> usize {
        self.state().audio_chunks
    }

    pub fn interrupt_count(&self) -> usize {
        self.state().interrupts
    }

    pub fn close_count(&self) -> usize {
        self.state().closes
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    // ── Internals ──

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ModelEvent) {
        let _ = self.events_tx.send(Ok(event));
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(SessionError::BrokenPipe("scripted session is not connected".into()))
        }
    }

    /// Speak an assistant reply: a partial transcript, audio, then the final text.
    fn reply(&self, text: &str) {
        let lead = text.split_whitespace().take(3).collect::<Vec<_>>().join(" ");
        self.emit(ModelEvent::transcript(Role::Assistant, lead, false));
        let units = text.split_whitespace().count().max(1);
        self.emit(ModelEvent::audio(SILENCE_UNIT.repeat(units), "pcm", 16000, 1));
        self.emit(ModelEvent::transcript(Role::Assistant, text, true));
    }

    /// Stream a calculator call: name/id first, then the complete input.
    fn call_calculator(&self, question: &str, operation: &str, x: f64, y: f64) {
        let tool_use_id = {
            let mut state = self.state();
            state.next_tool_id += 1;
            let id = format!("tooluse-{}", state.next_tool_id);
            state.pending_tools.insert(id.clone(), question.to_string());
            id
        };

        let input = json!({"operation": operation, "x": x, "y": y});
        self.emit(ModelEvent::ToolUse(ToolUseStreamEvent {
            current_tool_use: PartialToolUse {
                tool_use_id: Some(tool_use_id.clone()),
                name: Some(CALCULATOR_TOOL.to_string()),
                input: None,
            },
            delta: None,
        }));
        self.emit(ModelEvent::ToolUse(ToolUseStreamEvent {
            current_tool_use: PartialToolUse {
                tool_use_id: Some(tool_use_id.clone()),
                name: Some(CALCULATOR_TOOL.to_string()),
                input: Some(input.clone()),
            },
            delta: Some(json!({"toolUse": {"input": input.to_string()}})),
        }));
        debug!(tool_use_id = %tool_use_id, operation, "scripted calculator call");
    }
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelSession for ScriptedSession {
    async fn connect(
        &self,
        system_prompt: Option<&str>,
        tools: &[ToolSpec],
        messages: &[Message],
    ) -> Result<(), SessionError> {
        {
            let mut state = self.state();
            state.connect_calls += 1;
            if let Some(err) = state.connect_failures.pop_front() {
                return Err(err);
            }
            state.pending_tools.clear();
            state.last_connect = Some(ConnectRecord {
                system_prompt: system_prompt.map(str::to_string),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
                messages: messages.to_vec(),
            });
        }

        // Anything still queued belongs to the previous transport.
        if let Ok(mut rx) = self.events_rx.try_lock() {
            while rx.try_recv().is_ok() {}
        }

        self.open.send_replace(true);
        info!(tools = tools.len(), history = messages.len(), "scripted session connected");
        self.emit(ModelEvent::Other(json!({
            "type": "bidirectional_connection_start",
            "connection": "scripted",
        })));
        Ok(())
    }

    async fn receive(&self) -> Result<Option<ModelEvent>, SessionError> {
        let mut open = self.open.subscribe();
        if !*open.borrow_and_update() {
            return Ok(None);
        }

        let mut rx = self.events_rx.lock().await;
        tokio::select! {
            item = rx.recv() => match item {
                Some(Ok(event)) => Ok(Some(event)),
                Some(Err(err)) => Err(err),
                None => Ok(None),
            },
            _ = async { let _ = open.wait_for(|is_open| !*is_open).await; } => Ok(None),
        }
    }

    async fn send_text(&self, text: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        let offers_calculator = {
            let mut state = self.state();
            state.sent_texts.push(text.to_string());
            state
                .last_connect
                .as_ref()
                .is_some_and(|c| c.tool_names.iter().any(|n| n == CALCULATOR_TOOL))
        };

        self.emit(ModelEvent::transcript(Role::User, text, true));

        match parse_arithmetic(text) {
            Some((operation, x, y)) if offers_calculator => {
                self.call_calculator(text, operation, x, y);
            }
            _ => self.reply(&format!("You said: {text}")),
        }
        Ok(())
    }

    async fn send_audio(&self, audio: &AudioInput) -> Result<(), SessionError> {
        self.ensure_open()?;
        if audio.audio_data.is_empty() {
            return Err(SessionError::InvalidArgument("empty audio chunk".into()));
        }
        self.state().audio_chunks += 1;
        Ok(())
    }

    async fn send_image(&self, image: &ImageInput) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.state().images += 1;
        self.reply(&format!("I received a {} image.", image.mime_type));
        Ok(())
    }

    async fn send_tool_result(&self, result: &ToolResult) -> Result<(), SessionError> {
        self.ensure_open()?;
        let question = {
            let mut state = self.state();
            state.tool_results.push(result.clone());
            state.pending_tools.remove(&result.tool_use_id)
        };

        if question.is_none() {
            return Err(SessionError::InvalidArgument(format!(
                "unknown tool use id: {}",
                result.tool_use_id
            )));
        }

        if result.is_error() {
            self.reply(&format!("Sorry, I couldn't work that out: {}", result.content));
        } else {
            self.reply(&format!("The answer is {}.", result.content));
        }
        Ok(())
    }

    async fn send_interrupt(&self) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.state().interrupts += 1;
        self.emit(ModelEvent::interruption("user_interrupt"));
        Ok(())
    }

    async fn close(&self) {
        self.state().closes += 1;
        self.open.send_replace(false);
        debug!("scripted session closed");
    }

    fn display_name(&self) -> &str {
        "scripted"
    }
}

// ─────────────────────────────────────────────
// Arithmetic recognition
// ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
enum Token {
    Num(f64),
    Op(&'static str),
}

/// Find the first `<number> <operator> <number>` in free text.
///
/// Returns the calculator operation name and operands.
fn parse_arithmetic(text: &str) -> Option<(&'static str, f64, f64)> {
    let spaced: String = text
        .chars()
        .flat_map(|c| match c {
            '+' | '*' | '/' | '×' | '÷' | '-' => vec![' ', c, ' '],
            _ => vec![c],
        })
        .collect();

    let tokens: Vec<Token> = spaced
        .split_whitespace()
        .filter_map(|word| {
            let word = word.trim_end_matches(['?', '!', ',']).trim_end_matches('.');
            if let Ok(n) = word.parse::<f64>() {
                return Some(Token::Num(n));
            }
            let op = match word.to_lowercase().as_str() {
                "+" | "plus" => "add",
                "-" | "minus" => "subtract",
                "*" | "×" | "x" | "times" => "multiply",
                "/" | "÷" | "over" | "divided" => "divide",
                _ => return None,
            };
            Some(Token::Op(op))
        })
        .collect();

    tokens.windows(3).find_map(|w| match w {
        [Token::Num(x), Token::Op(op), Token::Num(y)] => Some((*op, *x, *y)),
        _ => None,
    })
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
