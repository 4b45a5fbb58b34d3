//! Bidirectional agent facade.
//!
//! `BidiAgent` is the application-facing handle: `start()` opens the model
//! session and spawns the event loop, `send()`/`receive()` feed and drain the
//! conversation, `interrupt()` cuts off a response, and `end()` tears it all
//! down. [`BidiAgent::run`] wires callable inputs and outputs to a session.

use std::sync::Arc;
use std::time::Duration;

use duplex_core::config::AgentConfig;
use duplex_core::types::{AudioInput, AudioStreamEvent, ImageInput, InputEvent, Message, ModelEvent};
use duplex_core::{EventQueue, SessionError};
use duplex_models::ModelSession;
use futures_util::stream::{self, FuturesUnordered, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::connection::BidirectionalConnection;
use crate::error::{AgentError, ALREADY_ACTIVE, INPUT_SHAPES, NOT_ACTIVE};
use crate::event_loop;
use crate::io::{BidiInput, BidiOutput};
use crate::tools::{ConcurrentToolExecutor, Tool, ToolExecutor, ToolRegistry};

// ─────────────────────────────────────────────
// Shared agent state
// ─────────────────────────────────────────────

/// State shared between the facade and the event loop.
///
/// Connections hold it weakly; the facade owns it.
pub(crate) struct AgentState {
    pub system_prompt: Option<String>,
    pub config: AgentConfig,
    pub tools: Arc<ToolRegistry>,
    pub executor: Arc<dyn ToolExecutor>,
    pub messages: RwLock<Vec<Message>>,
    pub output_queue: EventQueue<ModelEvent>,
}

#[cfg(test)]
impl AgentState {
    /// State with the calculator tool and the given config.
    pub(crate) fn for_tests(config: AgentConfig) -> Arc<Self> {
        Self::with_tools(config, vec![Arc::new(crate::tools::CalculatorTool::new())])
    }

    pub(crate) fn with_tools(config: AgentConfig, tools: Vec<Arc<dyn Tool>>) -> Arc<Self> {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool);
        }
        let tools = Arc::new(registry);
        Arc::new(Self {
            system_prompt: config.system_prompt.clone(),
            executor: Arc::new(ConcurrentToolExecutor::new(tools.clone(), config.tool_timeout())),
            tools,
            config,
            messages: RwLock::new(Vec::new()),
            output_queue: EventQueue::new(),
        })
    }
}

// ─────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────

/// Assembles a [`BidiAgent`].
pub struct BidiAgentBuilder {
    model: Arc<dyn ModelSession>,
    config: AgentConfig,
    system_prompt: Option<String>,
    tools: ToolRegistry,
    executor: Option<Arc<dyn ToolExecutor>>,
    messages: Vec<Message>,
}

impl BidiAgentBuilder {
    /// Use `config` for reconnection, timeouts and buffers.
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// System prompt sent on every (re)connect. Overrides the config's.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Offer a tool to the model.
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    /// Replace the registry-backed executor.
    pub fn executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Seed the conversation history.
    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn build(self) -> BidiAgent {
        let tools = Arc::new(self.tools);
        let executor = self.executor.unwrap_or_else(|| {
            Arc::new(ConcurrentToolExecutor::new(tools.clone(), self.config.tool_timeout()))
        });
        let system_prompt = self.system_prompt.or_else(|| self.config.system_prompt.clone());

        info!(
            model = self.model.display_name(),
            tools = tools.len(),
            reconnection = self.config.enable_reconnection,
            "bidi agent initialized"
        );

        BidiAgent {
            model: self.model,
            state: Arc::new(AgentState {
                system_prompt,
                config: self.config,
                tools,
                executor,
                messages: RwLock::new(self.messages),
                output_queue: EventQueue::new(),
            }),
            connection: Mutex::new(None),
        }
    }
}

// ─────────────────────────────────────────────
// BidiAgent
// ─────────────────────────────────────────────

/// A conversational agent over a persistent, bidirectional model session.
pub struct BidiAgent {
    model: Arc<dyn ModelSession>,
    state: Arc<AgentState>,
    connection: Mutex<Option<Arc<BidirectionalConnection>>>,
}

impl BidiAgent {
    pub fn builder(model: Arc<dyn ModelSession>) -> BidiAgentBuilder {
        BidiAgentBuilder {
            model,
            config: AgentConfig::default(),
            system_prompt: None,
            tools: ToolRegistry::new(),
            executor: None,
            messages: Vec::new(),
        }
    }

    /// Agent with default config and the given tools.
    pub fn new(model: Arc<dyn ModelSession>, tools: Vec<Arc<dyn Tool>>) -> Self {
        tools
            .into_iter()
            .fold(Self::builder(model), BidiAgentBuilder::tool)
            .build()
    }

    // ── Lifecycle ──

    /// Open the model session and start the event loop.
    pub async fn start(&self) -> Result<(), AgentError> {
        let mut slot = self.connection.lock().await;
        if slot.as_ref().is_some_and(|conn| conn.is_active()) {
            return Err(AgentError::InvalidState(ALREADY_ACTIVE.into()));
        }

        // A previous conversation that ended on its own.
        if let Some(stale) = slot.take() {
            debug!("tearing down finished connection");
            stale.shutdown(self.state.config.shutdown_grace()).await;
        }
        let stale_events = self.state.output_queue.drain().await.len();
        if stale_events > 0 {
            debug!(discarded = stale_events, "discarded stale output events");
        }

        let tools = self.state.tools.get_all_tool_specs();
        let messages = self.state.messages.read().await.clone();
        self.model
            .connect(self.state.system_prompt.as_deref(), &tools, &messages)
            .await?;

        let conn = Arc::new(BidirectionalConnection::new(self.model.clone(), &self.state));
        event_loop::spawn(&conn);
        *slot = Some(conn);

        info!(
            model = self.model.display_name(),
            tools = tools.len(),
            history = messages.len(),
            "conversation started"
        );
        Ok(())
    }

    /// End the conversation. Safe to call when nothing is running.
    pub async fn end(&self) {
        let conn = self.connection.lock().await.take();
        if let Some(conn) = conn {
            conn.shutdown(self.state.config.shutdown_grace()).await;
            info!("conversation ended");
        }
    }

    // ── Input ──

    /// Send text, audio or an image to the model.
    pub async fn send(&self, input: impl Into<InputEvent>) -> Result<(), AgentError> {
        let conn = self.active_connection().await?;
        let input = input.into();
        debug!(kind = input.kind(), "sending input");

        match &input {
            InputEvent::Text(text) => conn.model.send_text(text).await?,
            InputEvent::Audio(audio) => conn.model.send_audio(audio).await?,
            InputEvent::Image(image) => conn.model.send_image(image).await?,
        }
        Ok(())
    }

    /// Send untyped input: a JSON string is text, an object with `audioData`
    /// is audio, an object with `imageData` is an image.
    pub async fn send_json(&self, value: Value) -> Result<(), AgentError> {
        let input = input_from_json(value)?;
        self.send(input).await
    }

    /// Ask the model to stop its current response.
    pub async fn interrupt(&self) -> Result<(), AgentError> {
        let conn = self.active_connection().await?;
        conn.model.send_interrupt().await?;
        info!("interrupt sent");
        Ok(())
    }

    // ── Output ──

    /// Stream of output events for as long as the conversation is active.
    ///
    /// Each call returns a fresh stream over the shared output queue. Once
    /// the connection goes inactive, events already queued are still
    /// yielded; after `end()` the stream is empty.
    pub fn receive(&self) -> impl Stream<Item = ModelEvent> + Send + '_ {
        let poll = self.state.config.receive_poll_interval();
        stream::unfold((), move |()| async move {
            loop {
                let conn = self.connection.lock().await.clone()?;
                if !conn.is_active() {
                    return self.state.output_queue.try_pop().map(|event| (event, ()));
                }
                if let Some(event) = self.state.output_queue.pop_timeout(poll).await {
                    return Some((event, ()));
                }
            }
        })
    }

    /// Next chunk from the audio playback buffer, waiting up to `timeout`.
    pub async fn next_audio_chunk(&self, timeout: Duration) -> Option<AudioStreamEvent> {
        let conn = self.connection.lock().await.clone()?;
        conn.next_audio_chunk(timeout).await
    }

    // ── Accessors ──

    pub async fn is_active(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|conn| conn.is_active())
    }

    /// Snapshot of the conversation history.
    pub async fn messages(&self) -> Vec<Message> {
        self.state.messages.read().await.clone()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.state.tools.tool_names()
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.state.system_prompt.as_deref()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.state.config
    }

    /// The session error that ended the current conversation, if any.
    pub async fn last_error(&self) -> Option<SessionError> {
        self.connection
            .lock()
            .await
            .as_ref()
            .and_then(|conn| conn.last_error())
    }

    // ── Callable IO ──

    /// Drive a conversation from `inputs` to `outputs`.
    ///
    /// Starts a session if none is active. Every input is pumped
    /// concurrently into [`send`](Self::send) and every output event is
    /// written to every output. Returns, ending the session, once all
    /// inputs are exhausted, the session ends, or an input or output fails.
    pub async fn run(
        &self,
        inputs: Vec<Box<dyn BidiInput>>,
        mut outputs: Vec<Box<dyn BidiOutput>>,
    ) -> Result<(), AgentError> {
        if inputs.is_empty() {
            return Err(AgentError::InvalidInput("inputs parameter cannot be empty".into()));
        }
        if outputs.is_empty() {
            return Err(AgentError::InvalidInput("outputs parameter cannot be empty".into()));
        }

        if !self.is_active().await {
            self.start().await?;
        }

        let pump_inputs = async {
            let mut readers: FuturesUnordered<_> = inputs
                .into_iter()
                .map(|mut input| async move {
                    while let Some(event) = input.read().await? {
                        self.send(event).await?;
                    }
                    Ok::<(), AgentError>(())
                })
                .collect();
            while let Some(result) = readers.next().await {
                result?;
            }
            debug!("all inputs exhausted");
            Ok::<(), AgentError>(())
        };

        let fan_out = async {
            let events = self.receive();
            futures_util::pin_mut!(events);
            while let Some(event) = events.next().await {
                for output in outputs.iter_mut() {
                    output.write(&event).await?;
                }
            }
            debug!("output stream ended");
            Ok::<(), AgentError>(())
        };

        let result = tokio::select! {
            result = pump_inputs => result,
            result = fan_out => result,
        };

        let failure = self.last_error().await;
        self.end().await;

        if let Err(e) = &result {
            warn!(category = e.category(), error = %e, "run stopped");
        }
        result?;
        match failure {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    // ── Internals ──

    async fn active_connection(&self) -> Result<Arc<BidirectionalConnection>, AgentError> {
        self.connection
            .lock()
            .await
            .as_ref()
            .filter(|conn| conn.is_active())
            .cloned()
            .ok_or_else(|| AgentError::InvalidState(NOT_ACTIVE.into()))
    }
}

/// Map an untyped JSON value onto one of the three input shapes.
pub fn input_from_json(value: Value) -> Result<InputEvent, AgentError> {
    let shape_error = |e: serde_json::Error| AgentError::InvalidInput(format!("{INPUT_SHAPES}: {e}"));

    if let Value::String(text) = value {
        return Ok(InputEvent::Text(text));
    }
    if !value.is_object() {
        return Err(AgentError::InvalidInput(INPUT_SHAPES.into()));
    }
    if value.get("audioData").is_some() {
        let audio: AudioInput = serde_json::from_value(value).map_err(shape_error)?;
        return Ok(InputEvent::Audio(audio));
    }
    if value.get("imageData").is_some() {
        let image: ImageInput = serde_json::from_value(value).map_err(shape_error)?;
        return Ok(InputEvent::Image(image));
    }
    Err(AgentError::InvalidInput(INPUT_SHAPES.into()))
}
