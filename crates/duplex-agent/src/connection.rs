//! Bidirectional connection: the coordination record for one conversation.
//!
//! Owns the live model session, the tool queue, the in-flight tool tasks and
//! the audio playback buffer. The event loop and the facade share it through
//! an `Arc`; it only holds a weak reference back to the agent state.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use duplex_core::types::{AudioStreamEvent, ToolUse};
use duplex_core::{EventQueue, SessionError};
use duplex_models::ModelSession;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::AgentState;

/// How often a task parked on [`BidirectionalConnection::wait_for_reconnect`]
/// re-checks that the conversation is still active.
const RECONNECT_WAIT_POLL: Duration = Duration::from_millis(50);

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─────────────────────────────────────────────
// BidirectionalConnection
// ─────────────────────────────────────────────

/// State of one active conversation.
pub struct BidirectionalConnection {
    /// Model session for this conversation. Reconnection reuses it.
    pub(crate) model: Arc<dyn ModelSession>,
    agent: Weak<AgentState>,
    active: AtomicBool,
    /// The `interrupted` flag; the mutex doubles as the interruption lock.
    interrupted: Mutex<bool>,
    pub(crate) tool_queue: EventQueue<ToolUse>,
    pending_tool_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    seen_tool_uses: StdMutex<HashSet<String>>,
    audio_output: StdMutex<VecDeque<AudioStreamEvent>>,
    audio_ready: Notify,
    audio_limit: usize,
    failure: StdMutex<Option<SessionError>>,
    shutdown: watch::Sender<bool>,
    /// Bumped after every successful reconnect.
    epoch: watch::Sender<u64>,
    background: StdMutex<Vec<JoinHandle<()>>>,
}

impl BidirectionalConnection {
    /// Build the record for a freshly connected model session.
    pub(crate) fn new(model: Arc<dyn ModelSession>, agent: &Arc<AgentState>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (epoch, _) = watch::channel(0);
        Self {
            model,
            agent: Arc::downgrade(agent),
            active: AtomicBool::new(true),
            interrupted: Mutex::new(false),
            tool_queue: EventQueue::new(),
            pending_tool_tasks: Mutex::new(HashMap::new()),
            seen_tool_uses: StdMutex::new(HashSet::new()),
            audio_output: StdMutex::new(VecDeque::new()),
            audio_ready: Notify::new(),
            audio_limit: agent.config.audio_buffer_limit.max(1),
            failure: StdMutex::new(None),
            shutdown,
            epoch,
            background: StdMutex::new(Vec::new()),
        }
    }

    /// The owning agent's state, if the agent is still alive.
    pub(crate) fn agent(&self) -> Option<Arc<AgentState>> {
        self.agent.upgrade()
    }

    // ── Lifecycle ──

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Receiver that flips to `true` once teardown starts.
    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Whether `shutdown()` has started.
    pub(crate) fn is_closing(&self) -> bool {
        *self.shutdown.borrow()
    }

    // ── Reconnection epochs ──

    /// Number of successful reconnects so far.
    pub(crate) fn session_epoch(&self) -> u64 {
        *self.epoch.borrow()
    }

    pub(crate) fn mark_reconnected(&self) {
        self.epoch.send_modify(|epoch| *epoch += 1);
    }

    /// Wait until the session has been re-established since `seen`.
    ///
    /// Returns `false` once the conversation stops instead.
    pub(crate) async fn wait_for_reconnect(&self, seen: u64) -> bool {
        let mut epoch = self.epoch.subscribe();
        while self.is_active() {
            if *epoch.borrow_and_update() != seen {
                return true;
            }
            let _ = tokio::time::timeout(RECONNECT_WAIT_POLL, epoch.changed()).await;
        }
        false
    }

    /// Hand a background task to the connection for supervision.
    pub(crate) fn supervise(&self, handle: JoinHandle<()>) {
        lock(&self.background).push(handle);
    }

    /// Record an unrecoverable session error and stop the conversation.
    pub(crate) fn record_failure(&self, error: SessionError) {
        warn!(category = error.category(), error = %error, "connection failed");
        *lock(&self.failure) = Some(error);
        self.set_active(false);
    }

    /// The error that ended this connection, if any.
    pub fn last_error(&self) -> Option<SessionError> {
        lock(&self.failure).clone()
    }

    // ── Interruption ──

    /// Set `interrupted` and drop all buffered audio, atomically.
    pub(crate) async fn begin_interruption(&self) {
        let mut interrupted = self.interrupted.lock().await;
        *interrupted = true;
        let dropped = {
            let mut audio = lock(&self.audio_output);
            let n = audio.len();
            audio.clear();
            n
        };
        debug!(dropped_chunks = dropped, "interruption started");
    }

    pub async fn is_interrupted(&self) -> bool {
        *self.interrupted.lock().await
    }

    // ── Audio playback buffer ──

    /// Buffer an audio chunk for playback. New audio ends an interruption.
    ///
    /// Returns `false` if the buffer was full and the oldest chunk was dropped.
    pub(crate) async fn queue_audio(&self, chunk: AudioStreamEvent) -> bool {
        let mut interrupted = self.interrupted.lock().await;
        *interrupted = false;
        let fits = {
            let mut audio = lock(&self.audio_output);
            let fits = audio.len() < self.audio_limit;
            if !fits {
                audio.pop_front();
            }
            audio.push_back(chunk);
            fits
        };
        drop(interrupted);
        self.audio_ready.notify_one();
        fits
    }

    /// Next buffered audio chunk, waiting up to `timeout` for one.
    pub async fn next_audio_chunk(&self, timeout: Duration) -> Option<AudioStreamEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(chunk) = lock(&self.audio_output).pop_front() {
                return Some(chunk);
            }
            if tokio::time::timeout_at(deadline, self.audio_ready.notified())
                .await
                .is_err()
            {
                return lock(&self.audio_output).pop_front();
            }
        }
    }

    pub fn buffered_audio(&self) -> usize {
        lock(&self.audio_output).len()
    }

    // ── Tool bookkeeping ──

    /// Remember a tool-use id. Returns `false` if it was already seen.
    pub(crate) fn mark_tool_use_seen(&self, tool_use_id: &str) -> bool {
        lock(&self.seen_tool_uses).insert(tool_use_id.to_string())
    }

    /// Spawn a tool task and record its handle under one lock, so the task
    /// cannot finish before its entry exists.
    pub(crate) async fn track_tool_task<F>(&self, tool_use_id: String, spawn: F)
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut pending = self.pending_tool_tasks.lock().await;
        let handle = spawn();
        if let Some(previous) = pending.insert(tool_use_id, handle) {
            previous.abort();
        }
    }

    /// Drop a finished tool task's entry.
    pub(crate) async fn finish_tool_task(&self, tool_use_id: &str) {
        self.pending_tool_tasks.lock().await.remove(tool_use_id);
    }

    pub async fn pending_tool_count(&self) -> usize {
        self.pending_tool_tasks.lock().await.len()
    }

    // ── Teardown ──

    /// Stop the conversation: mark inactive, close the model session, give
    /// in-flight work `grace` to finish, then abort whatever is left.
    pub(crate) async fn shutdown(&self, grace: Duration) {
        self.set_active(false);
        self.shutdown.send_replace(true);
        self.model.close().await;

        let tools: Vec<JoinHandle<()>> = self
            .pending_tool_tasks
            .lock()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        let background: Vec<JoinHandle<()>> = lock(&self.background).drain(..).collect();

        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0usize;
        for handle in tools.into_iter().chain(background) {
            let abort = handle.abort_handle();
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                abort.abort();
                aborted += 1;
            }
        }

        lock(&self.audio_output).clear();
        info!(model = self.model.display_name(), aborted, "connection closed");
    }
}
