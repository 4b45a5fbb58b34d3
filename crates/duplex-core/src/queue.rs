//! Async FIFO queue shared between producer and consumer tasks.
//!
//! Backs the agent's output queue and the per-connection tool queue.
//! Unbounded `tokio::sync::mpsc` channel; the queue owns both ends, so pushes
//! never fail and consumers take turns on the receiver.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

/// Multi-producer, multi-consumer FIFO.
pub struct EventQueue<T> {
    tx: mpsc::UnboundedSender<T>,
    rx: Mutex<mpsc::UnboundedReceiver<T>>,
    len: AtomicUsize,
}

impl<T> EventQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        EventQueue {
            tx,
            rx: Mutex::new(rx),
            len: AtomicUsize::new(0),
        }
    }

    /// Append an item.
    pub fn push(&self, item: T) {
        // Count first so a concurrent pop never sees the item uncounted.
        self.len.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(item).is_err() {
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Wait for the next item.
    pub async fn pop(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        let item = rx.recv().await;
        if item.is_some() {
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    /// Wait at most `timeout` for the next item.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.pop()).await.ok().flatten()
    }

    /// Take the next item if one is ready and no other consumer is waiting.
    pub fn try_pop(&self) -> Option<T> {
        let mut rx = self.rx.try_lock().ok()?;
        let item = rx.try_recv().ok()?;
        self.len.fetch_sub(1, Ordering::SeqCst);
        Some(item)
    }

    /// Remove and return everything currently queued.
    pub async fn drain(&self) -> Vec<T> {
        let mut rx = self.rx.lock().await;
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            self.len.fetch_sub(1, Ordering::SeqCst);
            items.push(item);
        }
        items
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
