//! Callable IO for [`BidiAgent::run`](crate::BidiAgent::run).
//!
//! An input produces events to send; an output consumes every event the
//! model emits. Both are implemented for plain closures returning futures,
//! so ad-hoc wiring needs no new types.

use std::future::Future;

use async_trait::async_trait;
use duplex_core::types::{InputEvent, ModelEvent};

/// A source of conversation input (microphone, stdin, a test script...).
#[async_trait]
pub trait BidiInput: Send {
    /// Next input event. `Ok(None)` means the source is exhausted.
    async fn read(&mut self) -> anyhow::Result<Option<InputEvent>>;
}

/// A sink for model output (speaker, console, a recorder...).
#[async_trait]
pub trait BidiOutput: Send {
    async fn write(&mut self, event: &ModelEvent) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> BidiInput for F
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = anyhow::Result<Option<InputEvent>>> + Send + 'static,
{
    async fn read(&mut self) -> anyhow::Result<Option<InputEvent>> {
        (self)().await
    }
}

#[async_trait]
impl<F, Fut> BidiOutput for F
where
    F: FnMut(ModelEvent) -> Fut + Send,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn write(&mut self, event: &ModelEvent) -> anyhow::Result<()> {
        (self)(event.clone()).await
    }
}
