//! The `Sink` capability (spec §6): caller-supplied result consumer.
//! `emit` may block; the engine honours that backpressure (workers await
//! the sink before accounting the task as terminal).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::CrawlResult;

/// Outcome of a sink emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Ok,
    Cancelled,
}

/// Must be safe to invoke concurrently from any worker.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn emit(&self, result: CrawlResult) -> EmitOutcome;
}

/// Sink backed by a bounded `tokio::mpsc` channel. `emit` blocks when the
/// channel is full, propagating sink backpressure to the worker that calls
/// it, exactly as spec §4.8 step 9 and §5 require.
pub struct ChannelSink {
    tx: mpsc::Sender<CrawlResult>,
}

impl ChannelSink {
    /// Returns the sink half plus the receiver the caller drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CrawlResult>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Sink for ChannelSink {
    async fn emit(&self, result: CrawlResult) -> EmitOutcome {
        match self.tx.send(result).await {
            Ok(()) => EmitOutcome::Ok,
            Err(_) => EmitOutcome::Cancelled,
        }
    }
}

/// In-memory sink, primarily useful for tests and small one-shot crawls
/// where collecting every result in a `Vec` is acceptable.
pub struct VecSink {
    inner: tokio::sync::Mutex<Vec<CrawlResult>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self {
            inner: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn into_results(self) -> Vec<CrawlResult> {
        self.inner.into_inner()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

impl Default for VecSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for VecSink {
    async fn emit(&self, result: CrawlResult) -> EmitOutcome {
        self.inner.lock().await.push(result);
        EmitOutcome::Ok
    }
}
