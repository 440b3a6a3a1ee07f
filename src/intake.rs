//! # Scheduler Intake Module
//!
//! The hand-off point between this engine and the external request
//! scheduler.
//!
//! ## Overview
//!
//! The engine never owns the crawl frontier: dedup, rate limits, and
//! ordering all live in the scheduler. What the engine needs is a one-way
//! intake that accepts validated requests for future fetching, so the
//! contract here is a single async `push`. Backpressure, if any, is the
//! scheduler's concern; the engine just reports a push that could not be
//! delivered.
//!
//! [`ChannelIntake`] is the bundled adapter: a `kanal` channel whose
//! receiving half is handed to whatever scheduler drives the crawl. Tests
//! and small single-process deployments can use it directly.

use crate::error::SpiderError;
use crate::request::Request;
use async_trait::async_trait;
use kanal::{AsyncReceiver, AsyncSender, bounded_async, unbounded_async};
use std::sync::Arc;
use tracing::trace;

/// Accepts validated requests for future fetching.
#[async_trait]
pub trait SchedulerIntake: Send + Sync {
    /// Hands one request to the scheduler.
    async fn push(&self, request: Request) -> Result<(), SpiderError>;
}

/// A channel-backed [`SchedulerIntake`].
pub struct ChannelIntake {
    tx: AsyncSender<Request>,
}

impl ChannelIntake {
    /// A bounded intake; `push` waits when the scheduler falls behind.
    pub fn bounded(capacity: usize) -> (Arc<Self>, AsyncReceiver<Request>) {
        let (tx, rx) = bounded_async(capacity);
        (Arc::new(ChannelIntake { tx }), rx)
    }

    /// An unbounded intake; `push` never waits.
    pub fn unbounded() -> (Arc<Self>, AsyncReceiver<Request>) {
        let (tx, rx) = unbounded_async();
        (Arc::new(ChannelIntake { tx }), rx)
    }

    /// Number of requests waiting in the channel.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Whether the channel is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SchedulerIntake for ChannelIntake {
    async fn push(&self, request: Request) -> Result<(), SpiderError> {
        trace!("handing request to scheduler: {}", request.url);
        self.tx
            .send(request)
            .await
            .map_err(|_| SpiderError::IntakeError("request channel closed".into()))
    }
}
