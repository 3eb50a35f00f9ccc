//! Queue job types and the reply sink over the outbound queue.
//!
//! The pipeline runs on three bounded FIFO queues — inbound requests,
//! outbound replies, background index jobs — each drained by a single
//! worker. Producers block (await) when a queue is full.

use chrono::{DateTime, Utc};
use hearthclaw_core::error::PipelineError;
use hearthclaw_core::request::{InboundRequest, OutboundReply, ReplySink};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// An admitted request waiting for the engine.
pub struct InboundJob {
    pub request: InboundRequest,

    /// Present for synchronous requests: the HTTP handler is waiting on
    /// this channel and the reply must go here, never into the outbound
    /// queue.
    pub reply_to: Option<oneshot::Sender<String>>,
}

impl InboundJob {
    pub fn asynchronous(request: InboundRequest) -> Self {
        Self {
            request,
            reply_to: None,
        }
    }

    /// A synchronous job plus the receiver the caller waits on.
    pub fn synchronous(request: InboundRequest) -> (Self, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request,
                reply_to: Some(tx),
            },
            rx,
        )
    }
}

/// Per-turn bookkeeping handed to the background indexer.
#[derive(Debug, Clone)]
pub struct IndexJob {
    pub session_key: String,
    pub canonical_user_id: String,
    pub user_text: String,

    /// None when the reply was routed away by a tool.
    pub reply_text: Option<String>,

    pub routed: bool,
    pub timestamp: DateTime<Utc>,
}

/// A `ReplySink` that pushes into the outbound queue.
///
/// This is what the routing tool delivers through; it never sees the
/// queue itself.
pub struct QueueReplySink {
    tx: mpsc::Sender<OutboundReply>,
}

impl QueueReplySink {
    pub fn new(tx: mpsc::Sender<OutboundReply>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ReplySink for QueueReplySink {
    async fn deliver(&self, reply: OutboundReply) -> Result<(), PipelineError> {
        self.tx
            .send(reply)
            .await
            .map_err(|_| PipelineError::QueueClosed("outbound".into()))
    }
}
