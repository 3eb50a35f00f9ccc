//! The outbound delivery worker.
//!
//! Drains the outbound queue and POSTs each reply to the originating
//! channel connector at `http://{host}:{port}/get_response`. Delivery
//! is at-most-once: failures are logged and never retried. Synchronous
//! replies must not reach this worker at all; any that do are dropped
//! with a warning rather than posted to a bogus address.

use hearthclaw_core::event::{DomainEvent, EventBus};
use hearthclaw_core::request::OutboundReply;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct DeliveryWorker {
    client: reqwest::Client,
    timeout: Duration,
    event_bus: Arc<EventBus>,
}

impl DeliveryWorker {
    pub fn new(timeout: Duration, event_bus: Arc<EventBus>) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            event_bus,
        }
    }

    /// Drain the outbound queue until it closes.
    pub async fn run(self, mut rx: mpsc::Receiver<OutboundReply>) {
        info!("Delivery worker started");
        while let Some(reply) = rx.recv().await {
            self.deliver(reply).await;
        }
        info!("Delivery worker stopped, outbound queue closed");
    }

    async fn deliver(&self, reply: OutboundReply) {
        if reply.is_sync_inbound() {
            warn!(
                request_id = %reply.request_id,
                "Synchronous reply reached the outbound queue, dropping"
            );
            return;
        }

        let target = format!("http://{}:{}/get_response", reply.host, reply.port);
        let request_id = reply.request_id.clone();
        debug!(request_id = %request_id, target = %target, "Delivering reply");

        let result = self
            .client
            .post(&target)
            .timeout(self.timeout)
            .json(&reply)
            .send()
            .await;

        let success = match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(
                    request_id = %request_id,
                    target = %target,
                    status = %response.status(),
                    "Reply delivery rejected by connector"
                );
                false
            }
            Err(e) => {
                warn!(
                    request_id = %request_id,
                    target = %target,
                    error = %e,
                    "Reply delivery failed"
                );
                false
            }
        };

        self.event_bus.publish(DomainEvent::ReplyDelivered {
            request_id,
            target,
            success,
            timestamp: chrono::Utc::now(),
        });
    }
}
