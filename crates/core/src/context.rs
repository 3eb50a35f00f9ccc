//! Per-request invocation context handed to every tool call.
//!
//! The context is owned by exactly one in-flight request. It carries
//! the identities the request resolved to, the delivery mode, and a
//! mutable scratch area for stateful tools that must share a resource
//! across calls within the same request (e.g. a single interactive
//! browser page). The scratch area is released when the loop reaches
//! any terminal state.

use crate::request::InboundRequest;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Read-mostly bundle passed by reference into every tool execution.
pub struct ToolInvocationContext {
    /// The calling application id
    pub app_id: String,

    /// Raw channel identity of the sender
    pub user_id: String,

    /// Canonical identity after identity-link resolution
    pub canonical_user_id: String,

    /// Human-readable sender name, if known
    pub user_name: Option<String>,

    /// Session key this request is scoped to
    pub session_id: String,

    /// Stable run id for the canonical user
    pub run_id: String,

    /// Whether the reply must be returned in-band (no outbound queue)
    pub synchronous_delivery: bool,

    /// The original inbound request, when the call originated from one
    pub request: Option<InboundRequest>,

    /// Shared mutable scratch for stateful tools within this request
    scratch: Mutex<HashMap<String, serde_json::Value>>,
}

impl ToolInvocationContext {
    pub fn new(
        app_id: impl Into<String>,
        user_id: impl Into<String>,
        canonical_user_id: impl Into<String>,
        session_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            user_id: user_id.into(),
            canonical_user_id: canonical_user_id.into(),
            user_name: None,
            session_id: session_id.into(),
            run_id: run_id.into(),
            synchronous_delivery: false,
            request: None,
            scratch: Mutex::new(HashMap::new()),
        }
    }

    /// Attach the originating request; sets the delivery mode from it.
    pub fn with_request(mut self, request: InboundRequest) -> Self {
        self.synchronous_delivery = request.is_sync_inbound();
        self.request = Some(request);
        self
    }

    pub fn with_user_name(mut self, name: Option<String>) -> Self {
        self.user_name = name;
        self
    }

    /// Store a scratch value under a key.
    pub async fn scratch_put(&self, key: impl Into<String>, value: serde_json::Value) {
        self.scratch.lock().await.insert(key.into(), value);
    }

    /// Fetch a scratch value by key.
    pub async fn scratch_get(&self, key: &str) -> Option<serde_json::Value> {
        self.scratch.lock().await.get(key).cloned()
    }

    /// Tear down all scratch state.
    ///
    /// Called at every terminal state of the tool-calling loop so
    /// per-request resources never outlive their request.
    pub async fn release_scratch(&self) {
        let mut scratch = self.scratch.lock().await;
        if !scratch.is_empty() {
            debug!(
                session_id = %self.session_id,
                entries = scratch.len(),
                "Releasing request scratch state"
            );
        }
        scratch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::InboundRequest;

    fn ctx() -> ToolInvocationContext {
        ToolInvocationContext::new("hearthclaw", "alice", "alice", "hearthclaw:main", "run-1")
    }

    #[tokio::test]
    async fn scratch_roundtrip_and_release() {
        let ctx = ctx();
        ctx.scratch_put("browser_session", serde_json::json!({"page": 1}))
            .await;
        assert!(ctx.scratch_get("browser_session").await.is_some());

        ctx.release_scratch().await;
        assert!(ctx.scratch_get("browser_session").await.is_none());
    }

    #[tokio::test]
    async fn sync_flag_follows_request() {
        let sync_ctx = ctx().with_request(InboundRequest::synchronous("hearthclaw", "alice", "hi"));
        assert!(sync_ctx.synchronous_delivery);

        let mut remote = InboundRequest::synchronous("hearthclaw", "alice", "hi");
        remote.host = "10.0.0.1".into();
        remote.port = 18790;
        let async_ctx = ctx().with_request(remote);
        assert!(!async_ctx.synchronous_delivery);
    }
}
