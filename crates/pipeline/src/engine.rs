//! The request engine: the inbound queue's drain worker.
//!
//! For each admitted request the engine resolves identities and the
//! session key, runs the pending-plugin fill-and-retry shortcut, then
//! the tool-calling loop, and finally dispatches the reply: in-band for
//! synchronous jobs, into the outbound queue otherwise, nothing at all
//! when a tool already routed it. The index job is enqueued after the
//! reply has left.

use crate::queues::{InboundJob, IndexJob};
use hearthclaw_agent::loop_runner::{FALLBACK_APOLOGY, LoopOutcome, ToolLoop};
use hearthclaw_core::context::ToolInvocationContext;
use hearthclaw_core::event::{DomainEvent, EventBus};
use hearthclaw_core::message::{Conversation, Message};
use hearthclaw_core::request::{InboundRequest, OutboundReply, ReplyPayload};
use hearthclaw_core::session::{ResolvedSession, SessionResolver};
use hearthclaw_plugins::PluginGateway;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};

const NOT_AUTHORIZED: &str = "Sorry, you are not authorized to use this assistant.";

pub struct Engine {
    tool_loop: ToolLoop,
    gateway: Arc<PluginGateway>,
    resolver: Arc<SessionResolver>,
    system_prompt: String,
    allowed_users: Vec<String>,
    outbound_tx: mpsc::Sender<OutboundReply>,
    index_tx: mpsc::Sender<IndexJob>,
    event_bus: Arc<EventBus>,
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl Engine {
    pub fn new(
        tool_loop: ToolLoop,
        gateway: Arc<PluginGateway>,
        resolver: Arc<SessionResolver>,
        allowed_users: Vec<String>,
        outbound_tx: mpsc::Sender<OutboundReply>,
        index_tx: mpsc::Sender<IndexJob>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            tool_loop,
            gateway,
            resolver,
            system_prompt: String::new(),
            allowed_users,
            outbound_tx,
            index_tx,
            event_bus,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Drain the inbound queue until it closes.
    pub async fn run(&self, mut rx: mpsc::Receiver<InboundJob>) {
        info!("Engine worker started");
        while let Some(job) = rx.recv().await {
            self.handle(job).await;
        }
        info!("Engine worker stopped, inbound queue closed");
    }

    /// Handle one admitted request end to end.
    pub async fn handle(&self, job: InboundJob) {
        let InboundJob { request, reply_to } = job;
        let resolved = self.resolver.resolve(&request);

        self.event_bus.publish(DomainEvent::RequestAdmitted {
            request_id: request.request_id.clone(),
            app_id: request.app_id.clone(),
            session_key: resolved.session_key.clone(),
            timestamp: chrono::Utc::now(),
        });

        if !self.allowed_users.is_empty()
            && !self.allowed_users.contains(&resolved.canonical_user_id)
        {
            warn!(
                user = %resolved.canonical_user_id,
                request_id = %request.request_id,
                "Rejecting request from unauthorized user"
            );
            self.respond(reply_to, &request, NOT_AUTHORIZED.to_string()).await;
            return;
        }

        let ctx = ToolInvocationContext::new(
            &request.app_id,
            &request.user_id,
            &resolved.canonical_user_id,
            &resolved.session_key,
            &resolved.run_id,
        )
        .with_user_name(request.user_name.clone())
        .with_request(request.clone());

        // A parked plugin call may be completable by this message alone,
        // skipping the loop entirely.
        if let Some(text) = self.gateway.try_fill_pending(&ctx, &request.text).await {
            debug!(
                session_key = %resolved.session_key,
                "Pending plugin call completed by follow-up message"
            );
            self.record_turn(&resolved.session_key, &request.text, &text).await;
            self.respond(reply_to, &request, text.clone()).await;
            self.enqueue_index(&resolved, &request.text, Some(text), false).await;
            return;
        }

        let mut conversation = self.checkout_conversation(&resolved.session_key).await;
        conversation.push(Message::user(&request.text));

        let (reply_text, routed) = match self.tool_loop.run(&mut conversation, &ctx).await {
            Ok(LoopOutcome::Done { text }) => (Some(text), false),
            Ok(LoopOutcome::RoundBudgetExhausted { text }) => (Some(text), false),
            Ok(LoopOutcome::RoutedAway) => (None, true),
            Err(e) => {
                warn!(
                    session_key = %resolved.session_key,
                    error = %e,
                    "Tool loop failed, sending apology"
                );
                self.event_bus.publish(DomainEvent::ErrorOccurred {
                    context: "tool_loop".into(),
                    error_message: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                (Some(FALLBACK_APOLOGY.to_string()), false)
            }
        };

        match &reply_text {
            Some(text) => self.respond(reply_to, &request, text.clone()).await,
            // Routed away: zero delivery actions here.
            None => debug!(
                request_id = %request.request_id,
                "Reply was routed by a tool, nothing to deliver"
            ),
        }

        self.conversations
            .lock()
            .await
            .insert(resolved.session_key.clone(), conversation);
        self.enqueue_index(&resolved, &request.text, reply_text, routed).await;
    }

    async fn checkout_conversation(&self, session_key: &str) -> Conversation {
        let mut map = self.conversations.lock().await;
        map.remove(session_key).unwrap_or_else(|| {
            let mut conv = Conversation::new(session_key);
            if !self.system_prompt.trim().is_empty() {
                conv.push(Message::system(&self.system_prompt));
            }
            conv
        })
    }

    /// Record a turn that bypassed the loop (pending retry path).
    async fn record_turn(&self, session_key: &str, user_text: &str, reply_text: &str) {
        let mut map = self.conversations.lock().await;
        let conv = map.entry(session_key.to_string()).or_insert_with(|| {
            let mut conv = Conversation::new(session_key);
            if !self.system_prompt.trim().is_empty() {
                conv.push(Message::system(&self.system_prompt));
            }
            conv
        });
        conv.push(Message::user(user_text));
        conv.push(Message::assistant(reply_text));
    }

    async fn respond(
        &self,
        reply_to: Option<oneshot::Sender<String>>,
        request: &InboundRequest,
        text: String,
    ) {
        if let Some(tx) = reply_to {
            if tx.send(text).is_err() {
                warn!(
                    request_id = %request.request_id,
                    "Synchronous caller went away before the reply was ready"
                );
            }
            return;
        }
        if request.is_sync_inbound() {
            warn!(
                request_id = %request.request_id,
                "Synchronous request without a reply channel, dropping reply"
            );
            return;
        }
        let reply = OutboundReply::for_request(request, ReplyPayload::text(text));
        if let Err(e) = self.outbound_tx.send(reply).await {
            warn!(
                request_id = %request.request_id,
                error = %e,
                "Outbound queue closed, dropping reply"
            );
        }
    }

    async fn enqueue_index(
        &self,
        resolved: &ResolvedSession,
        user_text: &str,
        reply_text: Option<String>,
        routed: bool,
    ) {
        let job = IndexJob {
            session_key: resolved.session_key.clone(),
            canonical_user_id: resolved.canonical_user_id.clone(),
            user_text: user_text.to_string(),
            reply_text,
            routed,
            timestamp: chrono::Utc::now(),
        };
        if self.index_tx.send(job).await.is_err() {
            warn!(session_key = %resolved.session_key, "Index queue closed, dropping turn record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hearthclaw_config::{AgentConfig, PluginsConfig};
    use hearthclaw_core::error::ProviderError;
    use hearthclaw_core::message::MessageToolCall;
    use hearthclaw_core::provider::{Provider, ProviderRequest, ProviderResponse};
    use hearthclaw_core::session::SessionScope;
    use hearthclaw_core::tool::ToolCatalog;
    use hearthclaw_plugins::{PluginRegistry, RoutePluginTool};
    use crate::queues::QueueReplySink;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    const WEATHER_MANIFEST: &str = r#"
[[plugins]]
type = "external_subprocess"
id = "weather"
name = "Weather"
command = "sh"
args = ["-c", 'cat > /dev/null; printf %s "{\"success\":true,\"text\":\"sunny\"}"']
[[plugins.capabilities]]
id = "current"
[[plugins.capabilities.parameters]]
name = "city"
"#;

    struct ScriptedProvider {
        script: Mutex<VecDeque<Message>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let message = self
                .script
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| ProviderError::Network("script exhausted".into()))?;
            Ok(ProviderResponse {
                message,
                usage: None,
                model: request.model,
            })
        }
    }

    fn route_call(args: serde_json::Value) -> Message {
        let mut msg = Message::assistant("");
        msg.tool_calls.push(MessageToolCall {
            id: "call_route".into(),
            name: "route_to_plugin".into(),
            arguments: args.to_string(),
        });
        msg
    }

    struct Rig {
        engine: Arc<Engine>,
        provider: Arc<ScriptedProvider>,
        outbound_rx: mpsc::Receiver<OutboundReply>,
        index_rx: mpsc::Receiver<IndexJob>,
    }

    fn rig(script: Vec<Message>, allowed_users: Vec<String>) -> Rig {
        let provider = Arc::new(ScriptedProvider {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        });
        let (outbound_tx, outbound_rx) = mpsc::channel(8);
        let (index_tx, index_rx) = mpsc::channel(8);
        let event_bus = Arc::new(EventBus::default());

        let registry = Arc::new(PluginRegistry::from_manifest_str(WEATHER_MANIFEST).unwrap());
        let gateway = Arc::new(PluginGateway::new(registry, &PluginsConfig::default()));

        let mut catalog = ToolCatalog::new();
        catalog
            .register(Box::new(RoutePluginTool::new(
                gateway.clone(),
                Arc::new(QueueReplySink::new(outbound_tx.clone())),
            )))
            .unwrap();

        let tool_loop = ToolLoop::new(
            provider.clone(),
            "mock-model",
            Arc::new(catalog),
            &AgentConfig {
                max_tool_rounds: 3,
                ..AgentConfig::default()
            },
            event_bus.clone(),
        );

        let resolver = Arc::new(SessionResolver::new(SessionScope::Main, &HashMap::new()));
        let engine = Arc::new(
            Engine::new(
                tool_loop,
                gateway,
                resolver,
                allowed_users,
                outbound_tx,
                index_tx,
                event_bus,
            )
            .with_system_prompt("You are Hearthclaw."),
        );

        Rig {
            engine,
            provider,
            outbound_rx,
            index_rx,
        }
    }

    #[tokio::test]
    async fn sync_job_replies_in_band() {
        let mut rig = rig(vec![Message::assistant("Hello!")], Vec::new());

        let request = InboundRequest::synchronous("hearthclaw", "alice", "hi");
        let (job, reply_rx) = InboundJob::synchronous(request);
        rig.engine.handle(job).await;

        assert_eq!(reply_rx.await.unwrap(), "Hello!");
        assert!(rig.outbound_rx.try_recv().is_err());

        let indexed = rig.index_rx.recv().await.unwrap();
        assert_eq!(indexed.reply_text.as_deref(), Some("Hello!"));
        assert!(!indexed.routed);
    }

    #[tokio::test]
    async fn async_job_goes_through_the_outbound_queue() {
        let mut rig = rig(vec![Message::assistant("Hello!")], Vec::new());

        let mut request = InboundRequest::synchronous("hearthclaw", "alice", "hi");
        request.host = "10.0.0.7".into();
        request.port = 9000;
        rig.engine.handle(InboundJob::asynchronous(request)).await;

        let reply = rig.outbound_rx.recv().await.unwrap();
        assert_eq!(reply.response_data.text, "Hello!");
        assert_eq!(reply.host, "10.0.0.7");
    }

    #[tokio::test]
    async fn routed_reply_means_zero_engine_deliveries() {
        let mut rig = rig(
            vec![route_call(serde_json::json!({
                "plugin": "weather",
                "parameters": { "city": "Boston" }
            }))],
            Vec::new(),
        );

        let mut request = InboundRequest::synchronous("hearthclaw", "alice", "weather?");
        request.host = "10.0.0.7".into();
        request.port = 9000;
        rig.engine.handle(InboundJob::asynchronous(request)).await;

        // Exactly one outbound reply: the routing tool's delivery.
        let reply = rig.outbound_rx.recv().await.unwrap();
        assert_eq!(reply.response_data.text, "sunny");
        assert!(rig.outbound_rx.try_recv().is_err());

        let indexed = rig.index_rx.recv().await.unwrap();
        assert!(indexed.routed);
        assert!(indexed.reply_text.is_none());
        assert_eq!(rig.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unauthorized_user_gets_a_rejection_reply() {
        let rig = rig(vec![Message::assistant("unused")], vec!["bob".into()]);

        let request = InboundRequest::synchronous("hearthclaw", "alice", "hi");
        let (job, reply_rx) = InboundJob::synchronous(request);
        rig.engine.handle(job).await;

        assert!(reply_rx.await.unwrap().contains("not authorized"));
        assert_eq!(rig.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pending_plugin_call_is_filled_by_the_next_message() {
        let rig = rig(
            vec![route_call(serde_json::json!({ "plugin": "weather" }))],
            Vec::new(),
        );

        // First turn: the model routes to the plugin without the city,
        // so the user gets the question back.
        let request = InboundRequest::synchronous("hearthclaw", "alice", "weather please");
        let (job, reply_rx) = InboundJob::synchronous(request);
        rig.engine.handle(job).await;
        assert!(reply_rx.await.unwrap().contains("Missing: city"));

        // Second turn: the bare answer completes the parked call with
        // no further model round.
        let request = InboundRequest::synchronous("hearthclaw", "alice", "Boston");
        let (job, reply_rx) = InboundJob::synchronous(request);
        rig.engine.handle(job).await;
        assert_eq!(reply_rx.await.unwrap(), "sunny");
        assert_eq!(rig.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn provider_failure_yields_apology_not_silence() {
        // Empty script: the first completion fails.
        let rig = rig(Vec::new(), Vec::new());

        let request = InboundRequest::synchronous("hearthclaw", "alice", "hi");
        let (job, reply_rx) = InboundJob::synchronous(request);
        rig.engine.handle(job).await;

        assert_eq!(reply_rx.await.unwrap(), FALLBACK_APOLOGY);
    }

    #[tokio::test]
    async fn worker_drains_jobs_from_the_queue() {
        let rig = rig(
            vec![Message::assistant("one"), Message::assistant("two")],
            Vec::new(),
        );
        let engine = rig.engine.clone();
        let (tx, rx) = mpsc::channel(8);
        let worker = tokio::spawn(async move { engine.run(rx).await });

        let (job, reply1) =
            InboundJob::synchronous(InboundRequest::synchronous("hearthclaw", "alice", "a"));
        tx.send(job).await.unwrap();
        let (job, reply2) =
            InboundJob::synchronous(InboundRequest::synchronous("hearthclaw", "alice", "b"));
        tx.send(job).await.unwrap();

        assert_eq!(reply1.await.unwrap(), "one");
        assert_eq!(reply2.await.unwrap(), "two");

        drop(tx);
        worker.await.unwrap();
    }
}
