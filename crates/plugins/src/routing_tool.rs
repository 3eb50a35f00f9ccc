//! The `route_to_plugin` tool.
//!
//! This is the bridge between the tool-calling loop and the plugin
//! gateway, and the only place the routing sentinel is produced. When a
//! plugin completes for an asynchronous request, the tool delivers the
//! reply itself through the `ReplySink` and returns `Routed`, so the
//! loop stops without generating a second user-visible reply. For a
//! synchronous request the reply must travel back on the open
//! connection, so the literal text is returned instead.

use crate::gateway::{GatewayReply, PluginGateway};
use async_trait::async_trait;
use hearthclaw_core::context::ToolInvocationContext;
use hearthclaw_core::error::ToolError;
use hearthclaw_core::request::{OutboundReply, ReplyPayload, ReplySink};
use hearthclaw_core::tool::{Tool, ToolOutcome};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct RoutePluginTool {
    gateway: Arc<PluginGateway>,
    sink: Arc<dyn ReplySink>,
}

impl RoutePluginTool {
    pub fn new(gateway: Arc<PluginGateway>, sink: Arc<dyn ReplySink>) -> Self {
        Self { gateway, sink }
    }
}

#[async_trait]
impl Tool for RoutePluginTool {
    fn name(&self) -> &str {
        "route_to_plugin"
    }

    fn description(&self) -> &str {
        "Hand the user's request off to a plugin capability. Use this when a \
         registered plugin can fulfil the request better than you can. The \
         plugin's reply is sent to the user directly."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "plugin": {
                    "type": "string",
                    "description": "Id of the plugin to invoke"
                },
                "capability": {
                    "type": "string",
                    "description": "Capability id; omit to use the plugin's first capability"
                },
                "parameters": {
                    "type": "object",
                    "description": "Parameters for the capability, as far as known"
                }
            },
            "required": ["plugin"]
        })
    }

    async fn execute(
        &self,
        arguments: Value,
        ctx: &ToolInvocationContext,
    ) -> Result<ToolOutcome, ToolError> {
        let plugin = arguments
            .get("plugin")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("'plugin' is required".into()))?;
        let capability = arguments
            .get("capability")
            .and_then(Value::as_str)
            .unwrap_or("");
        let params: HashMap<String, Value> = arguments
            .get("parameters")
            .and_then(Value::as_object)
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        let reply = self
            .gateway
            .invoke(plugin, capability, &params, ctx)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "route_to_plugin".into(),
                reason: e.to_string(),
            })?;

        let text = match reply {
            // A question for the user is final text either way; it must
            // travel back on whatever path the reply would have taken.
            GatewayReply::NeedsInput { question } => return Ok(ToolOutcome::Text(question)),
            GatewayReply::Completed(text) => text,
        };

        if ctx.synchronous_delivery {
            debug!(plugin = %plugin, "Plugin completed on a synchronous request, replying in-band");
            return Ok(ToolOutcome::Text(text));
        }

        let Some(request) = &ctx.request else {
            // No callback address to deliver to; let the loop carry the
            // text out the normal way.
            return Ok(ToolOutcome::Text(text));
        };

        let outbound = OutboundReply::for_request(request, ReplyPayload::text(text.clone()));
        match self.sink.deliver(outbound).await {
            Ok(()) => {
                debug!(
                    plugin = %plugin,
                    request_id = %request.request_id,
                    "Plugin reply routed to delivery"
                );
                Ok(ToolOutcome::Routed)
            }
            Err(e) => {
                warn!(
                    plugin = %plugin,
                    error = %e,
                    "Routing delivery failed, falling back to in-loop reply"
                );
                Ok(ToolOutcome::Text(text))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::PluginRegistry;
    use hearthclaw_config::PluginsConfig;
    use hearthclaw_core::error::PipelineError;
    use hearthclaw_core::request::InboundRequest;
    use tokio::sync::Mutex;

    const MANIFEST: &str = r#"
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

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<OutboundReply>>,
    }

    #[async_trait]
    impl ReplySink for RecordingSink {
        async fn deliver(&self, reply: OutboundReply) -> Result<(), PipelineError> {
            self.delivered.lock().await.push(reply);
            Ok(())
        }
    }

    fn tool() -> (RoutePluginTool, Arc<RecordingSink>) {
        let registry = Arc::new(PluginRegistry::from_manifest_str(MANIFEST).unwrap());
        let gateway = Arc::new(PluginGateway::new(registry, &PluginsConfig::default()));
        let sink = Arc::new(RecordingSink::default());
        (RoutePluginTool::new(gateway, sink.clone()), sink)
    }

    fn sync_ctx() -> ToolInvocationContext {
        ToolInvocationContext::new("hearthclaw", "alice", "alice", "hearthclaw:main", "run-1")
            .with_request(InboundRequest::synchronous("hearthclaw", "alice", "weather?"))
    }

    fn async_ctx() -> ToolInvocationContext {
        let mut request = InboundRequest::synchronous("hearthclaw", "alice", "weather?");
        request.host = "10.0.0.7".into();
        request.port = 9000;
        ToolInvocationContext::new("hearthclaw", "alice", "alice", "hearthclaw:main", "run-1")
            .with_request(request)
    }

    fn args() -> Value {
        serde_json::json!({
            "plugin": "weather",
            "capability": "current",
            "parameters": { "city": "Boston" }
        })
    }

    #[tokio::test]
    async fn async_request_delivers_and_returns_sentinel() {
        let (tool, sink) = tool();
        let outcome = tool.execute(args(), &async_ctx()).await.unwrap();
        assert!(outcome.is_routed());

        let delivered = sink.delivered.lock().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].response_data.text, "sunny");
        assert_eq!(delivered[0].host, "10.0.0.7");
    }

    #[tokio::test]
    async fn sync_request_returns_text_without_delivery() {
        let (tool, sink) = tool();
        let outcome = tool.execute(args(), &sync_ctx()).await.unwrap();
        assert_eq!(outcome, ToolOutcome::Text("sunny".into()));
        assert!(sink.delivered.lock().await.is_empty());
    }

    #[tokio::test]
    async fn missing_parameters_surface_as_question_text() {
        let (tool, sink) = tool();
        let arguments = serde_json::json!({ "plugin": "weather" });
        let outcome = tool.execute(arguments, &async_ctx()).await.unwrap();
        match outcome {
            ToolOutcome::Text(text) => assert!(text.contains("Missing: city")),
            ToolOutcome::Routed => panic!("expected question text"),
        }
        // Nothing was delivered: the question goes back through the loop.
        assert!(sink.delivered.lock().await.is_empty());
    }

    #[tokio::test]
    async fn missing_plugin_argument_is_invalid() {
        let (tool, _) = tool();
        let err = tool
            .execute(serde_json::json!({}), &sync_ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn unknown_plugin_fails_execution() {
        let (tool, _) = tool();
        let arguments = serde_json::json!({ "plugin": "nonexistent" });
        let err = tool.execute(arguments, &sync_ctx()).await.unwrap_err();
        match err {
            ToolError::ExecutionFailed { reason, .. } => {
                assert!(reason.contains("not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
