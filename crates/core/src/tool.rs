//! Tool trait and catalog — the registry of callable capabilities.
//!
//! Tools are what the model can invoke: narrow functions described by a
//! JSON schema. The catalog owns the lookup table, keeps enumeration in
//! registration order (the LLM-facing schema list must be deterministic
//! for a given process), and absorbs every executor failure so a single
//! misbehaving tool can never abort the loop.

use crate::context::ToolInvocationContext;
use crate::error::ToolError;
use crate::provider::ToolDefinition;
use crate::routing::is_routing_sentinel;
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use tracing::warn;

/// A request to execute a tool, as decoded from the model's output.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
///
/// Never an error type: executor failures are converted to `Text`
/// beginning with an error marker before they leave the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    /// A string payload for the model (or, when final, for the user).
    Text(String),

    /// The routing sentinel: the reply was already delivered.
    Routed,
}

impl ToolOutcome {
    /// Build an outcome from a raw string, normalizing the sentinel.
    ///
    /// Subprocess runners and other out-of-process executors can only
    /// return strings; the sentinel constant is their way of signalling
    /// a routed reply across the process boundary.
    pub fn from_text(text: String) -> Self {
        if is_routing_sentinel(&text) {
            Self::Routed
        } else {
            Self::Text(text)
        }
    }

    pub fn is_routed(&self) -> bool {
        matches!(self, Self::Routed)
    }
}

/// The core Tool trait.
///
/// Implementations must not panic, but the catalog does not trust them
/// to behave: panics and errors are both absorbed.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "route_to_plugin").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments and request context.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolInvocationContext,
    ) -> std::result::Result<ToolOutcome, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// The tool catalog.
///
/// An explicit instance constructed at startup and shared by `Arc`;
/// there is deliberately no global registry. Read-mostly after startup.
pub struct ToolCatalog {
    tools: Vec<Box<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool.
    ///
    /// Fails if the name or description is empty. Re-registration under
    /// the same name replaces the tool in place, keeping its original
    /// position in the enumeration order.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> std::result::Result<(), ToolError> {
        let name = tool.name().trim();
        if name.is_empty() {
            return Err(ToolError::InvalidDefinition("tool name is empty".into()));
        }
        if tool.description().trim().is_empty() {
            return Err(ToolError::InvalidDefinition(format!(
                "tool '{name}' has an empty description"
            )));
        }

        let name = name.to_string();
        match self.index.get(&name) {
            Some(&pos) => self.tools[pos] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.index.get(name).map(|&pos| self.tools[pos].as_ref())
    }

    /// All tool definitions, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// All registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Execute a tool call.
    ///
    /// An unknown name is the one failure that escapes, as the distinct
    /// `ToolError::NotFound` signal. Executor errors and panics are
    /// converted to `"Error running tool {name}: {detail}"` text; the
    /// tool stays registered and callable afterwards.
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolInvocationContext,
    ) -> std::result::Result<ToolOutcome, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        let fut = tool.execute(call.arguments.clone(), ctx);
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                Ok(ToolOutcome::Text(format!(
                    "Error running tool {}: {e}",
                    call.name
                )))
            }
            Err(panic) => {
                let detail = panic_detail(panic);
                warn!(tool = %call.name, detail = %detail, "Tool executor panicked");
                Ok(ToolOutcome::Text(format!(
                    "Error running tool {}: {detail}",
                    call.name
                )))
            }
        }
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_detail(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool panicked".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::ROUTING_REPLY_SENT;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
            _ctx: &ToolInvocationContext,
        ) -> std::result::Result<ToolOutcome, ToolError> {
            let text = arguments["text"].as_str().unwrap_or("").to_string();
            Ok(ToolOutcome::Text(text))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "flaky"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _ctx: &ToolInvocationContext,
        ) -> std::result::Result<ToolOutcome, ToolError> {
            panic!("boom");
        }
    }

    struct NamelessTool;

    #[async_trait]
    impl Tool for NamelessTool {
        fn name(&self) -> &str {
            ""
        }
        fn description(&self) -> &str {
            "A tool without a name"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _ctx: &ToolInvocationContext,
        ) -> std::result::Result<ToolOutcome, ToolError> {
            Ok(ToolOutcome::Text(String::new()))
        }
    }

    fn ctx() -> ToolInvocationContext {
        ToolInvocationContext::new("hearthclaw", "alice", "alice", "hearthclaw:main", "run-1")
    }

    #[test]
    fn register_rejects_empty_name() {
        let mut catalog = ToolCatalog::new();
        let err = catalog.register(Box::new(NamelessTool)).unwrap_err();
        assert!(matches!(err, ToolError::InvalidDefinition(_)));
        assert!(catalog.names().is_empty());
    }

    #[test]
    fn definitions_keep_registration_order() {
        let mut catalog = ToolCatalog::new();
        catalog.register(Box::new(PanickingTool)).unwrap();
        catalog.register(Box::new(EchoTool)).unwrap();
        assert_eq!(catalog.names(), vec!["flaky", "echo"]);

        // Re-registering keeps the original position.
        catalog.register(Box::new(PanickingTool)).unwrap();
        assert_eq!(catalog.names(), vec!["flaky", "echo"]);
    }

    #[tokio::test]
    async fn execute_unknown_tool_is_distinct_signal() {
        let catalog = ToolCatalog::new();
        let call = ToolCall {
            id: "call_1".into(),
            name: "nonexistent".into(),
            arguments: serde_json::json!({}),
        };
        let err = catalog.execute(&call, &ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn panic_becomes_error_text_and_tool_survives() {
        let mut catalog = ToolCatalog::new();
        catalog.register(Box::new(PanickingTool)).unwrap();
        let call = ToolCall {
            id: "call_1".into(),
            name: "flaky".into(),
            arguments: serde_json::json!({}),
        };

        for _ in 0..2 {
            let outcome = catalog.execute(&call, &ctx()).await.unwrap();
            match outcome {
                ToolOutcome::Text(text) => {
                    assert!(text.starts_with("Error running tool flaky:"));
                    assert!(text.contains("boom"));
                }
                ToolOutcome::Routed => panic!("expected text"),
            }
        }
        assert!(catalog.get("flaky").is_some());
    }

    #[tokio::test]
    async fn execute_plain_tool() {
        let mut catalog = ToolCatalog::new();
        catalog.register(Box::new(EchoTool)).unwrap();
        let call = ToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            arguments: serde_json::json!({"text": "hello"}),
        };
        let outcome = catalog.execute(&call, &ctx()).await.unwrap();
        assert_eq!(outcome, ToolOutcome::Text("hello".into()));
    }

    #[test]
    fn from_text_normalizes_sentinel() {
        assert!(ToolOutcome::from_text(ROUTING_REPLY_SENT.into()).is_routed());
        assert_eq!(
            ToolOutcome::from_text("plain".into()),
            ToolOutcome::Text("plain".into())
        );
    }
}
