//! The tool-calling loop.
//!
//! One run takes a conversation through bounded LLM⇄tool rounds until
//! the model answers in plain text, a tool routes the reply itself, or
//! the round budget runs out. Sibling calls within a round execute
//! concurrently; their results are appended in call order. Rounds are
//! strictly sequential.

use crate::classify::{ReplyDisposition, ResultClassifier};
use crate::fallback;
use hearthclaw_config::AgentConfig;
use hearthclaw_core::Error;
use hearthclaw_core::context::ToolInvocationContext;
use hearthclaw_core::event::{DomainEvent, EventBus};
use hearthclaw_core::message::{Conversation, Message};
use hearthclaw_core::provider::{Provider, ProviderRequest};
use hearthclaw_core::tool::{ToolCall, ToolCatalog, ToolOutcome};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shown when the loop has nothing better: the model produced no usable
/// text. A user never gets an empty reply.
pub const FALLBACK_APOLOGY: &str =
    "Sorry, something went wrong while preparing a reply. Please try again.";

/// What the model sees instead of a routed tool's (already delivered)
/// output; never shown to the user because the loop stops.
const ROUTED_RESULT_NOTE: &str = "Reply delivered to the user.";

/// How a loop run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The reply text, ready for delivery.
    Done { text: String },

    /// A tool delivered the reply itself; deliver nothing.
    RoutedAway,

    /// The round budget ran out; `text` is the best available reply.
    RoundBudgetExhausted { text: String },
}

pub struct ToolLoop {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    catalog: Arc<ToolCatalog>,
    classifier: ResultClassifier,
    max_rounds: u32,
    tool_timeout: Duration,
    event_bus: Arc<EventBus>,
}

impl ToolLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        catalog: Arc<ToolCatalog>,
        config: &AgentConfig,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            catalog,
            classifier: ResultClassifier::new(config),
            max_rounds: config.max_tool_rounds,
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
            event_bus,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Run the loop for one request.
    ///
    /// The context's scratch area is released at every exit, including
    /// provider errors.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        ctx: &ToolInvocationContext,
    ) -> Result<LoopOutcome, Error> {
        let result = self.run_rounds(conversation, ctx).await;
        ctx.release_scratch().await;
        result
    }

    async fn run_rounds(
        &self,
        conversation: &mut Conversation,
        ctx: &ToolInvocationContext,
    ) -> Result<LoopOutcome, Error> {
        let tool_definitions = self.catalog.definitions();

        for round in 1..=self.max_rounds {
            debug!(
                session_id = %conversation.session_id,
                round,
                "Tool loop round"
            );

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: conversation.messages.clone(),
                temperature: self.temperature,
                max_tokens: None,
                tools: tool_definitions.clone(),
            };
            let response = self.provider.complete(request).await.map_err(Error::from)?;

            if let Some(usage) = &response.usage {
                self.event_bus.publish(DomainEvent::ResponseGenerated {
                    session_key: conversation.session_id.clone(),
                    model: response.model.clone(),
                    tokens_used: usage.total_tokens,
                    timestamp: chrono::Utc::now(),
                });
            }

            let calls = decode_calls(&response.message);
            if calls.is_empty() {
                let text = response.message.content.trim().to_string();
                conversation.push(response.message);
                let text = if text.is_empty() {
                    warn!(
                        session_id = %conversation.session_id,
                        "Model produced no text and no tool calls, using apology fallback"
                    );
                    FALLBACK_APOLOGY.to_string()
                } else {
                    text
                };
                return Ok(LoopOutcome::Done { text });
            }

            conversation.push(response.message);

            // Siblings run concurrently; results come back in call order.
            let results = join_all(calls.iter().map(|call| self.execute_call(call, ctx))).await;

            let mut routed = false;
            for (call, execution) in calls.iter().zip(&results) {
                self.event_bus.publish(DomainEvent::ToolExecuted {
                    tool_name: call.name.clone(),
                    success: execution.success,
                    duration_ms: execution.duration_ms,
                    timestamp: chrono::Utc::now(),
                });

                let content = match &execution.outcome {
                    ToolOutcome::Routed => {
                        routed = true;
                        ROUTED_RESULT_NOTE.to_string()
                    }
                    ToolOutcome::Text(text) => text.clone(),
                };
                conversation.push(Message::tool_result(&call.id, content));
            }

            if routed {
                info!(
                    session_id = %conversation.session_id,
                    "Reply routed by a tool, ending loop"
                );
                self.event_bus.publish(DomainEvent::ReplyRouted {
                    request_id: ctx
                        .request
                        .as_ref()
                        .map(|r| r.request_id.clone())
                        .unwrap_or_else(|| conversation.session_id.clone()),
                    timestamp: chrono::Utc::now(),
                });
                return Ok(LoopOutcome::RoutedAway);
            }

            // A single call whose result is already user-shaped skips
            // the reformulation round.
            if let [call] = calls.as_slice()
                && let [execution] = results.as_slice()
                && self.classifier.classify(&call.name, &execution.outcome)
                    == ReplyDisposition::FinalText
                && let ToolOutcome::Text(text) = &execution.outcome
            {
                debug!(
                    session_id = %conversation.session_id,
                    tool = %call.name,
                    "Tool result is self-contained, short-circuiting"
                );
                return Ok(LoopOutcome::Done { text: text.clone() });
            }
        }

        warn!(
            session_id = %conversation.session_id,
            max_rounds = self.max_rounds,
            "Round budget exhausted"
        );
        let text = conversation
            .last_assistant_text()
            .map(str::to_string)
            .unwrap_or_else(|| FALLBACK_APOLOGY.to_string());
        Ok(LoopOutcome::RoundBudgetExhausted { text })
    }

    async fn execute_call(&self, call: &ToolCall, ctx: &ToolInvocationContext) -> CallExecution {
        let start = Instant::now();
        let result = tokio::time::timeout(self.tool_timeout, self.catalog.execute(call, ctx)).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(outcome)) => CallExecution {
                outcome,
                success: true,
                duration_ms,
            },
            Ok(Err(e)) => {
                // The unknown-tool signal; made visible to the model as
                // text so misconfiguration shows up in the conversation.
                warn!(tool = %call.name, error = %e, "Tool call failed before execution");
                CallExecution {
                    outcome: ToolOutcome::Text(format!("Error running tool {}: {e}", call.name)),
                    success: false,
                    duration_ms,
                }
            }
            Err(_) => {
                warn!(
                    tool = %call.name,
                    timeout_secs = self.tool_timeout.as_secs(),
                    "Tool call timed out"
                );
                CallExecution {
                    outcome: ToolOutcome::Text(format!(
                        "Error: tool {} timed out after {}s. The system did not hang; \
                         you can retry or use a different approach.",
                        call.name,
                        self.tool_timeout.as_secs()
                    )),
                    success: false,
                    duration_ms,
                }
            }
        }
    }
}

struct CallExecution {
    outcome: ToolOutcome,
    success: bool,
    duration_ms: u64,
}

/// Structured calls first; the textual fallback only when there are none.
fn decode_calls(message: &Message) -> Vec<ToolCall> {
    if !message.tool_calls.is_empty() {
        return message
            .tool_calls
            .iter()
            .map(|tc| ToolCall {
                id: tc.id.clone(),
                name: tc.name.clone(),
                arguments: serde_json::from_str(&tc.arguments)
                    .unwrap_or_else(|_| serde_json::json!({})),
            })
            .collect();
    }
    if fallback::has_tool_call_markup(&message.content) {
        return fallback::parse_text_tool_calls(&message.content);
    }
    Vec::new()
}
