//! The plugin gateway: a single front door for every plugin invocation.
//!
//! The gateway looks up the descriptor, resolves parameters, and
//! dispatches to the right transport: the isolated runner for `Inline`
//! plugins not on the in-process allow-list, a registered in-process
//! handler for those that are, HTTP/subprocess/MCP for the external
//! variants. Incomplete parameter sets become `NeedsInput` replies with
//! a pending call parked for the session, so the user's next message
//! can complete the same call.

use crate::descriptor::{Capability, PluginDescriptor, PluginRegistry, normalize_plugin_id};
use crate::params::{ParamResolution, resolve_params};
use crate::pending::{PendingCallStore, PendingPluginCall};
use crate::runner::{RunnerOutput, RunnerPayload, SubprocessRunner};
use async_trait::async_trait;
use hearthclaw_config::PluginsConfig;
use hearthclaw_core::context::ToolInvocationContext;
use hearthclaw_core::error::PluginError;
use hearthclaw_core::message::Message;
use hearthclaw_core::provider::{Provider, ProviderRequest};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What an invocation produced from the caller's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayReply {
    /// The plugin ran; here is its (possibly post-processed) output.
    Completed(String),

    /// The plugin did not run; the user must supply or confirm
    /// parameters first. The question is ready to show them.
    NeedsInput { question: String },
}

/// An in-process plugin implementation.
///
/// Only consulted for `Inline` descriptors whose id is on the
/// configured allow-list; everything else runs through the isolated
/// runner even when a handler is registered.
#[async_trait]
pub trait InlineHandler: Send + Sync {
    async fn invoke(
        &self,
        capability_id: &str,
        parameters: &HashMap<String, Value>,
        ctx: &ToolInvocationContext,
    ) -> Result<String, PluginError>;
}

pub struct PluginGateway {
    registry: Arc<PluginRegistry>,
    runner: SubprocessRunner,
    http: reqwest::Client,
    run_timeout: Duration,
    http_timeout: Duration,
    in_process: HashSet<String>,
    trusted_params: Vec<String>,
    defaults: HashMap<String, HashMap<String, Value>>,
    profiles: HashMap<String, HashMap<String, Value>>,
    inline_handlers: HashMap<String, Arc<dyn InlineHandler>>,
    post_processor: Option<(Arc<dyn Provider>, String)>,
    pending: PendingCallStore,
}

impl PluginGateway {
    pub fn new(registry: Arc<PluginRegistry>, config: &PluginsConfig) -> Self {
        let run_timeout = Duration::from_secs(config.run_plugin_timeout_secs);
        Self {
            registry,
            runner: SubprocessRunner::new(
                config.runner_command.clone(),
                config.runner_args.clone(),
                run_timeout,
            ),
            http: reqwest::Client::new(),
            run_timeout,
            http_timeout: Duration::from_secs(config.http_plugin_timeout_secs),
            in_process: config
                .in_process_plugins
                .iter()
                .map(|id| normalize_plugin_id(id))
                .collect(),
            trusted_params: config.use_defaults_directly.clone(),
            defaults: config
                .defaults
                .iter()
                .map(|(id, params)| (normalize_plugin_id(id), params.clone()))
                .collect(),
            profiles: HashMap::new(),
            inline_handlers: HashMap::new(),
            post_processor: None,
            pending: PendingCallStore::new(),
        }
    }

    /// Attach per-user profiles for parameter resolution.
    pub fn with_profiles(
        mut self,
        profiles: HashMap<String, HashMap<String, Value>>,
    ) -> Self {
        self.profiles = profiles;
        self
    }

    /// Register an in-process implementation for an Inline plugin.
    pub fn with_inline_handler(
        mut self,
        plugin_id: &str,
        handler: Arc<dyn InlineHandler>,
    ) -> Self {
        self.inline_handlers
            .insert(normalize_plugin_id(plugin_id), handler);
        self
    }

    /// Attach the LLM used for capability post-processing.
    pub fn with_post_processor(mut self, provider: Arc<dyn Provider>, model: String) -> Self {
        self.post_processor = Some((provider, model));
        self
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Invoke a plugin capability on behalf of a request.
    pub async fn invoke(
        &self,
        plugin_id: &str,
        capability_id: &str,
        llm_params: &HashMap<String, Value>,
        ctx: &ToolInvocationContext,
    ) -> Result<GatewayReply, PluginError> {
        let descriptor = self
            .registry
            .get(plugin_id)
            .ok_or_else(|| PluginError::NotFound(plugin_id.to_string()))?;
        let capability = descriptor.capability(capability_id).ok_or_else(|| {
            PluginError::CapabilityNotFound {
                plugin_id: descriptor.id().to_string(),
                capability_id: capability_id.to_string(),
            }
        })?;

        let profile = self.profiles.get(&ctx.canonical_user_id);
        let defaults = self.defaults.get(&normalize_plugin_id(descriptor.id()));

        match resolve_params(
            descriptor.id(),
            capability,
            llm_params,
            profile,
            defaults,
            &self.trusted_params,
        ) {
            ParamResolution::Ready { params } => {
                self.pending
                    .clear(&ctx.app_id, &ctx.canonical_user_id, &ctx.session_id)
                    .await;
                let text = self.run_capability(descriptor, capability, params, ctx).await?;
                Ok(GatewayReply::Completed(text))
            }
            ParamResolution::Missing {
                missing,
                resolved,
                message,
            } => {
                debug!(
                    plugin = %descriptor.id(),
                    missing = ?missing,
                    "Plugin call blocked on missing parameters"
                );
                self.park(ctx, descriptor, capability, resolved, missing).await;
                Ok(GatewayReply::NeedsInput { question: message })
            }
            ParamResolution::Uncertain {
                uncertain,
                resolved,
                message,
            } => {
                let names: Vec<String> = uncertain.into_iter().map(|u| u.name).collect();
                debug!(
                    plugin = %descriptor.id(),
                    uncertain = ?names,
                    "Plugin call blocked on unconfirmed parameters"
                );
                // Parked with no fillable names: a confirmation reply
                // ("yes") must never become a parameter value. The
                // follow-up falls through to the normal loop instead.
                self.park(ctx, descriptor, capability, resolved, Vec::new()).await;
                Ok(GatewayReply::NeedsInput { question: message })
            }
        }
    }

    /// Try to complete a parked plugin call with the user's follow-up
    /// message.
    ///
    /// Returns the completed reply text when the retry succeeds. When
    /// the pending call cannot be merged or the retry fails, the
    /// pending entry is restored and `None` is returned so the turn
    /// falls through to the normal loop.
    pub async fn try_fill_pending(
        &self,
        ctx: &ToolInvocationContext,
        user_message: &str,
    ) -> Option<String> {
        let call = self
            .pending
            .take(&ctx.app_id, &ctx.canonical_user_id, &ctx.session_id)
            .await?;

        let Some(params) = call.fill_from_message(user_message) else {
            self.pending
                .set(&ctx.app_id, &ctx.canonical_user_id, &ctx.session_id, call)
                .await;
            return None;
        };

        let Some(descriptor) = self.registry.get(&call.plugin_id) else {
            warn!(plugin = %call.plugin_id, "Pending call references an unknown plugin, dropping");
            return None;
        };
        let Some(capability) = descriptor.capability(&call.capability_id) else {
            warn!(
                plugin = %call.plugin_id,
                capability = %call.capability_id,
                "Pending call references an unknown capability, dropping"
            );
            return None;
        };

        info!(
            plugin = %call.plugin_id,
            capability = %capability.id,
            "Retrying pending plugin call with follow-up input"
        );
        match self.run_capability(descriptor, capability, params, ctx).await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(
                    plugin = %call.plugin_id,
                    error = %e,
                    "Pending plugin retry failed, restoring pending call"
                );
                self.pending
                    .set(&ctx.app_id, &ctx.canonical_user_id, &ctx.session_id, call)
                    .await;
                None
            }
        }
    }

    /// Health status of every registered plugin, for `doctor`.
    ///
    /// Only `ExternalHttp` plugins have a probe endpoint; the other
    /// variants report healthy when their descriptor is well-formed.
    pub async fn health_report(&self) -> Vec<(String, bool)> {
        let mut report = Vec::new();
        for descriptor in self.registry.descriptors() {
            let healthy = match descriptor {
                PluginDescriptor::ExternalHttp {
                    base_url,
                    health_path,
                    ..
                } => {
                    let url = format!("{}{health_path}", base_url.trim_end_matches('/'));
                    match self
                        .http
                        .get(&url)
                        .timeout(Duration::from_secs(5))
                        .send()
                        .await
                    {
                        Ok(resp) => resp.status().is_success(),
                        Err(e) => {
                            debug!(plugin = %descriptor.id(), error = %e, "Health probe failed");
                            false
                        }
                    }
                }
                _ => true,
            };
            report.push((descriptor.id().to_string(), healthy));
        }
        report.sort();
        report
    }

    async fn park(
        &self,
        ctx: &ToolInvocationContext,
        descriptor: &PluginDescriptor,
        capability: &Capability,
        resolved: HashMap<String, Value>,
        missing: Vec<String>,
    ) {
        self.pending
            .set(
                &ctx.app_id,
                &ctx.canonical_user_id,
                &ctx.session_id,
                PendingPluginCall {
                    plugin_id: descriptor.id().to_string(),
                    capability_id: capability.id.clone(),
                    resolved,
                    missing,
                },
            )
            .await;
    }

    async fn run_capability(
        &self,
        descriptor: &PluginDescriptor,
        capability: &Capability,
        params: HashMap<String, Value>,
        ctx: &ToolInvocationContext,
    ) -> Result<String, PluginError> {
        let payload = RunnerPayload {
            plugin_id: normalize_plugin_id(descriptor.id()),
            capability_id: capability.id.clone(),
            parameters: params,
            request_text: ctx.request.as_ref().map(|r| r.text.clone()),
        };

        let raw = self.dispatch(descriptor, &payload, ctx).await?;

        if capability.post_process {
            Ok(self.post_process(descriptor.id(), capability, raw).await)
        } else {
            Ok(raw)
        }
    }

    async fn dispatch(
        &self,
        descriptor: &PluginDescriptor,
        payload: &RunnerPayload,
        ctx: &ToolInvocationContext,
    ) -> Result<String, PluginError> {
        match descriptor {
            PluginDescriptor::Inline { id, .. } => {
                let key = normalize_plugin_id(id);
                if self.in_process.contains(&key) {
                    let handler = self.inline_handlers.get(&key).ok_or_else(|| {
                        PluginError::InvocationFailed {
                            plugin_id: key.clone(),
                            reason: "no in-process handler registered".into(),
                        }
                    })?;
                    handler
                        .invoke(&payload.capability_id, &payload.parameters, ctx)
                        .await
                } else {
                    // Not on the allow-list: isolated runner, same as
                    // anything external.
                    self.runner.invoke(payload).await
                }
            }
            PluginDescriptor::ExternalSubprocess {
                command,
                args,
                timeout_secs,
                ..
            } => {
                let timeout = timeout_secs.map(Duration::from_secs).unwrap_or(self.run_timeout);
                self.runner
                    .invoke_command(command, args, timeout, payload)
                    .await
            }
            PluginDescriptor::ExternalHttp {
                id,
                base_url,
                invoke_path,
                timeout_secs,
                ..
            } => {
                let timeout = timeout_secs.map(Duration::from_secs).unwrap_or(self.http_timeout);
                self.invoke_http(id, base_url, invoke_path, timeout, payload)
                    .await
            }
            PluginDescriptor::ExternalMcp {
                id,
                endpoint,
                timeout_secs,
                ..
            } => {
                let timeout = timeout_secs.map(Duration::from_secs).unwrap_or(self.http_timeout);
                self.invoke_mcp(id, endpoint, timeout, payload).await
            }
        }
    }

    async fn invoke_http(
        &self,
        plugin_id: &str,
        base_url: &str,
        invoke_path: &str,
        timeout: Duration,
        payload: &RunnerPayload,
    ) -> Result<String, PluginError> {
        let url = format!("{}{invoke_path}", base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| http_error(plugin_id, timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PluginError::InvocationFailed {
                plugin_id: plugin_id.to_string(),
                reason: format!("HTTP {status}: {}", body.chars().take(200).collect::<String>()),
            });
        }

        let result: RunnerOutput = response.json().await.map_err(|e| {
            PluginError::RunnerProtocol(format!(
                "plugin '{plugin_id}' returned an invalid response body: {e}"
            ))
        })?;
        if result.success {
            Ok(result.text.unwrap_or_default())
        } else {
            Err(PluginError::InvocationFailed {
                plugin_id: plugin_id.to_string(),
                reason: result
                    .error
                    .unwrap_or_else(|| "plugin reported failure without detail".into()),
            })
        }
    }

    async fn invoke_mcp(
        &self,
        plugin_id: &str,
        endpoint: &str,
        timeout: Duration,
        payload: &RunnerPayload,
    ) -> Result<String, PluginError> {
        let rpc = serde_json::json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": "tools/call",
            "params": {
                "name": payload.capability_id,
                "arguments": payload.parameters,
            },
        });

        let response = self
            .http
            .post(endpoint)
            .timeout(timeout)
            .json(&rpc)
            .send()
            .await
            .map_err(|e| http_error(plugin_id, timeout, e))?;

        let body: Value = response.json().await.map_err(|e| {
            PluginError::RunnerProtocol(format!(
                "MCP server for '{plugin_id}' returned invalid JSON-RPC: {e}"
            ))
        })?;

        if let Some(error) = body.get("error") {
            return Err(PluginError::InvocationFailed {
                plugin_id: plugin_id.to_string(),
                reason: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("MCP call failed")
                    .to_string(),
            });
        }

        // tools/call results carry a content list of text blocks.
        let texts: Vec<&str> = body
            .pointer("/result/content")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("text").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();

        if texts.is_empty() {
            Ok(body
                .get("result")
                .map(|r| r.to_string())
                .unwrap_or_default())
        } else {
            Ok(texts.join("\n"))
        }
    }

    /// One extra LLM pass over the raw plugin output.
    ///
    /// On provider failure the raw output is kept; a broken
    /// post-process model must never lose a successful plugin result.
    async fn post_process(&self, plugin_id: &str, capability: &Capability, raw: String) -> String {
        let Some((provider, model)) = &self.post_processor else {
            return raw;
        };

        let system = capability.post_process_prompt.clone().unwrap_or_else(|| {
            "Rewrite the following tool output as a concise, friendly reply to the user."
                .to_string()
        });
        let request = ProviderRequest::bare(
            model.clone(),
            vec![Message::system(system), Message::user(raw.clone())],
        );

        match provider.complete(request).await {
            Ok(response) if !response.message.content.trim().is_empty() => {
                response.message.content
            }
            Ok(_) => {
                warn!(plugin = %plugin_id, "Post-process pass returned empty text, keeping raw output");
                raw
            }
            Err(e) => {
                warn!(plugin = %plugin_id, error = %e, "Post-process pass failed, keeping raw output");
                raw
            }
        }
    }
}

fn http_error(plugin_id: &str, timeout: Duration, e: reqwest::Error) -> PluginError {
    if e.is_timeout() {
        PluginError::Timeout {
            plugin_id: plugin_id.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    } else {
        PluginError::InvocationFailed {
            plugin_id: plugin_id.to_string(),
            reason: e.to_string(),
        }
    }
}
