//! Configuration loading, validation, and management for Hearthclaw.
//!
//! Loads configuration from a TOML file with environment variable
//! overrides for secrets. Every section has serde defaults so a minimal
//! (or empty) file yields a working configuration; `validate()` rejects
//! values the engine cannot run with.

use hearthclaw_core::session::SessionScope;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the default provider (env: HEARTHCLAW_API_KEY)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider name (keys into `providers`)
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Tool-calling loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Plugin gateway settings
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Session scoping and identity links
    #[serde(default)]
    pub session: SessionConfig,

    /// Queue and delivery settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Inbound HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Per-user stored profiles, keyed by canonical user id.
    /// Parameter resolution reads these through each parameter's
    /// `profile_key`.
    #[serde(default)]
    pub profiles: HashMap<String, HashMap<String, serde_json::Value>>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            agent: AgentConfig::default(),
            plugins: PluginsConfig::default(),
            session: SessionConfig::default(),
            pipeline: PipelineConfig::default(),
            server: ServerConfig::default(),
            providers: HashMap::new(),
            profiles: HashMap::new(),
        }
    }
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("agent", &self.agent)
            .field("plugins", &self.plugins)
            .field("session", &self.session)
            .field("pipeline", &self.pipeline)
            .field("server", &self.server)
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Tool-calling loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard bound on LLM⇄tool rounds per request
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    /// Per tool-call timeout in seconds
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Longest tool result usable as a final reply without another
    /// LLM round; clamped to 100..=50000 at validation time
    #[serde(default = "default_max_self_contained_len")]
    pub max_self_contained_length: usize,

    /// Tools whose results are already user-shaped
    #[serde(default = "default_self_contained_tools")]
    pub self_contained_tools: Vec<String>,

    /// Tools whose results always need a reformulation round
    #[serde(default = "default_needs_llm_tools")]
    pub needs_llm_tools: Vec<String>,
}

fn default_max_tool_rounds() -> u32 {
    10
}
fn default_tool_timeout_secs() -> u64 {
    120
}
fn default_max_self_contained_len() -> usize {
    2000
}
fn default_self_contained_tools() -> Vec<String> {
    [
        "route_to_plugin",
        "run_skill",
        "echo",
        "time",
        "remind_me",
        "profile_get",
        "profile_update",
        "cron_schedule",
        "cron_list",
        "channel_send",
        "file_write",
        "http_request",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_needs_llm_tools() -> Vec<String> {
    [
        "document_read",
        "file_read",
        "web_search",
        "web_extract",
        "memory_search",
        "memory_get",
        "knowledge_base_search",
        "fetch_url",
        "browser_navigate",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            tool_timeout_secs: default_tool_timeout_secs(),
            max_self_contained_length: default_max_self_contained_len(),
            self_contained_tools: default_self_contained_tools(),
            needs_llm_tools: default_needs_llm_tools(),
        }
    }
}

impl AgentConfig {
    /// The self-contained length threshold, clamped so bad config never
    /// breaks classification.
    pub fn clamped_max_self_contained_length(&self) -> usize {
        self.max_self_contained_length.clamp(100, 50_000)
    }
}

/// Plugin gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Path to the TOML manifest declaring plugin descriptors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<PathBuf>,

    /// Timeout for isolated runner invocations, in seconds
    #[serde(default = "default_run_plugin_timeout_secs")]
    pub run_plugin_timeout_secs: u64,

    /// Timeout for external HTTP plugin invocations, in seconds
    #[serde(default = "default_http_plugin_timeout_secs")]
    pub http_plugin_timeout_secs: u64,

    /// Command used to spawn the isolated plugin runner
    #[serde(default = "default_runner_command")]
    pub runner_command: String,

    /// Extra arguments for the runner command
    #[serde(default)]
    pub runner_args: Vec<String>,

    /// Plugin ids trusted to run in-process. Everything else goes
    /// through the isolated runner, including Inline plugins.
    #[serde(default)]
    pub in_process_plugins: Vec<String>,

    /// Parameter names trusted to use profile/config values without a
    /// confirmation turn even when flagged `confirm_if_uncertain`
    #[serde(default)]
    pub use_defaults_directly: Vec<String>,

    /// Static per-plugin parameter defaults, keyed by plugin id
    #[serde(default)]
    pub defaults: HashMap<String, HashMap<String, serde_json::Value>>,
}

fn default_run_plugin_timeout_secs() -> u64 {
    300
}
fn default_http_plugin_timeout_secs() -> u64 {
    420
}
fn default_runner_command() -> String {
    "hearthclaw-plugin-runner".into()
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            manifest_path: None,
            run_plugin_timeout_secs: default_run_plugin_timeout_secs(),
            http_plugin_timeout_secs: default_http_plugin_timeout_secs(),
            runner_command: default_runner_command(),
            runner_args: Vec::new(),
            in_process_plugins: Vec::new(),
            use_defaults_directly: Vec::new(),
            defaults: HashMap::new(),
        }
    }
}

/// Session scoping and identity links.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    /// Scoping policy for session keys
    #[serde(default)]
    pub scope: SessionScope,

    /// canonical user id → channel aliases
    #[serde(default)]
    pub identity_links: HashMap<String, Vec<String>>,
}

/// Queue and delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of each of the three queues
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Timeout for the outbound delivery POST, in seconds
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,

    /// How long a synchronous caller waits for its reply, in seconds
    #[serde(default = "default_sync_reply_timeout_secs")]
    pub sync_reply_timeout_secs: u64,

    /// Canonical user ids allowed to use the assistant; empty = all
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

fn default_queue_capacity() -> usize {
    100
}
fn default_delivery_timeout_secs() -> u64 {
    10
}
fn default_sync_reply_timeout_secs() -> u64 {
    180
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
            sync_reply_timeout_secs: default_sync_reply_timeout_secs(),
            allowed_users: Vec::new(),
        }
    }
}

/// Inbound HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    18790
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, then apply env overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from the path when the file exists; otherwise defaults plus
    /// env overrides, so the binary runs without a config file.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::load(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no env overrides).
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("HEARTHCLAW_API_KEY")
            && !key.trim().is_empty()
        {
            self.api_key = Some(key);
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_tool_rounds == 0 {
            return Err(ConfigError::Invalid(
                "agent.max_tool_rounds must be at least 1".into(),
            ));
        }
        if self.agent.tool_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "agent.tool_timeout_secs must be positive".into(),
            ));
        }
        if self.plugins.run_plugin_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "plugins.run_plugin_timeout_secs must be positive".into(),
            ));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.queue_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The API key for a provider: provider-specific first, then global.
    pub fn provider_api_key(&self, provider: &str) -> Option<&str> {
        self.providers
            .get(provider)
            .and_then(|p| p.api_key.as_deref())
            .or(self.api_key.as_deref())
    }

    /// The stored profile for a canonical user id, if any.
    pub fn profile_for(&self, canonical_user_id: &str) -> Option<&HashMap<String, serde_json::Value>> {
        self.profiles.get(canonical_user_id)
    }
}
