//! Plugin descriptors and the plugin registry.
//!
//! A descriptor is a tagged union over how the plugin is invoked:
//! in-process (`Inline`), over HTTP (`ExternalHttp`), as its own
//! subprocess (`ExternalSubprocess`), or over MCP (`ExternalMcp`).
//! Each variant carries the capability list it exposes; capability
//! lookup is uniform across variants and an empty capability id selects
//! the first declared capability.

use hearthclaw_core::error::PluginError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One parameter a capability accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Required parameters with no resolvable value block invocation
    #[serde(default = "default_true")]
    pub required: bool,

    /// Key into the user's stored profile
    #[serde(default)]
    pub profile_key: Option<String>,

    /// Key into the plugin's static configuration defaults
    #[serde(default)]
    pub config_key: Option<String>,

    /// Values taken from profile/config need a user confirmation turn
    /// unless the parameter is on the configured trust list
    #[serde(default)]
    pub confirm_if_uncertain: bool,
}

fn default_true() -> bool {
    true
}

/// One invokable capability of a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub parameters: Vec<ParamSpec>,

    /// Pass the raw output through one more LLM call before replying
    #[serde(default)]
    pub post_process: bool,

    /// System prompt for the post-process pass
    #[serde(default)]
    pub post_process_prompt: Option<String>,
}

/// A plugin descriptor: how to reach the plugin plus what it can do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginDescriptor {
    /// Runs inside this process — but only when the plugin id is on the
    /// in-process allow-list; otherwise it is executed through the
    /// isolated runner like everything else.
    Inline {
        id: String,
        name: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        capabilities: Vec<Capability>,
    },

    /// A long-running HTTP service.
    ExternalHttp {
        id: String,
        name: String,
        #[serde(default)]
        description: Option<String>,
        /// Base URL of the service
        base_url: String,
        /// Invoke path appended to the base URL
        #[serde(default = "default_invoke_path")]
        invoke_path: String,
        /// Health-check path appended to the base URL
        #[serde(default = "default_health_path")]
        health_path: String,
        /// Per-plugin invocation timeout override, in seconds
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        capabilities: Vec<Capability>,
    },

    /// A command run per invocation through the runner protocol.
    ExternalSubprocess {
        id: String,
        name: String,
        #[serde(default)]
        description: Option<String>,
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        capabilities: Vec<Capability>,
    },

    /// An MCP server reached over JSON-RPC.
    ExternalMcp {
        id: String,
        name: String,
        #[serde(default)]
        description: Option<String>,
        endpoint: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        capabilities: Vec<Capability>,
    },
}

fn default_invoke_path() -> String {
    "/invoke".into()
}
fn default_health_path() -> String {
    "/health".into()
}

impl PluginDescriptor {
    pub fn id(&self) -> &str {
        match self {
            Self::Inline { id, .. }
            | Self::ExternalHttp { id, .. }
            | Self::ExternalSubprocess { id, .. }
            | Self::ExternalMcp { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Inline { name, .. }
            | Self::ExternalHttp { name, .. }
            | Self::ExternalSubprocess { name, .. }
            | Self::ExternalMcp { name, .. } => name,
        }
    }

    pub fn capabilities(&self) -> &[Capability] {
        match self {
            Self::Inline { capabilities, .. }
            | Self::ExternalHttp { capabilities, .. }
            | Self::ExternalSubprocess { capabilities, .. }
            | Self::ExternalMcp { capabilities, .. } => capabilities,
        }
    }

    /// Look up a capability; an empty id selects the first declared one.
    pub fn capability(&self, capability_id: &str) -> Option<&Capability> {
        let caps = self.capabilities();
        if capability_id.trim().is_empty() {
            return caps.first();
        }
        caps.iter().find(|c| c.id == capability_id)
    }

    /// Whether invocation leaves this process.
    pub fn is_external(&self) -> bool {
        !matches!(self, Self::Inline { .. })
    }
}

/// Normalize a plugin id for lookup: lowercase, spaces and hyphens to
/// underscores.
pub fn normalize_plugin_id(id: &str) -> String {
    id.trim().to_lowercase().replace([' ', '-'], "_")
}

/// The plugin registry — an explicit instance built at startup from the
/// plugin manifest and shared read-only afterwards.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, PluginDescriptor>,
}

/// The manifest file shape: a list of descriptors under `[[plugins]]`.
#[derive(Debug, Deserialize)]
struct PluginManifest {
    #[serde(default)]
    plugins: Vec<PluginDescriptor>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a registry from manifest TOML.
    pub fn from_manifest_str(raw: &str) -> Result<Self, PluginError> {
        let manifest: PluginManifest = toml::from_str(raw)
            .map_err(|e| PluginError::RunnerProtocol(format!("invalid plugin manifest: {e}")))?;
        let mut registry = Self::new();
        for descriptor in manifest.plugins {
            registry.register(descriptor);
        }
        Ok(registry)
    }

    /// Load a registry from a manifest file.
    pub fn from_manifest_file(path: &std::path::Path) -> Result<Self, PluginError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PluginError::RunnerProtocol(format!("cannot read plugin manifest {}: {e}", path.display()))
        })?;
        Self::from_manifest_str(&raw)
    }

    /// Register a descriptor under its normalized id (last wins).
    pub fn register(&mut self, descriptor: PluginDescriptor) {
        self.plugins
            .insert(normalize_plugin_id(descriptor.id()), descriptor);
    }

    /// Look up a plugin by (possibly unnormalized) id.
    pub fn get(&self, plugin_id: &str) -> Option<&PluginDescriptor> {
        self.plugins.get(&normalize_plugin_id(plugin_id))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.plugins.values()
    }
}
