//! Error types for the Hearthclaw domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; nothing below the
//! tool-calling loop is allowed to raise past its boundary — failures
//! there are converted into result text before they reach the user.

use thiserror::Error;

/// The top-level error type for all Hearthclaw operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    /// The distinct "unknown tool" signal. The loop converts this to text
    /// for the model; it never escapes as a panic or a crash.
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool definition: {0}")]
    InvalidDefinition(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Capability not found: {plugin_id}/{capability_id}")]
    CapabilityNotFound {
        plugin_id: String,
        capability_id: String,
    },

    /// Not a failure: required parameters could not be resolved from any
    /// source and the user must be asked for them.
    #[error("Missing parameters for {plugin_id}: {missing:?}")]
    MissingParameters {
        plugin_id: String,
        missing: Vec<String>,
    },

    /// Not a failure: parameters were filled from profile/config but need
    /// user confirmation before the plugin may run with them.
    #[error("Uncertain parameters for {plugin_id}: {names:?}")]
    UncertainParameters {
        plugin_id: String,
        names: Vec<String>,
    },

    #[error("Plugin {plugin_id} timed out after {timeout_secs}s")]
    Timeout {
        plugin_id: String,
        timeout_secs: u64,
    },

    #[error("Plugin invocation failed: {plugin_id} — {reason}")]
    InvocationFailed { plugin_id: String, reason: String },

    #[error("Plugin runner protocol error: {0}")]
    RunnerProtocol(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Queue closed: {0}")]
    QueueClosed(String),

    #[error("Reply delivery failed to {target}: {reason}")]
    DeliveryFailed { target: String, reason: String },

    #[error("Request rejected: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_displays_name_and_reason() {
        let err = Error::Tool(ToolError::ExecutionFailed {
            tool_name: "route_to_plugin".into(),
            reason: "runner exited with code 1".into(),
        });
        assert!(err.to_string().contains("route_to_plugin"));
        assert!(err.to_string().contains("exited with code 1"));
    }

    #[test]
    fn plugin_timeout_mentions_duration() {
        let err = PluginError::Timeout {
            plugin_id: "weather".into(),
            timeout_secs: 300,
        };
        assert!(err.to_string().contains("300"));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn missing_parameters_is_structured() {
        let err = PluginError::MissingParameters {
            plugin_id: "calendar".into(),
            missing: vec!["date".into()],
        };
        assert!(
            matches!(err, PluginError::MissingParameters { ref missing, .. } if missing == &["date".to_string()])
        );
    }
}
