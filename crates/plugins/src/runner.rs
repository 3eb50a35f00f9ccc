//! The isolated plugin runner.
//!
//! By default every plugin invocation — including `Inline` plugins not
//! on the in-process allow-list — goes through a separate OS process:
//! the call payload is written as JSON to the runner's stdin and the
//! runner answers with a single JSON object on stdout. A crash, an
//! infinite loop, or a native-extension fault in plugin code can then
//! never take down the orchestration process. On timeout the runner
//! process is killed.

use hearthclaw_core::error::PluginError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// What the runner receives on stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerPayload {
    pub plugin_id: String,
    pub capability_id: String,
    pub parameters: HashMap<String, Value>,
    /// The originating user message, for plugins that want free text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_text: Option<String>,
}

/// What the runner writes to stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerOutput {
    pub success: bool,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Spawns runner processes and enforces the wire protocol.
pub struct SubprocessRunner {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl SubprocessRunner {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    /// Invoke through the configured runner command.
    pub async fn invoke(&self, payload: &RunnerPayload) -> Result<String, PluginError> {
        self.invoke_command(&self.command, &self.args, self.timeout, payload)
            .await
    }

    /// Invoke an arbitrary command under the runner protocol.
    ///
    /// Used directly for `ExternalSubprocess` plugins, which bring
    /// their own entry point.
    pub async fn invoke_command(
        &self,
        command: &str,
        args: &[String],
        timeout: Duration,
        payload: &RunnerPayload,
    ) -> Result<String, PluginError> {
        let plugin_id = payload.plugin_id.clone();

        debug!(
            plugin = %plugin_id,
            capability = %payload.capability_id,
            command = %command,
            "Spawning plugin runner"
        );

        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PluginError::InvocationFailed {
                plugin_id: plugin_id.clone(),
                reason: format!("cannot spawn runner '{command}': {e}"),
            })?;

        let payload_bytes =
            serde_json::to_vec(payload).map_err(|e| PluginError::RunnerProtocol(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A runner that exits before reading its stdin surfaces
            // through its exit status, not through this write.
            if let Err(e) = stdin.write_all(&payload_bytes).await {
                debug!(plugin = %plugin_id, error = %e, "Runner closed stdin early");
            }
            drop(stdin);
        }

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| PluginError::InvocationFailed {
                plugin_id: plugin_id.clone(),
                reason: format!("runner I/O failed: {e}"),
            })?,
            Err(_) => {
                // The cancelled future owns the child; dropping it
                // kills the runner via kill_on_drop.
                warn!(
                    plugin = %plugin_id,
                    timeout_secs = timeout.as_secs(),
                    "Plugin runner timed out, killing process"
                );
                return Err(PluginError::Timeout {
                    plugin_id,
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: RunnerOutput = match serde_json::from_str(stdout.trim()) {
            Ok(parsed) => parsed,
            Err(e) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !output.status.success() {
                    return Err(PluginError::InvocationFailed {
                        plugin_id,
                        reason: format!(
                            "runner exited with {}: {}",
                            output.status,
                            stderr.trim()
                        ),
                    });
                }
                return Err(PluginError::RunnerProtocol(format!(
                    "runner for '{plugin_id}' returned invalid JSON: {e}"
                )));
            }
        };

        if parsed.success {
            Ok(parsed.text.unwrap_or_default())
        } else {
            Err(PluginError::InvocationFailed {
                plugin_id,
                reason: parsed
                    .error
                    .unwrap_or_else(|| "plugin reported failure without detail".into()),
            })
        }
    }
}
