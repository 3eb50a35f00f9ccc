//! Plugin parameter resolution: LLM arguments → user profile → config
//! defaults.
//!
//! A value only counts when it is non-empty and non-whitespace. A
//! required parameter with no value from any source stops resolution
//! with a `Missing` outcome; a value satisfied from profile or config
//! that is flagged `confirm_if_uncertain` (and not trusted) stops it
//! with an `Uncertain` outcome. Both carry a human-readable summary the
//! model uses to ask the user.

use crate::descriptor::Capability;
use serde_json::Value;
use std::collections::HashMap;

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSource {
    UserMessage,
    Profile,
    Config,
}

impl ParamSource {
    fn label(self) -> &'static str {
        match self {
            Self::UserMessage => "user message",
            Self::Profile => "profile",
            Self::Config => "config",
        }
    }
}

/// A parameter that needs user confirmation before use.
#[derive(Debug, Clone)]
pub struct UncertainParam {
    pub name: String,
    /// Value preview, truncated for the summary
    pub value: String,
    pub source: ParamSource,
}

/// The outcome of resolving one capability's parameters.
#[derive(Debug)]
pub enum ParamResolution {
    /// All required parameters resolved; safe to invoke.
    Ready { params: HashMap<String, Value> },

    /// Required parameters have no value from any source.
    Missing {
        missing: Vec<String>,
        resolved: HashMap<String, Value>,
        message: String,
    },

    /// Values were found but need a confirmation turn.
    Uncertain {
        uncertain: Vec<UncertainParam>,
        resolved: HashMap<String, Value>,
        message: String,
    },
}

/// Normalize a parameter key: trim, lowercase, spaces to underscores.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace(' ', "_")
}

fn usable(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

fn cleaned(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other.clone(),
    }
}

fn preview(value: &Value, max: usize) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.chars().take(max).collect()
}

/// Resolve a capability's parameters from the three sources in priority
/// order.
pub fn resolve_params(
    plugin_id: &str,
    capability: &Capability,
    llm_params: &HashMap<String, Value>,
    profile: Option<&HashMap<String, Value>>,
    defaults: Option<&HashMap<String, Value>>,
    trusted_params: &[String],
) -> ParamResolution {
    if capability.parameters.is_empty() {
        // No schema: pass LLM arguments through as-is.
        return ParamResolution::Ready {
            params: llm_params.clone(),
        };
    }

    let trusted: Vec<String> = trusted_params.iter().map(|p| normalize_key(p)).collect();

    let mut resolved: HashMap<String, Value> = HashMap::new();
    let mut sources: HashMap<String, ParamSource> = HashMap::new();
    let mut missing: Vec<String> = Vec::new();
    let mut uncertain: Vec<UncertainParam> = Vec::new();

    for spec in &capability.parameters {
        let name = spec.name.trim();
        if name.is_empty() {
            continue;
        }
        let key = normalize_key(name);
        let profile_key = spec
            .profile_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .unwrap_or_else(|| key.clone());
        let config_key = spec
            .config_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .unwrap_or_else(|| key.clone());

        let mut value: Option<Value> = None;
        let mut source = ParamSource::UserMessage;

        // 1. Explicit from the LLM call
        if let Some(v) = llm_params.get(&key).or_else(|| llm_params.get(name))
            && usable(v)
        {
            value = Some(cleaned(v));
        }

        // 2. User profile
        if value.is_none()
            && let Some(profile) = profile
            && let Some(v) = profile.get(&profile_key)
            && usable(v)
        {
            value = Some(cleaned(v));
            source = ParamSource::Profile;
        }

        // 3. Config defaults
        if value.is_none()
            && let Some(defaults) = defaults
            && let Some(v) = defaults.get(&config_key).or_else(|| defaults.get(name))
            && usable(v)
        {
            value = Some(cleaned(v));
            source = ParamSource::Config;
        }

        let Some(value) = value else {
            if spec.required {
                missing.push(name.to_string());
            }
            continue;
        };

        if spec.confirm_if_uncertain
            && source != ParamSource::UserMessage
            && !trusted.contains(&key)
        {
            uncertain.push(UncertainParam {
                name: name.to_string(),
                value: preview(&value, 100),
                source,
            });
        }

        resolved.insert(key.clone(), value);
        sources.insert(key, source);
    }

    if !missing.is_empty() {
        let message = missing_message(plugin_id, &capability.id, &missing, &resolved, &sources);
        return ParamResolution::Missing {
            missing,
            resolved,
            message,
        };
    }

    if !uncertain.is_empty() {
        let message = uncertain_message(plugin_id, &capability.id, &uncertain, &resolved, &sources);
        return ParamResolution::Uncertain {
            uncertain,
            resolved,
            message,
        };
    }

    ParamResolution::Ready { params: resolved }
}

fn missing_message(
    plugin_id: &str,
    capability_id: &str,
    missing: &[String],
    resolved: &HashMap<String, Value>,
    sources: &HashMap<String, ParamSource>,
) -> String {
    let have: Vec<String> = resolved
        .iter()
        .map(|(k, v)| {
            let src = sources
                .get(k)
                .map(|s| s.label())
                .unwrap_or("?");
            format!("  - {k}: {} (from {src})", preview(v, 80))
        })
        .collect();
    let have_str = if have.is_empty() {
        "  (none)".to_string()
    } else {
        have.join("\n")
    };
    format!(
        "Plugin \"{plugin_id}\" (capability: {capability_id}) requires parameters that are missing:\n  \
         Missing: {}\n\nParameters we have:\n{have_str}\n\n\
         Please ask the user for the missing values.",
        missing.join(", ")
    )
}

fn uncertain_message(
    plugin_id: &str,
    capability_id: &str,
    uncertain: &[UncertainParam],
    resolved: &HashMap<String, Value>,
    sources: &HashMap<String, ParamSource>,
) -> String {
    let unc_lines: Vec<String> = uncertain
        .iter()
        .map(|u| {
            format!(
                "  - {}: {} (from {}) — please confirm with the user",
                u.name,
                u.value,
                u.source.label()
            )
        })
        .collect();
    let have_ok: Vec<String> = resolved
        .iter()
        .filter(|(k, _)| sources.get(*k) == Some(&ParamSource::UserMessage))
        .map(|(k, v)| format!("  - {k}: {} (from user message)", preview(v, 80)))
        .collect();
    let have_ok_str = if have_ok.is_empty() {
        "  (none)".to_string()
    } else {
        have_ok.join("\n")
    };
    format!(
        "Plugin \"{plugin_id}\" (capability: {capability_id}) has parameters that need confirmation before use:\n{}\n\n\
         Parameters we have (no confirmation needed):\n{have_ok_str}\n\n\
         Please ask the user to confirm the values above before proceeding.",
        unc_lines.join("\n")
    )
}
