//! Pending plugin calls.
//!
//! When parameter resolution stops short of invocation, the partial
//! parameter set and the still-missing names are parked here, keyed by
//! `{app}:{user}:{session}`. The next user turn on the same key can be
//! merged into the pending call instead of re-deriving everything; with
//! exactly one missing parameter, the whole follow-up message is taken
//! as its value.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::params::normalize_key;

/// A plugin call waiting for more input from the user.
#[derive(Debug, Clone)]
pub struct PendingPluginCall {
    pub plugin_id: String,
    pub capability_id: String,
    /// Parameters already resolved
    pub resolved: HashMap<String, Value>,
    /// Names a follow-up message may fill. Empty for calls that only
    /// await confirmation; those are never merged from free text.
    pub missing: Vec<String>,
}

impl PendingPluginCall {
    /// Merge a follow-up user message into this call.
    ///
    /// Only unambiguous with exactly one missing parameter; returns the
    /// completed parameter set, or None when the merge cannot be done.
    pub fn fill_from_message(&self, user_message: &str) -> Option<HashMap<String, Value>> {
        let text = user_message.trim();
        if text.is_empty() || self.missing.len() != 1 {
            return None;
        }
        let mut params = self.resolved.clone();
        params.insert(normalize_key(&self.missing[0]), Value::String(text.to_string()));
        Some(params)
    }
}

/// Single point of ownership for pending calls across all sessions.
#[derive(Default)]
pub struct PendingCallStore {
    calls: Mutex<HashMap<String, PendingPluginCall>>,
}

impl PendingCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(app_id: &str, user_id: &str, session_id: &str) -> String {
        format!("{app_id}:{user_id}:{session_id}")
    }

    pub async fn set(
        &self,
        app_id: &str,
        user_id: &str,
        session_id: &str,
        call: PendingPluginCall,
    ) {
        self.calls
            .lock()
            .await
            .insert(Self::key(app_id, user_id, session_id), call);
    }

    /// Remove and return the pending call for a key, if any.
    pub async fn take(
        &self,
        app_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Option<PendingPluginCall> {
        self.calls
            .lock()
            .await
            .remove(&Self::key(app_id, user_id, session_id))
    }

    pub async fn clear(&self, app_id: &str, user_id: &str, session_id: &str) {
        self.calls
            .lock()
            .await
            .remove(&Self::key(app_id, user_id, session_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending(missing: Vec<&str>) -> PendingPluginCall {
        PendingPluginCall {
            plugin_id: "weather".into(),
            capability_id: "current".into(),
            resolved: HashMap::from([("units".to_string(), json!("metric"))]),
            missing: missing.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn single_missing_param_takes_whole_message() {
        let call = pending(vec!["City Name"]);
        let params = call.fill_from_message("  Boston ").unwrap();
        assert_eq!(params["city_name"], json!("Boston"));
        assert_eq!(params["units"], json!("metric"));
    }

    #[test]
    fn multiple_missing_params_cannot_merge() {
        let call = pending(vec!["city", "date"]);
        assert!(call.fill_from_message("Boston").is_none());
    }

    #[test]
    fn empty_message_cannot_merge() {
        let call = pending(vec!["city"]);
        assert!(call.fill_from_message("   ").is_none());
    }

    #[tokio::test]
    async fn store_is_keyed_per_session() {
        let store = PendingCallStore::new();
        store
            .set("hearth", "alice", "s1", pending(vec!["city"]))
            .await;

        assert!(store.take("hearth", "alice", "s2").await.is_none());
        let call = store.take("hearth", "alice", "s1").await.unwrap();
        assert_eq!(call.plugin_id, "weather");
        // take consumes
        assert!(store.take("hearth", "alice", "s1").await.is_none());
    }
}
