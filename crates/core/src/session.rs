//! Session and identity resolution.
//!
//! Derives the stable session key and run id a request is scoped to.
//! Conversation history and pending plugin state are keyed by the
//! session key, so the derivation must be deterministic for a given
//! (app, channel, account, peer) tuple within a process lifetime.
//!
//! Identity links map channel-specific aliases onto a canonical user
//! id, so the same person reaching the assistant over two channels
//! shares profile and pending-call state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::request::InboundRequest;

const DEFAULT_CHANNEL: &str = "im";
const DEFAULT_ACCOUNT: &str = "default";

/// How broadly conversation state is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SessionScope {
    /// One global DM session per app.
    #[default]
    Main,
    /// One session per conversation partner.
    PerPeer,
    /// One session per (channel, partner).
    PerChannelPeer,
    /// One session per (channel, account, partner).
    PerAccountChannelPeer,
}

/// Resolved identities and keys for one request.
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub canonical_user_id: String,
    pub session_key: String,
    pub run_id: String,
}

/// Derives session keys, canonical identities, and run ids.
pub struct SessionResolver {
    scope: SessionScope,
    /// alias → canonical user id
    links: HashMap<String, String>,
    /// canonical user id → run id, stable for the process lifetime
    run_ids: Mutex<HashMap<String, String>>,
}

impl SessionResolver {
    /// Build a resolver.
    ///
    /// `identity_links` maps a canonical user id to the channel aliases
    /// that should resolve to it.
    pub fn new(scope: SessionScope, identity_links: &HashMap<String, Vec<String>>) -> Self {
        let mut links = HashMap::new();
        for (canonical, aliases) in identity_links {
            for alias in aliases {
                links.insert(alias.clone(), canonical.clone());
            }
        }
        Self {
            scope,
            links,
            run_ids: Mutex::new(HashMap::new()),
        }
    }

    /// Map a raw channel identity onto its canonical user id.
    pub fn canonical_user(&self, raw_user_id: &str) -> String {
        self.links
            .get(raw_user_id)
            .cloned()
            .unwrap_or_else(|| raw_user_id.to_string())
    }

    /// Derive the session key for a tuple under this resolver's policy.
    pub fn session_key(
        &self,
        app: &str,
        channel: Option<&str>,
        account: Option<&str>,
        peer: &str,
    ) -> String {
        let channel = non_blank(channel, DEFAULT_CHANNEL);
        let account = non_blank(account, DEFAULT_ACCOUNT);
        match self.scope {
            SessionScope::Main => format!("{app}:main"),
            SessionScope::PerPeer => format!("{app}:dm:{peer}"),
            SessionScope::PerChannelPeer => format!("{app}:{channel}:dm:{peer}"),
            SessionScope::PerAccountChannelPeer => {
                format!("{app}:{channel}:{account}:dm:{peer}")
            }
        }
    }

    /// The stable run id for a canonical user, minted on first use.
    pub fn run_id(&self, canonical_user_id: &str) -> String {
        let mut run_ids = self
            .run_ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        run_ids
            .entry(canonical_user_id.to_string())
            .or_insert_with(|| Uuid::new_v4().to_string())
            .clone()
    }

    /// Resolve everything a request needs in one step.
    pub fn resolve(&self, request: &InboundRequest) -> ResolvedSession {
        let canonical_user_id = self.canonical_user(&request.user_id);
        let peer = request
            .person
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&canonical_user_id);
        let session_key = self.session_key(
            &request.app_id,
            request.channel.as_deref(),
            request.account.as_deref(),
            peer,
        );
        let run_id = self.run_id(&canonical_user_id);
        ResolvedSession {
            canonical_user_id,
            session_key,
            run_id,
        }
    }
}

fn non_blank<'a>(value: Option<&'a str>, fallback: &'a str) -> &'a str {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(scope: SessionScope) -> SessionResolver {
        SessionResolver::new(scope, &HashMap::new())
    }

    #[test]
    fn key_formats_per_policy() {
        assert_eq!(
            resolver(SessionScope::Main).session_key("a", None, None, "p1"),
            "a:main"
        );
        assert_eq!(
            resolver(SessionScope::PerPeer).session_key("a", None, None, "p1"),
            "a:dm:p1"
        );
        assert_eq!(
            resolver(SessionScope::PerChannelPeer).session_key("a", Some("telegram"), None, "p1"),
            "a:telegram:dm:p1"
        );
        assert_eq!(
            resolver(SessionScope::PerAccountChannelPeer).session_key(
                "a",
                Some("telegram"),
                Some("work"),
                "p1"
            ),
            "a:telegram:work:dm:p1"
        );
    }

    #[test]
    fn blank_channel_and_account_use_defaults() {
        let r = resolver(SessionScope::PerAccountChannelPeer);
        assert_eq!(r.session_key("a", Some("  "), None, "p1"), "a:im:default:dm:p1");
    }

    #[test]
    fn keys_are_deterministic_and_distinct_per_peer() {
        let r = resolver(SessionScope::PerPeer);
        let k1 = r.session_key("a", None, None, "p1");
        let k1_again = r.session_key("a", None, None, "p1");
        let k2 = r.session_key("a", None, None, "p2");
        assert_eq!(k1, k1_again);
        assert_ne!(k1, k2);
    }

    #[test]
    fn identity_links_canonicalize() {
        let mut links = HashMap::new();
        links.insert(
            "alice".to_string(),
            vec!["alice@telegram".to_string(), "alice#1234".to_string()],
        );
        let r = SessionResolver::new(SessionScope::PerPeer, &links);
        assert_eq!(r.canonical_user("alice@telegram"), "alice");
        assert_eq!(r.canonical_user("alice#1234"), "alice");
        assert_eq!(r.canonical_user("bob"), "bob");
    }

    #[test]
    fn run_id_stable_per_user() {
        let r = resolver(SessionScope::Main);
        let a1 = r.run_id("alice");
        let a2 = r.run_id("alice");
        let b = r.run_id("bob");
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
    }

    #[test]
    fn resolve_uses_person_then_canonical_user() {
        let mut links = HashMap::new();
        links.insert("alice".to_string(), vec!["alice@tg".to_string()]);
        let r = SessionResolver::new(SessionScope::PerPeer, &links);

        let mut req = InboundRequest::synchronous("hearth", "alice@tg", "hi");
        let resolved = r.resolve(&req);
        assert_eq!(resolved.canonical_user_id, "alice");
        assert_eq!(resolved.session_key, "hearth:dm:alice");

        req.person = Some("bob".into());
        assert_eq!(r.resolve(&req).session_key, "hearth:dm:bob");
    }
}
