//! The routing protocol.
//!
//! Some tools deliver the final reply to the user themselves (for
//! example by handing the request off to a plugin that posts directly
//! to the requester's channel). Such a tool returns the routing
//! sentinel instead of display text, and every layer above it must
//! suppress its own delivery to avoid a double reply.
//!
//! The sentinel is a single well-known string constant so it survives
//! process boundaries (subprocess runners return plain strings); it is
//! never shown to a user.

/// The distinguished result value meaning "the reply was already
/// delivered; do not deliver again."
pub const ROUTING_REPLY_SENT: &str = "__ROUTING_REPLY_SENT__";

/// Check a raw string result for the routing sentinel.
///
/// Must be called at every boundary that consumes a tool result as a
/// string before treating it as display text.
pub fn is_routing_sentinel(text: &str) -> bool {
    text == ROUTING_REPLY_SENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_matches_only_exactly() {
        assert!(is_routing_sentinel(ROUTING_REPLY_SENT));
        assert!(!is_routing_sentinel("__routing_reply_sent__"));
        assert!(!is_routing_sentinel(&format!(" {ROUTING_REPLY_SENT}")));
        assert!(!is_routing_sentinel(""));
    }
}
