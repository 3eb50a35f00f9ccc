//! Inbound requests and outbound replies.
//!
//! An `InboundRequest` is what the admission layer accepts from a
//! remote channel connector; an `OutboundReply` is what the delivery
//! worker posts back to that channel's `/get_response` callback.
//!
//! A request whose callback coordinates are `host == "inbound"` and
//! `port == 0` is synchronous: the caller is holding the connection
//! open and the reply must be returned in-band, never queued.

use crate::error::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marker host for synchronous inbound requests.
pub const SYNC_INBOUND_HOST: &str = "inbound";

/// A user request admitted into the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundRequest {
    /// Correlation id echoed back in the reply
    pub request_id: String,

    /// The calling application (e.g. "hearthclaw", a connector name)
    pub app_id: String,

    /// Raw channel identity of the sender
    pub user_id: String,

    /// Human-readable sender name, if the channel knows it
    #[serde(default)]
    pub user_name: Option<String>,

    /// Channel kind within the app (e.g. "im")
    #[serde(default)]
    pub channel: Option<String>,

    /// Account within the channel
    #[serde(default)]
    pub account: Option<String>,

    /// Peer / conversation partner identifier
    #[serde(default)]
    pub person: Option<String>,

    /// The message text
    pub text: String,

    /// Callback host for asynchronous delivery
    pub host: String,

    /// Callback port for asynchronous delivery
    pub port: u16,

    /// Opaque metadata echoed back to the channel connector
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl InboundRequest {
    /// Build a synchronous request (reply returned in-band).
    pub fn synchronous(
        app_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            app_id: app_id.into(),
            user_id: user_id.into(),
            user_name: None,
            channel: None,
            account: None,
            person: None,
            text: text.into(),
            host: SYNC_INBOUND_HOST.into(),
            port: 0,
            metadata: serde_json::Value::Null,
        }
    }

    /// Whether the caller is waiting for the reply on the open connection.
    pub fn is_sync_inbound(&self) -> bool {
        self.host == SYNC_INBOUND_HOST && self.port == 0
    }
}

/// The reply payload delivered to a channel connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub text: String,

    /// Rendering hint for the connector ("text", "markdown")
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "text".into()
}

impl ReplyPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: default_format(),
        }
    }
}

/// A completed reply waiting for asynchronous delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundReply {
    /// Correlation id of the originating request
    pub request_id: String,

    /// Opaque routing metadata from the originating request
    #[serde(default)]
    pub request_metadata: serde_json::Value,

    /// Callback host
    pub host: String,

    /// Callback port
    pub port: u16,

    /// Channel the request arrived from
    pub from_channel: String,

    /// The reply itself
    pub response_data: ReplyPayload,
}

impl OutboundReply {
    /// Build a reply addressed back to the request's callback.
    pub fn for_request(request: &InboundRequest, payload: ReplyPayload) -> Self {
        Self {
            request_id: request.request_id.clone(),
            request_metadata: request.metadata.clone(),
            host: request.host.clone(),
            port: request.port,
            from_channel: request.channel.clone().unwrap_or_else(|| "im".into()),
            response_data: payload,
        }
    }

    /// Whether this reply belongs to a synchronous request and must not
    /// go through the outbound queue.
    pub fn is_sync_inbound(&self) -> bool {
        self.host == SYNC_INBOUND_HOST && self.port == 0
    }
}

/// A sink replies can be pushed into for asynchronous delivery.
///
/// Routing tools deliver through this seam; the pipeline implements it
/// on top of the outbound queue so tools never see the queue itself.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn deliver(&self, reply: OutboundReply) -> std::result::Result<(), PipelineError>;
}
