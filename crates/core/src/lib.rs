//! # Hearthclaw Core
//!
//! Domain types, traits, and error definitions for the Hearthclaw
//! assistant backend. This crate has **zero framework dependencies** —
//! it defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem seam is a trait here (provider, tool, reply sink).
//! Implementations live in their respective crates, which all depend
//! inward on core. Registries are explicit instances passed by handle;
//! there is no global mutable state.

pub mod context;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod request;
pub mod routing;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use context::ToolInvocationContext;
pub use error::{Error, PipelineError, PluginError, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Conversation, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use request::{InboundRequest, OutboundReply, ReplyPayload, ReplySink, SYNC_INBOUND_HOST};
pub use routing::{ROUTING_REPLY_SENT, is_routing_sentinel};
pub use session::{ResolvedSession, SessionResolver, SessionScope};
pub use tool::{Tool, ToolCall, ToolCatalog, ToolOutcome};
