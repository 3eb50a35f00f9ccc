//! Plugin gateway for Hearthclaw.
//!
//! Descriptors declare what a plugin can do and how to reach it; the
//! gateway resolves parameters, isolates execution, and hands completed
//! replies to the routing tool. Plugin code is untrusted by default:
//! unless a plugin id is explicitly allow-listed for in-process
//! execution, every invocation happens in a separate OS process or over
//! the network, behind a timeout.

pub mod descriptor;
pub mod gateway;
pub mod params;
pub mod pending;
pub mod routing_tool;
pub mod runner;

pub use descriptor::{Capability, ParamSpec, PluginDescriptor, PluginRegistry, normalize_plugin_id};
pub use gateway::{GatewayReply, InlineHandler, PluginGateway};
pub use params::{ParamResolution, ParamSource, UncertainParam, resolve_params};
pub use pending::{PendingCallStore, PendingPluginCall};
pub use routing_tool::RoutePluginTool;
pub use runner::{RunnerOutput, RunnerPayload, SubprocessRunner};
