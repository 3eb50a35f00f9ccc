//! The Hearthclaw agent: bounded tool-calling orchestration.
//!
//! `ToolLoop` drives LLM⇄tool rounds; `ResultClassifier` decides per
//! result whether it is final, needs reformulation, or was routed away;
//! the fallback parser recovers `<tool_call>` blocks from models that
//! emit tool calls as text.

pub mod classify;
pub mod fallback;
pub mod loop_runner;

pub use classify::{ReplyDisposition, ResultClassifier, looks_like_error};
pub use fallback::{has_tool_call_markup, parse_text_tool_calls};
pub use loop_runner::{FALLBACK_APOLOGY, LoopOutcome, ToolLoop};
