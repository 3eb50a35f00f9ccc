//! Reply disposition: what happens to a tool result.
//!
//! A tool result either IS the reply (`FinalText`), needs the model to
//! rephrase it (`NeedsModelReformulation`), or was already delivered by
//! the tool itself (`RoutedAway`). The decision is a pure function over
//! (tool name, outcome): two configured name sets plus two predicates —
//! results that read like errors and results longer than the configured
//! threshold always go back to the model.

use hearthclaw_config::AgentConfig;
use hearthclaw_core::tool::ToolOutcome;
use std::collections::HashSet;

/// What to do with one tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyDisposition {
    /// Usable verbatim as the user-visible reply.
    FinalText,

    /// Feed back to the model for another round.
    NeedsModelReformulation,

    /// The tool already delivered the reply; say nothing more.
    RoutedAway,
}

pub struct ResultClassifier {
    self_contained: HashSet<String>,
    needs_llm: HashSet<String>,
    max_self_contained_length: usize,
}

impl ResultClassifier {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            self_contained: config.self_contained_tools.iter().cloned().collect(),
            needs_llm: config.needs_llm_tools.iter().cloned().collect(),
            max_self_contained_length: config.clamped_max_self_contained_length(),
        }
    }

    pub fn classify(&self, tool_name: &str, outcome: &ToolOutcome) -> ReplyDisposition {
        let text = match outcome {
            ToolOutcome::Routed => return ReplyDisposition::RoutedAway,
            ToolOutcome::Text(text) => text,
        };

        if self.needs_llm.contains(tool_name) {
            return ReplyDisposition::NeedsModelReformulation;
        }
        if !self.self_contained.contains(tool_name) {
            // Unknown tools get the safe treatment.
            return ReplyDisposition::NeedsModelReformulation;
        }
        if text.chars().count() > self.max_self_contained_length {
            return ReplyDisposition::NeedsModelReformulation;
        }
        if looks_like_error(text) {
            return ReplyDisposition::NeedsModelReformulation;
        }
        ReplyDisposition::FinalText
    }
}

/// Heuristic: does a tool result read like an error or a non-answer the
/// model should rephrase instead of the user seeing it raw?
pub fn looks_like_error(result: &str) -> bool {
    let r = result.trim();
    if r.len() > 2000 {
        // Long results are content, not terse error strings.
        return false;
    }
    if r == "[]" {
        return true;
    }

    let lower = r.to_lowercase();
    let not_found_phrases = [
        "wasn't found",
        "was not found",
        "couldn't find",
        "could not find",
        "no files matched",
        "file not found",
        "not readable",
    ];
    if not_found_phrases.iter().any(|p| lower.contains(p)) {
        return true;
    }
    if lower.contains("no entries") && lower.contains("directory") {
        return true;
    }

    let head: String = lower.chars().take(200).collect();
    if lower.starts_with("error:") || head.contains("error: ") {
        return true;
    }

    // Instruction markers some tools prepend for the model; they must
    // never be shown to the user verbatim.
    if lower.contains("do not reply with only this line") || lower.contains("you must in this turn")
    {
        return true;
    }

    false
}
