//! Textual tool-call fallback.
//!
//! Some models (especially local ones) emit tool calls as
//! `<tool_call>{"name": ..., "arguments": {...}}</tool_call>` blocks in
//! plain text instead of the structured API field. This parser recovers
//! them. Structured calls always take precedence; this only runs when
//! the response carries none. Blocks that fail to parse are logged and
//! skipped — a malformed call must be visible in the logs, not silently
//! swallowed.

use hearthclaw_core::tool::ToolCall;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

const OPEN_TAG: &str = "<tool_call>";
const CLOSE_TAG: &str = "</tool_call>";

/// Extract tool calls from `<tool_call>` blocks in model output text.
pub fn parse_text_tool_calls(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut rest = text;
    let mut index = 0;

    while let Some(open) = rest.find(OPEN_TAG) {
        let after_open = &rest[open + OPEN_TAG.len()..];
        let Some(close) = after_open.find(CLOSE_TAG) else {
            // Unterminated block; nothing more to recover.
            warn!(
                snippet = %snippet(after_open),
                "Unterminated <tool_call> block in model output"
            );
            break;
        };

        let raw = after_open[..close].trim();
        if let Some(call) = parse_block(raw, index) {
            calls.push(call);
            index += 1;
        }
        rest = &after_open[close + CLOSE_TAG.len()..];
    }

    calls
}

/// Whether the text contains anything this parser would look at.
pub fn has_tool_call_markup(text: &str) -> bool {
    text.contains(OPEN_TAG)
}

fn parse_block(raw: &str, index: usize) -> Option<ToolCall> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                error = %e,
                snippet = %snippet(raw),
                "Skipping unparsable <tool_call> block"
            );
            return None;
        }
    };

    let Some(name) = value
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
    else {
        warn!(
            snippet = %snippet(raw),
            "Skipping <tool_call> block without a tool name"
        );
        return None;
    };

    let arguments = match value.get("arguments") {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        // Models sometimes double-encode the argument object.
        Some(Value::String(inner)) => match serde_json::from_str::<Value>(inner) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => {
                warn!(
                    tool = %name,
                    snippet = %snippet(inner),
                    "Tool call arguments are a non-JSON string, using empty arguments"
                );
                serde_json::json!({})
            }
        },
        _ => serde_json::json!({}),
    };

    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    Some(ToolCall {
        id: format!("raw_tool_{index}_{suffix}"),
        name: name.to_string(),
        arguments,
    })
}

fn snippet(raw: &str) -> String {
    raw.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_block() {
        let text = r#"Let me check.
<tool_call>{"name": "time", "arguments": {"zone": "UTC"}}</tool_call>"#;
        let calls = parse_text_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "time");
        assert_eq!(calls[0].arguments["zone"], "UTC");
        assert!(calls[0].id.starts_with("raw_tool_0_"));
    }

    #[test]
    fn parses_multiple_blocks_in_order() {
        let text = concat!(
            r#"<tool_call>{"name": "a", "arguments": {}}</tool_call>"#,
            " and ",
            r#"<tool_call>{"name": "b", "arguments": {}}</tool_call>"#,
        );
        let calls = parse_text_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "a");
        assert_eq!(calls[1].name, "b");
    }

    #[test]
    fn tolerates_double_encoded_arguments() {
        let text = r#"<tool_call>{"name": "echo", "arguments": "{\"text\": \"hi\"}"}</tool_call>"#;
        let calls = parse_text_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["text"], "hi");
    }

    #[test]
    fn missing_arguments_default_to_empty_object() {
        let text = r#"<tool_call>{"name": "time"}</tool_call>"#;
        let calls = parse_text_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn unparsable_block_is_skipped_not_fatal() {
        let text = concat!(
            r#"<tool_call>not json at all</tool_call>"#,
            r#"<tool_call>{"name": "time", "arguments": {}}</tool_call>"#,
        );
        let calls = parse_text_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "time");
    }

    #[test]
    fn block_without_name_is_skipped() {
        let text = r#"<tool_call>{"arguments": {"x": 1}}</tool_call>"#;
        assert!(parse_text_tool_calls(text).is_empty());
    }

    #[test]
    fn plain_text_yields_nothing() {
        assert!(parse_text_tool_calls("Just an ordinary answer.").is_empty());
        assert!(!has_tool_call_markup("Just an ordinary answer."));
    }

    #[test]
    fn unterminated_block_stops_cleanly() {
        let text = r#"<tool_call>{"name": "time""#;
        assert!(parse_text_tool_calls(text).is_empty());
        assert!(has_tool_call_markup(text));
    }
}
