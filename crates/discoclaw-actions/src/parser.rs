//! Extracts `<discord-action>{...}</discord-action>` blocks from model output.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::catalog;

/// A single decoded action block: the raw `type` string plus its JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub action_type: String,
    pub payload: Value,
}

/// The result of extracting every action block from a chunk of model text.
#[derive(Debug, Clone)]
pub struct ParsedActions {
    /// The original text with every well-formed action block removed.
    pub clean_text: String,
    /// Every block that decoded to valid JSON with a `type` field.
    pub actions: Vec<Action>,
    /// `type` strings seen that aren't in the catalog at all (as opposed to
    /// merely gated off by a disabled category flag).
    pub stripped_unrecognized_types: Vec<String>,
}

impl ParsedActions {
    /// `true` iff, after stripping action blocks, only whitespace remains.
    pub fn is_clean_text_empty(&self) -> bool {
        self.clean_text.trim().is_empty()
    }
}

fn block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<discord-action>(.*?)</discord-action>").expect("static regex is valid")
    })
}

/// Extract every `<discord-action>{...}</discord-action>` block from `text`.
///
/// A block whose body is not valid JSON, or decodes to JSON without a string
/// `type` field, is dropped silently (malformed model output, not a
/// recoverable action). A block whose `type` isn't in the catalog at all is
/// still stripped from `clean_text` but its type name is recorded in
/// `stripped_unrecognized_types` rather than `actions`.
pub fn parse_actions(text: &str) -> ParsedActions {
    let mut actions = Vec::new();
    let mut stripped_unrecognized_types = Vec::new();

    let clean_text = block_regex()
        .replace_all(text, |caps: &regex::Captures| {
            let body = caps[1].trim();
            match serde_json::from_str::<Value>(body) {
                Ok(value) => {
                    if let Some(type_name) = value.get("type").and_then(Value::as_str) {
                        if catalog::lookup(type_name).is_some() {
                            actions.push(Action {
                                action_type: type_name.to_string(),
                                payload: value,
                            });
                        } else {
                            stripped_unrecognized_types.push(type_name.to_string());
                        }
                    }
                }
                Err(_) => {}
            }
            ""
        })
        .to_string();

    ParsedActions {
        clean_text,
        actions,
        stripped_unrecognized_types,
    }
}

/// Serialize `actions` back into the wire shape, one block per line. Used by
/// tests to verify the parse round-trip and by callers that need to replay
/// actions verbatim (e.g. audit log transcripts).
pub fn render_actions(actions: &[Action]) -> String {
    actions
        .iter()
        .map(|a| format!("<discord-action>{}</discord-action>", a.payload))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_action_and_strips_block() {
        let text = r#"Listing tasks
<discord-action>{"type":"taskList"}</discord-action>"#;
        let parsed = parse_actions(text);
        assert_eq!(parsed.actions.len(), 1);
        assert_eq!(parsed.actions[0].action_type, "taskList");
        assert_eq!(parsed.clean_text.trim(), "Listing tasks");
    }

    #[test]
    fn extracts_multiple_actions_in_order() {
        let text = r#"<discord-action>{"type":"sendMessage","text":"hi"}</discord-action>
<discord-action>{"type":"taskCreate","title":"x"}</discord-action>"#;
        let parsed = parse_actions(text);
        assert_eq!(parsed.actions.len(), 2);
        assert_eq!(parsed.actions[0].action_type, "sendMessage");
        assert_eq!(parsed.actions[1].action_type, "taskCreate");
    }

    #[test]
    fn unrecognized_type_is_stripped_but_flagged() {
        let text = r#"<discord-action>{"type":"launchMissiles"}</discord-action>ok"#;
        let parsed = parse_actions(text);
        assert!(parsed.actions.is_empty());
        assert_eq!(parsed.stripped_unrecognized_types, vec!["launchMissiles"]);
        assert_eq!(parsed.clean_text.trim(), "ok");
    }

    #[test]
    fn malformed_json_is_dropped_silently() {
        let text = r#"<discord-action>{not json}</discord-action>ok"#;
        let parsed = parse_actions(text);
        assert!(parsed.actions.is_empty());
        assert!(parsed.stripped_unrecognized_types.is_empty());
        assert_eq!(parsed.clean_text.trim(), "ok");
    }

    #[test]
    fn no_actions_returns_full_text() {
        let parsed = parse_actions("just prose, no actions here");
        assert!(parsed.actions.is_empty());
        assert_eq!(parsed.clean_text, "just prose, no actions here");
    }

    #[test]
    fn whitespace_only_outside_blocks_is_no_prose() {
        let text = "   \n<discord-action>{\"type\":\"sendMessage\"}</discord-action>\n  ";
        let parsed = parse_actions(text);
        assert!(parsed.is_clean_text_empty());
    }

    #[test]
    fn action_round_trip() {
        let original = vec![Action {
            action_type: "sendMessage".into(),
            payload: serde_json::json!({"type": "sendMessage", "text": "hi"}),
        }];
        let rendered = render_actions(&original);
        let combined = format!("prefix text\n{rendered}");
        let reparsed = parse_actions(&combined);
        assert_eq!(reparsed.actions.len(), 1);
        assert_eq!(reparsed.actions[0].payload, original[0].payload);
        assert_eq!(reparsed.clean_text.trim(), "prefix text");
    }
}
