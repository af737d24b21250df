//! Action tags in model output.
//!
//! Recognized tags:
//!
//! | Tag                       | Action                                  |
//! |---------------------------|-----------------------------------------|
//! | `[DELEGATE:target] text`  | delegate `text` (up to the next tag)    |
//! | `[VETO:reason]`           | submit a veto                           |
//! | `[APPROVE]`               | broadcast an approval                   |
//! | `[ASK:target:question]`   | ask another agent                       |
//! | `[ESCALATE:reason]`       | escalate (the colon is optional)        |
//! | `[TOOL:name] {json}`      | call a tool                             |
//!
//! Tags are case-sensitive. Anything that does not parse as a tag is plain
//! text and is ignored.

use conclave_core::message::MessageKind;
use serde::Serialize;
use serde_json::Value;

/// Where a delegation's text stops.
const DELEGATE_STOPS: [&str; 6] = [
    "[DELEGATE:",
    "[VETO",
    "[APPROVE]",
    "[ASK:",
    "[ESCALATE",
    "[TOOL:",
];

/// Kinds are ordered the way actions are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Delegate,
    Veto,
    Approve,
    Ask,
    Escalate,
}

impl ActionKind {
    pub fn message_kind(self) -> MessageKind {
        match self {
            Self::Delegate => MessageKind::Delegate,
            Self::Veto => MessageKind::Veto,
            Self::Approve => MessageKind::Approve,
            Self::Ask => MessageKind::Request,
            Self::Escalate => MessageKind::Escalate,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delegate => "delegate",
            Self::Veto => "veto",
            Self::Approve => "approve",
            Self::Ask => "ask",
            Self::Escalate => "escalate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedAction {
    pub kind: ActionKind,
    /// Role id or agent id, as written by the model
    pub target: Option<String>,
    pub content: String,
    pub reason: String,
}

impl ParsedAction {
    fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            target: None,
            content: String::new(),
            reason: String::new(),
        }
    }

    /// Message body for the action: the content, else the reason.
    pub fn body(&self) -> &str {
        if self.content.is_empty() {
            &self.reason
        } else {
            &self.content
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

/// A `[NAME]` or `[NAME:arg]` tag found in the text.
struct Tag<'a> {
    name: &'a str,
    arg: Option<&'a str>,
    /// Byte offset just past the closing bracket
    end: usize,
}

fn tags(text: &str) -> impl Iterator<Item = Tag<'_>> {
    text.match_indices('[').filter_map(move |(start, _)| {
        let body_start = start + 1;
        let close = text[body_start..].find(']')?;
        let body = &text[body_start..body_start + close];
        let (name, arg) = match body.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (body, None),
        };
        Some(Tag {
            name,
            arg,
            end: body_start + close + 1,
        })
    })
}

/// Parse every action tag, grouped by kind in execution order.
pub fn parse_actions(text: &str) -> Vec<ParsedAction> {
    let mut actions = Vec::new();

    for tag in tags(text) {
        let action = match (tag.name, tag.arg) {
            ("DELEGATE", Some(target)) if !target.trim().is_empty() => {
                let rest = &text[tag.end..];
                let stop = DELEGATE_STOPS
                    .iter()
                    .filter_map(|marker| rest.find(marker))
                    .min()
                    .unwrap_or(rest.len());
                ParsedAction {
                    target: Some(target.trim().to_string()),
                    content: rest[..stop].trim().to_string(),
                    ..ParsedAction::new(ActionKind::Delegate)
                }
            }
            ("VETO", Some(reason)) => ParsedAction {
                reason: reason.trim().to_string(),
                ..ParsedAction::new(ActionKind::Veto)
            },
            ("APPROVE", None) => ParsedAction::new(ActionKind::Approve),
            ("ASK", Some(arg)) => {
                let Some((target, question)) = arg.split_once(':') else {
                    continue;
                };
                if target.trim().is_empty() {
                    continue;
                }
                ParsedAction {
                    target: Some(target.trim().to_string()),
                    content: question.trim().to_string(),
                    ..ParsedAction::new(ActionKind::Ask)
                }
            }
            ("ESCALATE", reason) => ParsedAction {
                reason: reason.unwrap_or_default().trim().to_string(),
                ..ParsedAction::new(ActionKind::Escalate)
            },
            _ => continue,
        };
        actions.push(action);
    }

    actions.sort_by_key(|a| a.kind);
    actions
}

/// Parse `[TOOL:name] {json}` tags. Missing or malformed arguments become `{}`.
pub fn parse_tool_calls(text: &str) -> Vec<ToolCall> {
    tags(text)
        .filter(|tag| tag.name == "TOOL")
        .filter_map(|tag| {
            let name = tag.arg?.trim();
            if name.is_empty() {
                return None;
            }
            Some(ToolCall {
                name: name.to_string(),
                arguments: leading_object(&text[tag.end..]),
            })
        })
        .collect()
}

fn leading_object(text: &str) -> Value {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{')
        && let Some(Ok(value)) = serde_json::Deserializer::from_str(trimmed)
            .into_iter::<Value>()
            .next()
        && value.is_object()
    {
        return value;
    }
    Value::Object(serde_json::Map::new())
}
