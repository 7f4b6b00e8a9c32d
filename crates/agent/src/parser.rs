//! Parser for tool calls embedded in free text.
//!
//! Models without native tool calling are instructed to wrap each call in
//! `<tool_call>...</tool_call>` tags holding a JSON object with `name` and
//! `arguments`.  Everything outside the tags is assistant prose; a block
//! that is not valid JSON is dropped rather than failing the turn, since a
//! chatty model interleaving explanation with calls is the normal case.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;
use vaultmind_llm::ToolCall;

const OPEN_TAG: &str = "<tool_call>";
const CLOSE_TAG: &str = "</tool_call>";

/// A fallback reply split into prose and extracted calls.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub text: String,
    pub calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct TaggedCall {
    name: String,
    #[serde(default = "empty_object")]
    arguments: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Extract every well-formed `<tool_call>` block from `reply`.
///
/// Ids are synthesized locally since the model provides none.  An opening
/// tag with no closing tag is treated as prose, not an error.
pub fn parse_tagged_reply(reply: &str) -> ParsedReply {
    let mut text = String::new();
    let mut calls = Vec::new();
    let mut rest = reply;

    while let Some(start) = rest.find(OPEN_TAG) {
        text.push_str(&rest[..start]);
        let after = &rest[start + OPEN_TAG.len()..];
        let Some(end) = after.find(CLOSE_TAG) else {
            // Unterminated tag: keep the remainder as prose.
            text.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let body = after[..end].trim();
        match serde_json::from_str::<TaggedCall>(body) {
            Ok(parsed) => calls.push(ToolCall {
                id: format!("call_{}", Uuid::new_v4().simple()),
                name: parsed.name,
                arguments: parsed.arguments,
            }),
            Err(err) => {
                debug!(%err, block = body, "dropping malformed tool_call block");
            }
        }
        rest = &after[end + CLOSE_TAG.len()..];
    }
    text.push_str(rest);

    ParsedReply {
        text: text.trim().to_string(),
        calls,
    }
}
