//! Caller-owned conversation transcripts.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::llm::{ModelMessage, ModelToolCall};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message in a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Tool calls requested by an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ModelToolCall>,
    /// On tool turns, the id of the call this turn answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// On tool turns, whether `content` describes a failure.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Turn {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            is_error: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// An assistant turn that requests tool calls, with any text the model
    /// produced alongside them.
    pub fn tool_request(content: Option<String>, tool_calls: Vec<ModelToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content.unwrap_or_default())
        }
    }

    pub fn tool_result(
        call: &ModelToolCall,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            tool_name: Some(call.name.clone()),
            is_error,
            ..Self::new(Role::Tool, content)
        }
    }

    fn to_message(&self) -> ModelMessage {
        match self.role {
            Role::System => ModelMessage::System(self.content.clone()),
            Role::User => ModelMessage::User(self.content.clone()),
            Role::Assistant => ModelMessage::Assistant {
                content: if self.content.is_empty() {
                    None
                } else {
                    Some(self.content.clone())
                },
                tool_calls: self.tool_calls.clone(),
            },
            Role::Tool => ModelMessage::ToolResult {
                tool_call_id: self.tool_call_id.clone().unwrap_or_default(),
                tool_name: self.tool_name.clone().unwrap_or_default(),
                content: self.content.clone(),
                is_error: self.is_error,
            },
        }
    }
}

/// An ordered transcript of [`Turn`]s.
///
/// The engine never keeps a context between calls: `complete_with_context`
/// reads one and returns an extended copy. Contexts can be stored (they
/// serialize as a plain array of turns), discarded, or branched freely.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    turns: Vec<Turn>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Content of the final turn; after a completion this is the answer.
    pub fn last_content(&self) -> Option<&str> {
        self.turns.last().map(|turn| turn.content.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Turn> {
        self.turns.iter()
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    pub(crate) fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub(crate) fn extend(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.turns.extend(turns);
    }

    pub(crate) fn to_messages(&self) -> Vec<ModelMessage> {
        self.turns.iter().map(Turn::to_message).collect()
    }

    /// Checks the ordering rules the engine relies on: a system turn may only
    /// come first, every tool turn answers a call of the assistant turn
    /// directly before its group, and no tool call is left unanswered.
    pub fn validate(&self) -> Result<(), AgentError> {
        let mut pending: HashSet<&str> = HashSet::new();

        for (index, turn) in self.turns.iter().enumerate() {
            if turn.role != Role::Tool && !pending.is_empty() {
                return Err(AgentError::InvalidContext(format!(
                    "turn {index} follows unanswered tool calls"
                )));
            }

            match turn.role {
                Role::System if index > 0 => {
                    return Err(AgentError::InvalidContext(format!(
                        "system turn at position {index}; only the first turn may be a system turn"
                    )));
                }
                Role::Assistant => {
                    pending = turn.tool_calls.iter().map(|call| call.id.as_str()).collect();
                }
                Role::Tool => {
                    let answered = turn
                        .tool_call_id
                        .as_deref()
                        .is_some_and(|id| pending.remove(id));
                    if !answered {
                        return Err(AgentError::InvalidContext(format!(
                            "tool turn {index} does not answer a pending tool call"
                        )));
                    }
                }
                Role::System | Role::User => {}
            }
        }

        if pending.is_empty() {
            Ok(())
        } else {
            Err(AgentError::InvalidContext(
                "context ends with unanswered tool calls".to_string(),
            ))
        }
    }
}

impl From<Vec<Turn>> for Context {
    fn from(turns: Vec<Turn>) -> Self {
        Self { turns }
    }
}

impl<'a> IntoIterator for &'a Context {
    type Item = &'a Turn;
    type IntoIter = std::slice::Iter<'a, Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(id: &str) -> ModelToolCall {
        ModelToolCall {
            id: id.to_string(),
            name: "add".to_string(),
            arguments: json!({"a": 2, "b": 3}),
        }
    }

    #[test]
    fn complete_tool_exchange_is_valid() {
        let context = Context::from(vec![
            Turn::system("be brief"),
            Turn::user("2 + 3?"),
            Turn::tool_request(None, vec![call("c1"), call("c2")]),
            Turn::tool_result(&call("c2"), "5", false),
            Turn::tool_result(&call("c1"), "5", false),
            Turn::assistant("5"),
        ]);
        assert!(context.validate().is_ok());
        assert_eq!(context.last_content(), Some("5"));
    }

    #[test]
    fn dangling_tool_request_is_invalid() {
        let context = Context::from(vec![
            Turn::user("2 + 3?"),
            Turn::tool_request(None, vec![call("c1")]),
        ]);
        let err = context.validate().expect_err("must fail");
        assert!(err.to_string().contains("unanswered"));

        let interrupted = Context::from(vec![
            Turn::user("2 + 3?"),
            Turn::tool_request(None, vec![call("c1")]),
            Turn::user("never mind"),
        ]);
        assert!(interrupted.validate().is_err());
    }

    #[test]
    fn tool_turn_with_unknown_id_and_late_system_turn_are_invalid() {
        let mismatched = Context::from(vec![
            Turn::user("2 + 3?"),
            Turn::tool_request(None, vec![call("c1")]),
            Turn::tool_result(&call("other"), "5", false),
        ]);
        assert!(mismatched.validate().is_err());

        let late_system = Context::from(vec![Turn::user("hi"), Turn::system("be brief")]);
        assert!(late_system.validate().is_err());
    }

    #[test]
    fn turns_map_to_provider_messages() {
        let context = Context::from(vec![
            Turn::system("sys"),
            Turn::user("hi"),
            Turn::tool_request(Some(String::new()), vec![call("c1")]),
            Turn::tool_result(&call("c1"), "boom", true),
        ]);

        let messages = context.to_messages();
        assert_eq!(messages[0], ModelMessage::System("sys".to_string()));
        assert_eq!(
            messages[2],
            ModelMessage::Assistant {
                content: None,
                tool_calls: vec![call("c1")],
            }
        );
        assert_eq!(
            messages[3],
            ModelMessage::ToolResult {
                tool_call_id: "c1".to_string(),
                tool_name: "add".to_string(),
                content: "boom".to_string(),
                is_error: true,
            }
        );
    }

    #[test]
    fn serializes_as_plain_turn_array() {
        let context = Context::from(vec![Turn::user("hi"), Turn::assistant("hello")]);
        let value = serde_json::to_value(&context).expect("serializes");
        assert_eq!(
            value,
            json!([
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ])
        );
    }
}
