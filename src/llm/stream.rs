use serde_json::{Value, json};

use crate::llm::{ModelChunk, ModelCompletion, ModelToolCall, ModelUsage};

#[derive(Debug, Default)]
struct PartialToolCall {
    index: usize,
    id: String,
    name: String,
    arguments: String,
}

/// Rebuilds a [`ModelCompletion`] from streamed [`ModelChunk`]s.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    text: String,
    tool_calls: Vec<PartialToolCall>,
    usage: Option<ModelUsage>,
}

impl ChunkAssembler {
    pub fn push(&mut self, chunk: ModelChunk) {
        match chunk {
            ModelChunk::Text(delta) => self.text.push_str(&delta),
            ModelChunk::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                let position = match self.tool_calls.iter().position(|call| call.index == index) {
                    Some(position) => position,
                    None => {
                        self.tool_calls.push(PartialToolCall {
                            index,
                            ..PartialToolCall::default()
                        });
                        self.tool_calls.len() - 1
                    }
                };
                let call = &mut self.tool_calls[position];
                if let Some(id) = id.filter(|id| !id.is_empty()) {
                    call.id = id;
                }
                if let Some(name) = name.filter(|name| !name.is_empty()) {
                    call.name = name;
                }
                call.arguments.push_str(&arguments);
            }
            ModelChunk::Usage(usage) => self.usage = Some(usage),
        }
    }

    pub fn finish(self) -> ModelCompletion {
        let tool_calls = self
            .tool_calls
            .into_iter()
            .map(|call| ModelToolCall {
                arguments: parse_arguments(&call.arguments),
                id: call.id,
                name: call.name,
            })
            .collect();

        ModelCompletion {
            text: if self.text.is_empty() {
                None
            } else {
                Some(self.text)
            },
            tool_calls,
            usage: self.usage,
        }
    }
}

/// Parses provider-supplied tool arguments, keeping malformed JSON as a raw
/// string instead of failing the round.
pub(crate) fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
