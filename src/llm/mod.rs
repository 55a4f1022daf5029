mod anthropic;
mod openai;
mod stream;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProviderError;
use crate::response::ResponseSchema;

pub use anthropic::{AnthropicModel, AnthropicModelConfig};
pub use openai::{OpenAiCompatModel, OpenAiCompatModelConfig};
pub use stream::ChunkAssembler;

/// Passthrough options (temperature, max_tokens, ...) forwarded to the provider.
pub type ProviderParams = Map<String, Value>;

/// Incremental model output, see [`ChatModel::stream`].
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelChunk, ProviderError>> + Send>>;

#[derive(Clone, Debug, PartialEq)]
pub enum ModelMessage {
    System(String),
    User(String),
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ModelToolCall>,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
}

/// A tool invocation requested by the model.
///
/// `arguments` is whatever the provider produced. When the provider emitted
/// text that is not valid JSON it is kept as a JSON string so the tool
/// invoker can attempt to coerce it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug)]
pub struct ModelToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelToolChoice {
    Auto,
    None,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelCompletion {
    pub text: Option<String>,
    pub tool_calls: Vec<ModelToolCall>,
    pub usage: Option<ModelUsage>,
}

impl ModelCompletion {
    /// Re-expresses a buffered completion as the chunks a streaming provider
    /// would have produced for it. Tool-call chunks precede text.
    pub fn into_chunks(self) -> Vec<ModelChunk> {
        let mut chunks = Vec::new();
        for (index, call) in self.tool_calls.into_iter().enumerate() {
            chunks.push(ModelChunk::ToolCall {
                index,
                id: Some(call.id),
                name: Some(call.name),
                arguments: call.arguments.to_string(),
            });
        }
        if let Some(text) = self.text.filter(|text| !text.is_empty()) {
            chunks.push(ModelChunk::Text(text));
        }
        if let Some(usage) = self.usage {
            chunks.push(ModelChunk::Usage(usage));
        }
        chunks
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One piece of a streamed model turn.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelChunk {
    Text(String),
    /// A fragment of the tool call at `index`. `id` and `name` usually arrive
    /// on the first fragment only; `arguments` fragments concatenate.
    ToolCall {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    Usage(ModelUsage),
}

/// Everything a provider needs for one model round.
#[derive(Clone, Copy, Debug)]
pub struct ModelRequest<'a> {
    pub messages: &'a [ModelMessage],
    pub tools: &'a [ModelToolDefinition],
    pub tool_choice: &'a ModelToolChoice,
    pub response_format: Option<&'a ResponseSchema>,
    pub params: &'a ProviderParams,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn invoke(&self, request: &ModelRequest<'_>) -> Result<ModelCompletion, ProviderError>;

    /// Streams one model turn. Concatenating the chunks must reconstruct the
    /// completion `invoke` would have returned, tool calls included.
    ///
    /// Providers without native streaming fall back to a single buffered
    /// completion.
    async fn stream(&self, request: &ModelRequest<'_>) -> Result<ModelStream, ProviderError> {
        let completion = self.invoke(request).await?;
        let chunks = completion
            .into_chunks()
            .into_iter()
            .map(Ok::<ModelChunk, ProviderError>);
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

/// Splits a `provider/model` identifier.
pub fn parse_model_id(model_id: &str) -> Result<(&str, &str), ProviderError> {
    match model_id.split_once('/') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider, model))
        }
        _ => Err(ProviderError::Config(format!(
            "model id '{model_id}' must have the form '<provider>/<model>'"
        ))),
    }
}

/// Resolves a `provider/model` identifier into a provider adapter.
///
/// Variables from a `.env` file in the working directory are loaded first;
/// variables already present in the environment win.
pub fn connect(model_id: &str) -> Result<Arc<dyn ChatModel>, ProviderError> {
    let _ = dotenvy::dotenv();

    let (provider, model) = parse_model_id(model_id)?;
    let provider = provider.to_ascii_lowercase();

    tracing::debug!(%provider, %model, "connecting model client");

    if provider == "anthropic" {
        return Ok(Arc::new(AnthropicModel::from_env(model)?));
    }

    Ok(Arc::new(OpenAiCompatModel::from_env(&provider, model)?))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_model_id_splits_on_first_slash() {
        let (provider, model) = parse_model_id("openrouter/meta-llama/llama-3-8b").expect("valid");
        assert_eq!(provider, "openrouter");
        assert_eq!(model, "meta-llama/llama-3-8b");
    }

    #[test]
    fn parse_model_id_rejects_bare_names() {
        assert!(parse_model_id("gpt-4o-mini").is_err());
        assert!(parse_model_id("/gpt-4o-mini").is_err());
        assert!(parse_model_id("openai/").is_err());
    }

    #[test]
    fn connect_rejects_unknown_provider() {
        let err = connect("nonesuch/model").err().expect("should fail");
        assert!(err.to_string().contains("unsupported provider"));
    }

    #[test]
    fn into_chunks_reassembles_to_same_completion() {
        let completion = ModelCompletion {
            text: Some("checking".to_string()),
            tool_calls: vec![ModelToolCall {
                id: "call_1".to_string(),
                name: "lookup".to_string(),
                arguments: json!({"q": "rust"}),
            }],
            usage: Some(ModelUsage {
                input_tokens: 3,
                output_tokens: 4,
            }),
        };

        let chunks = completion.clone().into_chunks();
        assert!(matches!(chunks[0], ModelChunk::ToolCall { index: 0, .. }));
        assert!(matches!(chunks[1], ModelChunk::Text(_)));

        let mut assembler = ChunkAssembler::default();
        for chunk in chunks {
            assembler.push(chunk);
        }

        assert_eq!(assembler.finish(), completion);
    }
}
