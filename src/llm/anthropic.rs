use anthropic_ai_sdk::client::AnthropicClient;
use anthropic_ai_sdk::types::message::{
    ContentBlock, CreateMessageParams, CreateMessageResponse, Message, MessageClient, MessageError,
    RequiredMessageParams, Role, Tool, ToolChoice,
};
use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::llm::{
    ChatModel, ModelCompletion, ModelMessage, ModelRequest, ModelToolCall, ModelToolChoice,
    ModelUsage, ProviderParams,
};
use crate::response::ResponseSchema;

#[derive(Debug, Clone)]
/// Runtime configuration for [`AnthropicModel`].
pub struct AnthropicModelConfig {
    /// Anthropic API key.
    pub api_key: String,
    /// Model id (for example `claude-sonnet-4-5`).
    pub model: String,
    /// Anthropic API version header value.
    pub api_version: String,
    /// Optional base URL override for proxies or compatible endpoints.
    pub api_base_url: Option<String>,
    /// Maximum output tokens per call unless `max_tokens` is passed as a provider param.
    pub max_tokens: u32,
}

impl AnthropicModelConfig {
    /// Creates a config with sensible defaults.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_version: AnthropicClient::DEFAULT_API_VERSION.to_string(),
            api_base_url: None,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone)]
/// Anthropic provider adapter implementing [`ChatModel`].
///
/// Streaming falls back to the buffered default of [`ChatModel::stream`].
pub struct AnthropicModel {
    client: AnthropicClient,
    config: AnthropicModelConfig,
}

impl AnthropicModel {
    /// Creates a model adapter from explicit config.
    pub fn new(config: AnthropicModelConfig) -> Result<Self, ProviderError> {
        let mut builder =
            AnthropicClient::builder(config.api_key.clone(), config.api_version.clone());
        if let Some(url) = &config.api_base_url {
            builder = builder.with_api_base_url(url.clone());
        }

        let client = builder
            .build::<MessageError>()
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        Ok(Self { client, config })
    }

    /// Creates a model adapter using `ANTHROPIC_API_KEY` from the environment.
    ///
    /// `ANTHROPIC_BASE_URL` overrides the endpoint.
    pub fn from_env(model: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ProviderError::Config("ANTHROPIC_API_KEY is not set".to_string()))?;
        let mut config = AnthropicModelConfig::new(api_key, model);
        config.api_base_url = std::env::var("ANTHROPIC_BASE_URL").ok();
        Self::new(config)
    }
}

#[async_trait]
impl ChatModel for AnthropicModel {
    async fn invoke(&self, request: &ModelRequest<'_>) -> Result<ModelCompletion, ProviderError> {
        let (history, system) = to_anthropic_messages(request.messages);
        let system = with_response_instructions(system, request.response_format);
        let sampling = SamplingParams::from_params(request.params, self.config.max_tokens);

        let required = RequiredMessageParams {
            model: self.config.model.clone(),
            messages: history,
            max_tokens: sampling.max_tokens,
        };

        let mut params = CreateMessageParams::new(required).with_stream(false);

        if let Some(system_prompt) = system {
            params = params.with_system(system_prompt);
        }

        if let Some(temperature) = sampling.temperature {
            params = params.with_temperature(temperature);
        }

        if let Some(top_p) = sampling.top_p {
            params = params.with_top_p(top_p);
        }

        if !request.tools.is_empty() {
            let anthropic_tools = request
                .tools
                .iter()
                .map(|tool| Tool {
                    name: tool.name.clone(),
                    description: Some(tool.description.clone()),
                    input_schema: tool.parameters.clone(),
                })
                .collect::<Vec<_>>();

            params = params.with_tools(anthropic_tools);
            params = params.with_tool_choice(match request.tool_choice {
                ModelToolChoice::Auto => ToolChoice::Auto,
                ModelToolChoice::None => ToolChoice::None,
            });
        }

        let response = self
            .client
            .create_message(Some(&params))
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        Ok(normalize_response(&response))
    }
}

#[derive(Debug, PartialEq)]
struct SamplingParams {
    max_tokens: u32,
    temperature: Option<f32>,
    top_p: Option<f32>,
}

impl SamplingParams {
    fn from_params(params: &ProviderParams, default_max_tokens: u32) -> Self {
        for key in params.keys() {
            if !matches!(key.as_str(), "max_tokens" | "temperature" | "top_p") {
                tracing::debug!(param = %key, "anthropic adapter ignores provider param");
            }
        }

        Self {
            max_tokens: params
                .get("max_tokens")
                .and_then(Value::as_u64)
                .and_then(|value| u32::try_from(value).ok())
                .unwrap_or(default_max_tokens),
            temperature: params
                .get("temperature")
                .and_then(Value::as_f64)
                .map(|value| value as f32),
            top_p: params
                .get("top_p")
                .and_then(Value::as_f64)
                .map(|value| value as f32),
        }
    }
}

/// Anthropic has no native JSON-schema response mode, so the schema rides
/// along in the system prompt.
fn with_response_instructions(
    system: Option<String>,
    response_format: Option<&ResponseSchema>,
) -> Option<String> {
    let Some(schema) = response_format else {
        return system;
    };

    let instruction = format!(
        "Respond only with a single JSON object that conforms to this JSON schema, \
         without any surrounding prose:\n{}",
        schema.schema()
    );

    Some(match system {
        Some(system) => format!("{system}\n\n{instruction}"),
        None => instruction,
    })
}

fn to_anthropic_messages(messages: &[ModelMessage]) -> (Vec<Message>, Option<String>) {
    let mut system_lines = Vec::new();
    let mut anthropic_messages = Vec::new();

    // results answering one assistant turn share a single user message
    let mut tool_results = Vec::new();

    for message in messages {
        if !matches!(message, ModelMessage::ToolResult { .. }) {
            flush_tool_results(&mut anthropic_messages, &mut tool_results);
        }

        match message {
            ModelMessage::System(content) => system_lines.push(content.clone()),
            ModelMessage::User(content) => {
                anthropic_messages.push(Message::new_text(Role::User, content.clone()));
            }
            ModelMessage::Assistant {
                content,
                tool_calls,
            } => {
                let mut blocks = Vec::new();
                if let Some(content) = content {
                    if !content.is_empty() {
                        blocks.push(ContentBlock::Text {
                            text: content.clone(),
                        });
                    }
                }
                for call in tool_calls {
                    // tool_use input must be an object
                    let input = if call.arguments.is_object() {
                        call.arguments.clone()
                    } else {
                        serde_json::json!({})
                    };
                    blocks.push(ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input,
                    });
                }
                if !blocks.is_empty() {
                    anthropic_messages.push(Message::new_blocks(Role::Assistant, blocks));
                }
            }
            ModelMessage::ToolResult {
                tool_call_id,
                tool_name: _,
                content,
                is_error,
            } => {
                let rendered = if *is_error {
                    format!("Error: {content}")
                } else {
                    content.clone()
                };
                tool_results.push(ContentBlock::ToolResult {
                    tool_use_id: tool_call_id.clone(),
                    content: rendered,
                });
            }
        }
    }
    flush_tool_results(&mut anthropic_messages, &mut tool_results);

    let system = if system_lines.is_empty() {
        None
    } else {
        Some(system_lines.join("\n\n"))
    };

    (anthropic_messages, system)
}

fn flush_tool_results(messages: &mut Vec<Message>, tool_results: &mut Vec<ContentBlock>) {
    if !tool_results.is_empty() {
        messages.push(Message::new_blocks(Role::User, std::mem::take(tool_results)));
    }
}

fn normalize_response(response: &CreateMessageResponse) -> ModelCompletion {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in &response.content {
        match block {
            ContentBlock::Text { text } => text_parts.push(text.clone()),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ModelToolCall {
                id: id.clone(),
                name: name.clone(),
                arguments: input.clone(),
            }),
            _ => {}
        }
    }

    let text = if text_parts.is_empty() {
        None
    } else {
        Some(text_parts.join("\n"))
    };

    ModelCompletion {
        text,
        tool_calls,
        usage: Some(ModelUsage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        }),
    }
}
