use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ProviderError;
use crate::llm::stream::parse_arguments;
use crate::llm::{
    ChatModel, ModelChunk, ModelCompletion, ModelMessage, ModelRequest, ModelStream,
    ModelToolCall, ModelToolChoice, ModelUsage, ProviderParams,
};

const EMPTY_USER_CONTENT_FALLBACK: &str = " ";

struct ProviderProfile {
    name: &'static str,
    aliases: &'static [&'static str],
    base_url: &'static str,
    key_vars: &'static [&'static str],
    requires_key: bool,
}

const PROVIDERS: &[ProviderProfile] = &[
    ProviderProfile {
        name: "openai",
        aliases: &[],
        base_url: "https://api.openai.com/v1",
        key_vars: &["OPENAI_API_KEY"],
        requires_key: true,
    },
    ProviderProfile {
        name: "xai",
        aliases: &["grok"],
        base_url: "https://api.x.ai/v1",
        key_vars: &["XAI_API_KEY", "GROK_API_KEY"],
        requires_key: true,
    },
    ProviderProfile {
        name: "groq",
        aliases: &[],
        base_url: "https://api.groq.com/openai/v1",
        key_vars: &["GROQ_API_KEY"],
        requires_key: true,
    },
    ProviderProfile {
        name: "mistral",
        aliases: &[],
        base_url: "https://api.mistral.ai/v1",
        key_vars: &["MISTRAL_API_KEY"],
        requires_key: true,
    },
    ProviderProfile {
        name: "deepseek",
        aliases: &[],
        base_url: "https://api.deepseek.com/v1",
        key_vars: &["DEEPSEEK_API_KEY"],
        requires_key: true,
    },
    ProviderProfile {
        name: "openrouter",
        aliases: &[],
        base_url: "https://openrouter.ai/api/v1",
        key_vars: &["OPENROUTER_API_KEY"],
        requires_key: true,
    },
    ProviderProfile {
        name: "ollama",
        aliases: &[],
        base_url: "http://localhost:11434/v1",
        key_vars: &["OLLAMA_API_KEY"],
        requires_key: false,
    },
];

fn profile(provider: &str) -> Option<&'static ProviderProfile> {
    PROVIDERS
        .iter()
        .find(|profile| profile.name == provider || profile.aliases.contains(&provider))
}

#[derive(Debug, Clone)]
/// Runtime configuration for [`OpenAiCompatModel`].
pub struct OpenAiCompatModelConfig {
    /// Provider name, used in error messages.
    pub provider: String,
    /// Bearer token; `None` for local servers that need no auth.
    pub api_key: Option<String>,
    /// Model id as the provider knows it (for example `gpt-4o-mini`).
    pub model: String,
    /// Base URL up to and excluding `/chat/completions`.
    pub api_base_url: String,
}

impl OpenAiCompatModelConfig {
    pub fn new(
        provider: impl Into<String>,
        api_base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            api_key: None,
            model: model.into(),
            api_base_url: api_base_url.into(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// Adapter for providers speaking the OpenAI chat-completions protocol.
#[derive(Debug, Clone)]
pub struct OpenAiCompatModel {
    client: Client,
    config: OpenAiCompatModelConfig,
}

impl OpenAiCompatModel {
    pub fn new(config: OpenAiCompatModelConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .build()
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        Ok(Self { client, config })
    }

    /// Builds an adapter for a known provider from its environment variables.
    ///
    /// `<PROVIDER>_BASE_URL` overrides the default endpoint.
    pub fn from_env(provider: &str, model: impl Into<String>) -> Result<Self, ProviderError> {
        let profile = profile(provider).ok_or_else(|| {
            ProviderError::Config(format!("unsupported provider '{provider}'"))
        })?;

        let api_key = profile
            .key_vars
            .iter()
            .find_map(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty());

        if api_key.is_none() && profile.requires_key {
            return Err(ProviderError::Config(format!(
                "{} is not set",
                profile.key_vars.join(" or ")
            )));
        }

        let base_url_var = format!("{}_BASE_URL", profile.name.to_ascii_uppercase());
        let api_base_url =
            std::env::var(base_url_var).unwrap_or_else(|_| profile.base_url.to_string());

        let mut config = OpenAiCompatModelConfig::new(profile.name, api_base_url, model);
        config.api_key = api_key;
        Self::new(config)
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_base_url.trim_end_matches('/')
        )
    }

    async fn send(&self, body: &ChatCompletionRequest) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self.client.post(self.endpoint()).json(body);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Request(
                extract_api_error(&self.config.provider, response).await,
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatModel {
    async fn invoke(&self, request: &ModelRequest<'_>) -> Result<ModelCompletion, ProviderError> {
        let body = build_request(request, &self.config, false);
        let response = self.send(&body).await?;

        let payload = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|err| ProviderError::Response(err.to_string()))?;

        normalize_response(&self.config.provider, payload)
    }

    async fn stream(&self, request: &ModelRequest<'_>) -> Result<ModelStream, ProviderError> {
        let body = build_request(request, &self.config, true);
        let response = self.send(&body).await?;
        Ok(Box::pin(sse_chunks(response.bytes_stream())))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<RequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinitionPayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(flatten)]
    params: ProviderParams,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum RequestMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCallPayload>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct ToolDefinitionPayload {
    #[serde(rename = "type")]
    type_: String,
    function: ToolFunctionDefinition,
}

#[derive(Debug, Serialize)]
struct ToolFunctionDefinition {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ToolCallPayload {
    id: String,
    #[serde(rename = "type")]
    type_: String,
    function: ToolCallFunction,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<AssistantMessage>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallPayload>>,
}

#[derive(Debug, Deserialize)]
struct UsagePayload {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<Value>,
}

fn build_request(
    request: &ModelRequest<'_>,
    config: &OpenAiCompatModelConfig,
    stream: bool,
) -> ChatCompletionRequest {
    let messages = ensure_non_empty_messages(to_request_messages(request.messages));

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(
            request
                .tools
                .iter()
                .map(|tool| ToolDefinitionPayload {
                    type_: "function".to_string(),
                    function: ToolFunctionDefinition {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect::<Vec<_>>(),
        )
    };

    let tool_choice = if request.tools.is_empty() {
        None
    } else {
        Some(match request.tool_choice {
            ModelToolChoice::Auto => "auto",
            ModelToolChoice::None => "none",
        })
    };

    let response_format = request.response_format.map(|schema| {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": schema.name(),
                "schema": schema.schema(),
                "strict": false,
            }
        })
    });

    ChatCompletionRequest {
        model: config.model.clone(),
        messages,
        tools,
        tool_choice,
        response_format,
        stream,
        params: request.params.clone(),
    }
}

fn to_request_messages(messages: &[ModelMessage]) -> Vec<RequestMessage> {
    let mut request_messages = Vec::new();

    for message in messages {
        match message {
            ModelMessage::System(content) => {
                if content.is_empty() {
                    continue;
                }
                request_messages.push(RequestMessage::System {
                    content: content.clone(),
                });
            }
            ModelMessage::User(content) => {
                if content.is_empty() {
                    continue;
                }
                request_messages.push(RequestMessage::User {
                    content: content.clone(),
                });
            }
            ModelMessage::Assistant {
                content,
                tool_calls,
            } => {
                let serialized_tool_calls = tool_calls
                    .iter()
                    .map(|tool_call| ToolCallPayload {
                        id: tool_call.id.clone(),
                        type_: "function".to_string(),
                        function: ToolCallFunction {
                            name: tool_call.name.clone(),
                            arguments: match &tool_call.arguments {
                                Value::String(raw) => raw.clone(),
                                other => other.to_string(),
                            },
                        },
                    })
                    .collect::<Vec<_>>();

                let assistant_content = content.as_ref().filter(|text| !text.is_empty()).cloned();
                if assistant_content.is_none() && serialized_tool_calls.is_empty() {
                    continue;
                }

                request_messages.push(RequestMessage::Assistant {
                    content: assistant_content,
                    tool_calls: if serialized_tool_calls.is_empty() {
                        None
                    } else {
                        Some(serialized_tool_calls)
                    },
                });
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

                request_messages.push(RequestMessage::Tool {
                    tool_call_id: tool_call_id.clone(),
                    content: rendered,
                });
            }
        }
    }

    request_messages
}

fn ensure_non_empty_messages(mut messages: Vec<RequestMessage>) -> Vec<RequestMessage> {
    if messages.is_empty() {
        messages.push(RequestMessage::User {
            content: EMPTY_USER_CONTENT_FALLBACK.to_string(),
        });
    }

    messages
}

fn normalize_usage(usage: UsagePayload) -> ModelUsage {
    ModelUsage {
        input_tokens: usage.prompt_tokens.unwrap_or(0),
        output_tokens: usage.completion_tokens.unwrap_or(0),
    }
}

fn normalize_response(
    provider: &str,
    response: ChatCompletionResponse,
) -> Result<ModelCompletion, ProviderError> {
    let choice = response.choices.into_iter().next().ok_or_else(|| {
        ProviderError::Response(format!("{provider} response missing choices"))
    })?;

    let message = choice.message.ok_or_else(|| {
        ProviderError::Response(format!("{provider} response missing choice message"))
    })?;

    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tool_call| ModelToolCall {
            id: tool_call.id,
            arguments: parse_arguments(&tool_call.function.arguments),
            name: tool_call.function.name,
        })
        .collect();

    Ok(ModelCompletion {
        text: message.content.filter(|text| !text.is_empty()),
        tool_calls,
        usage: response.usage.map(normalize_usage),
    })
}

fn normalize_chunk(chunk: ChatCompletionChunk) -> Vec<ModelChunk> {
    let mut chunks = Vec::new();

    if let Some(delta) = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
    {
        if let Some(content) = delta.content.filter(|text| !text.is_empty()) {
            chunks.push(ModelChunk::Text(content));
        }
        for call in delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match call.function {
                Some(function) => (function.name, function.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            chunks.push(ModelChunk::ToolCall {
                index: call.index,
                id: call.id,
                name,
                arguments,
            });
        }
    }

    if let Some(usage) = chunk.usage {
        chunks.push(ModelChunk::Usage(normalize_usage(usage)));
    }

    chunks
}

/// Decodes a server-sent-events body into model chunks.
fn sse_chunks<S, B>(bytes: S) -> impl Stream<Item = Result<ModelChunk, ProviderError>> + Send
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(piece) = bytes.next().await {
            let piece = piece.map_err(|err| ProviderError::Request(err.to_string()))?;
            buffer.extend_from_slice(piece.as_ref());

            while let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
                let line = buffer.drain(..=newline).collect::<Vec<u8>>();
                let line = String::from_utf8_lossy(&line);
                let Some(data) = line.trim().strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    return;
                }

                let chunk = serde_json::from_str::<ChatCompletionChunk>(data).map_err(|err| {
                    ProviderError::Response(format!("invalid stream chunk: {err}"))
                })?;
                for model_chunk in normalize_chunk(chunk) {
                    yield model_chunk;
                }
            }
        }
    }
}

async fn extract_api_error(provider: &str, response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if let Ok(parsed) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = parsed
            .error
            .code
            .map(|value| match value {
                Value::String(value) => value,
                other => other.to_string(),
            })
            .unwrap_or_else(|| status.as_u16().to_string());
        let error_type = parsed
            .error
            .type_
            .unwrap_or_else(|| status.to_string().to_uppercase());
        let message = parsed
            .error
            .message
            .unwrap_or_else(|| format!("unknown {provider} api error"));

        return format!("{provider} api error {code} {error_type}: {message}");
    }

    if body.is_empty() {
        format!("{provider} api request failed ({status})")
    } else {
        format!("{provider} api request failed ({status}): {body}")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::llm::ModelToolDefinition;
    use crate::response::ResponseSchema;

    fn tool_definition() -> ModelToolDefinition {
        ModelToolDefinition {
            name: "lookup".to_string(),
            description: "Look up something".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"}
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }

    fn config() -> OpenAiCompatModelConfig {
        OpenAiCompatModelConfig::new("openai", "https://api.openai.com/v1", "gpt-4o-mini")
            .with_api_key("key")
    }

    #[test]
    fn build_request_serializes_messages_tools_params_and_tool_choice() {
        let messages = vec![
            ModelMessage::System("You are helpful".to_string()),
            ModelMessage::User("Find docs".to_string()),
            ModelMessage::Assistant {
                content: Some("Calling tool".to_string()),
                tool_calls: vec![ModelToolCall {
                    id: "call_1".to_string(),
                    name: "lookup".to_string(),
                    arguments: json!({"query": "rust"}),
                }],
            },
            ModelMessage::ToolResult {
                tool_call_id: "call_1".to_string(),
                tool_name: "lookup".to_string(),
                content: "{\"result\":\"ok\"}".to_string(),
                is_error: false,
            },
        ];

        let mut params = ProviderParams::new();
        params.insert("temperature".to_string(), json!(0.2));
        params.insert("max_tokens".to_string(), json!(512));

        let tools = [tool_definition()];
        let tool_choice = ModelToolChoice::Auto;
        let request = ModelRequest {
            messages: &messages,
            tools: &tools,
            tool_choice: &tool_choice,
            response_format: None,
            params: &params,
        };

        let value = serde_json::to_value(build_request(&request, &config(), false))
            .expect("serializes");

        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][0]["content"], "You are helpful");
        assert_eq!(value["messages"][2]["role"], "assistant");
        assert_eq!(
            value["messages"][2]["tool_calls"][0]["function"]["arguments"],
            "{\"query\":\"rust\"}"
        );
        assert_eq!(value["messages"][3]["role"], "tool");
        assert_eq!(value["messages"][3]["tool_call_id"], "call_1");
        assert_eq!(value["tools"][0]["function"]["name"], "lookup");
        assert_eq!(value["tool_choice"], "auto");
        assert_eq!(value["max_tokens"], 512);
        assert!((value["temperature"].as_f64().unwrap_or_default() - 0.2).abs() < 1e-6);
        assert!(value.get("stream").is_none());
        assert!(value.get("response_format").is_none());
    }

    #[test]
    fn build_request_adds_fallback_content_and_response_format() {
        let messages = vec![ModelMessage::User(String::new())];
        let schema = ResponseSchema::new(
            "user",
            json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }),
        )
        .expect("schema compiles");
        let params = ProviderParams::new();
        let request = ModelRequest {
            messages: &messages,
            tools: &[],
            tool_choice: &ModelToolChoice::None,
            response_format: Some(&schema),
            params: &params,
        };

        let value = serde_json::to_value(build_request(&request, &config(), true))
            .expect("serializes");

        assert_eq!(value["messages"][0]["content"], " ");
        assert!(value.get("tools").is_none());
        assert!(value.get("tool_choice").is_none());
        assert_eq!(value["stream"], true);
        assert_eq!(value["response_format"]["type"], "json_schema");
        assert_eq!(value["response_format"]["json_schema"]["name"], "user");
    }

    #[test]
    fn normalize_response_extracts_text_tool_calls_and_usage() {
        let response = ChatCompletionResponse {
            choices: vec![Choice {
                message: Some(AssistantMessage {
                    content: Some("answer".to_string()),
                    tool_calls: Some(vec![ToolCallPayload {
                        id: "call_x".to_string(),
                        type_: "function".to_string(),
                        function: ToolCallFunction {
                            name: "lookup".to_string(),
                            arguments: "{\"q\":\"rust\"}".to_string(),
                        },
                    }]),
                }),
            }],
            usage: Some(UsagePayload {
                prompt_tokens: Some(11),
                completion_tokens: Some(7),
            }),
        };

        let completion = normalize_response("openai", response).expect("response normalizes");

        assert_eq!(completion.text.as_deref(), Some("answer"));
        assert_eq!(completion.tool_calls[0].id, "call_x");
        assert_eq!(completion.tool_calls[0].arguments, json!({"q": "rust"}));
        assert_eq!(
            completion.usage,
            Some(ModelUsage {
                input_tokens: 11,
                output_tokens: 7,
            })
        );
    }

    #[test]
    fn normalize_response_requires_choices() {
        let err = normalize_response(
            "xai",
            ChatCompletionResponse {
                choices: Vec::new(),
                usage: None,
            },
        )
        .expect_err("should fail");

        assert!(err.to_string().contains("xai response missing choices"));
    }

    #[test]
    fn normalize_response_keeps_invalid_tool_arguments_raw() {
        let completion = normalize_response(
            "openai",
            ChatCompletionResponse {
                choices: vec![Choice {
                    message: Some(AssistantMessage {
                        content: None,
                        tool_calls: Some(vec![ToolCallPayload {
                            id: "call_x".to_string(),
                            type_: "function".to_string(),
                            function: ToolCallFunction {
                                name: "lookup".to_string(),
                                arguments: "{not json}".to_string(),
                            },
                        }]),
                    }),
                }],
                usage: None,
            },
        )
        .expect("response normalizes");

        assert_eq!(
            completion.tool_calls[0].arguments,
            Value::String("{not json}".to_string())
        );
    }

    #[tokio::test]
    async fn sse_chunks_decode_text_and_tool_call_deltas_across_reads() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",",
            "\"function\":{\"name\":\"add\",\"arguments\":\"{\\\"a\\\":\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,",
            "\"function\":{\"arguments\":\"2}\"}}]}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        );
        let bytes = body.as_bytes();
        let (first, second) = bytes.split_at(37);
        let source = futures_util::stream::iter(vec![
            Ok::<_, reqwest::Error>(first.to_vec()),
            Ok(second.to_vec()),
        ]);

        let chunks = sse_chunks(source)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .expect("chunks decode");

        assert_eq!(chunks[0], ModelChunk::Text("Hel".to_string()));
        assert_eq!(chunks[1], ModelChunk::Text("lo".to_string()));
        assert_eq!(chunks.len(), 4);

        let mut assembler = crate::llm::ChunkAssembler::default();
        for chunk in chunks {
            assembler.push(chunk);
        }
        let completion = assembler.finish();
        assert_eq!(completion.text.as_deref(), Some("Hello"));
        assert_eq!(completion.tool_calls[0].name, "add");
        assert_eq!(completion.tool_calls[0].arguments, json!({"a": 2}));
    }

    #[test]
    fn from_env_rejects_unknown_provider() {
        let err = OpenAiCompatModel::from_env("nonesuch", "m").expect_err("should fail");
        assert!(err.to_string().contains("unsupported provider 'nonesuch'"));
    }
}
