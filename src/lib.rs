//! Reusable LLM agents over a multi-provider model client.
//!
//! - `Agent` built once via `AgentBuilder`, shared across completions
//! - `complete`, `complete_as`, `complete_stream` and `complete_with_context`
//! - Tool registry with schema-described tools and argument coercion
//! - Structured output validated against a JSON schema
//! - Anthropic and OpenAI-compatible adapters behind `ChatModel`

pub mod agent;
pub mod context;
pub mod error;
pub mod llm;
pub mod response;
pub mod template;
pub mod tools;

pub use agent::{
    Agent, AgentBuilder, AgentConfig, Input, complete, complete_stream, complete_with_context,
};
pub use context::{Context, Role, Turn};
pub use error::{AgentError, BoxError, ProviderError, SchemaError, TemplateError, ToolError};
pub use llm::{
    AnthropicModel, AnthropicModelConfig, ChatModel, ModelChunk, ModelCompletion, ModelMessage,
    ModelRequest, ModelStream, ModelToolCall, ModelToolChoice, ModelToolDefinition,
    OpenAiCompatModel, OpenAiCompatModelConfig, ProviderParams, connect,
};
pub use response::{Completion, ResponseSchema};
pub use template::PromptTemplate;
pub use tools::{ParamType, ToolParam, ToolRegistry, ToolSpec};
