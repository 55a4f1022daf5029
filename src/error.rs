use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by tool handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("tool schema must be a JSON object")]
    SchemaNotObject,
    #[error("tool schema must declare type=object")]
    RootTypeMustBeObject,
    #[error("required must be an array of strings")]
    InvalidRequired,
    #[error("invalid response schema: {0}")]
    InvalidResponseSchema(String),
}

/// A tool call that could not produce a normal result.
///
/// These never abort a completion: the engine renders them into an error
/// tool turn so the model can recover.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool '{0}'.")]
    UnknownTool(String),
    #[error("invalid tool arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },
    #[error("tool '{tool}' timed out after {after:?}")]
    Timeout { tool: String, after: Duration },
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider response invalid: {0}")]
    Response(String),
    #[error("provider configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unbalanced '{brace}' at byte {position} in prompt template")]
    Unbalanced { brace: char, position: usize },
    #[error("empty placeholder at byte {position} in prompt template")]
    EmptyPlaceholder { position: usize },
    #[error("prompt template variable '{0}' was not provided")]
    MissingVariable(String),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("tool loop exceeded {max_rounds} rounds")]
    ToolLoopExceeded { max_rounds: u32 },
    #[error("response does not match the requested format: {}", diagnostics.join("; "))]
    ResponseFormat {
        raw: String,
        diagnostics: Vec<String>,
    },
    #[error("invalid conversation context: {0}")]
    InvalidContext(String),
    #[error("agent configuration error: {0}")]
    Config(String),
}
