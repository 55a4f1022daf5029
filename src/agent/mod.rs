use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use futures_util::future::join_all;
use futures_util::{Stream, StreamExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::context::{Context, Role, Turn};
use crate::error::{AgentError, SchemaError};
use crate::llm::{
    self, ChatModel, ChunkAssembler, ModelChunk, ModelCompletion, ModelMessage, ModelRequest,
    ModelToolCall, ModelToolChoice, ModelToolDefinition, ProviderParams,
};
use crate::response::{self, Completion, ResponseSchema};
use crate::template::PromptTemplate;
use crate::tools::{ToolRegistry, ToolSpec};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Upper bound on tool rounds per completion.
    pub max_tool_rounds: u32,
    pub tool_timeout: Option<Duration>,
    /// Run the calls of one assistant turn concurrently. Results are still
    /// recorded in request order.
    pub parallel_tool_calls: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 8,
            tool_timeout: None,
            parallel_tool_calls: false,
        }
    }
}

/// What the caller asks the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Sent verbatim as the user turn.
    Prompt(String),
    /// Rendered through the agent's prompt template.
    Data(Map<String, Value>),
}

impl From<&str> for Input {
    fn from(prompt: &str) -> Self {
        Self::Prompt(prompt.to_string())
    }
}

impl From<String> for Input {
    fn from(prompt: String) -> Self {
        Self::Prompt(prompt)
    }
}

impl From<Map<String, Value>> for Input {
    fn from(data: Map<String, Value>) -> Self {
        Self::Data(data)
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(data) => Self::Data(data),
            Value::String(prompt) => Self::Prompt(prompt),
            other => Self::Prompt(other.to_string()),
        }
    }
}

#[derive(Default)]
pub struct AgentBuilder {
    model_id: Option<String>,
    client: Option<Arc<dyn ChatModel>>,
    instructions: Option<String>,
    base_context: Context,
    tools: ToolRegistry,
    response_schema: Option<Result<ResponseSchema, SchemaError>>,
    prompt_template: Option<String>,
    params: ProviderParams,
    config: AgentConfig,
}

impl AgentBuilder {
    /// A `provider/model` identifier, resolved by [`llm::connect`] at build
    /// time unless a client is supplied.
    pub fn model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn client<M>(mut self, client: M) -> Self
    where
        M: ChatModel + 'static,
    {
        self.client = Some(Arc::new(client));
        self
    }

    pub fn shared_client(mut self, client: Arc<dyn ChatModel>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Turns placed after the instructions at the start of every new
    /// conversation, e.g. few-shot examples.
    pub fn context(mut self, context: Context) -> Self {
        self.base_context = context;
        self
    }

    /// Registers a tool. A tool with the same name is replaced in place.
    pub fn tool(mut self, tool: ToolSpec) -> Self {
        if let Some(previous) = self.tools.register(tool) {
            tracing::debug!(tool = previous.name(), "replacing registered tool");
        }
        self
    }

    pub fn tools(self, tools: impl IntoIterator<Item = ToolSpec>) -> Self {
        tools.into_iter().fold(self, Self::tool)
    }

    /// Requests structured output shaped like `T`.
    pub fn response_format<T: JsonSchema>(mut self) -> Self {
        self.response_schema = Some(ResponseSchema::of::<T>());
        self
    }

    pub fn response_schema(mut self, schema: ResponseSchema) -> Self {
        self.response_schema = Some(Ok(schema));
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = Some(template.into());
        self
    }

    /// Replaces all provider params.
    pub fn params(mut self, params: ProviderParams) -> Self {
        self.params = params;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_tool_rounds(mut self, max_tool_rounds: u32) -> Self {
        self.config.max_tool_rounds = max_tool_rounds;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = Some(timeout);
        self
    }

    pub fn parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.config.parallel_tool_calls = parallel;
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        let client = match (self.client, &self.model_id) {
            (Some(client), _) => client,
            (None, Some(model_id)) => llm::connect(model_id)?,
            (None, None) => {
                return Err(AgentError::Config(
                    "agent model must be specified via AgentBuilder::model(...)".to_string(),
                ));
            }
        };

        self.base_context.validate()?;
        if self.instructions.is_some()
            && self.base_context.turns().first().is_some_and(|turn| turn.role == Role::System)
        {
            return Err(AgentError::Config(
                "base context starts with a system turn; instructions would add a second"
                    .to_string(),
            ));
        }

        let response_schema = self.response_schema.transpose()?;
        let prompt_template = self
            .prompt_template
            .map(PromptTemplate::parse)
            .transpose()?;

        let tool_definitions = self.tools.definitions();

        Ok(Agent {
            model_id: self.model_id,
            client,
            instructions: self.instructions,
            base_context: Arc::new(self.base_context),
            tools: Arc::new(self.tools),
            tool_definitions: Arc::from(tool_definitions),
            response_schema,
            prompt_template,
            params: Arc::new(self.params),
            config: self.config,
        })
    }
}

/// An immutable agent configuration. Cloning is cheap and clones can run
/// completions concurrently.
#[derive(Clone)]
pub struct Agent {
    model_id: Option<String>,
    client: Arc<dyn ChatModel>,
    instructions: Option<String>,
    base_context: Arc<Context>,
    tools: Arc<ToolRegistry>,
    tool_definitions: Arc<[ModelToolDefinition]>,
    response_schema: Option<ResponseSchema>,
    prompt_template: Option<PromptTemplate>,
    params: Arc<ProviderParams>,
    config: AgentConfig,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("model_id", &self.model_id)
            .field("instructions", &self.instructions)
            .field("base_context", &self.base_context)
            .field("tools", &self.tools.names())
            .field("response_schema", &self.response_schema)
            .field("prompt_template", &self.prompt_template)
            .field("params", &self.params)
            .field("config", &self.config)
            .finish()
    }
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    pub fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn base_context(&self) -> &Context {
        &self.base_context
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn response_schema(&self) -> Option<&ResponseSchema> {
        self.response_schema.as_ref()
    }

    pub fn prompt_template(&self) -> Option<&PromptTemplate> {
        self.prompt_template.as_ref()
    }

    pub fn params(&self) -> &ProviderParams {
        &self.params
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Single-turn completion. Returns text, or a validated value when the
    /// agent has a response schema.
    pub async fn complete(&self, input: impl Into<Input>) -> Result<Completion, AgentError> {
        let mut context = self.start(input.into())?;
        let raw = self.run(&mut context).await?;
        response::coerce(raw, self.response_schema.as_ref())
    }

    /// Like [`complete`](Self::complete), deserializing the answer into `T`.
    pub async fn complete_as<T: DeserializeOwned>(
        &self,
        input: impl Into<Input>,
    ) -> Result<T, AgentError> {
        let mut context = self.start(input.into())?;
        let raw = self.run(&mut context).await?;
        response::coerce_as(raw, self.response_schema.as_ref())
    }

    /// Continues `context` with one user turn and returns the extended copy.
    /// `context` itself is never modified.
    pub async fn complete_with_context(
        &self,
        context: &Context,
        input: impl Into<Input>,
    ) -> Result<Context, AgentError> {
        context.validate()?;
        let prompt = self.render(input.into())?;

        let mut context = context.clone();
        self.seed(&mut context);
        context.push(Turn::user(prompt));

        let raw = self.run(&mut context).await?;
        if let Some(schema) = &self.response_schema {
            response::coerce(raw, Some(schema))?;
        }
        Ok(context)
    }

    /// Streams the final answer as text deltas. Tool rounds run between
    /// model turns and are never surfaced.
    ///
    /// Without tools every delta is forwarded as it arrives. With tools a
    /// turn's text is held until the turn ends, and released only when the
    /// turn requested no tool calls.
    pub fn complete_stream(
        &self,
        input: impl Into<Input>,
    ) -> impl Stream<Item = Result<String, AgentError>> + '_ {
        let input = input.into();

        try_stream! {
            let mut context = self.start(input)?;
            let tool_choice = self.tool_choice();
            let live = self.tools.is_empty();
            let mut rounds = 0;

            loop {
                let messages = context.to_messages();
                let request = self.request(&messages, &tool_choice);
                tracing::debug!(
                    round = rounds,
                    messages = messages.len(),
                    "streaming model turn"
                );

                let mut chunks = self.client.stream(&request).await?;
                let mut assembler = ChunkAssembler::default();
                let mut held = Vec::new();

                while let Some(chunk) = chunks.next().await {
                    let chunk = chunk?;
                    if let ModelChunk::Text(delta) = &chunk {
                        if live && !delta.is_empty() {
                            yield delta.clone();
                        } else if !delta.is_empty() {
                            held.push(delta.clone());
                        }
                    }
                    assembler.push(chunk);
                }

                let completion = assembler.finish();
                if self.advance(&mut context, completion, &mut rounds).await?.is_some() {
                    for delta in held {
                        yield delta;
                    }
                    break;
                }
            }
        }
    }

    fn render(&self, input: Input) -> Result<String, AgentError> {
        match input {
            Input::Prompt(prompt) => Ok(prompt),
            Input::Data(data) => {
                let template = self.prompt_template.as_ref().ok_or_else(|| {
                    AgentError::Config(
                        "structured input requires a prompt template".to_string(),
                    )
                })?;
                Ok(template.render(&data)?)
            }
        }
    }

    /// A fresh context: the instructions turn, the base context and one user
    /// turn.
    fn start(&self, input: Input) -> Result<Context, AgentError> {
        let prompt = self.render(input)?;
        let mut context = Context::new();
        self.seed(&mut context);
        context.push(Turn::user(prompt));
        Ok(context)
    }

    fn seed(&self, context: &mut Context) {
        if context.is_empty() {
            if let Some(instructions) = &self.instructions {
                context.push(Turn::system(instructions.clone()));
            }
            context.extend(self.base_context.iter().cloned());
        }
    }

    fn tool_choice(&self) -> ModelToolChoice {
        if self.tools.is_empty() {
            ModelToolChoice::None
        } else {
            ModelToolChoice::Auto
        }
    }

    fn request<'a>(
        &'a self,
        messages: &'a [ModelMessage],
        tool_choice: &'a ModelToolChoice,
    ) -> ModelRequest<'a> {
        ModelRequest {
            messages,
            tools: &self.tool_definitions,
            tool_choice,
            response_format: self.response_schema.as_ref(),
            params: &self.params,
        }
    }

    /// Drives the tool loop to a final answer with buffered model turns.
    async fn run(&self, context: &mut Context) -> Result<String, AgentError> {
        let tool_choice = self.tool_choice();
        let mut rounds = 0;

        loop {
            let messages = context.to_messages();
            let request = self.request(&messages, &tool_choice);
            tracing::debug!(round = rounds, messages = messages.len(), "requesting model turn");

            let completion = self.client.invoke(&request).await?;
            if let Some(answer) = self.advance(context, completion, &mut rounds).await? {
                return Ok(answer);
            }
        }
    }

    /// Records one model turn. Returns the answer when the turn is final,
    /// otherwise runs the requested tools and returns `None`.
    async fn advance(
        &self,
        context: &mut Context,
        completion: ModelCompletion,
        rounds: &mut u32,
    ) -> Result<Option<String>, AgentError> {
        if let Some(usage) = &completion.usage {
            tracing::debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "model usage"
            );
        }

        if completion.tool_calls.is_empty() {
            let answer = completion.text.unwrap_or_default();
            context.push(Turn::assistant(answer.clone()));
            return Ok(Some(answer));
        }

        if *rounds >= self.config.max_tool_rounds {
            tracing::warn!(
                max_rounds = self.config.max_tool_rounds,
                "model kept requesting tools after the round limit"
            );
            return Err(AgentError::ToolLoopExceeded {
                max_rounds: self.config.max_tool_rounds,
            });
        }
        *rounds += 1;

        let calls = assign_call_ids(completion.tool_calls, *rounds);
        let results = self.execute_tools(&calls).await;
        context.push(Turn::tool_request(completion.text, calls));
        context.extend(results);
        Ok(None)
    }

    async fn execute_tools(&self, calls: &[ModelToolCall]) -> Vec<Turn> {
        if self.config.parallel_tool_calls {
            return join_all(calls.iter().map(|call| self.execute_tool(call))).await;
        }

        let mut turns = Vec::with_capacity(calls.len());
        for call in calls {
            turns.push(self.execute_tool(call).await);
        }
        turns
    }

    async fn execute_tool(&self, call: &ModelToolCall) -> Turn {
        tracing::debug!(tool = %call.name, call_id = %call.id, "executing tool");

        match self.tools.invoke(call, self.config.tool_timeout).await {
            Ok(output) => Turn::tool_result(call, output, false),
            Err(err) => {
                tracing::warn!(
                    tool = %call.name,
                    call_id = %call.id,
                    error = %err,
                    "tool call failed"
                );
                Turn::tool_result(call, err.to_string(), true)
            }
        }
    }
}

/// Gives every call of one turn a distinct id. Providers occasionally omit
/// ids or repeat one, and each tool turn must answer exactly one call.
fn assign_call_ids(calls: Vec<ModelToolCall>, round: u32) -> Vec<ModelToolCall> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .enumerate()
        .map(|(index, mut call)| {
            if call.id.is_empty() || seen.contains(&call.id) {
                let mut id = format!("call_{round}_{index}");
                while seen.contains(&id) {
                    id.push('_');
                }
                call.id = id;
            }
            seen.insert(call.id.clone());
            call
        })
        .collect()
}

pub async fn complete(agent: &Agent, input: impl Into<Input>) -> Result<Completion, AgentError> {
    agent.complete(input).await
}

pub fn complete_stream(
    agent: &Agent,
    input: impl Into<Input>,
) -> impl Stream<Item = Result<String, AgentError>> + '_ {
    agent.complete_stream(input)
}

pub async fn complete_with_context(
    agent: &Agent,
    context: &Context,
    input: impl Into<Input>,
) -> Result<Context, AgentError> {
    agent.complete_with_context(context, input).await
}
