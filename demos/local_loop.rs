use std::collections::VecDeque;
use std::error::Error;
use std::sync::Mutex;

use async_trait::async_trait;
use fllume::{
    Agent, BoxError, ChatModel, Context, ModelCompletion, ModelRequest, ModelToolCall,
    ProviderError, ToolSpec,
};
use futures_util::StreamExt;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

#[derive(Default)]
struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ModelCompletion, ProviderError>>>,
}

impl ScriptedModel {
    fn new(responses: Vec<Result<ModelCompletion, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(responses)),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn invoke(&self, _request: &ModelRequest<'_>) -> Result<ModelCompletion, ProviderError> {
        let mut guard = self.responses.lock().expect("lock poisoned");
        guard.pop_front().unwrap_or_else(|| {
            Err(ProviderError::Response(
                "scripted model exhausted responses".to_string(),
            ))
        })
    }
}

#[derive(Deserialize, JsonSchema)]
struct AddArgs {
    a: i64,
    b: i64,
}

fn add_tool() -> ToolSpec {
    ToolSpec::typed("add", "add two numbers", |args: AddArgs| async move {
        Ok::<i64, BoxError>(args.a + args.b)
    })
    .expect("valid schema")
}

fn add_call(id: &str, a: i64, b: i64) -> ModelCompletion {
    ModelCompletion {
        tool_calls: vec![ModelToolCall {
            id: id.to_string(),
            name: "add".to_string(),
            arguments: json!({"a": a, "b": b}),
        }],
        ..ModelCompletion::default()
    }
}

fn answer(text: &str) -> ModelCompletion {
    ModelCompletion {
        text: Some(text.to_string()),
        ..ModelCompletion::default()
    }
}

fn build_agent(responses: Vec<Result<ModelCompletion, ProviderError>>) -> Agent {
    Agent::builder()
        .client(ScriptedModel::new(responses))
        .instructions("You are a calculator. Use the add tool.")
        .tool(add_tool())
        .build()
        .expect("agent builds")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let agent = build_agent(vec![Ok(add_call("call_1", 2, 3)), Ok(answer("2 + 3 = 5"))]);
    let completion = agent.complete("What is 2 + 3?").await?;
    println!("complete: {}", completion.into_text());

    let agent = build_agent(vec![
        Ok(add_call("call_2", 10, 7)),
        Ok(answer("10 + 7 = 17")),
        Ok(add_call("call_3", 17, 1)),
        Ok(answer("Plus one makes 18")),
    ]);
    let context = agent
        .complete_with_context(&Context::new(), "What is 10 + 7?")
        .await?;
    let context = agent.complete_with_context(&context, "And plus one?").await?;
    for turn in &context {
        println!("{:?}: {}", turn.role, turn.content);
    }

    let agent = build_agent(vec![Ok(add_call("call_4", 4, 4)), Ok(answer("4 + 4 = 8"))]);
    let stream = agent.complete_stream("What is 4 + 4?");
    futures_util::pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        print!("{}", chunk?);
    }
    println!();

    Ok(())
}
