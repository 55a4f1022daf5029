mod coerce;

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::error::{BoxError, SchemaError, ToolError};
use crate::llm::{ModelToolCall, ModelToolDefinition};

use self::coerce::{coerce_arguments, declared_type};

type ToolHandler = dyn Fn(Value) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync;

/// The type of a declared tool parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array(Box<ParamType>),
}

impl ParamType {
    pub fn array_of(item: ParamType) -> Self {
        Self::Array(Box::new(item))
    }

    fn to_schema(&self) -> Value {
        match self {
            Self::String => json!({"type": "string"}),
            Self::Integer => json!({"type": "integer"}),
            Self::Number => json!({"type": "number"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Object => json!({"type": "object"}),
            Self::Array(item) => json!({"type": "array", "items": item.to_schema()}),
        }
    }
}

/// One declared parameter of a tool. Parameters are required unless marked
/// [`optional`](ToolParam::optional).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolParam {
    name: String,
    param_type: ParamType,
    description: Option<String>,
    required: bool,
}

impl ToolParam {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: true,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// A callable exposed to the model, described by a JSON schema of its
/// parameters.
#[derive(Clone)]
pub struct ToolSpec {
    name: String,
    description: String,
    json_schema: Value,
    handler: Arc<ToolHandler>,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("json_schema", &self.json_schema)
            .finish()
    }
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            json_schema: json!({
                "type": "object",
                "properties": {},
                "required": [],
                "additionalProperties": true,
            }),
            handler: Arc::new(|_args: Value| -> BoxFuture<'static, Result<Value, BoxError>> {
                Box::pin(async { Err("tool handler not configured".into()) })
            }),
        }
    }

    /// A tool whose arguments deserialize into `A` and whose result
    /// serializes from `R`. The parameter schema is derived from `A`.
    pub fn typed<A, R, H, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: H,
    ) -> Result<Self, SchemaError>
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        R: Serialize + Send + 'static,
        H: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    {
        let mut schema = serde_json::to_value(schemars::schema_for!(A))
            .map_err(|_| SchemaError::SchemaNotObject)?;
        if let Some(object) = schema.as_object_mut() {
            object.remove("$schema");
            object.remove("title");
        }

        let handler = Arc::new(handler);
        Ok(Self::new(name, description)
            .with_schema(schema)?
            .with_handler(move |args| {
                let handler = Arc::clone(&handler);
                async move {
                    let args = serde_json::from_value::<A>(args).map_err(|err| {
                        format!("arguments do not match the parameter type: {err}")
                    })?;
                    let output = (*handler)(args).await?;
                    Ok::<Value, BoxError>(serde_json::to_value(output)?)
                }
            }))
    }

    pub fn with_schema(mut self, schema: Value) -> Result<Self, SchemaError> {
        validate_schema(&schema)?;
        self.json_schema = schema;
        Ok(self)
    }

    /// Declares a parameter, adding it to the schema's `properties` (and
    /// `required` unless optional).
    pub fn param(mut self, param: ToolParam) -> Self {
        let mut field_schema = param.param_type.to_schema();
        if let (Some(description), Some(field)) =
            (&param.description, field_schema.as_object_mut())
        {
            field.insert("description".to_string(), json!(description));
        }

        if let Some(schema) = self.json_schema.as_object_mut() {
            if let Some(properties) = schema
                .entry("properties")
                .or_insert_with(|| json!({}))
                .as_object_mut()
            {
                properties.insert(param.name.clone(), field_schema);
            }
            if let Some(required) = schema
                .entry("required")
                .or_insert_with(|| json!([]))
                .as_array_mut()
            {
                required.retain(|item| item.as_str() != Some(param.name.as_str()));
                if param.required {
                    required.push(json!(param.name));
                }
            }
        }
        self
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.handler = Arc::new(move |args: Value| -> BoxFuture<'static, Result<Value, BoxError>> {
            Box::pin(handler(args))
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn json_schema(&self) -> &Value {
        &self.json_schema
    }

    pub fn definition(&self) -> ModelToolDefinition {
        ModelToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.json_schema.clone(),
        }
    }

    /// Coerces and validates `args`, runs the handler, and renders its
    /// result as text. Handler errors and panics become
    /// [`ToolError::Execution`].
    pub async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args = coerce_arguments(self.name(), &self.json_schema, args)?;
        validate_arguments(self.name(), &self.json_schema, &args)?;

        let outcome = AssertUnwindSafe(async { (self.handler)(args).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => Ok(render_output(value)),
            Ok(Err(err)) => Err(ToolError::Execution {
                tool: self.name.clone(),
                message: err.to_string(),
            }),
            Err(panic) => Err(ToolError::Execution {
                tool: self.name.clone(),
                message: format!("tool panicked: {}", panic_message(panic.as_ref())),
            }),
        }
    }
}

fn render_output(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Ordered set of tools, unique by name.
#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `tool`. A tool with the same name is replaced in place and
    /// returned.
    pub fn register(&mut self, tool: ToolSpec) -> Option<ToolSpec> {
        match self.index.get(tool.name()) {
            Some(&position) => Some(std::mem::replace(&mut self.tools[position], tool)),
            None => {
                self.index.insert(tool.name().to_string(), self.tools.len());
                self.tools.push(tool);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&position| &self.tools[position])
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ToolSpec> {
        self.tools.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(ToolSpec::name).collect()
    }

    pub fn definitions(&self) -> Vec<ModelToolDefinition> {
        self.tools.iter().map(ToolSpec::definition).collect()
    }

    /// Resolves one tool call requested by the model.
    pub async fn invoke(
        &self,
        call: &ModelToolCall,
        timeout: Option<Duration>,
    ) -> Result<String, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;

        let execution = tool.execute(call.arguments.clone());
        match timeout {
            Some(after) => tokio::time::timeout(after, execution)
                .await
                .map_err(|_| ToolError::Timeout {
                    tool: call.name.clone(),
                    after,
                })?,
            None => execution.await,
        }
    }
}

impl FromIterator<ToolSpec> for ToolRegistry {
    fn from_iter<I: IntoIterator<Item = ToolSpec>>(tools: I) -> Self {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool);
        }
        registry
    }
}

fn validate_schema(schema: &Value) -> Result<(), SchemaError> {
    let schema_obj = schema.as_object().ok_or(SchemaError::SchemaNotObject)?;

    let root_type = schema_obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(SchemaError::RootTypeMustBeObject)?;

    if root_type != "object" {
        return Err(SchemaError::RootTypeMustBeObject);
    }

    if let Some(required) = schema_obj.get("required") {
        let required_arr = required.as_array().ok_or(SchemaError::InvalidRequired)?;
        for item in required_arr {
            if !item.is_string() {
                return Err(SchemaError::InvalidRequired);
            }
        }
    }

    Ok(())
}

fn validate_arguments(tool_name: &str, schema: &Value, args: &Value) -> Result<(), ToolError> {
    let args_obj = args
        .as_object()
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: tool_name.to_string(),
            message: "arguments must be a JSON object".to_string(),
        })?;

    let schema_obj = schema
        .as_object()
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: tool_name.to_string(),
            message: "tool schema must be a JSON object".to_string(),
        })?;

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        for field in required {
            let Some(field_name) = field.as_str() else {
                continue;
            };
            if !args_obj.contains_key(field_name) {
                return Err(ToolError::InvalidArguments {
                    tool: tool_name.to_string(),
                    message: format!("missing required field: {field_name}"),
                });
            }
        }
    }

    let empty = Map::new();
    let properties = schema_obj
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    if schema_obj
        .get("additionalProperties")
        .and_then(Value::as_bool)
        == Some(false)
    {
        for key in args_obj.keys() {
            if !properties.contains_key(key) {
                return Err(ToolError::InvalidArguments {
                    tool: tool_name.to_string(),
                    message: format!("unknown field: {key}"),
                });
            }
        }
    }

    for (key, value) in args_obj {
        if let Some(field_schema) = properties.get(key) {
            if !value_matches_schema(value, field_schema) {
                let type_name = declared_type(field_schema).unwrap_or("unknown");
                return Err(ToolError::InvalidArguments {
                    tool: tool_name.to_string(),
                    message: format!("field '{key}' must be of type {type_name}"),
                });
            }
        }
    }

    Ok(())
}

fn value_matches_schema(value: &Value, schema: &Value) -> bool {
    match schema.get("type") {
        Some(Value::String(type_name)) => value_matches_type(value, type_name),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|type_name| value_matches_type(value, type_name)),
        _ => true,
    }
}

fn value_matches_type(value: &Value, type_name: &str) -> bool {
    match type_name {
        "string" => value.is_string(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "number" => value.as_f64().is_some(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    fn add_tool() -> ToolSpec {
        ToolSpec::new("add", "add two numbers")
            .param(ToolParam::new("a", ParamType::Integer))
            .param(ToolParam::new("b", ParamType::Integer))
            .with_handler(|args| async move {
                let a = args["a"].as_i64().ok_or("a missing")?;
                let b = args["b"].as_i64().ok_or("b missing")?;
                Ok::<Value, BoxError>(json!(a + b))
            })
    }

    fn call(name: &str, arguments: Value) -> ModelToolCall {
        ModelToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn schema_validation_rejects_non_object_root() {
        let result = ToolSpec::new("bad", "bad").with_schema(json!({"type": "string"}));
        assert!(result.is_err());
    }

    #[test]
    fn declared_params_build_the_schema() {
        let tool = ToolSpec::new("average", "mean of numbers")
            .param(
                ToolParam::new("numbers", ParamType::array_of(ParamType::Number))
                    .description("values to average"),
            )
            .param(ToolParam::new("precision", ParamType::Integer).optional());

        let schema = tool.json_schema();
        assert_eq!(schema["properties"]["numbers"]["type"], "array");
        assert_eq!(schema["properties"]["numbers"]["items"]["type"], "number");
        assert_eq!(
            schema["properties"]["numbers"]["description"],
            "values to average"
        );
        assert_eq!(schema["required"], json!(["numbers"]));
    }

    #[tokio::test]
    async fn argument_validation_reports_missing_required() {
        let err = add_tool()
            .execute(json!({"a": 1}))
            .await
            .expect_err("should fail");

        assert!(err.to_string().contains("missing required field: b"));
    }

    #[tokio::test]
    async fn stringly_typed_arguments_are_coerced_before_the_handler_runs() {
        let output = add_tool()
            .execute(json!("{\"a\": \"2\", \"b\": 3}"))
            .await
            .expect("tool executes");
        assert_eq!(output, "5");
    }

    #[tokio::test]
    async fn typed_tool_derives_schema_and_deserializes_args() {
        #[derive(Deserialize, JsonSchema)]
        struct AverageArgs {
            numbers: Vec<f64>,
        }

        let average = |args: AverageArgs| async move {
            if args.numbers.is_empty() {
                return Err(BoxError::from("no numbers given"));
            }
            Ok::<f64, BoxError>(args.numbers.iter().sum::<f64>() / args.numbers.len() as f64)
        };
        let tool =
            ToolSpec::typed("calculate_average", "mean of numbers", average).expect("schema valid");

        assert_eq!(tool.json_schema()["properties"]["numbers"]["type"], "array");
        assert!(tool.json_schema().get("$schema").is_none());

        let output = tool
            .execute(json!({"numbers": "10.5, 20.3, 15.7, 25.1, 12.9"}))
            .await
            .expect("tool executes");
        let average: f64 = output.parse().expect("numeric output");
        assert!((average - 16.9).abs() < 1e-9);

        let err = tool
            .execute(json!({"numbers": []}))
            .await
            .expect_err("should fail");
        assert_eq!(
            err.to_string(),
            "tool 'calculate_average' failed: no numbers given"
        );
    }

    #[tokio::test]
    async fn panicking_handler_becomes_execution_error() {
        let tool = ToolSpec::new("explode", "always panics").with_handler(|_args| async move {
            if true {
                panic!("kaboom");
            }
            Ok::<Value, BoxError>(Value::Null)
        });

        let err = tool.execute(json!({})).await.expect_err("should fail");
        assert!(matches!(
            err,
            ToolError::Execution { ref message, .. } if message.contains("kaboom")
        ));
    }

    #[tokio::test]
    async fn registry_reports_unknown_tools_and_replaces_by_name() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(add_tool()).is_none());
        registry.register(
            ToolSpec::new("echo", "echo")
                .with_handler(|args| async move { Ok::<Value, BoxError>(args) }),
        );

        let replacement = ToolSpec::new("add", "always zero")
            .with_handler(|_args| async move { Ok::<Value, BoxError>(json!(0)) });
        let previous = registry.register(replacement).expect("replaced");
        assert_eq!(previous.description(), "add two numbers");
        assert_eq!(registry.names(), vec!["add", "echo"]);

        let output = registry
            .invoke(&call("add", json!({})), None)
            .await
            .expect("invokes");
        assert_eq!(output, "0");

        let err = registry
            .invoke(&call("subtract", json!({})), None)
            .await
            .expect_err("unknown");
        assert_eq!(err.to_string(), "Unknown tool 'subtract'.");
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let slow = ToolSpec::new("slow", "sleeps").with_handler(|_args| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<Value, BoxError>(json!("late"))
        });
        let registry: ToolRegistry = [slow].into_iter().collect();

        let err = registry
            .invoke(&call("slow", json!({})), Some(Duration::from_millis(10)))
            .await
            .expect_err("times out");
        assert!(matches!(err, ToolError::Timeout { .. }));
    }
}
