//! Turning the final model turn into the value the caller asked for.

use std::fmt;
use std::sync::Arc;

use jsonschema::{Draft, JSONSchema};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{AgentError, SchemaError};

/// A structured output type: a JSON schema plus its compiled validator.
#[derive(Clone)]
pub struct ResponseSchema {
    name: String,
    schema: Value,
    validator: Arc<JSONSchema>,
}

impl fmt::Debug for ResponseSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSchema")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}

impl ResponseSchema {
    /// Compiles `schema`. A top-level `$schema` key is dropped; validation
    /// always uses draft 7 keywords.
    pub fn new(name: impl Into<String>, mut schema: Value) -> Result<Self, SchemaError> {
        if let Some(object) = schema.as_object_mut() {
            object.remove("$schema");
        }

        let validator = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema)
            .map_err(|err| SchemaError::InvalidResponseSchema(err.to_string()))?;

        Ok(Self {
            name: sanitize_name(&name.into()),
            schema,
            validator: Arc::new(validator),
        })
    }

    /// Derives the schema of `T`.
    pub fn of<T: JsonSchema>() -> Result<Self, SchemaError> {
        let schema = serde_json::to_value(schemars::schema_for!(T))
            .map_err(|err| SchemaError::InvalidResponseSchema(err.to_string()))?;
        Self::new(T::schema_name().to_string(), schema)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Validates `value`, returning one diagnostic per offending location.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<String>> {
        match self.validator.validate(value) {
            Ok(()) => Ok(()),
            Err(errors) => Err(errors
                .map(|err| {
                    let path = err.instance_path.to_string();
                    if path.is_empty() {
                        err.to_string()
                    } else {
                        format!("{path}: {err}")
                    }
                })
                .collect()),
        }
    }
}

/// Provider-facing schema names are restricted to `[A-Za-z0-9_-]{1,64}`.
fn sanitize_name(name: &str) -> String {
    let sanitized = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .take(64)
        .collect::<String>();

    if sanitized.is_empty() {
        "response".to_string()
    } else {
        sanitized
    }
}

/// The result of a buffered completion.
#[derive(Clone, Debug, PartialEq)]
pub enum Completion {
    /// Raw model text; produced when the agent has no response schema.
    Text(String),
    /// A value that passed the agent's response schema.
    Structured(Value),
}

impl Completion {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Structured(_) => None,
        }
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Text(_) => None,
            Self::Structured(value) => Some(value),
        }
    }

    /// Text as-is, or the structured value rendered as compact JSON.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Structured(value) => value.to_string(),
        }
    }
}

pub(crate) fn coerce(
    raw: String,
    schema: Option<&ResponseSchema>,
) -> Result<Completion, AgentError> {
    match schema {
        None => Ok(Completion::Text(raw)),
        Some(schema) => {
            parse_validated(raw, schema).map(|(_, value)| Completion::Structured(value))
        }
    }
}

pub(crate) fn coerce_as<T: DeserializeOwned>(
    raw: String,
    schema: Option<&ResponseSchema>,
) -> Result<T, AgentError> {
    let (raw, value) = match schema {
        Some(schema) => parse_validated(raw, schema)?,
        None => {
            let value = parse_json(&raw).map_err(|diagnostic| format_error(&raw, diagnostic))?;
            (raw, value)
        }
    };

    serde_json::from_value(value).map_err(|err| format_error(&raw, err.to_string()))
}

fn parse_validated(raw: String, schema: &ResponseSchema) -> Result<(String, Value), AgentError> {
    let value = parse_json(&raw).map_err(|diagnostic| format_error(&raw, diagnostic))?;
    match schema.validate(&value) {
        Ok(()) => Ok((raw, value)),
        Err(diagnostics) => Err(AgentError::ResponseFormat { raw, diagnostics }),
    }
}

fn format_error(raw: &str, diagnostic: String) -> AgentError {
    AgentError::ResponseFormat {
        raw: raw.to_string(),
        diagnostics: vec![diagnostic],
    }
}

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(strip_code_fence(raw))
        .map_err(|err| format!("content is not valid JSON: {err}"))
}

/// Models like to wrap JSON in a Markdown fence even when told not to.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // drop the info string (`json`) on the opening line
    match body.split_once('\n') {
        Some((_, inner)) => inner.trim(),
        None => body.trim(),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct User {
        name: String,
        age: u32,
    }

    fn user_schema() -> ResponseSchema {
        ResponseSchema::of::<User>().expect("schema compiles")
    }

    #[test]
    fn without_schema_text_passes_through() {
        let completion = coerce("  hello  ".to_string(), None).expect("coerces");
        assert_eq!(completion, Completion::Text("  hello  ".to_string()));
    }

    #[test]
    fn derived_schema_carries_type_name_and_fields() {
        let schema = user_schema();
        assert_eq!(schema.name(), "User");
        assert!(schema.schema().get("$schema").is_none());
        assert_eq!(schema.schema()["properties"]["age"]["type"], "integer");
    }

    #[test]
    fn valid_json_inside_code_fence_is_structured() {
        let raw = "```json\n{\"name\": \"Ada\", \"age\": 36}\n```".to_string();
        let completion = coerce(raw, Some(&user_schema())).expect("coerces");
        assert_eq!(
            completion.as_structured(),
            Some(&json!({"name": "Ada", "age": 36}))
        );

        let user: User = coerce_as(
            "{\"name\": \"Ada\", \"age\": 36}".to_string(),
            Some(&user_schema()),
        )
        .expect("deserializes");
        assert_eq!(
            user,
            User {
                name: "Ada".to_string(),
                age: 36
            }
        );
    }

    #[test]
    fn wrong_field_type_is_a_format_error_with_raw_content() {
        let raw = "{\"name\": \"Ada\", \"age\": \"thirty\"}".to_string();
        let err = coerce(raw.clone(), Some(&user_schema())).expect_err("must fail");

        match err {
            AgentError::ResponseFormat {
                raw: attached,
                diagnostics,
            } => {
                assert_eq!(attached, raw);
                assert!(diagnostics.iter().any(|line| line.contains("/age")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn prose_instead_of_json_is_a_format_error() {
        let err = coerce_as::<User>("Ada is 36.".to_string(), None).expect_err("must fail");
        assert!(matches!(err, AgentError::ResponseFormat { .. }));
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn sanitize_name_replaces_disallowed_characters() {
        assert_eq!(sanitize_name("Wrapper<User>"), "Wrapper_User_");
        assert_eq!(sanitize_name(""), "response");
    }

    #[test]
    fn invalid_schema_is_rejected() {
        let err = ResponseSchema::new("bad", json!({"type": 12})).expect_err("must fail");
        assert!(matches!(err, SchemaError::InvalidResponseSchema(_)));
    }
}
