//! Best-effort repair of model-supplied tool arguments.
//!
//! Models regularly send `"2"` for an integer, `"1, 2, 3"` for a list of
//! numbers, or the whole argument object as a JSON-encoded string. Values
//! are nudged towards the declared parameter types here; anything that still
//! does not fit is left for argument validation to reject.

use serde_json::{Number, Value, json};

use crate::error::ToolError;

pub(crate) fn coerce_arguments(tool: &str, schema: &Value, raw: Value) -> Result<Value, ToolError> {
    let mut args = match raw {
        Value::Null => json!({}),
        Value::String(text) => parse_argument_text(tool, &text)?,
        other => other,
    };

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(args);
    };

    if let Some(args_obj) = args.as_object_mut() {
        for (key, value) in args_obj.iter_mut() {
            if let Some(field_schema) = properties.get(key) {
                coerce_value(value, field_schema);
            }
        }
    }

    Ok(args)
}

/// The first non-null entry of a schema's `type`, which may be a string or
/// a list such as `["integer", "null"]`.
pub(crate) fn declared_type(schema: &Value) -> Option<&str> {
    match schema.get("type")? {
        Value::String(type_name) => Some(type_name),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|type_name| *type_name != "null"),
        _ => None,
    }
}

fn parse_argument_text(tool: &str, text: &str) -> Result<Value, ToolError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(json!({}));
    }

    let invalid = |err: serde_json::Error| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: format!("arguments are not valid JSON: {err}"),
    };

    match serde_json::from_str::<Value>(trimmed).map_err(invalid)? {
        // double-encoded
        Value::String(inner) => serde_json::from_str(&inner).map_err(invalid),
        value => Ok(value),
    }
}

fn coerce_value(value: &mut Value, schema: &Value) {
    let Some(type_name) = declared_type(schema) else {
        return;
    };

    let coerced = match (type_name, &*value) {
        ("integer", Value::String(text)) => parse_integer(text),
        ("integer", Value::Number(number))
            if number.as_i64().is_none() && number.as_u64().is_none() =>
        {
            number.as_f64().and_then(whole_number)
        }
        ("number", Value::String(text)) => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        ("boolean", Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        ("string", Value::Number(_) | Value::Bool(_)) => Some(Value::String(value.to_string())),
        ("array", Value::String(text)) => Some(split_list(text)),
        ("object", Value::String(text)) => serde_json::from_str::<Value>(text)
            .ok()
            .filter(Value::is_object),
        _ => None,
    };

    if let Some(coerced) = coerced {
        *value = coerced;
    }

    if type_name == "array" {
        if let (Some(items), Some(elements)) = (schema.get("items"), value.as_array_mut()) {
            for element in elements {
                coerce_value(element, items);
            }
        }
    }
}

fn parse_integer(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(integer) = trimmed.parse::<i64>() {
        return Some(json!(integer));
    }
    trimmed.parse::<f64>().ok().and_then(whole_number)
}

fn whole_number(float: f64) -> Option<Value> {
    if float.is_finite() && float.fract() == 0.0 && float.abs() < i64::MAX as f64 {
        Some(json!(float as i64))
    } else {
        None
    }
}

/// `"[1, 2]"` parses as JSON; `"1, 2"` and `"1"` split on commas into
/// string items for the item schema to coerce.
fn split_list(text: &str) -> Value {
    let trimmed = text.trim();
    if let Ok(parsed @ Value::Array(_)) = serde_json::from_str::<Value>(trimmed) {
        return parsed;
    }

    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);

    Value::Array(
        inner
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| Value::String(item.to_string()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "numbers": {"type": "array", "items": {"type": "number"}},
                "count": {"type": "integer"},
                "ratio": {"type": ["number", "null"]},
                "verbose": {"type": "boolean"},
                "label": {"type": "string"},
                "options": {"type": "object"}
            }
        })
    }

    #[test]
    fn comma_separated_string_becomes_number_list() {
        let args = coerce_arguments(
            "average",
            &schema(),
            json!({"numbers": "10.5, 20.3, 15.7"}),
        )
        .expect("coerces");
        assert_eq!(args, json!({"numbers": [10.5, 20.3, 15.7]}));
    }

    #[test]
    fn scalar_strings_follow_declared_types() {
        let args = coerce_arguments(
            "t",
            &schema(),
            json!({
                "count": "3",
                "ratio": "0.25",
                "verbose": "TRUE",
                "label": 42,
                "options": "{\"deep\": true}"
            }),
        )
        .expect("coerces");
        assert_eq!(
            args,
            json!({
                "count": 3,
                "ratio": 0.25,
                "verbose": true,
                "label": "42",
                "options": {"deep": true}
            })
        );
    }

    #[test]
    fn json_encoded_and_double_encoded_objects_are_unwrapped() {
        let once = coerce_arguments("t", &schema(), json!("{\"count\": 2}")).expect("coerces");
        assert_eq!(once, json!({"count": 2}));

        let double_encoded = json!("\"{\\\"count\\\": \\\"2\\\"}\"");
        let twice = coerce_arguments("t", &schema(), double_encoded).expect("coerces");
        assert_eq!(twice, json!({"count": 2}));

        let empty = coerce_arguments("t", &schema(), json!("  ")).expect("coerces");
        assert_eq!(empty, json!({}));
    }

    #[test]
    fn malformed_json_text_is_invalid_arguments() {
        let err = coerce_arguments("t", &schema(), json!("{count: 2")).expect_err("must fail");
        assert!(matches!(err, ToolError::InvalidArguments { ref tool, .. } if tool == "t"));
    }

    #[test]
    fn uncoercible_values_are_left_alone() {
        let args = coerce_arguments("t", &schema(), json!({"count": "many", "numbers": [1, "x"]}))
            .expect("coerces");
        assert_eq!(args, json!({"count": "many", "numbers": [1, "x"]}));
    }
}
