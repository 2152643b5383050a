//! Parameter descriptors to JSON Schema, and argument coercion

use regex::Regex;
use serde_json::{json, Map, Value};

use super::catalog::{ParamType, ParameterDescriptor};
use crate::{McpError, McpResult};

/// Build the `inputSchema` object for a tool's parameter list.
///
/// Constraint mapping: min/max → minimum/maximum, min_length/max_length →
/// minLength/maxLength, pattern → pattern, allowed → enum.
pub fn parameters_to_schema(parameters: &[ParameterDescriptor]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in parameters {
        let mut prop = Map::new();
        prop.insert(
            "type".to_string(),
            Value::String(param.param_type.json_schema_name().to_string()),
        );
        if let Some(description) = &param.description {
            prop.insert("description".to_string(), Value::String(description.clone()));
        }
        if let Some(default) = &param.default {
            prop.insert("default".to_string(), default.clone());
        }

        let c = &param.constraints;
        if let Some(min) = c.min {
            prop.insert("minimum".to_string(), json!(min));
        }
        if let Some(max) = c.max {
            prop.insert("maximum".to_string(), json!(max));
        }
        if let Some(min_length) = c.min_length {
            prop.insert("minLength".to_string(), json!(min_length));
        }
        if let Some(max_length) = c.max_length {
            prop.insert("maxLength".to_string(), json!(max_length));
        }
        if let Some(pattern) = &c.pattern {
            prop.insert("pattern".to_string(), Value::String(pattern.clone()));
        }
        if let Some(allowed) = &c.allowed {
            prop.insert("enum".to_string(), Value::Array(allowed.clone()));
        }

        properties.insert(param.name.clone(), Value::Object(prop));
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }

    let mut schema = Map::new();
    schema.insert("type".to_string(), Value::String("object".to_string()));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), Value::Array(required));
    }
    Value::Object(schema)
}

/// Shape MCP-provided arguments into the catalog's parameter form:
/// fill defaults, coerce scalars to their declared types, enforce
/// required fields and constraints.
pub fn coerce_arguments(
    tool_name: &str,
    parameters: &[ParameterDescriptor],
    arguments: Option<Value>,
) -> McpResult<Value> {
    let mut args = match arguments {
        None => Map::new(),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(McpError::invalid_params(
                "tools/call",
                format!(
                    "arguments for {} must be an object, got {}",
                    tool_name,
                    type_name(&other)
                ),
            ))
        }
    };

    let mut out = Map::new();
    for param in parameters {
        let value = match args.remove(&param.name) {
            Some(value) => Some(coerce_value(tool_name, param, value)?),
            None => param.default.clone(),
        };

        match value {
            Some(value) => {
                validate_constraints(tool_name, param, &value)?;
                out.insert(param.name.clone(), value);
            }
            None if param.required => {
                return Err(McpError::invalid_params(
                    "tools/call",
                    format!("{}: missing required parameter {}", tool_name, param.name),
                ))
            }
            None => {}
        }
    }

    // Unknown arguments pass through untouched; the catalog may accept
    // more than it declares.
    for (key, value) in args {
        out.insert(key, value);
    }
    Ok(Value::Object(out))
}

fn coerce_value(tool_name: &str, param: &ParameterDescriptor, value: Value) -> McpResult<Value> {
    let mismatch = |value: &Value| {
        McpError::invalid_params(
            "tools/call",
            format!(
                "{}: parameter {} expected {}, got {}",
                tool_name,
                param.name,
                param.param_type.json_schema_name(),
                type_name(value)
            ),
        )
    };

    let coerced = match (param.param_type, value) {
        (ParamType::String, Value::String(s)) => Value::String(s),
        (ParamType::String, Value::Number(n)) => Value::String(n.to_string()),
        (ParamType::String, Value::Bool(b)) => Value::String(b.to_string()),

        (ParamType::Number, Value::Number(n)) => Value::Number(n),
        (ParamType::Number, Value::String(s)) => {
            let parsed: f64 = s.parse().map_err(|_| mismatch(&Value::String(s.clone())))?;
            serde_json::Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(|| mismatch(&Value::String(s)))?
        }

        (ParamType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Value::Number(n),
        (ParamType::Integer, Value::String(s)) => {
            let parsed: i64 = s.parse().map_err(|_| mismatch(&Value::String(s.clone())))?;
            Value::Number(parsed.into())
        }

        (ParamType::Boolean, Value::Bool(b)) => Value::Bool(b),
        (ParamType::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(mismatch(&Value::String(s))),
        },

        (ParamType::Object, Value::Object(map)) => Value::Object(map),
        (ParamType::Array, Value::Array(items)) => Value::Array(items),

        (_, other) => return Err(mismatch(&other)),
    };
    Ok(coerced)
}

fn validate_constraints(
    tool_name: &str,
    param: &ParameterDescriptor,
    value: &Value,
) -> McpResult<()> {
    let c = &param.constraints;
    let violation = |detail: String| {
        McpError::invalid_params(
            "tools/call",
            format!("{}: parameter {} {}", tool_name, param.name, detail),
        )
    };

    if let Some(n) = value.as_f64() {
        if let Some(min) = c.min {
            if n < min {
                return Err(violation(format!("below minimum {}", min)));
            }
        }
        if let Some(max) = c.max {
            if n > max {
                return Err(violation(format!("above maximum {}", max)));
            }
        }
    }

    if let Some(s) = value.as_str() {
        if let Some(min_length) = c.min_length {
            if s.chars().count() < min_length {
                return Err(violation(format!("shorter than {}", min_length)));
            }
        }
        if let Some(max_length) = c.max_length {
            if s.chars().count() > max_length {
                return Err(violation(format!("longer than {}", max_length)));
            }
        }
        if let Some(pattern) = &c.pattern {
            let regex = Regex::new(pattern)
                .map_err(|_| violation(format!("declared with invalid pattern {}", pattern)))?;
            if !regex.is_match(s) {
                return Err(violation(format!("does not match pattern {}", pattern)));
            }
        }
    }

    if let Some(allowed) = &c.allowed {
        if !allowed.contains(value) {
            return Err(violation("not in the allowed set".to_string()));
        }
    }

    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::catalog::ParamConstraints;

    fn sample_params() -> Vec<ParameterDescriptor> {
        vec![
            ParameterDescriptor::new("query", ParamType::String)
                .required()
                .with_description("Search query")
                .with_constraints(ParamConstraints {
                    min_length: Some(1),
                    max_length: Some(100),
                    ..Default::default()
                }),
            ParameterDescriptor::new("limit", ParamType::Integer)
                .with_default(json!(10))
                .with_constraints(ParamConstraints {
                    min: Some(1.0),
                    max: Some(100.0),
                    ..Default::default()
                }),
            ParameterDescriptor::new("format", ParamType::String).with_constraints(
                ParamConstraints {
                    allowed: Some(vec![json!("json"), json!("text")]),
                    ..Default::default()
                },
            ),
        ]
    }

    #[test]
    fn test_schema_shape() {
        let schema = parameters_to_schema(&sample_params());
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["query"]["type"], "string");
        assert_eq!(schema["properties"]["query"]["minLength"], 1);
        assert_eq!(schema["properties"]["query"]["maxLength"], 100);
        assert_eq!(schema["properties"]["limit"]["minimum"], 1.0);
        assert_eq!(schema["properties"]["limit"]["default"], 10);
        assert_eq!(schema["properties"]["format"]["enum"][0], "json");
        assert_eq!(schema["required"], json!(["query"]));
    }

    #[test]
    fn test_defaults_filled() {
        let coerced =
            coerce_arguments("search", &sample_params(), Some(json!({"query": "rust"}))).unwrap();
        assert_eq!(coerced["limit"], 10);
        assert_eq!(coerced["query"], "rust");
    }

    #[test]
    fn test_missing_required_rejected() {
        let err = coerce_arguments("search", &sample_params(), Some(json!({}))).unwrap_err();
        assert!(err.to_string().contains("query"));
    }

    #[test]
    fn test_scalar_coercion() {
        let coerced = coerce_arguments(
            "search",
            &sample_params(),
            Some(json!({"query": "x", "limit": "25"})),
        )
        .unwrap();
        assert_eq!(coerced["limit"], 25);
    }

    #[test]
    fn test_constraint_violations() {
        let over = coerce_arguments(
            "search",
            &sample_params(),
            Some(json!({"query": "x", "limit": 1000})),
        );
        assert!(over.is_err());

        let bad_enum = coerce_arguments(
            "search",
            &sample_params(),
            Some(json!({"query": "x", "format": "xml"})),
        );
        assert!(bad_enum.is_err());
    }

    #[test]
    fn test_non_object_arguments_rejected() {
        let err = coerce_arguments("search", &sample_params(), Some(json!([1, 2]))).unwrap_err();
        assert!(matches!(err, McpError::InvalidParams { .. }));
    }

    #[test]
    fn test_unknown_arguments_pass_through() {
        let coerced = coerce_arguments(
            "search",
            &sample_params(),
            Some(json!({"query": "x", "extra": true})),
        )
        .unwrap();
        assert_eq!(coerced["extra"], true);
    }
}
