//! Argument validation against a tool's declared parameters

use crate::error::ChatError;
use crate::models::ToolDeclaration;
use crate::Result;
use serde_json::Value;

/// Parse the raw payload a provider sent. An empty payload means "no arguments".
pub fn parse_arguments(tool: &str, raw: &str) -> Result<Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }

    serde_json::from_str(raw).map_err(|e| ChatError::MalformedToolArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

/// Object required, required params present, declared types match, nothing undeclared
pub fn validate_arguments(declaration: &ToolDeclaration, args: &Value) -> Result<()> {
    let fail = |reason: String| ChatError::ArgumentValidationFailed {
        tool: declaration.name.to_string(),
        reason,
    };

    let object = args
        .as_object()
        .ok_or_else(|| fail(format!("expected a JSON object, got {}", type_name(args))))?;

    for param in &declaration.parameters {
        match object.get(param.name) {
            Some(Value::Null) | None if param.required => {
                return Err(fail(format!("missing required parameter '{}'", param.name)));
            }
            Some(value) if !value.is_null() && !param.param_type.accepts(value) => {
                return Err(fail(format!(
                    "parameter '{}' must be {}, got {}",
                    param.name,
                    param.param_type,
                    type_name(value)
                )));
            }
            _ => {}
        }
    }

    if let Some(unknown) = object
        .keys()
        .find(|key| !declaration.parameters.iter().any(|p| p.name == key.as_str()))
    {
        return Err(fail(format!("undeclared parameter '{}'", unknown)));
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
