use serde_json::{Map, Value};

use crate::ToolError;

/// Integral argument within `[min, max]`, or `default` when absent.
///
/// Clients send JSON numbers, so `6.0` is accepted the same as `6`.
pub fn arg_u32_in_range(
    args: &Map<String, Value>,
    key: &str,
    default: u32,
    min: u32,
    max: u32,
) -> Result<u32, ToolError> {
    let out_of_range = || {
        ToolError::new(
            "validation_failed",
            format!("'{key}' must be an integer between {min} and {max}"),
        )
        .with_field(key)
    };
    let value = match args.get(key) {
        None | Some(Value::Null) => return Ok(default),
        Some(Value::Number(n)) => match (n.as_u64(), n.as_f64()) {
            (Some(v), _) => v,
            (None, Some(f)) if f.fract() == 0.0 && f >= 0.0 => f as u64,
            _ => return Err(out_of_range()),
        },
        Some(_) => return Err(out_of_range()),
    };
    u32::try_from(value)
        .ok()
        .filter(|v| (min..=max).contains(v))
        .ok_or_else(out_of_range)
}

pub fn required_u32_in_range(
    args: &Map<String, Value>,
    key: &str,
    min: u32,
    max: u32,
) -> Result<u32, ToolError> {
    if args.get(key).is_none_or(Value::is_null) {
        return Err(ToolError::new(
            "validation_failed",
            format!("Missing required field '{key}'"),
        )
        .with_field(key));
    }
    arg_u32_in_range(args, key, min, min, max)
}

pub fn arg_string(args: &Map<String, Value>, key: &str, default: &str) -> Result<String, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default.to_string()),
        Some(Value::String(v)) if v.trim().is_empty() => Ok(default.to_string()),
        Some(Value::String(v)) => Ok(v.trim().to_string()),
        Some(_) => Err(
            ToolError::new("validation_failed", format!("'{key}' must be a string"))
                .with_field(key),
        ),
    }
}

pub fn arg_optional_string(args: &Map<String, Value>, key: &str) -> Result<Option<String>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(v)) if v.trim().is_empty() => Ok(None),
        Some(Value::String(v)) => Ok(Some(v.trim().to_string())),
        Some(_) => Err(
            ToolError::new("validation_failed", format!("'{key}' must be a string"))
                .with_field(key),
        ),
    }
}

pub fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}
