//! Parameter validation against a tool's declared input shape.
//!
//! Each tool declares its arguments as a `Deserialize + JsonSchema` struct with
//! `#[serde(deny_unknown_fields)]`. The same type yields the advertised JSON
//! schema and, through [`parse_params`], the typed parameters. Range checks that
//! serde cannot express go in [`Validate`].

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, FieldError, Result};

/// Post-deserialization checks on typed parameters.
pub trait Validate {
    /// Collect every out-of-range field. Empty means valid.
    fn validate(&self) -> Vec<FieldError> {
        Vec::new()
    }
}

/// Params for tools that take no arguments.
#[derive(Debug, Default, serde::Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NoParams {}

impl Validate for NoParams {}

/// JSON schema advertised for `T` in `tools/list`.
pub fn input_schema<T: JsonSchema>() -> Value {
    let root = schemars::schema_for!(T);
    let mut schema = serde_json::to_value(root).unwrap_or_else(|_| serde_json::json!({}));
    if let Value::Object(ref mut map) = schema {
        map.remove("$schema");
        map.remove("title");
        map.entry("properties")
            .or_insert_with(|| Value::Object(Default::default()));
    }
    schema
}

/// Validate raw tool arguments into `T`.
///
/// Absent arguments (`null`) are treated as an empty object. Nothing here
/// touches the browser.
pub fn parse_params<T>(raw: Value) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    let raw = match raw {
        Value::Null => Value::Object(Default::default()),
        Value::Object(_) => raw,
        other => {
            return Err(Error::invalid_field(
                "",
                format!("expected an object, got {}", kind_of(&other)),
            ))
        }
    };

    let params: T = serde_json::from_value(raw)
        .map_err(|e| Error::InvalidParams(vec![field_error_from_serde(&e)]))?;

    let problems = params.validate();
    if problems.is_empty() {
        Ok(params)
    } else {
        Err(Error::InvalidParams(problems))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// serde_json reports field names between backticks (``missing field `key` ``).
fn field_error_from_serde(err: &serde_json::Error) -> FieldError {
    let message = err.to_string();
    let reason = match message.find(" at line ") {
        Some(idx) => message[..idx].to_string(),
        None => message.clone(),
    };
    let path = if reason.starts_with("missing field") || reason.starts_with("unknown field") {
        reason
            .split('`')
            .nth(1)
            .map(str::to_string)
            .unwrap_or_default()
    } else {
        String::new()
    };
    FieldError::new(path, reason)
}

/// Reject anything that is not an absolute http(s)/file/about/data URL.
pub fn check_url(field: &str, value: &str) -> Option<FieldError> {
    match url::Url::parse(value) {
        Ok(parsed) => match parsed.scheme() {
            "http" | "https" | "file" | "about" | "data" | "chrome" => None,
            scheme => Some(FieldError::new(
                field,
                format!("unsupported URL scheme `{}`", scheme),
            )),
        },
        Err(e) => Some(FieldError::new(field, format!("invalid URL: {}", e))),
    }
}
