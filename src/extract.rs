//! Turning raw model output into schema-validated objects.
//!
//! Two strategies are supported, matching [`GenerationMode`]: JSON text (possibly
//! wrapped in a Markdown code fence) and a single tool invocation. Both end in the
//! same schema check, but each has its own failure points so callers can tell a
//! formatting problem from a content problem.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use crate::{
    error::ObjectValidationError, models::GenerationMode, models::RawResponse, schema::Schema,
};

const FENCE: &str = "```";

/// Outcome of the plain "is this JSON" check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validity {
    pub valid: bool,
    pub error: Option<String>,
}

impl Validity {
    pub fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// Strip a surrounding Markdown code fence (```` ```json ... ``` ````) if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.len() < FENCE.len() * 2 {
        return trimmed;
    }
    let Some(inner) = trimmed
        .strip_prefix(FENCE)
        .and_then(|rest| rest.strip_suffix(FENCE))
    else {
        return trimmed;
    };

    // The opening line may carry a language tag.
    let body = match inner.find('\n') {
        Some(newline) if is_fence_tag(&inner[..newline]) => &inner[newline + 1..],
        Some(_) => inner,
        None => inner.strip_prefix("json").unwrap_or(inner),
    };
    body.trim()
}

fn is_fence_tag(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Check whether the fence-stripped text parses as JSON.
pub fn check_json(text: &str) -> Validity {
    match serde_json::from_str::<Value>(strip_code_fence(text)) {
        Ok(_) => Validity::ok(),
        Err(e) => Validity::invalid(format!(
            "Failed to parse JSON, response is not a valid JSON object: error: {e}"
        )),
    }
}

/// Extract and validate the structured object carried by `raw`.
pub fn extract(
    raw: &RawResponse,
    mode: GenerationMode,
    schema: &Schema,
) -> Result<Value, ObjectValidationError> {
    match mode {
        GenerationMode::Json => extract_json(&raw.text, schema),
        GenerationMode::ToolCall => extract_tool_call(raw, schema),
    }
}

/// Same as [`extract`], then deserialize into `T`.
pub fn extract_as<T: DeserializeOwned>(
    raw: &RawResponse,
    mode: GenerationMode,
    schema: &Schema,
) -> Result<T, ObjectValidationError> {
    let value = extract(raw, mode, schema)?;
    serde_json::from_value(value.clone()).map_err(|e| ObjectValidationError::SchemaMismatch {
        message: e.to_string(),
        raw: value.to_string(),
    })
}

fn extract_json(text: &str, schema: &Schema) -> Result<Value, ObjectValidationError> {
    if text.trim().is_empty() {
        return Err(ObjectValidationError::EmptyResponse {
            raw: text.to_string(),
        });
    }

    let cleaned = strip_code_fence(text);
    if cleaned.len() != text.len() {
        trace!(cleaned_response = %cleaned, "Stripped code fence");
    }

    let value: Value =
        serde_json::from_str(cleaned).map_err(|e| ObjectValidationError::MalformedJson {
            message: e.to_string(),
            raw: text.to_string(),
        })?;

    validate(value, schema)
}

fn extract_tool_call(
    raw: &RawResponse,
    schema: &Schema,
) -> Result<Value, ObjectValidationError> {
    let call = match raw.tool_calls.as_slice() {
        [] => return Err(ObjectValidationError::NoToolCall),
        [call] => call,
        calls => {
            return Err(ObjectValidationError::MultipleToolCalls { count: calls.len() });
        }
    };

    match &call.args {
        None | Some(Value::Null) => Err(ObjectValidationError::MissingToolArguments {
            name: call.name.clone(),
        }),
        Some(args) => validate(args.clone(), schema),
    }
}

fn validate(value: Value, schema: &Schema) -> Result<Value, ObjectValidationError> {
    match schema.validate(&value) {
        Ok(()) => Ok(value),
        Err(message) => Err(ObjectValidationError::SchemaMismatch {
            message,
            raw: value.to_string(),
        }),
    }
}
