//! One-shot generation entry points.
//!
//! [`generate_text`] is a plain round trip. [`generate_object`] picks a
//! [`GenerationMode`] from the model's capabilities, asks for output in that mode
//! and runs the result through the extractor.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::{
    error::{OptimizerError, Result},
    extract::{extract, extract_as},
    models::{
        standardize_messages, ChatMessage, FinishReason, GenerationMode, GenerationRequest,
        RawResponse, Usage,
    },
    provider::LanguageModel,
    retry::{Attempted, RetryPolicy},
    schema::Schema,
};

/// Options shared by both entry points.
#[derive(Debug, Clone, Default)]
pub struct TextOptions {
    pub system: Option<String>,
    pub prompt: Option<String>,
    pub messages: Option<Vec<ChatMessage>>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub seed: Option<u64>,
    pub retry: RetryPolicy,
}

impl TextOptions {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn into_request(self) -> Result<(GenerationRequest, RetryPolicy)> {
        let (system, messages) = standardize_messages(self.system, self.prompt, self.messages)?;
        let request = GenerationRequest {
            system,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            seed: self.seed,
            ..Default::default()
        };
        Ok((request, self.retry))
    }
}

/// Options for [`generate_object`].
#[derive(Debug, Clone, Default)]
pub struct ObjectOptions {
    pub text: TextOptions,
    /// Tool name used in tool-call mode (default: `json_object`).
    pub schema_name: Option<String>,
    /// Tool description used in tool-call mode.
    pub schema_description: Option<String>,
}

impl ObjectOptions {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            text: TextOptions::prompt(prompt),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.text.system = Some(system.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.text.retry = retry;
        self
    }

    pub fn with_schema_name(mut self, name: impl Into<String>) -> Self {
        self.schema_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct TextResult {
    pub text: String,
    pub usage: Usage,
    pub finish_reason: FinishReason,
    pub response_id: Option<String>,
    /// How many network calls (including retries) were made.
    pub attempts: usize,
}

#[derive(Debug, Clone)]
pub struct ObjectResult<T = Value> {
    pub object: T,
    pub usage: Usage,
    pub finish_reason: FinishReason,
    pub mode: GenerationMode,
    pub response_id: Option<String>,
    /// How many network calls (including retries) were made.
    pub attempts: usize,
}

/// Issue `request` under `retry`, returning the raw response and attempt count.
pub(crate) async fn call_with_retry(
    model: &dyn LanguageModel,
    request: &GenerationRequest,
    retry: &RetryPolicy,
) -> std::result::Result<Attempted<RawResponse>, crate::error::CallError> {
    let label = model.model_id().to_string();
    retry
        .run(&label, |_| model.generate(request.clone()))
        .await
}

/// Generate free-form text.
#[instrument(skip_all, fields(model = model.model_id()))]
pub async fn generate_text(model: &dyn LanguageModel, options: TextOptions) -> Result<TextResult> {
    let (request, retry) = options.into_request()?;
    let Attempted { value, attempts } = call_with_retry(model, &request, &retry).await?;
    debug!(attempts, tokens = value.usage.total_tokens(), "Text generation finished");

    Ok(TextResult {
        text: value.text,
        usage: value.usage,
        finish_reason: value.finish_reason,
        response_id: value.response_id,
        attempts,
    })
}

/// Generate a schema-validated JSON value.
///
/// Fails with [`OptimizerError::UnsupportedFunctionality`] before any call when the
/// model supports neither JSON mode nor tool calls.
#[instrument(skip_all, fields(model = model.model_id(), schema = schema.name()))]
pub async fn generate_object(
    model: &dyn LanguageModel,
    schema: &Schema,
    options: ObjectOptions,
) -> Result<ObjectResult<Value>> {
    let (mode, raw, attempts) = generate_raw_object(model, schema, options).await?;
    let object = extract(&raw, mode, schema)?;
    Ok(object_result(object, raw, mode, attempts))
}

/// Same as [`generate_object`] but deserializes into `T`.
#[instrument(skip_all, fields(model = model.model_id(), target = std::any::type_name::<T>()))]
pub async fn generate_object_as<T: DeserializeOwned>(
    model: &dyn LanguageModel,
    schema: &Schema,
    options: ObjectOptions,
) -> Result<ObjectResult<T>> {
    let (mode, raw, attempts) = generate_raw_object(model, schema, options).await?;
    let object = extract_as::<T>(&raw, mode, schema)?;
    Ok(object_result(object, raw, mode, attempts))
}

async fn generate_raw_object(
    model: &dyn LanguageModel,
    schema: &Schema,
    options: ObjectOptions,
) -> Result<(GenerationMode, RawResponse, usize)> {
    let mode = GenerationMode::select(&model.capabilities())?;
    let ObjectOptions {
        text,
        schema_name,
        schema_description,
    } = options;
    let (request, retry) = text.into_request()?;
    let request = request.for_mode_named(
        mode,
        schema,
        schema_name.as_deref(),
        schema_description.as_deref(),
    );

    debug!(%mode, "Requesting structured object");
    let Attempted { value, attempts } = call_with_retry(model, &request, &retry)
        .await
        .map_err(OptimizerError::Call)?;
    Ok((mode, value, attempts))
}

fn object_result<T>(
    object: T,
    raw: RawResponse,
    mode: GenerationMode,
    attempts: usize,
) -> ObjectResult<T> {
    ObjectResult {
        object,
        usage: raw.usage,
        finish_reason: raw.finish_reason,
        mode,
        response_id: raw.response_id,
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CallError, ObjectValidationError};
    use crate::mock::MockModel;
    use crate::models::{Capabilities, ToolCall, DEFAULT_TOOL_NAME};
    use serde_json::json;

    fn schema() -> Schema {
        Schema::from_json(
            "recipe",
            json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "steps": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["name", "steps"]
            }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn unsupported_model_fails_before_any_call() {
        let model = MockModel::fixed("plain", "{}").with_capabilities(Capabilities::none());
        let err = generate_object(&model, &schema(), ObjectOptions::prompt("lasagna"))
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizerError::UnsupportedFunctionality { .. }));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn json_mode_sends_response_schema() {
        let model = MockModel::new("json", |req| {
            assert!(req.json_mode);
            assert!(req.tool_names.is_empty());
            Ok(RawResponse::text(r#"{"name": "Lasagna", "steps": ["bake"]}"#))
        });
        let result = generate_object(&model, &schema(), ObjectOptions::prompt("lasagna"))
            .await
            .unwrap();
        assert_eq!(result.mode, GenerationMode::Json);
        assert_eq!(result.object["name"], "Lasagna");
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn tool_mode_uses_default_tool_name() {
        let model = MockModel::new("tools", |req| {
            assert!(!req.json_mode);
            assert_eq!(req.tool_names, vec![DEFAULT_TOOL_NAME.to_string()]);
            Ok(RawResponse::tool_calls(vec![ToolCall::new(
                DEFAULT_TOOL_NAME,
                json!({"name": "Soup", "steps": []}),
            )]))
        })
        .with_capabilities(Capabilities::tools_only());

        let result = generate_object(&model, &schema(), ObjectOptions::prompt("soup"))
            .await
            .unwrap();
        assert_eq!(result.mode, GenerationMode::ToolCall);
        assert_eq!(result.object["name"], "Soup");
    }

    #[tokio::test]
    async fn tool_mode_rejects_two_invocations() {
        let model = MockModel::new("tools", |_| {
            Ok(RawResponse::tool_calls(vec![
                ToolCall::new(DEFAULT_TOOL_NAME, json!({"name": "a", "steps": []})),
                ToolCall::new(DEFAULT_TOOL_NAME, json!({"name": "b", "steps": []})),
            ]))
        })
        .with_capabilities(Capabilities::tools_only());

        let err = generate_object(&model, &schema(), ObjectOptions::prompt("two"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OptimizerError::Validation(ObjectValidationError::MultipleToolCalls { count: 2 })
        ));
    }

    #[tokio::test]
    async fn retryable_failures_are_retried_then_succeed() {
        let model = MockModel::scripted(
            "flaky",
            vec![
                Err(CallError::from_status(503, "overloaded")),
                Ok(RawResponse::text(r#"{"name": "x", "steps": []}"#)),
            ],
        );
        let result = generate_object(
            &model,
            &schema(),
            ObjectOptions::prompt("x").with_retry(RetryPolicy::immediate(3)),
        )
        .await
        .unwrap();
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn fatal_call_errors_surface() {
        let model =
            MockModel::scripted("bad", vec![Err(CallError::from_status(400, "bad request"))]);
        let err = generate_text(
            &model,
            TextOptions::prompt("hi").with_retry(RetryPolicy::immediate(3)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OptimizerError::Call(ref e) if e.status == Some(400)));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn typed_generation_deserializes() {
        #[derive(serde::Deserialize)]
        struct Recipe {
            name: String,
            steps: Vec<String>,
        }
        let model = MockModel::fixed(
            "json",
            "```json\n{\"name\": \"Pie\", \"steps\": [\"mix\", \"bake\"]}\n```",
        );
        let result = generate_object_as::<Recipe>(&model, &schema(), ObjectOptions::prompt("pie"))
            .await
            .unwrap();
        assert_eq!(result.object.name, "Pie");
        assert_eq!(result.object.steps.len(), 2);
    }
}
