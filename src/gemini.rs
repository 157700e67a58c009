//! [`LanguageModel`] backed by the Gemini API through `gemini-rust`.
//!
//! Only JSON mode is declared: requests that carry a response schema are sent
//! with `application/json` as the response MIME type and the schema in the
//! generation config.

use std::time::Duration;

use async_trait::async_trait;
use gemini_rust::{
    generation::model::FinishReason as GeminiFinishReason, ClientError, Gemini, GenerationConfig,
    GenerationResponse, Message, Model,
};
use tracing::debug;

use crate::{
    error::{CallError, Result},
    models::{
        Capabilities, ChatRole, FinishReason, GenerationRequest, RawResponse, ToolCall, Usage,
    },
    provider::LanguageModel,
};

/// Connection settings supplied by the host application.
#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: Model,
}

impl GeminiSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: Model::Gemini25Flash,
        }
    }

    pub fn with_model(mut self, model: Model) -> Self {
        self.model = model;
        self
    }
}

pub struct GeminiModel {
    client: Gemini,
    model_id: String,
}

impl GeminiModel {
    pub fn new(settings: GeminiSettings) -> Result<Self> {
        let model_id = settings.model.as_str().to_string();
        let client = Gemini::with_model(&settings.api_key, settings.model)?;
        Ok(Self { client, model_id })
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::json_only()
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<RawResponse, CallError> {
        let mut builder = self.client.generate_content();
        if let Some(system) = request.system.clone() {
            builder = builder.with_system_instruction(system);
        }
        for message in &request.messages {
            builder = match message.role {
                ChatRole::Assistant => {
                    builder.with_message(Message::model(message.content.clone()))
                }
                _ => builder.with_message(Message::user(message.content.clone())),
            };
        }

        let mut config = GenerationConfig {
            temperature: request.temperature,
            ..Default::default()
        };
        if let Some(schema) = &request.response_schema {
            config.response_schema = Some(schema.document().clone());
            config.response_mime_type = Some("application/json".to_string());
        }

        debug!(
            model = %self.model_id,
            json_mode = request.response_schema.is_some(),
            messages = request.messages.len(),
            "Sending Gemini request"
        );
        let response = builder
            .with_generation_config(config)
            .execute()
            .await
            .map_err(classify)?;
        Ok(self.convert(response))
    }
}

impl GeminiModel {
    fn convert(&self, response: GenerationResponse) -> RawResponse {
        let tool_calls = response
            .function_calls()
            .into_iter()
            .map(|call| ToolCall {
                id: None,
                name: call.name.clone(),
                args: Some(call.args.clone()),
            })
            .collect();

        let usage = response
            .usage_metadata
            .as_ref()
            .map(|u| {
                Usage::new(
                    u.prompt_token_count.unwrap_or(0).max(0) as u64,
                    u.candidates_token_count.unwrap_or(0).max(0) as u64,
                )
            })
            .unwrap_or_default();

        let finish_reason = response
            .candidates
            .first()
            .and_then(|c| c.finish_reason.as_ref())
            .map(finish_reason)
            .unwrap_or_default();

        RawResponse {
            text: response.text(),
            tool_calls,
            usage,
            finish_reason,
            response_id: response.response_id.clone(),
            model_id: response
                .model_version
                .clone()
                .or_else(|| Some(self.model_id.clone())),
        }
    }
}

fn finish_reason(reason: &GeminiFinishReason) -> FinishReason {
    match reason {
        GeminiFinishReason::Stop => FinishReason::Stop,
        GeminiFinishReason::MaxTokens => FinishReason::Length,
        GeminiFinishReason::Safety
        | GeminiFinishReason::Recitation
        | GeminiFinishReason::Blocklist
        | GeminiFinishReason::ProhibitedContent => FinishReason::ContentFilter,
        other => FinishReason::Other(format!("{other:?}")),
    }
}

/// Map a client error to a [`CallError`]. HTTP statuses decide retryability;
/// a `retryDelay` from the error body overrides the backoff.
fn classify(err: ClientError) -> CallError {
    match &err {
        ClientError::BadResponse { code, description } => {
            let status = u16::try_from(*code).unwrap_or_default();
            let message = description.clone().unwrap_or_else(|| err.to_string());
            let delay = description.as_deref().and_then(retry_delay_from_body);
            let call = CallError::from_status(status, message);
            match delay {
                Some(delay) => call.with_retry_after(delay),
                None => call,
            }
        }
        _ => CallError::fatal(err.to_string()),
    }
}

/// Pull the server's suggested delay out of an error body, either from a
/// `google.rpc.RetryInfo` detail or from text like "Please retry in 57s.".
fn retry_delay_from_body(body: &str) -> Option<Duration> {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        let details = json
            .get("error")
            .and_then(|e| e.get("details"))
            .and_then(|d| d.as_array());
        for detail in details.into_iter().flatten() {
            if detail.get("@type").and_then(|t| t.as_str())
                == Some("type.googleapis.com/google.rpc.RetryInfo")
            {
                if let Some(delay) = detail.get("retryDelay").and_then(|d| d.as_str()) {
                    return parse_delay(delay);
                }
            }
        }
    }

    let lower = body.to_lowercase();
    let start = lower.find("retry in ")? + "retry in ".len();
    let rest = &lower[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit() && c != '.' && c != 'm' && c != 's')
        .unwrap_or(rest.len());
    parse_delay(&rest[..end])
}

/// "44s", "44.5s" or "500ms".
fn parse_delay(text: &str) -> Option<Duration> {
    let text = text.trim().trim_end_matches('.');
    if let Some(ms) = text.strip_suffix("ms") {
        let ms = ms.parse::<f64>().ok()?;
        return Duration::try_from_secs_f64(ms / 1000.0).ok();
    }
    let secs = text.strip_suffix('s')?.parse::<f64>().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_retry_info_detail() {
        let body = serde_json::json!({
            "error": {
                "code": 429,
                "details": [{
                    "@type": "type.googleapis.com/google.rpc.RetryInfo",
                    "retryDelay": "44s"
                }]
            }
        })
        .to_string();
        assert_eq!(retry_delay_from_body(&body), Some(Duration::from_secs(44)));
    }

    #[test]
    fn parses_retry_hint_in_text() {
        assert_eq!(
            retry_delay_from_body("Quota exceeded. Please retry in 500ms."),
            Some(Duration::from_millis(500))
        );
        assert_eq!(retry_delay_from_body("Quota exceeded."), None);
    }

    #[test]
    fn finish_reasons_map_to_neutral_values() {
        assert_eq!(finish_reason(&GeminiFinishReason::Stop), FinishReason::Stop);
        assert_eq!(finish_reason(&GeminiFinishReason::MaxTokens), FinishReason::Length);
        assert_eq!(
            finish_reason(&GeminiFinishReason::Safety),
            FinishReason::ContentFilter
        );
        assert_eq!(
            finish_reason(&GeminiFinishReason::ProhibitedContent),
            FinishReason::ContentFilter
        );
    }

    #[test]
    fn out_of_range_retry_hint_is_ignored() {
        assert_eq!(
            retry_delay_from_body("Please retry in 99999999999999999999999s."),
            None
        );
        assert_eq!(parse_delay("-3s"), None);
        assert_eq!(parse_delay("infs"), None);
    }
}
