use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::{
    error::Result,
    extract::{check_json, extract, Validity},
    models::{ChatMessage, GenerationMode, GenerationRequest, RawResponse, Usage},
    provider::LanguageModel,
    schema::Schema,
};

use super::config::{OptimizerConfig, ValidityCriterion};

/// Verdict for one sample under one instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleScore {
    pub valid: bool,
    pub error: Option<String>,
    /// Raw model output (empty when every call attempt failed).
    pub raw_response: String,
    pub usage: Usage,
    /// Network calls made, including retries.
    pub attempts: usize,
    pub latency: Duration,
}

impl SampleScore {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            raw_response: String::new(),
            usage: Usage::default(),
            attempts: 0,
            latency: Duration::default(),
        }
    }
}

/// Scores a single (input, instruction) pair: one model call plus a validity check.
///
/// Scoring never fails. Call errors that survive the retry policy and invalid
/// output both become an invalid [`SampleScore`] carrying the error message.
#[derive(Clone)]
pub struct Scorer {
    model: Arc<dyn LanguageModel>,
    schema: Schema,
    config: Arc<OptimizerConfig>,
    mode: Option<GenerationMode>,
}

impl Scorer {
    /// Create a scorer for `model`.
    ///
    /// With [`ValidityCriterion::Schema`] the generation mode is selected here,
    /// once, so a model without structured output support is rejected before
    /// any sample is scored.
    pub fn new(
        model: Arc<dyn LanguageModel>,
        schema: Schema,
        config: Arc<OptimizerConfig>,
    ) -> Result<Self> {
        let mode = match config.criterion {
            ValidityCriterion::Json => None,
            ValidityCriterion::Schema => Some(GenerationMode::select(&model.capabilities())?),
        };
        Ok(Self {
            model,
            schema,
            config,
            mode,
        })
    }

    pub fn mode(&self) -> Option<GenerationMode> {
        self.mode
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Build the request for one sample.
    pub fn request(&self, input: &str, instruction: &str) -> GenerationRequest {
        let request = GenerationRequest::new(
            Some(self.schema.system_prompt(instruction)),
            vec![ChatMessage::user(self.config.render_task(input))],
        )
        .with_temperature(self.config.temperature);

        match self.mode {
            Some(mode) => request.for_mode(mode, &self.schema),
            None => request,
        }
    }

    pub async fn score(&self, input: &str, instruction: &str) -> SampleScore {
        let request = self.request(input, instruction);
        let start = Instant::now();
        let mut attempts = 0usize;

        let outcome = self
            .config
            .retry
            .run(self.model.model_id(), |attempt| {
                attempts = attempt + 1;
                self.model.generate(request.clone())
            })
            .await;

        match outcome {
            Ok(done) => {
                let raw = done.value;
                let Validity { valid, error } = self.judge(&raw);
                trace!(valid, raw_response = %raw.text, "Scored sample");
                SampleScore {
                    valid,
                    error,
                    raw_response: raw.display_text(),
                    usage: raw.usage,
                    attempts: done.attempts,
                    latency: start.elapsed(),
                }
            }
            Err(err) => {
                warn!(attempts, error = %err, "Model call failed; sample scored invalid");
                SampleScore {
                    attempts,
                    latency: start.elapsed(),
                    ..SampleScore::failed(err.to_string())
                }
            }
        }
    }

    fn judge(&self, raw: &RawResponse) -> Validity {
        match self.mode {
            None => check_json(&raw.text),
            Some(mode) => match extract(raw, mode, &self.schema) {
                Ok(_) => Validity::ok(),
                Err(err) => Validity::invalid(err.to_string()),
            },
        }
    }
}
