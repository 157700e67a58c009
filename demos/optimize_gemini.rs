//! Instruction optimization against the Gemini API.
//!
//! Requires `GEMINI_API_KEY`. Run with
//! `RUST_LOG=info cargo run --example optimize_gemini --features gemini`.

use std::{env, sync::Arc};

use gemini_rust::Model;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use structured_output_optimizer::{
    EvaluationSample, GeminiModel, GeminiSettings, OptimizationLoop, OptimizerConfig,
    RetryPolicy, Schema, ValidityCriterion,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct PiiSpans {
    /// Verbatim personal data found in the text (names, phone numbers, addresses).
    pii_spans: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let api_key = env::var("GEMINI_API_KEY")?;
    let target = GeminiModel::new(GeminiSettings::new(&api_key).with_model(Model::Gemini25Flash))?;
    let optimizer = GeminiModel::new(GeminiSettings::new(&api_key).with_model(Model::Gemini25Pro))?;

    let samples = [
        "Jane Doe lives at 12 Oak Street, Springfield.",
        "Call Bob Marley on +44 20 7946 0958 after six.",
        "The quarterly meeting moved to Thursday.",
        "Send the signed invoice to maria.lopez@example.com.",
        "Dr. Anil Patel examined the patient, DOB 04/07/1981.",
        "Nothing personal in this sentence at all.",
    ]
    .into_iter()
    .map(EvaluationSample::new)
    .collect();

    let config = OptimizerConfig::builder()
        .with_max_steps(5)
        .with_concurrency(4)
        .with_criterion(ValidityCriterion::Schema)
        .with_retry(RetryPolicy::default())
        .with_task_template("Extract the PII from the following text: {input}")
        .with_error_examples(true)
        .build()?;

    let mut run = OptimizationLoop::new(
        Arc::new(target),
        Schema::of::<PiiSpans>()?,
        samples,
        "Return the PII spans.",
        config,
    )?
    .with_optimizer(Arc::new(optimizer));

    let history = run.run().await?;
    println!("{history}");
    Ok(())
}
