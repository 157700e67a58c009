//! Offline instruction optimization against scripted mock models.
//!
//! The target model only answers with bare JSON once the instruction tells it to
//! skip commentary; before that it wraps the object in prose. The optimizer model
//! proposes increasingly strict instructions.
//!
//! Run with `RUST_LOG=info cargo run --example optimize_mock`.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use structured_output_optimizer::{
    few_shot_split, EvaluationSample, MockModel, OptimizationLoop, OptimizerConfig, RawResponse,
    RetryPolicy, Schema,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct PiiSpans {
    /// Verbatim personal data found in the text (names, phone numbers, addresses).
    pii_spans: Vec<String>,
}

const PROPOSALS: [&str; 3] = [
    "<INS>Extract every piece of personal data and answer in JSON.</INS>",
    "<INS>Answer with JSON only, using code fences if you like.</INS>",
    "<INS>Return only raw JSON with no commentary before or after it.</INS>",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let target = MockModel::new("mock-target", |req| {
        let system = req.system_instruction.unwrap_or_default();
        let body = json!({ "pii_spans": [req.prompt.len().to_string()] }).to_string();
        let text = if system.contains("no commentary") {
            body
        } else if system.contains("code fences") {
            format!("```json\n{body}\n```")
        } else {
            format!("Sure! Here is what I found: {body}")
        };
        Ok(RawResponse::text(text))
    });
    let optimizer = MockModel::new("mock-optimizer", |req| {
        let reply = PROPOSALS[req.call_index.min(PROPOSALS.len() - 1)];
        Ok(RawResponse::text(format!("Here is my suggestion:\n{reply}")))
    });

    let rows: Vec<EvaluationSample> = [
        ("Jane Doe lives at 12 Oak Street.", json!(["Jane Doe", "12 Oak Street"])),
        ("Call Bob on 555-0100 after six.", json!(["Bob", "555-0100"])),
        ("The meeting moved to Thursday.", json!([])),
        ("Send the invoice to maria@example.com.", json!(["maria@example.com"])),
        ("Dr. Patel signed the form in Leeds.", json!(["Dr. Patel", "Leeds"])),
        ("Nothing personal in this sentence.", json!([])),
    ]
    .into_iter()
    .map(|(input, expected)| EvaluationSample::new(input).with_expected(expected))
    .collect();
    let (few_shot, samples) = few_shot_split(&rows, 2, 10);

    let config = OptimizerConfig::builder()
        .with_max_steps(5)
        .with_concurrency(4)
        .with_retry(RetryPolicy::immediate(2))
        .with_task_template("Extract the PII from the following text: {input}")
        .build()?;

    let mut run = OptimizationLoop::new(
        Arc::new(target),
        Schema::of::<PiiSpans>()?,
        samples,
        "Find the personal data.",
        config,
    )?
    .with_optimizer(Arc::new(optimizer))
    .with_few_shot(few_shot);

    let history = run.run().await?;
    println!("{history}");
    if let Some(best) = history.best() {
        println!("Best instruction ({:.2}): {}", best.score(), best.instruction());
    }
    Ok(())
}
