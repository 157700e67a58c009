use std::sync::{Arc, Mutex};

use serde_json::json;
use structured_output_optimizer::{
    EvaluationSample, LoopState, MockModel, OptimizationLoop, OptimizerConfig, RawResponse,
    RetryPolicy, Schema,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn schema() -> Schema {
    Schema::from_json(
        "pii",
        json!({
            "type": "object",
            "properties": { "pii_spans": { "type": "array", "items": { "type": "string" } } },
            "required": ["pii_spans"]
        }),
    )
    .unwrap()
}

fn samples(n: usize) -> Vec<EvaluationSample> {
    (0..n)
        .map(|i| EvaluationSample::new(format!("sample-{i}")))
        .collect()
}

fn config(max_steps: usize, parallel: bool) -> OptimizerConfig {
    let builder = OptimizerConfig::builder()
        .with_max_steps(max_steps)
        .with_retry(RetryPolicy::immediate(3))
        .with_task_template("Extract the PII from the following text: {input}");
    let builder = if parallel {
        builder.with_concurrency(4)
    } else {
        builder.sequential()
    };
    builder.build().unwrap()
}

/// The baseline yields 6 valid outputs out of 10; the single proposal yields 10.
fn target() -> MockModel {
    MockModel::new("target", |req| {
        let system = req.system_instruction.unwrap_or_default();
        let index: usize = req
            .prompt
            .rsplit('-')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        if system.contains("Return bare JSON.") || index < 6 {
            Ok(RawResponse::text(r#"{"pii_spans": []}"#))
        } else {
            Ok(RawResponse::text("{\"pii_spans\": [\"unterminated"))
        }
    })
}

#[tokio::test]
async fn one_proposal_from_point_six_to_perfect() {
    init_tracing();
    for parallel in [false, true] {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&prompts);
        let optimizer = MockModel::new("optimizer", move |req| {
            seen.lock().unwrap().push(req.prompt.clone());
            Ok(RawResponse::text("<INS>Return bare JSON.</INS>"))
        });
        let optimizer_calls = optimizer.clone();

        let mut run = OptimizationLoop::new(
            Arc::new(target()),
            schema(),
            samples(10),
            "Extract the PII.",
            config(10, parallel),
        )
        .unwrap()
        .with_optimizer(Arc::new(optimizer));
        let history = run.run().await.unwrap();

        assert_eq!(optimizer_calls.calls(), 1);
        assert_eq!(history.len(), 2);
        assert!((history.records()[0].score() - 0.6).abs() < 1e-9);
        assert_eq!(history.records()[0].errors().len(), 4);
        assert_eq!(history.records()[1].score(), 1.0);

        let best = history.best().unwrap();
        assert_eq!(best.step(), 1);
        assert_eq!(best.instruction(), "Return bare JSON.");

        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts[0].matches("<Instruction>").count(), 1);
        assert!(prompts[0].contains("<Score> 0.6</Score>"));
        assert!(prompts[0].contains("<INS>Extract the PII.</INS>"));
        assert!(prompts[0].contains("<Error>Failed to parse JSON"));
        assert_eq!(run.state(), LoopState::Done);
    }
}

#[tokio::test]
async fn meta_prompt_never_shows_more_than_five_records() {
    init_tracing();
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&prompts);
    let optimizer = MockModel::new("optimizer", move |req| {
        seen.lock().unwrap().push(req.prompt.clone());
        Ok(RawResponse::text(format!("<INS>candidate {}</INS>", req.call_index)))
    });
    // Candidate k is valid on k of the 8 samples, so scores keep climbing.
    let target = MockModel::new("target", |req| {
        let system = req.system_instruction.unwrap_or_default();
        let level: usize = system
            .split("candidate ")
            .nth(1)
            .and_then(|rest| rest.trim().parse().ok())
            .unwrap_or(0);
        let index: usize = req
            .prompt
            .rsplit('-')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        if index < level {
            Ok(RawResponse::text("{}"))
        } else {
            Ok(RawResponse::text("not json"))
        }
    });

    let mut run = OptimizationLoop::new(
        Arc::new(target),
        schema(),
        samples(8),
        "baseline",
        config(7, true),
    )
    .unwrap()
    .with_optimizer(Arc::new(optimizer));
    let history = run.run().await.unwrap();
    assert_eq!(history.len(), 8);

    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts.len(), 7);
    for prompt in prompts.iter() {
        assert!(prompt.matches("<Instruction>").count() <= 5);
        let scores: Vec<f64> = prompt
            .split("<Score> ")
            .skip(1)
            .filter_map(|rest| rest.split("</Score>").next())
            .filter_map(|s| s.parse().ok())
            .collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]), "{scores:?}");
    }
    assert!(prompts[6].contains("<INS>candidate 5</INS>"));
    assert!(!prompts[6].contains("<INS>baseline</INS>"));
}

#[tokio::test]
async fn budget_is_respected_when_nothing_improves() {
    let target = MockModel::fixed("target", "I cannot help with that.");
    let optimizer = MockModel::fixed("optimizer", "<INS>Try harder.</INS>");
    let optimizer_calls = optimizer.clone();

    let mut run = OptimizationLoop::new(
        Arc::new(target),
        schema(),
        samples(3),
        "baseline",
        config(3, false),
    )
    .unwrap()
    .with_optimizer(Arc::new(optimizer));
    let history = run.run().await.unwrap();

    assert_eq!(history.len(), 4);
    assert_eq!(optimizer_calls.calls(), 3);
    assert_eq!(history.best().unwrap().step(), 0);
}
