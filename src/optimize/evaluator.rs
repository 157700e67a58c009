use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument};

use crate::models::Usage;

use super::dataset::EvaluationSample;
use super::scorer::{SampleScore, Scorer};

/// Aggregated validity of one instruction over an evaluation set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationResult {
    /// `valid / total`, in `[0, 1]`.
    pub accuracy: f64,
    /// One message per failed sample, in submission order. Duplicates are kept.
    pub errors: Vec<String>,
    /// For each distinct message, the raw response of its first occurrence.
    pub error_examples: HashMap<String, String>,
    pub total: usize,
    pub valid: usize,
    pub usage: Usage,
    pub elapsed: Duration,
}

impl EvaluationResult {
    /// Merge per-sample scores in the order given.
    ///
    /// This is the only place results are combined, for both sequential and
    /// concurrent evaluation, so first-occurrence semantics follow submission order.
    pub fn aggregate(scores: impl IntoIterator<Item = SampleScore>) -> Self {
        let mut result = Self::default();
        for score in scores {
            result.total += 1;
            result.usage.add(&score.usage);
            if score.valid {
                result.valid += 1;
                continue;
            }
            let message = score
                .error
                .unwrap_or_else(|| "Sample marked invalid but no message was provided".to_string());
            result
                .error_examples
                .entry(message.clone())
                .or_insert(score.raw_response);
            result.errors.push(message);
        }
        result.accuracy = if result.total == 0 {
            0.0
        } else {
            result.valid as f64 / result.total as f64
        };
        result
    }

    pub fn is_perfect(&self) -> bool {
        self.total > 0 && self.valid == self.total
    }
}

impl fmt::Display for EvaluationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Accuracy: {:.3} | Valid: {}/{} | Elapsed: {:.2}s",
            self.accuracy,
            self.valid,
            self.total,
            self.elapsed.as_secs_f64()
        )?;
        writeln!(
            f,
            "Tokens: Prompt {} | Completion {}",
            self.usage.prompt_tokens, self.usage.completion_tokens
        )?;
        if !self.errors.is_empty() {
            writeln!(f, "--- Failures ---")?;
            for message in &self.errors {
                writeln!(f, "- {message}")?;
            }
        }
        Ok(())
    }
}

/// Runs a [`Scorer`] over an evaluation set.
#[derive(Clone)]
pub struct Evaluator {
    scorer: Scorer,
    parallel: bool,
    concurrency: usize,
}

impl Evaluator {
    pub fn new(scorer: Scorer) -> Self {
        Self {
            scorer,
            parallel: true,
            concurrency: 8,
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    /// Score `instruction` on every sample. Every sample counts toward the total,
    /// including ones whose model calls never succeeded.
    #[instrument(
        skip_all,
        fields(model = self.scorer.model_id(), samples = samples.len(), parallel = self.parallel)
    )]
    pub async fn evaluate(
        &self,
        samples: &[EvaluationSample],
        instruction: &str,
    ) -> EvaluationResult {
        let start = Instant::now();
        let scores = if self.parallel {
            self.score_concurrently(samples, instruction).await
        } else {
            self.score_sequentially(samples, instruction).await
        };

        let mut result = EvaluationResult::aggregate(scores);
        result.elapsed = start.elapsed();
        info!(
            accuracy = result.accuracy,
            valid = result.valid,
            total = result.total,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Evaluation finished"
        );
        result
    }

    async fn score_sequentially(
        &self,
        samples: &[EvaluationSample],
        instruction: &str,
    ) -> Vec<SampleScore> {
        let mut scores = Vec::with_capacity(samples.len());
        for sample in samples {
            scores.push(self.scorer.score(&sample.input, instruction).await);
        }
        scores
    }

    /// Fan out one task per sample behind a semaphore, then collect in submission order.
    async fn score_concurrently(
        &self,
        samples: &[EvaluationSample],
        instruction: &str,
    ) -> Vec<SampleScore> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let instruction: Arc<str> = Arc::from(instruction);
        let mut handles = Vec::with_capacity(samples.len());

        debug!(concurrency = self.concurrency, "Spawning evaluation workers");
        for sample in samples {
            let scorer = self.scorer.clone();
            let semaphore = Arc::clone(&semaphore);
            let instruction = Arc::clone(&instruction);
            let input = sample.input.clone();

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return SampleScore::failed(format!("evaluation worker failed: {e}")),
                };
                scorer.score(&input, &instruction).await
            }));
        }

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(score) => score,
                Err(e) => SampleScore::failed(format!("evaluation worker failed: {e}")),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> SampleScore {
        SampleScore {
            valid: true,
            error: None,
            raw_response: "{}".into(),
            usage: Usage::new(3, 2),
            attempts: 1,
            latency: Duration::default(),
        }
    }

    fn invalid(error: &str, raw: &str) -> SampleScore {
        SampleScore {
            raw_response: raw.into(),
            usage: Usage::new(3, 2),
            attempts: 1,
            ..SampleScore::failed(error)
        }
    }

    #[test]
    fn aggregate_counts_and_keeps_first_example() {
        let result = EvaluationResult::aggregate(vec![
            valid(),
            invalid("bad json", "first"),
            invalid("timeout", ""),
            invalid("bad json", "second"),
            valid(),
        ]);

        assert_eq!(result.total, 5);
        assert_eq!(result.valid, 2);
        assert!((result.accuracy - 0.4).abs() < f64::EPSILON);
        assert_eq!(result.errors, vec!["bad json", "timeout", "bad json"]);
        assert_eq!(result.error_examples.len(), 2);
        assert_eq!(result.error_examples["bad json"], "first");
        assert_eq!(result.usage.total_tokens(), 25);
    }

    #[test]
    fn aggregate_of_nothing_is_zero() {
        let result = EvaluationResult::aggregate(Vec::new());
        assert_eq!(result.accuracy, 0.0);
        assert!(!result.is_perfect());
    }

    #[test]
    fn display_lists_failures() {
        let result = EvaluationResult::aggregate(vec![valid(), invalid("bad json", "x")]);
        let text = result.to_string();
        assert!(text.contains("Valid: 1/2"));
        assert!(text.contains("- bad json"));
    }
}
