//! The optimization loop: evaluate, propose, evaluate again.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};

use crate::{error::Result, provider::LanguageModel, schema::Schema};

use super::config::OptimizerConfig;
use super::dataset::{EvaluationSample, FewShotExample};
use super::evaluator::Evaluator;
use super::history::{InstructionRecord, OptimizationHistory};
use super::proposer::{MetaPromptOptions, Proposer};
use super::scorer::Scorer;

/// Where an [`OptimizationLoop`] currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Init,
    Evaluating,
    Proposing,
    Done,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Evaluating => "evaluating",
            Self::Proposing => "proposing",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Drives instruction search for one schema and one evaluation set.
///
/// The baseline instruction is evaluated first (step 0). Each following step
/// asks the optimizer model for a new instruction and evaluates it, until an
/// instruction scores 1.0 or `max_steps` proposals have been made.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use structured_output_optimizer::prelude::*;
/// # async fn demo(model: Arc<dyn LanguageModel>, schema: Schema) -> Result<()> {
/// let samples = vec![EvaluationSample::new("Jane Doe lives at 12 Oak St.")];
/// let mut run = OptimizationLoop::new(
///     model,
///     schema,
///     samples,
///     "Return the PII spans as JSON.",
///     OptimizerConfig::default(),
/// )?;
/// let history = run.run().await?;
/// println!("{history}");
/// # Ok(())
/// # }
/// ```
pub struct OptimizationLoop {
    run_id: String,
    target: Arc<dyn LanguageModel>,
    optimizer: Arc<dyn LanguageModel>,
    schema: Schema,
    samples: Vec<EvaluationSample>,
    few_shot: Vec<FewShotExample>,
    baseline: String,
    config: Arc<OptimizerConfig>,
    state: LoopState,
    history: OptimizationHistory,
}

impl OptimizationLoop {
    /// Create a loop that uses `target` both for scoring and for proposals.
    pub fn new(
        target: Arc<dyn LanguageModel>,
        schema: Schema,
        samples: Vec<EvaluationSample>,
        baseline: impl Into<String>,
        config: OptimizerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            optimizer: Arc::clone(&target),
            target,
            schema,
            samples,
            few_shot: Vec::new(),
            baseline: baseline.into(),
            config: Arc::new(config),
            state: LoopState::Init,
            history: OptimizationHistory::new(),
        })
    }

    /// Use a different model to write new instructions.
    pub fn with_optimizer(mut self, optimizer: Arc<dyn LanguageModel>) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Worked examples shown to the optimizer model in every meta-prompt.
    pub fn with_few_shot(mut self, examples: Vec<FewShotExample>) -> Self {
        self.few_shot = examples;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Every record so far, including after a failed run.
    pub fn history(&self) -> &OptimizationHistory {
        &self.history
    }

    pub fn into_history(self) -> OptimizationHistory {
        self.history
    }

    /// Run to completion and return the full history.
    ///
    /// Errors from the capability check, the proposal call or proposal
    /// parsing end the run; the records gathered until then remain available
    /// through [`history`](Self::history). A finished loop is not restarted:
    /// calling `run` again returns the existing history.
    pub async fn run(&mut self) -> Result<OptimizationHistory> {
        if self.state == LoopState::Done {
            return Ok(self.history.clone());
        }

        let span = info_span!(
            "optimization",
            run_id = %self.run_id,
            model = self.target.model_id(),
            optimizer = self.optimizer.model_id(),
            samples = self.samples.len(),
        );
        let outcome = self.drive().instrument(span).await;
        if let Err(err) = &outcome {
            warn!(
                run_id = %self.run_id,
                state = %self.state,
                records = self.history.len(),
                error = %err,
                "Optimization stopped early"
            );
        }
        self.transition(LoopState::Done);
        outcome.map(|_| self.history.clone())
    }

    async fn drive(&mut self) -> Result<()> {
        let scorer = Scorer::new(
            Arc::clone(&self.target),
            self.schema.clone(),
            Arc::clone(&self.config),
        )?;
        if let Some(mode) = scorer.mode() {
            info!(%mode, "Selected generation mode");
        }
        let evaluator = Evaluator::new(scorer)
            .with_parallel(self.config.parallel)
            .with_concurrency(self.config.concurrency);
        let proposer = Proposer::new(Arc::clone(&self.optimizer))
            .with_retry(self.config.retry.clone())
            .with_temperature(self.config.proposal_temperature)
            .with_options(MetaPromptOptions {
                top_k: self.config.top_k,
                direction: self.config.direction,
                include_error_examples: self.config.include_error_examples,
            });

        let baseline = self.baseline.clone();
        if self.evaluate_step(&evaluator, 0, baseline).await {
            return Ok(());
        }

        for step in 1..=self.config.max_steps {
            self.transition(LoopState::Proposing);
            let instruction = proposer
                .propose(&self.history, &self.few_shot, self.config.direction)
                .await?;
            if self.evaluate_step(&evaluator, step, instruction).await {
                return Ok(());
            }
        }

        info!(
            max_steps = self.config.max_steps,
            best = self.history.best().map(|r| r.score()).unwrap_or(0.0),
            "Step budget exhausted"
        );
        Ok(())
    }

    /// Evaluate one instruction and append its record. Returns true when the
    /// instruction scored perfectly.
    async fn evaluate_step(
        &mut self,
        evaluator: &Evaluator,
        step: usize,
        instruction: String,
    ) -> bool {
        self.transition(LoopState::Evaluating);
        let result = evaluator.evaluate(&self.samples, &instruction).await;
        let perfect = result.accuracy >= 1.0;
        info!(
            step,
            score = result.accuracy,
            errors = result.errors.len(),
            %instruction,
            "Instruction evaluated"
        );
        self.history
            .push(InstructionRecord::new(step, instruction, result));

        if perfect {
            info!(step, "Perfect score reached; stopping");
        }
        perfect
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Optimization state change");
            self.state = next;
        }
    }
}
