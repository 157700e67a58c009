use serde::{Deserialize, Serialize};

use crate::{
    error::{OptimizerError, Result},
    retry::RetryPolicy,
};

/// Placeholder replaced by the sample input in [`OptimizerConfig::task_template`].
pub const INPUT_PLACEHOLDER: &str = "{input}";

pub const DEFAULT_TASK_TEMPLATE: &str =
    "Extract the requested data from the following text: {input}";

/// Whether the proposer should push scores up or down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Maximize,
    Minimize,
}

impl Direction {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Maximize => "maximizes",
            Self::Minimize => "minimizes",
        }
    }
}

/// What counts as a valid response when scoring an instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityCriterion {
    /// The fence-stripped response text parses as JSON.
    #[default]
    Json,
    /// The response, requested in the model's generation mode, satisfies the full schema.
    Schema,
}

/// Settings for an optimization run.
///
/// Built by the host once and handed down; nothing in the crate reads the
/// environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum proposal cycles after the baseline evaluation (default: 10)
    pub max_steps: usize,
    /// Evaluate samples concurrently (default: true)
    pub parallel: bool,
    /// Worker limit for concurrent evaluation (default: 8)
    pub concurrency: usize,
    /// Retry policy for every model call (default: 3 attempts, 1s doubling)
    pub retry: RetryPolicy,
    /// How many ranked records the meta-prompt shows (default: 5)
    pub top_k: usize,
    pub direction: Direction,
    pub criterion: ValidityCriterion,
    /// User prompt for each sample; must contain `{input}`.
    pub task_template: String,
    /// Sampling temperature for scored calls (default: provider default)
    pub temperature: Option<f32>,
    /// Sampling temperature for proposal calls (default: 1.0)
    pub proposal_temperature: Option<f32>,
    /// Attach the first failing raw response to each meta-prompt block (default: false)
    pub include_error_examples: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            parallel: true,
            concurrency: 8,
            retry: RetryPolicy::default(),
            top_k: 5,
            direction: Direction::Maximize,
            criterion: ValidityCriterion::Json,
            task_template: DEFAULT_TASK_TEMPLATE.to_string(),
            temperature: None,
            proposal_temperature: Some(1.0),
            include_error_examples: false,
        }
    }
}

impl OptimizerConfig {
    pub fn builder() -> OptimizerConfigBuilder {
        OptimizerConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(OptimizerError::Config("top_k must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(OptimizerError::Config(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(OptimizerError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if !self.task_template.contains(INPUT_PLACEHOLDER) {
            return Err(OptimizerError::Config(format!(
                "task_template must contain {INPUT_PLACEHOLDER}"
            )));
        }
        Ok(())
    }

    /// Render the user prompt for one sample.
    pub fn render_task(&self, input: &str) -> String {
        self.task_template.replace(INPUT_PLACEHOLDER, input)
    }
}

/// Builder for [`OptimizerConfig`].
#[derive(Debug, Clone, Default)]
pub struct OptimizerConfigBuilder {
    config: OptimizerConfig,
}

impl OptimizerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of proposal cycles.
    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.config.max_steps = steps;
        self
    }

    /// Evaluate samples one at a time, in dataset order.
    pub fn sequential(mut self) -> Self {
        self.config.parallel = false;
        self
    }

    /// Evaluate samples concurrently with at most `limit` in flight.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.config.parallel = true;
        self.config.concurrency = limit.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.config.direction = direction;
        self
    }

    pub fn with_criterion(mut self, criterion: ValidityCriterion) -> Self {
        self.config.criterion = criterion;
        self
    }

    pub fn with_task_template(mut self, template: impl Into<String>) -> Self {
        self.config.task_template = template.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = Some(temperature);
        self
    }

    pub fn with_proposal_temperature(mut self, temperature: f32) -> Self {
        self.config.proposal_temperature = Some(temperature);
        self
    }

    pub fn with_error_examples(mut self, enabled: bool) -> Self {
        self.config.include_error_examples = enabled;
        self
    }

    pub fn build(self) -> Result<OptimizerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
