//! Structured output extraction and instruction optimization for language models.
//!
//! The crate has two layers:
//!
//! - **Generation**: [`generate_text`] and [`generate_object`] talk to any
//!   [`LanguageModel`]. Object generation picks JSON mode or tool-call mode from
//!   the model's declared [`Capabilities`] and validates the result against a
//!   JSON [`Schema`].
//! - **Optimization**: an [`OptimizationLoop`] searches for the system
//!   instruction that makes a model produce valid JSON most often. Candidate
//!   instructions are written by an optimizer model from a meta-prompt showing
//!   the best instructions so far with their scores and typical failures.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use structured_output_optimizer::prelude::*;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
//! struct PiiSpans {
//!     pii_spans: Vec<String>,
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let model: Arc<dyn LanguageModel> =
//!         Arc::new(MockModel::fixed("mock", r#"{"pii_spans": ["Jane Doe"]}"#));
//!     let schema = Schema::of::<PiiSpans>()?;
//!
//!     let samples = vec![EvaluationSample::new("Jane Doe called from 555-0100.")];
//!     let config = OptimizerConfig::builder().with_max_steps(3).build()?;
//!     let mut run = OptimizationLoop::new(model, schema, samples, "Return JSON.", config)?;
//!
//!     let history = run.run().await?;
//!     println!("{history}");
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - **`gemini`**: a [`LanguageModel`] implementation for the Gemini API
//!   (`gemini::GeminiModel`).

pub mod adapter;
pub mod error;
pub mod extract;
#[cfg(feature = "gemini")]
pub mod gemini;
pub mod generate;
pub mod mock;
pub mod models;
pub mod optimize;
pub mod provider;
pub mod retry;
pub mod schema;

pub use error::{CallError, ObjectValidationError, OptimizerError, Result, ResultExt};
pub use extract::{check_json, extract, extract_as, strip_code_fence, Validity};
#[cfg(feature = "gemini")]
pub use gemini::{GeminiModel, GeminiSettings};
pub use generate::{
    generate_object, generate_object_as, generate_text, ObjectOptions, ObjectResult, TextOptions,
    TextResult,
};
pub use mock::{MockHandler, MockModel, MockRequest};
pub use models::{
    Capabilities, ChatMessage, ChatRole, FinishReason, GenerationMode, GenerationRequest,
    RawResponse, ToolCall, Usage,
};
pub use optimize::{
    few_shot_split, Direction, EvaluationResult, EvaluationSample, Evaluator, FewShotExample,
    InstructionRecord, LoopState, OptimizationHistory, OptimizationLoop, OptimizerConfig,
    OptimizerConfigBuilder, Proposer, SampleScore, Scorer, ValidityCriterion,
};
pub use provider::LanguageModel;
pub use retry::RetryPolicy;
pub use schema::Schema;

/// Prelude module for convenient imports.
///
/// ```rust
/// use structured_output_optimizer::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{CallError, OptimizerError, Result, ResultExt};
    pub use crate::generate::{generate_object, generate_object_as, generate_text};
    pub use crate::generate::{ObjectOptions, TextOptions};
    pub use crate::mock::MockModel;
    pub use crate::models::{Capabilities, GenerationMode, RawResponse};
    pub use crate::optimize::{
        few_shot_split, Direction, EvaluationSample, FewShotExample, OptimizationHistory,
        OptimizationLoop, OptimizerConfig, ValidityCriterion,
    };
    pub use crate::provider::LanguageModel;
    pub use crate::retry::RetryPolicy;
    pub use crate::schema::Schema;

    #[cfg(feature = "gemini")]
    pub use crate::gemini::{GeminiModel, GeminiSettings};

    // Re-export commonly used external types
    pub use schemars::JsonSchema;
    pub use serde::{Deserialize, Serialize};
}
