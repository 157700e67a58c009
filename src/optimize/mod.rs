//! Instruction optimization.
//!
//! An [`OptimizationLoop`] scores a baseline instruction on an evaluation set,
//! then repeatedly asks an optimizer model for a better one. The score of an
//! instruction is the fraction of samples whose response is valid, see
//! [`ValidityCriterion`].

pub mod config;
pub mod dataset;
pub mod evaluator;
pub mod history;
pub mod proposer;
pub mod runner;
pub mod scorer;

pub use config::{Direction, OptimizerConfig, OptimizerConfigBuilder, ValidityCriterion};
pub use dataset::{few_shot_split, EvaluationSample, FewShotExample};
pub use evaluator::{EvaluationResult, Evaluator};
pub use history::{InstructionRecord, OptimizationHistory};
pub use proposer::{meta_prompt, parse_instruction, MetaPromptOptions, Proposer};
pub use runner::{LoopState, OptimizationLoop};
pub use scorer::{SampleScore, Scorer};
