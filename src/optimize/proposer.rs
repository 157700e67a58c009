//! Asking a model for the next candidate instruction.
//!
//! The meta-prompt shows the best instructions so far, ranked, each with its
//! score and most common failure, and asks for a new instruction wrapped in
//! `<INS>` markers.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{
    error::{truncate_for_display, OptimizerError, Result},
    generate::call_with_retry,
    models::{ChatMessage, GenerationRequest},
    provider::LanguageModel,
    retry::RetryPolicy,
};

use super::config::Direction;
use super::dataset::FewShotExample;
use super::history::OptimizationHistory;

pub const INSTRUCTION_OPEN: &str = "<INS>";
pub const INSTRUCTION_CLOSE: &str = "</INS>";

const ERROR_EXAMPLE_LIMIT: usize = 500;

/// Meta-prompt rendering options.
#[derive(Debug, Clone)]
pub struct MetaPromptOptions {
    pub top_k: usize,
    pub direction: Direction,
    pub include_error_examples: bool,
}

impl Default for MetaPromptOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            direction: Direction::Maximize,
            include_error_examples: false,
        }
    }
}

/// Render the meta-prompt for `history`.
pub fn meta_prompt(
    history: &OptimizationHistory,
    few_shot: &[FewShotExample],
    options: &MetaPromptOptions,
) -> String {
    let blocks: Vec<String> = history
        .top(options.top_k)
        .into_iter()
        .map(|record| {
            let mut block = format!(
                "<Instruction>\n<Score> {}</Score>\n{INSTRUCTION_OPEN}{}{INSTRUCTION_CLOSE}",
                record.score(),
                record.instruction()
            );
            if let Some(error) = record.dominant_error() {
                block.push_str(&format!("\n<Error>{error}</Error>"));
                if options.include_error_examples {
                    if let Some(example) = record.example_for(error).filter(|e| !e.is_empty()) {
                        block.push_str(&format!(
                            "\n<ErrorExample>{}</ErrorExample>",
                            truncate_for_display(example, ERROR_EXAMPLE_LIMIT)
                        ));
                    }
                }
            }
            block.push_str("\n</Instruction>");
            block
        })
        .collect();

    let mut few_shot_text = String::new();
    if !few_shot.is_empty() {
        few_shot_text.push_str("\n\nExample problems and their solutions:\n");
        for example in few_shot {
            few_shot_text.push_str(&format!(
                "\nInput: {}\nOutput: {}\n",
                example.input, example.output
            ));
        }
    }

    format!(
        "Your task is to generate the instruction {INSTRUCTION_OPEN} that {verb} \
         the scores below.\n\
         The score ranges from 0 to 1.\n\n\
         Previous instructions and their performance:\n\
         {instructions}\n\n\
         Generate an instruction that is different from all the instructions \
         {INSTRUCTION_OPEN} above, \
         and is expected to score at least as well as the best of them.\n\
         When creating the instruction, review the errors and try to understand the root cause. \
         Then, write an instruction that resolves these root causes.\n\n\
         The instruction should be effective, and generally applicable to all problems above. \
         The instruction should begin with {INSTRUCTION_OPEN} and end with {INSTRUCTION_CLOSE}.\
         {few_shot_text}\n",
        verb = options.direction.verb(),
        instructions = blocks.join("\n\n"),
    )
}

/// Pull the first `<INS>...</INS>` span out of a reply, trimmed.
pub fn parse_instruction(reply: &str) -> Result<String> {
    let start = reply
        .find(INSTRUCTION_OPEN)
        .map(|idx| idx + INSTRUCTION_OPEN.len())
        .ok_or_else(|| OptimizerError::instruction_parse(reply))?;
    let len = reply[start..]
        .find(INSTRUCTION_CLOSE)
        .ok_or_else(|| OptimizerError::instruction_parse(reply))?;

    let instruction = reply[start..start + len].trim();
    if instruction.is_empty() {
        return Err(OptimizerError::instruction_parse(reply));
    }
    Ok(instruction.to_string())
}

/// Generates new instructions with an optimizer model.
#[derive(Clone)]
pub struct Proposer {
    model: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    temperature: Option<f32>,
    options: MetaPromptOptions,
}

impl Proposer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            retry: RetryPolicy::default(),
            temperature: None,
            options: MetaPromptOptions::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_options(mut self, options: MetaPromptOptions) -> Self {
        self.options = options;
        self
    }

    /// Ask the optimizer model for the next instruction.
    ///
    /// Call failures that survive the retry policy and replies without a
    /// delimited instruction are returned as errors; there is no fallback.
    #[instrument(skip_all, fields(model = self.model.model_id(), history = history.len()))]
    pub async fn propose(
        &self,
        history: &OptimizationHistory,
        few_shot: &[FewShotExample],
        direction: Direction,
    ) -> Result<String> {
        let options = MetaPromptOptions {
            direction,
            ..self.options.clone()
        };
        let prompt = meta_prompt(history, few_shot, &options);
        debug!(prompt_len = prompt.len(), "Requesting instruction proposal");

        let request = GenerationRequest::new(None, vec![ChatMessage::user(prompt)])
            .with_temperature(self.temperature);
        let reply = call_with_retry(self.model.as_ref(), &request, &self.retry).await?;

        let instruction = parse_instruction(&reply.value.text)?;
        debug!(attempts = reply.attempts, %instruction, "Parsed proposed instruction");
        Ok(instruction)
    }
}
