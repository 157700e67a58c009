//! Append-only record of every evaluated instruction.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::evaluator::EvaluationResult;

/// The outcome of evaluating one instruction. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionRecord {
    step: usize,
    instruction: String,
    score: f64,
    errors: Vec<String>,
    error_examples: HashMap<String, String>,
    evaluated_at: DateTime<Utc>,
}

impl InstructionRecord {
    pub fn new(step: usize, instruction: impl Into<String>, result: EvaluationResult) -> Self {
        Self {
            step,
            instruction: instruction.into(),
            score: result.accuracy,
            errors: result.errors,
            error_examples: result.error_examples,
            evaluated_at: Utc::now(),
        }
    }

    /// Zero for the baseline, then one per proposal cycle.
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn error_examples(&self) -> &HashMap<String, String> {
        &self.error_examples
    }

    pub fn evaluated_at(&self) -> DateTime<Utc> {
        self.evaluated_at
    }

    /// The most frequent distinct error; ties go to the one seen first.
    pub fn dominant_error(&self) -> Option<&str> {
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for error in &self.errors {
            match counts.iter_mut().find(|(seen, _)| *seen == error.as_str()) {
                Some((_, count)) => *count += 1,
                None => counts.push((error.as_str(), 1)),
            }
        }

        let mut best: Option<(&str, usize)> = None;
        for (error, count) in counts {
            if best.map_or(true, |(_, top)| count > top) {
                best = Some((error, count));
            }
        }
        best.map(|(error, _)| error)
    }

    /// First raw response that produced `error`, if recorded.
    pub fn example_for(&self, error: &str) -> Option<&str> {
        self.error_examples.get(error).map(String::as_str)
    }
}

/// Chronological list of [`InstructionRecord`]s.
///
/// Only the optimization loop appends; records are never reordered or edited.
/// Ranking is computed on demand with a stable sort, so equal scores keep
/// their chronological order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationHistory {
    records: Vec<InstructionRecord>,
}

impl OptimizationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, record: InstructionRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[InstructionRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstructionRecord> {
        self.records.iter()
    }

    pub fn last(&self) -> Option<&InstructionRecord> {
        self.records.last()
    }

    /// Highest score; the earliest record wins ties.
    pub fn best(&self) -> Option<&InstructionRecord> {
        self.ranked().into_iter().next()
    }

    /// All records by descending score, ties in chronological order.
    pub fn ranked(&self) -> Vec<&InstructionRecord> {
        let mut ranked: Vec<&InstructionRecord> = self.records.iter().collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        ranked
    }

    pub fn top(&self, k: usize) -> Vec<&InstructionRecord> {
        let mut ranked = self.ranked();
        ranked.truncate(k);
        ranked
    }
}

impl<'a> IntoIterator for &'a OptimizationHistory {
    type Item = &'a InstructionRecord;
    type IntoIter = std::slice::Iter<'a, InstructionRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl fmt::Display for OptimizationHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Instruction ranking ({} evaluated) ===", self.len())?;
        for (rank, record) in self.ranked().into_iter().enumerate() {
            writeln!(
                f,
                "#{} [step {}] score {:.3}: {}",
                rank + 1,
                record.step,
                record.score,
                record.instruction
            )?;
            if let Some(error) = record.dominant_error() {
                writeln!(f, "    most common error: {error}")?;
            }
        }
        Ok(())
    }
}
