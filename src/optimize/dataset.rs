use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One evaluation input.
///
/// `expected` carries the dataset's annotation for reference only; scoring
/// looks at structural validity, never at semantic correctness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSample {
    pub input: String,
    #[serde(default)]
    pub expected: Option<Value>,
}

impl EvaluationSample {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected: None,
        }
    }

    pub fn with_expected(mut self, expected: Value) -> Self {
        self.expected = Some(expected);
        self
    }
}

/// A worked input/output pair shown to the optimizer model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub input: String,
    pub output: String,
}

impl FewShotExample {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

/// Split an order-stable dataset into few-shot examples and evaluation samples.
///
/// The first `few_shot` rows become examples (their `expected` serialized as the
/// output); the next `limit` rows are returned for evaluation. Rows without an
/// annotation are shown with an empty output.
pub fn few_shot_split(
    rows: &[EvaluationSample],
    few_shot: usize,
    limit: usize,
) -> (Vec<FewShotExample>, Vec<EvaluationSample>) {
    let split = few_shot.min(rows.len());
    let examples = rows[..split]
        .iter()
        .map(|row| {
            let output = row
                .expected
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default();
            FewShotExample::new(row.input.clone(), output)
        })
        .collect();
    let samples = rows[split..].iter().take(limit).cloned().collect();
    (examples, samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn split_takes_head_as_examples() {
        let rows: Vec<EvaluationSample> = (0..6)
            .map(|i| EvaluationSample::new(format!("row {i}")).with_expected(json!([i])))
            .collect();

        let (examples, samples) = few_shot_split(&rows, 2, 3);
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[1], FewShotExample::new("row 1", "[1]"));
        let inputs: Vec<_> = samples.iter().map(|s| s.input.as_str()).collect();
        assert_eq!(inputs, vec!["row 2", "row 3", "row 4"]);
    }

    #[test]
    fn split_handles_short_datasets() {
        let rows = vec![EvaluationSample::new("only")];
        let (examples, samples) = few_shot_split(&rows, 5, 10);
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].output, "");
        assert!(samples.is_empty());
    }
}
