//! Target output schemas.
//!
//! A [`Schema`] bundles a JSON Schema document with its compiled validator so the
//! same contract can be sent to a model (as a response schema or tool parameters),
//! embedded in a system prompt, and used to validate whatever comes back.

use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde_json::Value;

use crate::error::{OptimizerError, Result};

#[derive(Clone)]
pub struct Schema {
    name: String,
    description: Option<String>,
    document: Value,
    validator: Arc<jsonschema::Validator>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("document", &self.document)
            .finish()
    }
}

impl Schema {
    /// Build a schema from a Rust type deriving [`JsonSchema`].
    pub fn of<T: JsonSchema>() -> Result<Self> {
        let root = schemars::SchemaGenerator::default().into_root_schema_for::<T>();
        let document = serde_json::to_value(root)?;
        Self::from_json(T::schema_name().to_string(), document)
    }

    /// Build a schema from a raw JSON Schema document known only at runtime.
    pub fn from_json(name: impl Into<String>, document: Value) -> Result<Self> {
        let validator = jsonschema::validator_for(&document)
            .map_err(|e| OptimizerError::Schema(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            description: None,
            document,
            validator: Arc::new(validator),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Parameter description used when the schema is offered as a tool.
    pub fn tool_parameters(&self) -> &Value {
        &self.document
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.validator.is_valid(value)
    }

    /// Validate a parsed value, joining every violation into one message.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(value)
            .map(|err| format!("{}: {}", err.instance_path(), err))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }

    /// Render the system prompt for an instruction: the schema followed by the instruction.
    pub fn system_prompt(&self, instruction: &str) -> String {
        let pretty = serde_json::to_string_pretty(&self.document)
            .unwrap_or_else(|_| self.document.to_string());
        format!("JSON schema:\n{pretty}\n\n{instruction}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Span {
        start: u32,
        end: u32,
        label: String,
    }

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct PiiSpans {
        pii_spans: Vec<Span>,
    }

    #[test]
    fn derived_schema_validates_required_fields() {
        let schema = Schema::of::<PiiSpans>().unwrap();
        assert_eq!(schema.name(), "PiiSpans");
        assert!(schema
            .validate(&json!({"pii_spans": [{"start": 0, "end": 4, "label": "name"}]}))
            .is_ok());

        let err = schema.validate(&json!({"spans": []})).unwrap_err();
        assert!(err.contains("pii_spans"), "unexpected message: {err}");
    }

    #[test]
    fn invalid_document_is_rejected() {
        let err = Schema::from_json("broken", json!({"type": 12})).unwrap_err();
        assert!(matches!(err, OptimizerError::Schema(_)));
    }

    #[test]
    fn system_prompt_embeds_schema_then_instruction() {
        let schema = Schema::from_json("obj", json!({"type": "object"})).unwrap();
        let prompt = schema.system_prompt("Only return JSON.");
        assert!(prompt.starts_with("JSON schema:\n{"));
        assert!(prompt.ends_with("\n\nOnly return JSON.\n"));
    }
}
