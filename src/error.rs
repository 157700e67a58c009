use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Detailed error types for extraction, generation and optimization.
#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("Object validation failed: {0}")]
    Validation(#[from] ObjectValidationError),

    #[error("Unsupported functionality: {functionality}")]
    UnsupportedFunctionality { functionality: String },

    #[error("Model call failed: {0}")]
    Call(#[from] CallError),

    /// The optimizer model replied without a usable `<INS>...</INS>` span.
    #[error("No instruction found in the proposal reply:\n{reply}")]
    InstructionParse { reply: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Context error: {0}")]
    Context(String),

    #[cfg(feature = "gemini")]
    #[error("Gemini client error: {0}")]
    Gemini(#[from] gemini_rust::ClientError),
}

impl OptimizerError {
    pub fn unsupported(functionality: impl Into<String>) -> Self {
        Self::UnsupportedFunctionality {
            functionality: functionality.into(),
        }
    }

    pub fn instruction_parse(reply: &str) -> Self {
        Self::InstructionParse {
            reply: truncate_for_display(reply, 500),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Call(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Get the server-suggested retry delay, if one was provided.
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Call(err) => err.retry_after,
            _ => None,
        }
    }
}

/// Failure to turn a model response into a schema-conformant object.
///
/// Every variant carries enough of the offending payload to be useful as an
/// error example in optimization reports.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ObjectValidationError {
    #[error("No JSON object returned - text: {raw}")]
    EmptyResponse { raw: String },

    #[error("Failed to parse JSON object: {message} - text: {raw}")]
    MalformedJson { message: String, raw: String },

    #[error("Object does not match the schema: {message} - object: {raw}")]
    SchemaMismatch { message: String, raw: String },

    #[error("No tool calls returned, expected 1")]
    NoToolCall,

    #[error("Multiple tool calls returned, expected 1 - received {count}")]
    MultipleToolCalls { count: usize },

    #[error("Tool call '{name}' returned no arguments")]
    MissingToolArguments { name: String },
}

impl ObjectValidationError {
    /// Whether this failure is about the number of tool invocations rather than their content.
    pub fn is_cardinality(&self) -> bool {
        matches!(self, Self::NoToolCall | Self::MultipleToolCalls { .. })
    }
}

/// A classified failure from a model call.
///
/// The `retryable` flag is decided by the model implementation: transient
/// conditions (overload, rate limits, dropped connections) are retryable,
/// malformed requests and authentication failures are not.
#[derive(Debug, Clone, Error, PartialEq)]
pub struct CallError {
    pub message: String,
    pub status: Option<u16>,
    pub retryable: bool,
    pub retry_after: Option<Duration>,
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "{} (status {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl CallError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            retryable: true,
            retry_after: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            retryable: false,
            retry_after: None,
        }
    }

    /// Classify an HTTP status code: 429 and 5xx overload codes are retryable.
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(code),
            retryable: matches!(code, 429 | 500 | 502 | 503 | 504),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

pub(crate) fn truncate_for_display(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}... [truncated, {} total chars]",
        &text[..cut],
        text.len()
    )
}

pub type Result<T> = std::result::Result<T, OptimizerError>;

/// Extension trait for adding context to errors.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn with_context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<OptimizerError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let base_err = e.into();
            OptimizerError::Context(format!("{}: {}", context.into(), base_err))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(CallError::from_status(503, "overloaded").is_retryable());
        assert!(CallError::from_status(429, "slow down").is_retryable());
        assert!(!CallError::from_status(400, "bad request").is_retryable());
        assert!(!CallError::from_status(401, "unauthorized").is_retryable());
    }

    #[test]
    fn call_error_display_includes_status() {
        let err = CallError::from_status(503, "overloaded");
        assert_eq!(err.to_string(), "overloaded (status 503)");
        assert_eq!(CallError::fatal("boom").to_string(), "boom");
    }

    #[test]
    fn retryable_flag_forwards_through_optimizer_error() {
        let err: OptimizerError = CallError::retryable("flaky").into();
        assert!(err.is_retryable());
        let err: OptimizerError = ObjectValidationError::NoToolCall.into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(10);
        let out = truncate_for_display(&text, 3);
        assert!(out.starts_with('é'));
        assert!(out.contains("[truncated, 20 total chars]"));
    }

    #[test]
    fn with_context_wraps_message() {
        let res: std::result::Result<(), CallError> = Err(CallError::fatal("nope"));
        let err = res.with_context("proposal").unwrap_err();
        assert_eq!(err.to_string(), "Context error: proposal: Model call failed: nope");
    }
}
