use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{OptimizerError, Result},
    schema::Schema,
};

/// What a model can do when asked for structured output.
///
/// Every [`LanguageModel`](crate::provider::LanguageModel) answers this up front so
/// the generation mode can be chosen once, before any request is issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub json_mode: bool,
    pub tool_calls: bool,
}

impl Capabilities {
    pub fn json_only() -> Self {
        Self {
            json_mode: true,
            tool_calls: false,
        }
    }

    pub fn tools_only() -> Self {
        Self {
            json_mode: false,
            tool_calls: true,
        }
    }

    pub fn all() -> Self {
        Self {
            json_mode: true,
            tool_calls: true,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// Strategy used to obtain a structured object from a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// The model emits JSON text constrained by a response schema.
    Json,
    /// The model emits a single tool invocation whose arguments are the object.
    ToolCall,
}

impl GenerationMode {
    /// Pick the mode for a model, preferring JSON mode when both are available.
    pub fn select(capabilities: &Capabilities) -> Result<Self> {
        if capabilities.json_mode {
            Ok(Self::Json)
        } else if capabilities.tool_calls {
            Ok(Self::ToolCall)
        } else {
            Err(OptimizerError::unsupported(
                "This model does not support object generation",
            ))
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json_mode"),
            Self::ToolCall => f.write_str("tool_call_mode"),
        }
    }
}

/// Token counters reported by a model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
    #[default]
    Unknown,
}

/// A single tool invocation emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: Option<String>,
    pub name: String,
    pub args: Option<Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            args: Some(args),
        }
    }
}

/// The unprocessed output of one model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub finish_reason: FinishReason,
    pub response_id: Option<String>,
    pub model_id: Option<String>,
}

impl RawResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: FinishReason::Stop,
            ..Default::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            finish_reason: FinishReason::ToolCalls,
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Text suitable for error reports: the model text, or the serialized
    /// tool calls when the model answered with tools only.
    pub fn display_text(&self) -> String {
        if !self.text.is_empty() || self.tool_calls.is_empty() {
            return self.text.clone();
        }
        serde_json::to_string(&self.tool_calls).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

pub const DEFAULT_TOOL_NAME: &str = "json_object";
pub const DEFAULT_TOOL_DESCRIPTION: &str = "Generate a JSON object";

/// A tool offered to the model in tool-call mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Provider-neutral request handed to a [`LanguageModel`](crate::provider::LanguageModel).
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    /// Set in JSON mode: the model should constrain its text to this schema.
    pub response_schema: Option<Schema>,
    /// Set in tool-call mode.
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub fn new(system: Option<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            system,
            messages,
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Shape the request for the given structured generation mode.
    pub fn for_mode(self, mode: GenerationMode, schema: &Schema) -> Self {
        self.for_mode_named(mode, schema, None, None)
    }

    /// Like [`for_mode`](Self::for_mode) with an explicit tool name and description.
    pub fn for_mode_named(
        mut self,
        mode: GenerationMode,
        schema: &Schema,
        tool_name: Option<&str>,
        tool_description: Option<&str>,
    ) -> Self {
        match mode {
            GenerationMode::Json => {
                self.response_schema = Some(schema.clone());
            }
            GenerationMode::ToolCall => {
                let description = tool_description
                    .or(schema.description())
                    .unwrap_or(DEFAULT_TOOL_DESCRIPTION);
                self.tools.push(ToolDefinition {
                    name: tool_name.unwrap_or(DEFAULT_TOOL_NAME).to_string(),
                    description: description.to_string(),
                    parameters: schema.tool_parameters().clone(),
                });
            }
        }
        self
    }

    /// Last user message, if any. Handy in mocks.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
    }
}

/// Merge the optional system/prompt/messages triple into a single message list.
///
/// `system` is lifted out of the list so models can route it to their dedicated
/// system slot. Supplying both `prompt` and `messages` is rejected.
pub fn standardize_messages(
    system: Option<String>,
    prompt: Option<String>,
    messages: Option<Vec<ChatMessage>>,
) -> Result<(Option<String>, Vec<ChatMessage>)> {
    if prompt.is_some() && messages.is_some() {
        return Err(OptimizerError::Config(
            "prompt and messages cannot both be provided".to_string(),
        ));
    }

    let mut out = Vec::new();
    if let Some(prompt) = prompt {
        out.push(ChatMessage::user(prompt));
    }
    if let Some(messages) = messages {
        out.extend(messages);
    }
    Ok((system, out))
}
