//! Offline model for tests and demos.
//!
//! [`MockModel`] routes every request through a closure, so tests can decide the
//! response from the prompt, fail on purpose, or count calls without touching
//! the network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{
    error::CallError,
    models::{Capabilities, GenerationRequest, RawResponse},
    provider::LanguageModel,
};

/// Handler used to answer requests without a real backend.
pub type MockHandler = Arc<dyn Fn(MockRequest) -> Result<RawResponse, CallError> + Send + Sync>;

/// Lightweight view of a request passed to a [`MockHandler`].
#[derive(Debug, Clone)]
pub struct MockRequest {
    /// Zero-based index of this call on the model.
    pub call_index: usize,
    pub system_instruction: Option<String>,
    /// The last user message, or an empty string.
    pub prompt: String,
    /// True when the request asked for JSON constrained by a response schema.
    pub json_mode: bool,
    pub tool_names: Vec<String>,
}

impl MockRequest {
    fn from_request(call_index: usize, request: &GenerationRequest) -> Self {
        Self {
            call_index,
            system_instruction: request.system.clone(),
            prompt: request.last_user_text().unwrap_or_default().to_string(),
            json_mode: request.response_schema.is_some(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
        }
    }
}

#[derive(Clone)]
pub struct MockModel {
    id: String,
    capabilities: Capabilities,
    handler: MockHandler,
    calls: Arc<AtomicUsize>,
}

impl MockModel {
    pub fn new(
        id: impl Into<String>,
        handler: impl Fn(MockRequest) -> Result<RawResponse, CallError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            capabilities: Capabilities::json_only(),
            handler: Arc::new(handler),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer every call with the same text.
    pub fn fixed(id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(id, move |_| Ok(RawResponse::text(text.clone())))
    }

    /// Answer calls from a script in order; the last entry repeats once the script runs out.
    pub fn scripted(
        id: impl Into<String>,
        script: Vec<Result<RawResponse, CallError>>,
    ) -> Self {
        let queue = Mutex::new(VecDeque::from(script));
        Self::new(id, move |_| {
            let mut queue = queue
                .lock()
                .map_err(|_| CallError::fatal("mock script lock poisoned"))?;
            match queue.len() {
                0 => Err(CallError::fatal("mock script is empty")),
                1 => queue
                    .front()
                    .cloned()
                    .unwrap_or_else(|| Err(CallError::fatal("mock script is empty"))),
                _ => queue
                    .pop_front()
                    .unwrap_or_else(|| Err(CallError::fatal("mock script is empty"))),
            }
        })
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Number of `generate` calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn generate(&self, request: GenerationRequest) -> Result<RawResponse, CallError> {
        let call_index = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut response = (self.handler)(MockRequest::from_request(call_index, &request))?;
        response.model_id.get_or_insert_with(|| self.id.clone());
        Ok(response)
    }
}
