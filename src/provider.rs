use async_trait::async_trait;

use crate::{
    error::CallError,
    models::{Capabilities, GenerationRequest, RawResponse},
};

/// A text generation backend.
///
/// Implementations own transport, authentication and the provider wire format.
/// They must report their capabilities truthfully: the structured generation
/// path picks a [`GenerationMode`](crate::models::GenerationMode) from them
/// before issuing any request. Errors must be classified via
/// [`CallError::retryable`] so callers know whether retrying can help.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Identifier used in logs and reports.
    fn model_id(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    async fn generate(&self, request: GenerationRequest) -> Result<RawResponse, CallError>;
}
