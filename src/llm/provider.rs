use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{ApiConfig, ChatRequest, ProviderModel, StreamEvent};
use crate::core::errors::EngineError;

pub type StreamReceiver = mpsc::Receiver<Result<StreamEvent, EngineError>>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// interface kind this provider serves (e.g. "openai", "ollama")
    fn kind(&self) -> &str;

    /// whether models are discovered live instead of configured statically
    fn discovers_models(&self) -> bool {
        false
    }

    /// list available models from the backend
    async fn list_models(&self, _api: &ApiConfig) -> Result<Vec<ProviderModel>, EngineError> {
        Ok(Vec::new())
    }

    /// delete a model from the backend
    async fn delete_model(&self, _api: &ApiConfig, _model: &str) -> Result<(), EngineError> {
        Ok(())
    }

    /// chat completion (streaming)
    ///
    /// The stream stops delivering events once `cancel` fires; the receiver
    /// then closes without an error.
    async fn stream_chat(
        &self,
        api: &ApiConfig,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<StreamReceiver, EngineError>;
}
