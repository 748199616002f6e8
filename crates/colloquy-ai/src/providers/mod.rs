//! LLM backend trait and implementations

pub mod openai;

use crate::{ChatEntry, CompletionRequest, Model, Result, StreamEventStream};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Contract every LLM backend adapter satisfies
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Stream a completion as ordered events.
    ///
    /// The stream ends after the first terminal event. Implementations stop
    /// producing events once `cancel` fires.
    async fn stream_completion(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<StreamEventStream>;

    /// Request cooperative termination of the stream for a message
    async fn stop_stream(&self, message_id: &str);

    /// Single-shot, non-streaming completion (query rewrites, titles)
    async fn quick_completion(&self, entries: Vec<ChatEntry>, model_id: &str) -> Result<String>;

    /// Capabilities of a model served by this backend, if known
    fn model(&self, _model_id: &str) -> Option<Model> {
        None
    }
}
