use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Lazily produced reply fragments. The stream ends when generation is complete;
/// dropping it cancels the request.
pub type TextStream = BoxStream<'static, Result<String>>;

/// A language model that streams its reply
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Start generating a reply to `prompt`
    async fn stream(&self, prompt: &str) -> Result<TextStream>;

    fn model_name(&self) -> &str;
}
