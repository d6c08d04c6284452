pub mod openai_compat;
pub mod key_pool;
pub mod classifier;
pub mod rotating;

use std::sync::Arc;
use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{CompletionRequest, CompletionResponse};

pub use classifier::{CredentialFailureClassifier, FailureClassifier};
pub use key_pool::KeyPool;
pub use rotating::KeyRotatingProvider;

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request.
    async fn chat(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Get the default model for this provider.
    fn default_model(&self) -> &str;
}

/// Builds a provider bound to one API key.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, api_key: &str) -> Arc<dyn LlmProvider>;
}

impl<F> ProviderFactory for F
where
    F: Fn(&str) -> Arc<dyn LlmProvider> + Send + Sync,
{
    fn create(&self, api_key: &str) -> Arc<dyn LlmProvider> {
        self(api_key)
    }
}
