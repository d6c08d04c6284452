use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::types::{CompletionRequest, CompletionResponse};

use super::{CredentialFailureClassifier, FailureClassifier, KeyPool, LlmProvider, ProviderFactory};

/// Default pause between attempts after a key failure.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(300);

/// Provider that fails over across a pool of API keys.
///
/// Each call tries at most one attempt per key. Key-related failures (as
/// judged by the classifier) rotate the pool and retry; anything else is
/// returned to the caller straight away.
pub struct KeyRotatingProvider {
    pool: Arc<KeyPool>,
    factory: Arc<dyn ProviderFactory>,
    classifier: Arc<dyn FailureClassifier>,
    retry_delay: Duration,
    default_model: String,
}

impl KeyRotatingProvider {
    pub fn new(
        pool: Arc<KeyPool>,
        factory: Arc<dyn ProviderFactory>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            factory,
            classifier: Arc::new(CredentialFailureClassifier::default()),
            retry_delay: DEFAULT_RETRY_DELAY,
            default_model: default_model.into(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    /// Run `request_fn` against a client bound to the active key, rotating
    /// on key failures until it succeeds or every key has been tried once.
    pub async fn execute<T, F, Fut>(&self, mut request_fn: F) -> Result<T, ProviderError>
    where
        F: FnMut(Arc<dyn LlmProvider>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = self.pool.len();
        let mut last_error = None;

        for attempt in 0..attempts {
            let (slot, key) = self.pool.snapshot();
            let client = self.factory.create(key);

            let err = match request_fn(client).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !self.classifier.is_recoverable(&err) {
                warn!("API key #{} failed with non-key error: {}", slot + 1, err);
                return Err(err);
            }

            warn!(
                "API key #{} failed (attempt {}/{}): {}",
                slot + 1,
                attempt + 1,
                attempts,
                err
            );
            last_error = Some(err);

            if !self.pool.rotate() {
                debug!("No alternate API key to switch to");
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(last_error.unwrap_or(ProviderError::Exhausted))
    }
}

#[async_trait]
impl LlmProvider for KeyRotatingProvider {
    async fn chat(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        self.execute(move |client| async move { client.chat(request).await })
            .await
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}
