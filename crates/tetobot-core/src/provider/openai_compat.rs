use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ProviderError;
use crate::types::{CompletionRequest, CompletionResponse, FinishReason, TokenUsage};
use crate::util::http;

use super::{LlmProvider, ProviderFactory};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI-compatible provider.
/// Works with OpenAI and any API that speaks `/chat/completions`.
pub struct OpenAiCompatProvider {
    api_key: String,
    api_base: String,
    default_model: String,
}

impl OpenAiCompatProvider {
    pub fn new(api_key: String, api_base: Option<String>, default_model: String) -> Self {
        let base = api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self {
            api_key,
            api_base: base.trim_end_matches('/').to_string(),
            default_model,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NoApiKey);
        }

        let url = format!("{}/chat/completions", self.api_base);
        debug!(
            "OpenAI-compat request to {} with model {} ({} messages)",
            url,
            request.model,
            request.messages.len()
        );

        let response = http::client()
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(parse_openai_error(status.as_u16(), &text));
        }

        let data: serde_json::Value = response.json().await?;
        parse_openai_response(&data)
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

/// Builds [`OpenAiCompatProvider`]s sharing one base URL and model.
#[derive(Debug, Clone)]
pub struct OpenAiCompatFactory {
    api_base: Option<String>,
    default_model: String,
}

impl OpenAiCompatFactory {
    pub fn new(api_base: Option<String>, default_model: impl Into<String>) -> Self {
        Self {
            api_base,
            default_model: default_model.into(),
        }
    }
}

impl ProviderFactory for OpenAiCompatFactory {
    fn create(&self, api_key: &str) -> Arc<dyn LlmProvider> {
        Arc::new(OpenAiCompatProvider::new(
            api_key.to_string(),
            self.api_base.clone(),
            self.default_model.clone(),
        ))
    }
}

/// Decode an error body of the form `{"error": {"message", "code", "type"}}`.
/// Falls back to the raw body when it is not JSON.
pub fn parse_openai_error(status: u16, body: &str) -> ProviderError {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| body.trim().to_string());

    // `code` is sometimes null while `type` carries the same information
    let code = error
        .and_then(|e| e.get("code").and_then(|v| v.as_str()).or_else(|| e.get("type").and_then(|v| v.as_str())))
        .map(|s| s.to_string());

    ProviderError::Api {
        status,
        code,
        message,
    }
}

/// Parse an OpenAI-format response into our CompletionResponse.
pub fn parse_openai_response(data: &serde_json::Value) -> Result<CompletionResponse, ProviderError> {
    let choice = data
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| ProviderError::Parse("No choices in response".to_string()))?;

    let message = choice
        .get("message")
        .ok_or_else(|| ProviderError::Parse("No message in choice".to_string()))?;

    let content = message.get("content").and_then(|v| v.as_str()).map(|s| s.to_string());

    let finish_reason = match choice.get("finish_reason").and_then(|v| v.as_str()) {
        Some("stop") | None => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        Some(_) => FinishReason::Other,
    };

    let usage = if let Some(u) = data.get("usage") {
        TokenUsage {
            prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            completion_tokens: u
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        }
    } else {
        TokenUsage::default()
    };

    Ok(CompletionResponse {
        content,
        finish_reason,
        usage,
    })
}
