use crate::error::ProviderError;

/// Decides whether a provider error can be fixed by switching API keys.
pub trait FailureClassifier: Send + Sync {
    fn is_recoverable(&self, error: &ProviderError) -> bool;
}

const KEY_STATUSES: &[u16] = &[401, 403, 429];

const KEY_CODES: &[&str] = &[
    "invalid_api_key",
    "insufficient_quota",
    "rate_limit_exceeded",
    "billing_hard_limit_reached",
];

const KEY_FRAGMENTS: &[&str] = &["key", "quota", "rate", "billing", "exceeded"];

/// Heuristic classifier for auth, quota and rate-limit failures.
///
/// An error is recoverable when its status, its machine code, or its
/// lowercased message matches one of the configured rules.
#[derive(Debug, Clone)]
pub struct CredentialFailureClassifier {
    statuses: Vec<u16>,
    codes: Vec<String>,
    fragments: Vec<String>,
}

impl Default for CredentialFailureClassifier {
    fn default() -> Self {
        Self {
            statuses: KEY_STATUSES.to_vec(),
            codes: KEY_CODES.iter().map(|s| s.to_string()).collect(),
            fragments: KEY_FRAGMENTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CredentialFailureClassifier {
    pub fn with_status(mut self, status: u16) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.codes.push(code.into());
        self
    }

    /// Add a message fragment. Matching is case-insensitive.
    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragments.push(fragment.into().to_lowercase());
        self
    }
}

impl FailureClassifier for CredentialFailureClassifier {
    fn is_recoverable(&self, error: &ProviderError) -> bool {
        if let Some(status) = error.status() {
            if self.statuses.contains(&status) {
                return true;
            }
        }

        if let Some(code) = error.code() {
            if self.codes.iter().any(|c| c == code) {
                return true;
            }
        }

        let message = error.message().to_lowercase();
        self.fragments.iter().any(|f| message.contains(f.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, code: Option<&str>, message: &str) -> ProviderError {
        ProviderError::Api {
            status,
            code: code.map(String::from),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_credential_statuses_are_recoverable() {
        let c = CredentialFailureClassifier::default();
        for status in [401, 403, 429] {
            assert!(c.is_recoverable(&api(status, None, "nope")), "{status}");
        }
    }

    #[test]
    fn test_server_error_is_not_recoverable() {
        let c = CredentialFailureClassifier::default();
        assert!(!c.is_recoverable(&api(500, None, "internal server error")));
        assert!(!c.is_recoverable(&api(400, None, "invalid request body")));
        assert!(!c.is_recoverable(&ProviderError::Parse("No choices in response".into())));
    }

    #[test]
    fn test_machine_codes_are_recoverable() {
        let c = CredentialFailureClassifier::default();
        for code in KEY_CODES {
            assert!(c.is_recoverable(&api(400, Some(code), "x")), "{code}");
        }
        assert!(!c.is_recoverable(&api(400, Some("context_length"), "too long")));
    }

    #[test]
    fn test_message_fragments_case_insensitive() {
        let c = CredentialFailureClassifier::default();
        assert!(c.is_recoverable(&ProviderError::Other("Incorrect API KEY provided".into())));
        assert!(c.is_recoverable(&ProviderError::Other("You exceeded your current QUOTA".into())));
        assert!(c.is_recoverable(&ProviderError::Other("Billing issue".into())));
        assert!(c.is_recoverable(&ProviderError::Other("RATE limited".into())));
        assert!(!c.is_recoverable(&ProviderError::Other("connection reset".into())));
    }

    #[test]
    fn test_exhausted_is_recoverable_by_message() {
        // "All API keys failed" contains "key"
        let c = CredentialFailureClassifier::default();
        assert!(c.is_recoverable(&ProviderError::Exhausted));
    }

    #[tokio::test]
    async fn test_transport_error_url_is_not_matched() {
        // connection refused; the path contains "rate" and "key"
        let err = crate::util::http::client()
            .post("http://127.0.0.1:1/corporate/keys/v1/chat/completions")
            .send()
            .await
            .unwrap_err();
        let err = ProviderError::from(err);
        assert_eq!(err.status(), None);
        assert!(!CredentialFailureClassifier::default().is_recoverable(&err));
    }

    #[tokio::test]
    async fn test_transport_error_against_plain_base_not_recoverable() {
        let provider = crate::provider::openai_compat::OpenAiCompatProvider::new(
            "sk-1".into(),
            Some("http://127.0.0.1:1/corporate/v1".into()),
            "gpt-4o-mini".into(),
        );
        let request = crate::types::CompletionRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![crate::types::Message::user("hi")],
            max_tokens: None,
            temperature: None,
        };
        let err = crate::provider::LlmProvider::chat(&provider, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Http(_)));
        assert!(!CredentialFailureClassifier::default().is_recoverable(&err));
    }

    #[test]
    fn test_rules_can_be_extended() {
        let c = CredentialFailureClassifier::default()
            .with_status(402)
            .with_code("account_deactivated")
            .with_fragment("Suspended");
        assert!(c.is_recoverable(&api(402, None, "payment")));
        assert!(c.is_recoverable(&api(400, Some("account_deactivated"), "x")));
        assert!(c.is_recoverable(&ProviderError::Other("account suspended".into())));
    }
}
