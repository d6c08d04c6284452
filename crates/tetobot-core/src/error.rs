use std::borrow::Cow;
use std::path::PathBuf;

/// Core error types for tetobot.
#[derive(Debug, thiserror::Error)]
pub enum TetobotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No OpenAI API keys configured")]
    NoApiKey,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("No API key configured for provider")]
    NoApiKey,

    #[error("All API keys failed")]
    Exhausted,

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Api { status, .. } => Some(*status),
            ProviderError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Human-readable failure text without the `Display` prefix. Transport
    /// errors have the request URL removed.
    pub fn message(&self) -> Cow<'_, str> {
        match self {
            ProviderError::Api { message, .. } => Cow::Borrowed(message),
            ProviderError::Http(e) => {
                let text = e.to_string();
                match e.url() {
                    Some(url) => Cow::Owned(text.replace(&format!(" for url ({url})"), "")),
                    None => Cow::Owned(text),
                }
            }
            ProviderError::Parse(s) | ProviderError::Other(s) => Cow::Borrowed(s),
            ProviderError::NoApiKey | ProviderError::Exhausted => Cow::Owned(self.to_string()),
        }
    }

    /// Machine-readable error code from the API body, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            ProviderError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Send error: {0}")]
    Send(String),

    #[error("Failed to fetch content: {0}")]
    Fetch(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, TetobotError>;
