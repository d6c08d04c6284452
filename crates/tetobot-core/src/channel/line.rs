use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::channel::Messenger;
use crate::config::LineConfig;
use crate::error::ChannelError;
use crate::types::{EventKind, InboundEvent};
use crate::util::http::client;

pub const LINE_API_BASE: &str = "https://api.line.me";
pub const LINE_DATA_API_BASE: &str = "https://api-data.line.me";

/// Maximum length of a LINE text message, in characters.
pub const LINE_MAX_TEXT_CHARS: usize = 5000;

/// LINE Messaging API channel (webhook mode).
pub struct LineChannel {
    config: LineConfig,
    api_base: String,
    data_api_base: String,
}

impl LineChannel {
    pub fn new(config: LineConfig) -> Self {
        Self::with_endpoints(config, LINE_API_BASE, LINE_DATA_API_BASE)
    }

    /// Point the channel at different API hosts (tests, proxies).
    pub fn with_endpoints(
        config: LineConfig,
        api_base: impl Into<String>,
        data_api_base: impl Into<String>,
    ) -> Self {
        Self {
            config,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            data_api_base: data_api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Verify webhook signature using HMAC-SHA256.
    ///
    /// `signature` is the base64 value of the `x-line-signature` header.
    pub fn verify_signature(channel_secret: &str, body: &[u8], signature: &str) -> bool {
        use base64::Engine;
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        type HmacSha256 = Hmac<Sha256>;

        if channel_secret.is_empty() || signature.is_empty() {
            return false;
        }
        let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature.trim()) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(channel_secret.as_bytes()) else {
            return false;
        };
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }

    /// Parse LINE webhook events from the request body.
    pub fn parse_webhook_events(body: &[u8]) -> Result<Vec<LineEvent>, serde_json::Error> {
        let webhook: LineWebhook = serde_json::from_slice(body)?;
        Ok(webhook.events)
    }

    fn access_token(&self) -> Result<&str, ChannelError> {
        if self.config.channel_access_token.is_empty() {
            return Err(ChannelError::Auth("LINE channel access token not configured".into()));
        }
        Ok(&self.config.channel_access_token)
    }
}

#[async_trait]
impl Messenger for LineChannel {
    fn name(&self) -> &str {
        "line"
    }

    /// Reply to a LINE message using the reply token.
    /// Must be called within 1 minute of receiving the webhook.
    async fn reply(&self, reply_token: &str, text: &str) -> Result<(), ChannelError> {
        let access_token = self.access_token()?;
        let body = serde_json::json!({
            "replyToken": reply_token,
            "messages": [{
                "type": "text",
                "text": text
            }]
        });

        let resp = client()
            .post(format!("{}/v2/bot/message/reply", self.api_base))
            .header("Authorization", format!("Bearer {access_token}"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            error!("LINE reply API error: {} {}", status, text);
            return Err(ChannelError::Send(format!("LINE reply API error: {status}")));
        }

        debug!("LINE reply sent successfully");
        Ok(())
    }

    async fn fetch_content(&self, message_id: &str) -> Result<Vec<u8>, ChannelError> {
        let access_token = self.access_token()?;
        let url = format!(
            "{}/v2/bot/message/{}/content",
            self.data_api_base,
            urlencoding::encode(message_id)
        );

        let resp = client()
            .get(&url)
            .header("Authorization", format!("Bearer {access_token}"))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(ChannelError::Fetch(format!(
                "LINE content API error for message {message_id}: {status}"
            )));
        }

        let bytes = resp.bytes().await?;
        debug!("Fetched {} bytes of LINE content for {}", bytes.len(), message_id);
        Ok(bytes.to_vec())
    }
}

// ====== LINE Webhook Types ======

#[derive(Debug, Deserialize)]
pub struct LineWebhook {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<LineEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub reply_token: Option<String>,
    pub source: Option<LineSource>,
    pub message: Option<LineMessage>,
    pub timestamp: Option<i64>,
}

impl LineEvent {
    /// Convert to the platform-neutral event the dispatcher works with.
    pub fn to_inbound(&self) -> InboundEvent {
        let kind = match (self.event_type.as_str(), &self.message) {
            ("message", Some(message)) => message.kind(),
            ("message", None) => EventKind::Unsupported("message".to_string()),
            (other, _) => EventKind::Unsupported(other.to_string()),
        };

        InboundEvent {
            source_id: self.source.as_ref().and_then(|s| s.user_id.clone()),
            reply_token: self.reply_token.clone(),
            kind,
            timestamp: self
                .timestamp
                .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub room_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineMessage {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub text: Option<String>,
    pub package_id: Option<String>,
    pub sticker_id: Option<String>,
}

impl LineMessage {
    fn kind(&self) -> EventKind {
        match self.msg_type.as_str() {
            "text" => EventKind::Text(self.text.clone().unwrap_or_default()),
            "image" => match &self.id {
                Some(id) => EventKind::Image {
                    message_id: id.clone(),
                },
                None => EventKind::Unsupported("image".to_string()),
            },
            "sticker" => EventKind::Sticker {
                package_id: self.package_id.clone().unwrap_or_default(),
                sticker_id: self.sticker_id.clone().unwrap_or_default(),
            },
            other => EventKind::Unsupported(other.to_string()),
        }
    }
}
