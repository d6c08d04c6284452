pub mod context;

use std::sync::Arc;

use base64::Engine;
use tracing::{debug, error, info, warn};

use crate::channel::line::LINE_MAX_TEXT_CHARS;
use crate::channel::Messenger;
use crate::config::RepliesConfig;
use crate::error::{ProviderError, Result};
use crate::provider::LlmProvider;
use crate::session::SessionMemory;
use crate::types::{CompletionRequest, EventKind, FinishReason, InboundEvent, Message};
use crate::util::truncate_chars;

/// How long LINE accepts a reply token after the event was sent.
pub const REPLY_TOKEN_TTL_SECS: i64 = 60;

/// Whether an event sent at `sent_at` is past the reply token lifetime.
pub fn reply_window_expired(
    sent_at: chrono::DateTime<chrono::Utc>,
    now: chrono::DateTime<chrono::Utc>,
) -> bool {
    now.signed_duration_since(sent_at) > chrono::Duration::seconds(REPLY_TOKEN_TTL_SECS)
}

pub use self::context::{ContextBuilder, Media, IMAGE_PLACEHOLDER, STICKER_PLACEHOLDER};

/// Why an event produced no reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingSource,
    MissingReplyToken,
    Unsupported(String),
}

/// Result of dispatching one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Skipped(SkipReason),
    /// A reply was sent. `fallback` is set when it is the in-character
    /// error message rather than a model answer.
    Replied { text: String, fallback: bool },
}

/// Turns one inbound event into exactly one reply.
pub struct Dispatcher {
    provider: Arc<dyn LlmProvider>,
    messenger: Arc<dyn Messenger>,
    memory: Arc<SessionMemory>,
    context: ContextBuilder,
    replies: RepliesConfig,
}

impl Dispatcher {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        messenger: Arc<dyn Messenger>,
        memory: Arc<SessionMemory>,
        context: ContextBuilder,
        replies: RepliesConfig,
    ) -> Self {
        Self {
            provider,
            messenger,
            memory,
            context,
            replies,
        }
    }

    pub fn memory(&self) -> &Arc<SessionMemory> {
        &self.memory
    }

    /// Handle one event. Errors are only returned when the reply itself
    /// could not be delivered.
    pub async fn dispatch(&self, event: &InboundEvent) -> Result<DispatchOutcome> {
        let Some(user_id) = event.source_id.as_deref() else {
            debug!("Skipping event without user id");
            return Ok(DispatchOutcome::Skipped(SkipReason::MissingSource));
        };
        let Some(reply_token) = event.reply_token.as_deref() else {
            debug!("Skipping event without reply token from {}", user_id);
            return Ok(DispatchOutcome::Skipped(SkipReason::MissingReplyToken));
        };

        if let Some(sent_at) = event.timestamp {
            if reply_window_expired(sent_at, chrono::Utc::now()) {
                warn!(
                    "Event from {} sent at {} is older than the reply token lifetime",
                    user_id, sent_at
                );
            }
        }

        // held until the reply is sent so one user's turns stay in order
        let _guard = self.memory.lock(user_id).await;

        let (text, fallback) = match &event.kind {
            EventKind::Text(text) => self.handle_text(user_id, text).await,
            EventKind::Image { message_id } => self.handle_image(user_id, message_id).await,
            EventKind::Sticker {
                package_id,
                sticker_id,
            } => self.handle_sticker(user_id, package_id, sticker_id).await,
            EventKind::Unsupported(kind) => {
                debug!("Skipping unsupported event from {}: {}", user_id, kind);
                return Ok(DispatchOutcome::Skipped(SkipReason::Unsupported(kind.clone())));
            }
        };

        self.messenger.reply(reply_token, &text).await.map_err(|e| {
            error!("Failed to send {} reply to {}: {}", self.messenger.name(), user_id, e);
            e
        })?;

        Ok(DispatchOutcome::Replied { text, fallback })
    }

    async fn handle_text(&self, user_id: &str, text: &str) -> (String, bool) {
        info!("Text from {}: {}", user_id, crate::util::truncate_string(text, 80, "..."));

        self.memory.append(user_id, Message::user(text));
        let request = self
            .context
            .build_request(Media::Text, self.memory.get(user_id), None);

        match self.complete(&request).await {
            Ok(reply) => {
                self.memory.append(user_id, Message::assistant(reply.clone()));
                (reply, false)
            }
            Err(e) => {
                warn!("Text completion failed for {}: {}", user_id, e);
                (self.replies.text_fallback.clone(), true)
            }
        }
    }

    async fn handle_image(&self, user_id: &str, message_id: &str) -> (String, bool) {
        info!("Image from {} (message {})", user_id, message_id);

        let bytes = match self.messenger.fetch_content(message_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to download image {}: {}", message_id, e);
                return (self.replies.image_fallback.clone(), true);
            }
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);

        let request = self.context.build_request(
            Media::Image,
            self.memory.get(user_id),
            Some(ContextBuilder::image_turn(&encoded)),
        );

        match self.complete(&request).await {
            Ok(reply) => {
                self.memory.append(user_id, Message::user(IMAGE_PLACEHOLDER));
                self.memory.append(user_id, Message::assistant(reply.clone()));
                (reply, false)
            }
            Err(e) => {
                warn!("Image completion failed for {}: {}", user_id, e);
                (self.replies.image_fallback.clone(), true)
            }
        }
    }

    async fn handle_sticker(&self, user_id: &str, package_id: &str, sticker_id: &str) -> (String, bool) {
        info!("Sticker from {}: {}/{}", user_id, package_id, sticker_id);

        let request = self.context.build_request(
            Media::Sticker,
            self.memory.get(user_id),
            Some(ContextBuilder::sticker_turn(package_id, sticker_id)),
        );

        match self.complete(&request).await {
            Ok(reply) => {
                self.memory.append(user_id, Message::user(STICKER_PLACEHOLDER));
                self.memory.append(user_id, Message::assistant(reply.clone()));
                (reply, false)
            }
            Err(e) => {
                warn!("Sticker completion failed for {}: {}", user_id, e);
                (self.replies.sticker_fallback.clone(), true)
            }
        }
    }

    /// Run the completion and return the reply trimmed to what LINE accepts.
    /// A blank answer is an error.
    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, ProviderError> {
        let response = self.provider.chat(request).await?;
        debug!(
            "Completion finished ({:?}): {} prompt + {} completion tokens",
            response.finish_reason, response.usage.prompt_tokens, response.usage.completion_tokens
        );
        if response.finish_reason == FinishReason::Length {
            warn!("Completion cut off at the token limit");
        }
        let text = response
            .text()
            .ok_or_else(|| ProviderError::Parse("Empty completion".to_string()))?;
        Ok(truncate_chars(text, LINE_MAX_TEXT_CHARS).to_string())
    }
}
