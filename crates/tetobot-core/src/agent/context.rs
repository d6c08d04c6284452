use crate::config::AgentConfig;
use crate::types::{CompletionRequest, ContentPart, Message};

/// Stored in memory in place of an image the user sent.
pub const IMAGE_PLACEHOLDER: &str = "[sent an image]";
/// Stored in memory in place of a sticker the user sent.
pub const STICKER_PLACEHOLDER: &str = "[sent a sticker]";

const IMAGE_ANNOTATION: &str = "ผู้ใช้ส่งรูปภาพมา ให้ดูรูปแล้วอธิบายหรือแสดงความเห็นด้วยบุคลิกของเตโตะ";
const STICKER_ANNOTATION: &str = "ผู้ใช้ส่งสติกเกอร์ LINE มา ให้ตอบกลับตามอารมณ์ที่สติกเกอร์น่าจะสื่อ ด้วยบุคลิกของเตโตะ";
const IMAGE_INSTRUCTION: &str = "ช่วยอธิบายภาพนี้แบบ Teto";
/// Keeps the raw sticker IDs out of the answer.
pub(crate) const STICKER_NO_ECHO: &str = "ห้ามพูดถึงหมายเลข packageId หรือ stickerId ในคำตอบ";

/// What kind of inbound content the system prompt is prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Media {
    Text,
    Image,
    Sticker,
}

/// Builds completion requests: persona system prompt, memory, new content.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    system_prompt: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
}

impl ContextBuilder {
    pub fn new(system_prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            model: model.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Persona prompt, annotated for the media being answered.
    pub fn build_system_prompt(&self, media: Media) -> String {
        match media {
            Media::Text => self.system_prompt.clone(),
            Media::Image => format!("{}\n\n{}", self.system_prompt, IMAGE_ANNOTATION),
            Media::Sticker => format!("{}\n\n{}", self.system_prompt, STICKER_ANNOTATION),
        }
    }

    /// User turn carrying an inline JPEG plus the describe instruction.
    pub fn image_turn(encoded: &str) -> Message {
        Message::user_parts(vec![
            ContentPart::jpeg_base64(encoded),
            ContentPart::text(IMAGE_INSTRUCTION),
        ])
    }

    /// User turn describing a sticker. The IDs are only for the model to
    /// guess the mood and must not be repeated back.
    pub fn sticker_turn(package_id: &str, sticker_id: &str) -> Message {
        Message::user(format!(
            "ผู้ใช้ส่งสติกเกอร์ LINE (packageId: {package_id}, stickerId: {sticker_id}) \
            ช่วยเดาอารมณ์ของสติกเกอร์แล้วตอบกลับสั้นๆ แบบเตโตะ {STICKER_NO_ECHO}"
        ))
    }

    /// System turn, then `history`, then `new_turn` if given.
    pub fn build_request(
        &self,
        media: Media,
        history: Vec<Message>,
        new_turn: Option<Message>,
    ) -> CompletionRequest {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(self.build_system_prompt(media)));
        messages.extend(history);
        messages.extend(new_turn);

        CompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}
