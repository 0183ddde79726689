//! Message and reply payloads flowing between the socket, the dispatcher,
//! and command handlers.

use serde::{Deserialize, Serialize};

/// A message received from a chat, as delivered by the session socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Chat (group or DM) the message arrived in.
    pub chat_id: String,
    /// Sender JID.
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Message text (caption for media messages).
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub is_group: bool,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaAttachment>,
}

/// Media attached to an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub mime_type: String,
    /// Raw media bytes.
    #[serde(default)]
    pub data: Vec<u8>,
    /// Duration in seconds, for audio/video.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u32>,
}

impl MediaAttachment {
    #[must_use]
    pub fn is_video(&self) -> bool {
        self.mime_type.starts_with("video/")
    }

    #[must_use]
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    #[must_use]
    pub fn is_webp(&self) -> bool {
        self.mime_type.contains("webp")
    }
}

/// What a command handler wants sent back to the chat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// WebP sticker bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sticker: Option<Vec<u8>>,
}

impl ReplyPayload {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            sticker: None,
        }
    }

    #[must_use]
    pub fn sticker(data: Vec<u8>) -> Self {
        Self {
            text: None,
            sticker: Some(data),
        }
    }

    /// True when there is nothing to send.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.sticker.is_none()
    }
}
