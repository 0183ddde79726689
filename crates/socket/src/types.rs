//! Wire types exchanged with the sidecar and surfaced to the supervisor.

use std::collections::HashMap;

use {
    novabot_common::InboundMessage,
    serde::{Deserialize, Serialize},
};

use crate::config::SessionOptions;

/// Connection lifecycle phase reported by the session library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Close,
}

/// A `connection.update` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionUpdate {
    pub phase: ConnectionPhase,
    /// Disconnect reason, present on `Close`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_disconnect: Option<String>,
}

impl ConnectionUpdate {
    #[must_use]
    pub fn open() -> Self {
        Self {
            phase: ConnectionPhase::Open,
            last_disconnect: None,
        }
    }

    #[must_use]
    pub fn close(reason: impl Into<String>) -> Self {
        Self {
            phase: ConnectionPhase::Close,
            last_disconnect: Some(reason.into()),
        }
    }
}

/// Frames sent to the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayFrame {
    /// Start (or restart) the session with the given auth state and options.
    Login {
        auth_dir: String,
        options: SessionOptions,
        /// Group metadata carried over from the previous session handle.
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        cached_group_metadata: HashMap<String, serde_json::Value>,
    },
    RequestPairingCode {
        request_id: String,
        number: String,
    },
    Send {
        request_id: String,
        chat_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        /// Base64-encoded WebP sticker.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sticker_b64: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pack_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        author: Option<String>,
    },
    /// Tear the session down.
    Close,
}

/// Frames received from the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarFrame {
    ConnectionUpdate {
        connection: ConnectionPhase,
        #[serde(default)]
        last_disconnect: Option<String>,
    },
    PairingCode {
        request_id: String,
        code: String,
    },
    Message {
        #[serde(flatten)]
        message: InboundMessage,
    },
    /// Fresh metadata for a group chat; kept in the transient cache.
    GroupMetadata {
        chat_id: String,
        metadata: serde_json::Value,
    },
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}
