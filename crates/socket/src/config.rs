use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default port for the sidecar WebSocket server.
pub const DEFAULT_SIDECAR_PORT: u16 = 3920;

/// Options forwarded to the session library when a session is created.
///
/// Field names and defaults follow what the protocol library recognizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub mark_online_on_connect: bool,
    pub generate_high_quality_link_preview: bool,
    pub sync_full_history: bool,
    pub keep_alive_interval_ms: u64,
    pub max_idle_time_ms: u64,
    /// Pinned protocol version; latest when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Sticker pack branding applied to outbound stickers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pack_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            mark_online_on_connect: false,
            generate_high_quality_link_preview: true,
            sync_full_history: false,
            keep_alive_interval_ms: 55_000,
            max_idle_time_ms: 60_000,
            version: None,
            pack_name: None,
            author: None,
        }
    }
}

/// How the sidecar process is located and reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    pub port: u16,
    /// Directory containing the sidecar code; discovered when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Spawn the sidecar automatically; disable to run it by hand.
    pub auto_start: bool,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SIDECAR_PORT,
            dir: None,
            auto_start: true,
        }
    }
}

/// Full configuration a session is created from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Directory holding the credential blob (`creds.json`).
    pub auth_dir: PathBuf,
    pub options: SessionOptions,
    pub sidecar: SidecarConfig,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            auth_dir: PathBuf::from("auth"),
            options: SessionOptions::default(),
            sidecar: SidecarConfig::default(),
        }
    }
}
