//! Configuration loading and environment overrides.
//!
//! Config files: `novabot.toml` or `novabot.json`, searched in `./` then the
//! user config directory. Supports `${ENV_VAR}` substitution in the raw file
//! and a handful of process-environment overrides applied after parsing.

use std::path::{Path, PathBuf};

use {
    novabot_session::DEFAULT_BACKUP_INTERVAL,
    novabot_socket::{SessionOptions, SidecarConfig},
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["novabot.toml", "novabot.json"];

/// Reconnect-loop tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_consecutive_failures: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_consecutive_failures: 20,
        }
    }
}

/// Top-level bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Phone number for pairing-code bootstrap; QR login when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,

    /// Listen port reserved for an operator surface; unused by the bot core.
    pub port: u16,

    /// Prefix that marks a chat message as a command.
    pub command_prefix: String,

    /// Data root; auth state, backups, and the database live underneath
    /// unless the individual directories are overridden.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_dir: Option<PathBuf>,

    /// Cadence of the periodic credential backup.
    pub backup_interval_secs: u64,

    /// Options forwarded to the session library.
    pub session: SessionOptions,

    /// Sidecar process/transport settings.
    pub sidecar: SidecarConfig,

    pub reconnect: ReconnectSettings,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            phone_number: None,
            port: 3000,
            command_prefix: ".".into(),
            data_dir: None,
            auth_dir: None,
            backup_dir: None,
            database_dir: None,
            backup_interval_secs: DEFAULT_BACKUP_INTERVAL.as_secs(),
            session: SessionOptions::default(),
            sidecar: SidecarConfig::default(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl BotConfig {
    /// Resolved data root: explicit value, else the platform data dir.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("", "", "novabot")
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    #[must_use]
    pub fn auth_dir(&self) -> PathBuf {
        self.auth_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("auth"))
    }

    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("backups"))
    }

    #[must_use]
    pub fn database_dir(&self) -> PathBuf {
        self.database_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("database"))
    }
}

/// Discover and load config from standard locations.
///
/// Search order: `./novabot.{toml,json}`, then the same names under
/// `config_dir` (or the platform config dir). Returns defaults when nothing
/// is found, with env overrides applied either way.
pub fn discover_and_load(config_dir: Option<&Path>) -> BotConfig {
    let mut config = match find_config_file(config_dir) {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            match load_config(&path) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                    BotConfig::default()
                },
            }
        },
        None => {
            debug!("no config file found, using defaults");
            BotConfig::default()
        },
    };
    apply_env_overrides(&mut config);
    config
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<BotConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    match ext {
        "toml" => Ok(toml::from_str(&raw)?),
        "json" => Ok(serde_json::from_str(&raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

fn find_config_file(config_dir: Option<&Path>) -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global
    let dir = match config_dir {
        Some(dir) => dir.to_path_buf(),
        None => directories::ProjectDirs::from("", "", "novabot")?
            .config_dir()
            .to_path_buf(),
    };
    for name in CONFIG_FILENAMES {
        let p = dir.join(name);
        if p.exists() {
            return Some(p);
        }
    }

    None
}

/// Apply process-environment overrides: `BOT_PHONE_NUMBER` and
/// `PORT`/`SERVER_PORT`.
pub fn apply_env_overrides(config: &mut BotConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut BotConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(number) = lookup("BOT_PHONE_NUMBER")
        && !number.is_empty()
    {
        config.phone_number = Some(number);
    }

    for key in ["PORT", "SERVER_PORT"] {
        if let Some(raw) = lookup(key) {
            match raw.parse() {
                Ok(port) => {
                    config.port = port;
                    break;
                },
                Err(_) => warn!(key, value = %raw, "ignoring unparseable port override"),
            }
        }
    }
}

/// Replace `${ENV_VAR}` placeholders in the raw config text.
///
/// Unresolvable variables are left as-is.
fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) if !name.is_empty() => result.push_str(&value),
                    _ => {
                        result.push_str("${");
                        result.push_str(name);
                        result.push('}');
                    },
                }
                rest = &after[end + 1..];
            },
            None => {
                // Malformed trailing placeholder — emit literally.
                result.push_str(&rest[start..]);
                rest = "";
            },
        }
    }

    result.push_str(rest);
    result
}
