/// `load_config` module: reads the static YAML settings file and injects the secrets from the
/// environment, producing the [`AppConfig`] the CLI runs with.
///
/// This module is the only place where untrusted YAML and environment values are parsed and
/// mapped into the strongly-typed settings of the relay.
///
/// # Sources
/// - YAML file: every non-secret setting (see [`FileConfig`]).
/// - `MISSKEY_TOKEN`, `TELEGRAM_BOT_TOKEN`: required secrets, never read from the file.
/// - `MISSKEY_URL`: overrides `misskey.url` when set.
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary. A missing or invalid
/// required value is fatal; the relay never starts half-configured.
use anyhow::{anyhow, Context, Result};
use note_relay_core::config::{FailurePolicy, NoteView, RelayConfig};
use note_relay_core::contract::Visibility;
use note_relay_core::message::InboundFilter;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub const MISSKEY_TOKEN_VAR: &str = "MISSKEY_TOKEN";
pub const TELEGRAM_TOKEN_VAR: &str = "TELEGRAM_BOT_TOKEN";
pub const MISSKEY_URL_VAR: &str = "MISSKEY_URL";

#[derive(Debug, Deserialize)]
pub struct FileConfig {
    pub misskey: MisskeySection,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub telegram: TelegramSection,
}

#[derive(Debug, Deserialize)]
pub struct MisskeySection {
    #[serde(default)]
    pub url: Option<String>,
    pub upload_folder: String,
    pub visibility: String,
    pub local_only: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct RelaySection {
    #[serde(default)]
    pub footer: String,
    #[serde(default)]
    pub allowed_chat_id: Option<i64>,
    #[serde(default)]
    pub allowed_user_id: Option<i64>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Deserialize)]
pub struct TelegramSection {
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u32,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            poll_timeout_secs: default_poll_timeout_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_poll_timeout_secs() -> u32 {
    60
}

fn default_queue_capacity() -> usize {
    100
}

/// Everything the relay needs to start.
#[derive(Clone)]
pub struct AppConfig {
    pub misskey_url: String,
    pub misskey_token: String,
    pub telegram_token: String,
    pub relay: RelayConfig,
    pub allowed_chat_id: Option<i64>,
    pub allowed_user_id: Option<i64>,
    pub poll_timeout_secs: u32,
    pub queue_capacity: usize,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("misskey_url", &self.misskey_url)
            .field("misskey_token", &"[REDACTED]")
            .field("telegram_token", &"[REDACTED]")
            .field("relay", &self.relay)
            .field("allowed_chat_id", &self.allowed_chat_id)
            .field("allowed_user_id", &self.allowed_user_id)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl AppConfig {
    /// Admission filter for messages dated from `started_at` on.
    pub fn inbound_filter(&self, started_at: chrono::DateTime<chrono::Utc>) -> InboundFilter {
        InboundFilter::new(started_at, self.allowed_chat_id, self.allowed_user_id)
    }
}

fn required_env(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => {
            error!(var = name, "Required environment variable is missing");
            Err(anyhow!("{name} must be set in the environment"))
        }
    }
}

/// Loads the YAML settings at `path` and merges in the environment secrets.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let raw: FileConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let misskey_url = env::var(MISSKEY_URL_VAR)
        .ok()
        .filter(|url| !url.trim().is_empty())
        .or(raw.misskey.url)
        .ok_or_else(|| anyhow!("misskey.url is not set and {MISSKEY_URL_VAR} is empty"))?;
    let misskey_token = required_env(MISSKEY_TOKEN_VAR)?;
    let telegram_token = required_env(TELEGRAM_TOKEN_VAR)?;

    let visibility = raw
        .misskey
        .visibility
        .parse::<Visibility>()
        .map_err(|e| anyhow!(e))
        .context("Invalid misskey.visibility")?;

    if raw.misskey.upload_folder.trim().is_empty() {
        return Err(anyhow!("misskey.upload_folder must not be empty"));
    }
    if raw.telegram.queue_capacity == 0 {
        return Err(anyhow!("telegram.queue_capacity must be at least 1"));
    }

    let relay = RelayConfig {
        upload_folder: raw.misskey.upload_folder,
        view: NoteView {
            visibility,
            local_only: raw.misskey.local_only,
        },
        footer: raw.relay.footer,
        failure_policy: raw.relay.failure_policy,
    };

    let config = AppConfig {
        misskey_url,
        misskey_token,
        telegram_token,
        relay,
        allowed_chat_id: raw.relay.allowed_chat_id.filter(|id| *id != 0),
        allowed_user_id: raw.relay.allowed_user_id.filter(|id| *id != 0),
        poll_timeout_secs: raw.telegram.poll_timeout_secs,
        queue_capacity: raw.telegram.queue_capacity,
    };
    info!(config = ?config, "Configuration loaded");
    Ok(config)
}
