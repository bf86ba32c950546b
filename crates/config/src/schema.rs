//! Config schema types (app, automation backend, wechat, jiadan feed).
use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub app: AppConfig,
    pub automation: AutomationConfig,
    pub wechat: WechatConfig,
    pub jiadan: JiadanConfig,
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Lowers the default log level to `debug`.
    pub debug: bool,
    /// User id with implicit full permissions.
    pub admin: String,
    /// IANA time zone used for cron schedules and displayed timestamps.
    pub timezone: String,
    /// SQLite database path. Defaults to `<data_dir>/parley.db`.
    pub database: Option<PathBuf>,
    /// Self id reported to the automation backend.
    pub bot_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: false,
            admin: String::new(),
            timezone: "UTC".into(),
            database: None,
            bot_name: "parley".into(),
        }
    }
}

impl AppConfig {
    /// Parsed time zone, falling back to UTC for unknown names.
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::Tz::UTC)
    }
}

/// Automation backend connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// WebSocket endpoint of the automation backend.
    pub server: String,
    /// Send a placeholder message while a forwarded command is in flight.
    pub placeholder: bool,
    /// Seconds before an unanswered placeholder is recalled.
    pub placeholder_timeout_secs: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            server: "ws://localhost:2536/GSUIDCore".into(),
            placeholder: false,
            placeholder_timeout_secs: 60,
        }
    }
}

/// Personal-messaging provider API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WechatConfig {
    /// HTTP API base URL.
    pub server: String,
    /// Sync socket URL; the token is appended as `?key=<token>`.
    pub sub_url: String,
    /// API token. Required.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<Secret<String>>,
    /// Bot account user id, used for mention detection.
    pub self_id: String,
}

impl Default for WechatConfig {
    fn default() -> Self {
        Self {
            server: "http://localhost:1239".into(),
            sub_url: "ws://localhost:1239/ws/GetSyncMsg".into(),
            token: None,
            self_id: String::new(),
        }
    }
}

impl WechatConfig {
    /// Token value, or an empty string when unset.
    pub fn token_str(&self) -> &str {
        self.token.as_ref().map_or("", |t| t.expose_secret().as_str())
    }
}

/// Jiadan picture feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JiadanConfig {
    /// Default cron spec for `#jiadan-sync`.
    pub sync_cron: String,
    /// Default number of posts fetched per sync.
    pub max_sync_count: u32,
    /// Minimum allowed gap between two sync runs.
    pub min_interval_mins: u64,
}

impl Default for JiadanConfig {
    fn default() -> Self {
        Self {
            sync_cron: "*/60 8-23 * * *".into(),
            max_sync_count: 4,
            min_interval_mins: 10,
        }
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
