//! Nudge configuration, loaded from `~/.nudge/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{NudgeError, Result};
use crate::types::{ChannelKind, UserProfile};

fn default_poll_interval() -> u64 {
    30
}

fn default_grace() -> u64 {
    10
}

/// `[service]` — daemon-wide knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Root for schedules, tasks, and reschedule markers.
    /// Defaults to `~/.nudge/data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            poll_interval_secs: default_poll_interval(),
            shutdown_grace_secs: default_grace(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.telegram.org".into()
}

fn default_poll_timeout() -> u64 {
    25
}

/// `[channels.telegram]` — Bot API credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Long-poll timeout passed to getUpdates.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    587
}

/// `[channels.email]` — outbound SMTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub from_address: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".into()
}

fn default_max_skew() -> i64 {
    300
}

/// `[channels.webhook]` — signed inbound listener + optional outbound POST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// PEM public key used to verify inbound signatures. Unset means
    /// inbound requests are rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_pem: Option<String>,
    /// URL outbound messages are POSTed to. Unset means send-only is off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_url: Option<String>,
    /// Maximum accepted age of the signed timestamp, in seconds.
    #[serde(default = "default_max_skew")]
    pub max_skew_secs: i64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_key_pem: None,
            outbound_url: None,
            max_skew_secs: default_max_skew(),
        }
    }
}

/// `[channels]` — which transports run, plus their credential tables.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    /// Transport kinds the factory may build. Everything else is
    /// undeclared and refused.
    #[serde(default)]
    pub enabled: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<TelegramConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,
}

impl ChannelsConfig {
    /// Kinds declared in `enabled`, in declaration order with duplicates
    /// dropped. Unknown names are a config error.
    pub fn enabled_kinds(&self) -> Result<Vec<ChannelKind>> {
        let mut kinds = Vec::new();
        for name in &self.enabled {
            let kind: ChannelKind = name.parse()?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Ok(kinds)
    }
}

fn default_base_delay() -> u64 {
    5
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    5
}

fn default_send_timeout() -> u64 {
    10
}

/// `[retry]` — backoff policy for transient delivery failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Per-call time box on a single send attempt.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_base_delay(),
            multiplier: default_multiplier(),
            max_delay_secs: default_max_delay(),
            max_attempts: default_max_attempts(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

fn default_monitor_interval() -> u64 {
    30
}

fn default_unhealthy_threshold() -> u32 {
    3
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_probe_timeout() -> u64 {
    5
}

/// `[monitor]` — health polling and reconnection bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,
    /// Consecutive unhealthy probes before Active turns Degraded.
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    /// Reconnection tries before Degraded turns Stopped.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            unhealthy_threshold: default_unhealthy_threshold(),
            reconnect_attempts: default_reconnect_attempts(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_gateway_port() -> u16 {
    8686
}

/// `[gateway]` — the HTTP status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NudgeConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub users: Vec<UserProfile>,
}

impl NudgeConfig {
    /// `~/.nudge`
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".nudge")
    }

    /// `~/.nudge/config.toml`
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Resolved data root (schedules, tasks, reschedule markers).
    pub fn data_dir(&self) -> PathBuf {
        self.service
            .data_dir
            .clone()
            .unwrap_or_else(|| Self::home_dir().join("data"))
    }

    /// Load from the default path, falling back to defaults when the
    /// file does not exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                NudgeError::ConfigNotFound(path.display().to_string())
            } else {
                NudgeError::Io(e)
            }
        })?;
        toml::from_str(&content)
            .map_err(|e| NudgeError::config(format!("{}: {e}", path.display())))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| NudgeError::config(format!("Serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Channel kinds declared in `[channels] enabled`.
    pub fn enabled_kinds(&self) -> Result<Vec<ChannelKind>> {
        self.channels.enabled_kinds()
    }

    pub fn user(&self, user_id: &str) -> Option<&UserProfile> {
        self.users.iter().find(|u| u.user_id == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NudgeConfig::default();
        assert_eq!(config.service.poll_interval_secs, 30);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.monitor.unhealthy_threshold, 3);
        assert!(config.gateway.enabled);
        assert!(config.channels.enabled.is_empty());
        assert!(config.users.is_empty());
    }

    #[test]
    fn test_parse_full_document() {
        let src = r#"
            [service]
            poll_interval_secs = 15

            [channels]
            enabled = ["telegram", "email"]

            [channels.telegram]
            bot_token = "123:abc"

            [channels.email]
            smtp_host = "smtp.example.com"
            from_address = "nudge@example.com"

            [retry]
            base_delay_secs = 2
            max_attempts = 4

            [[users]]
            user_id = "ryan"
            preferred_channel = "telegram"
            telegram_chat_id = "42"
        "#;
        let config: NudgeConfig = toml::from_str(src).unwrap();
        assert_eq!(config.service.poll_interval_secs, 15);
        assert_eq!(
            config.enabled_kinds().unwrap(),
            vec![ChannelKind::Telegram, ChannelKind::Email]
        );
        assert_eq!(config.channels.telegram.as_ref().unwrap().poll_timeout_secs, 25);
        assert_eq!(config.retry.base_delay_secs, 2);
        assert_eq!(config.retry.multiplier, 2.0);
        assert_eq!(config.user("ryan").unwrap().telegram_chat_id.as_deref(), Some("42"));
        assert!(config.user("nobody").is_none());
    }

    #[test]
    fn test_enabled_kinds_rejects_unknown() {
        let mut config = NudgeConfig::default();
        config.channels.enabled = vec!["telegram".into(), "fax".into()];
        let err = config.enabled_kinds().unwrap_err();
        assert!(err.to_string().contains("fax"));
    }

    #[test]
    fn test_enabled_kinds_dedup() {
        let mut config = NudgeConfig::default();
        config.channels.enabled = vec!["email".into(), "email".into()];
        assert_eq!(config.enabled_kinds().unwrap(), vec![ChannelKind::Email]);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = NudgeConfig::default();
        config.channels.enabled = vec!["webhook".into()];
        config.channels.webhook = Some(WebhookConfig::default());
        config.save_to(&path).unwrap();

        let reloaded = NudgeConfig::load_from(&path).unwrap();
        assert_eq!(reloaded.enabled_kinds().unwrap(), vec![ChannelKind::Webhook]);
        assert_eq!(reloaded.channels.webhook.unwrap().max_skew_secs, 300);
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = NudgeConfig::load_from(Path::new("/nonexistent/nudge.toml")).unwrap_err();
        assert!(matches!(err, NudgeError::ConfigNotFound(_)));
    }
}
