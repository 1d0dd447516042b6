//! Channel kinds, lifecycle states, and health signals.

use serde::{Deserialize, Serialize};

use crate::error::NudgeError;

/// Transport kind a channel speaks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Telegram,
    Email,
    Webhook,
}

impl ChannelKind {
    /// All kinds Nudge knows how to build.
    pub const ALL: [ChannelKind; 3] = [
        ChannelKind::Telegram,
        ChannelKind::Email,
        ChannelKind::Webhook,
    ];
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Telegram => write!(f, "telegram"),
            ChannelKind::Email => write!(f, "email"),
            ChannelKind::Webhook => write!(f, "webhook"),
        }
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = NudgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "telegram" => Ok(ChannelKind::Telegram),
            "email" => Ok(ChannelKind::Email),
            "webhook" => Ok(ChannelKind::Webhook),
            other => Err(NudgeError::config(format!(
                "Unknown channel kind '{other}' (known: telegram, email, webhook)"
            ))),
        }
    }
}

/// Lifecycle state of a managed channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Unconfigured,
    Starting,
    Active,
    Degraded,
    Stopped,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Unconfigured => write!(f, "unconfigured"),
            ChannelState::Starting => write!(f, "starting"),
            ChannelState::Active => write!(f, "active"),
            ChannelState::Degraded => write!(f, "degraded"),
            ChannelState::Stopped => write!(f, "stopped"),
        }
    }
}

/// What a channel can do. Routing only sends through `Send`-capable
/// channels; inbound consumers are attached to `Receive`-capable ones.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Send,
    Receive,
    Health,
}

/// Result of one health probe.
#[derive(Debug, Clone)]
pub struct HealthSignal {
    pub healthy: bool,
    pub latency: Option<std::time::Duration>,
    pub detail: Option<String>,
}

impl HealthSignal {
    pub fn healthy(latency: std::time::Duration) -> Self {
        Self {
            healthy: true,
            latency: Some(latency),
            detail: None,
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency: None,
            detail: Some(detail.into()),
        }
    }
}
