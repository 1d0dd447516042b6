//! Channel factory — builds the transports declared in configuration.

use std::sync::Arc;

use nudge_core::config::ChannelsConfig;
use nudge_core::error::{NudgeError, Result};
use nudge_core::traits::Channel;
use nudge_core::types::ChannelKind;

use crate::email::EmailChannel;
use crate::telegram::TelegramChannel;
use crate::webhook::WebhookChannel;

/// Builds channels from the `[channels]` config section.
///
/// The enabled list is validated once at construction. Asking for a kind
/// outside that list is a configuration error, not a silent fallback.
#[derive(Debug)]
pub struct ChannelFactory {
    config: ChannelsConfig,
    available: Vec<ChannelKind>,
}

impl ChannelFactory {
    pub fn from_config(config: &ChannelsConfig) -> Result<Self> {
        let available = config.enabled_kinds()?;
        Ok(Self {
            config: config.clone(),
            available,
        })
    }

    /// Kinds this factory may build, in declaration order.
    pub fn available(&self) -> &[ChannelKind] {
        &self.available
    }

    pub fn build(&self, kind: ChannelKind) -> Result<Arc<dyn Channel>> {
        if !self.available.contains(&kind) {
            let known = self
                .available
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(NudgeError::config(format!(
                "channel '{kind}' is not enabled (enabled: [{known}])"
            )));
        }

        match kind {
            ChannelKind::Telegram => {
                let config = self.config.telegram.clone().ok_or_else(|| {
                    NudgeError::config("[channels.telegram] section is missing")
                })?;
                Ok(Arc::new(TelegramChannel::new(config)))
            }
            ChannelKind::Email => {
                let config = self
                    .config
                    .email
                    .clone()
                    .ok_or_else(|| NudgeError::config("[channels.email] section is missing"))?;
                Ok(Arc::new(EmailChannel::new(config)?))
            }
            ChannelKind::Webhook => {
                // Every webhook field has a usable default.
                let config = self.config.webhook.clone().unwrap_or_default();
                Ok(Arc::new(WebhookChannel::new(config)?))
            }
        }
    }

    /// Build every enabled channel. One broken channel config skips that
    /// channel with a logged error instead of failing the rest.
    pub fn build_all(&self) -> Vec<Arc<dyn Channel>> {
        let mut channels = Vec::with_capacity(self.available.len());
        for kind in &self.available {
            match self.build(*kind) {
                Ok(channel) => channels.push(channel),
                Err(e) => tracing::error!("skipping channel {kind}: {e}"),
            }
        }
        channels
    }
}
