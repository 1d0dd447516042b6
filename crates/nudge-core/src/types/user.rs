//! User profiles: the routing policy's address book.

use serde::{Deserialize, Serialize};

use super::ChannelKind;

/// Per-user delivery addresses, declared in `[[users]]` config tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    /// Channel tried first when routing a message for this user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_channel: Option<ChannelKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram_chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            preferred_channel: None,
            telegram_chat_id: None,
            email: None,
        }
    }

    /// The address this user is reachable at over the given channel.
    ///
    /// Webhook delivery addresses the user by id inside the posted
    /// payload, so every user is addressable there.
    pub fn address_for(&self, kind: ChannelKind) -> Option<&str> {
        match kind {
            ChannelKind::Telegram => self.telegram_chat_id.as_deref(),
            ChannelKind::Email => self.email.as_deref(),
            ChannelKind::Webhook => Some(&self.user_id),
        }
    }
}
