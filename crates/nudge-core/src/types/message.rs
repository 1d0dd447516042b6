//! Outbound message, delivery attempt, and inbound event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ChannelKind;

/// A message queued for delivery to one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub user_id: String,
    pub category: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(
        user_id: impl Into<String>,
        category: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            category: category.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}

/// Outcome of a single `Channel::send` call.
///
/// Transient failures are retried with backoff; permanent failures
/// abandon the message immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    Transient(String),
    Permanent(String),
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered)
    }
}

/// Classified result recorded on the attempt trail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Delivered,
    Transient,
    Permanent,
    Timeout,
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Delivered => write!(f, "delivered"),
            AttemptOutcome::Transient => write!(f, "transient"),
            AttemptOutcome::Permanent => write!(f, "permanent"),
            AttemptOutcome::Timeout => write!(f, "timeout"),
        }
    }
}

/// One entry in a message's append-only delivery trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub message_id: Uuid,
    pub channel: ChannelKind,
    pub at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryAttempt {
    pub fn new(message_id: Uuid, channel: ChannelKind, outcome: AttemptOutcome) -> Self {
        Self {
            message_id,
            channel,
            at: Utc::now(),
            outcome,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Event received from a channel's inbound side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub channel: ChannelKind,
    pub sender_id: String,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(
        channel: ChannelKind,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            sender_id: sender_id.into(),
            content: content.into(),
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_message_constructor() {
        let msg = OutboundMessage::new("ryan", "motivational", "keep going");
        assert_eq!(msg.user_id, "ryan");
        assert_eq!(msg.category, "motivational");
        assert_eq!(msg.body, "keep going");
    }

    #[test]
    fn test_message_json_roundtrip() {
        let msg = OutboundMessage::new("u1", "tasks", "do the thing");
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: OutboundMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, msg.id);
        assert_eq!(parsed.body, "do the thing");
    }

    #[test]
    fn test_send_outcome_delivered() {
        assert!(SendOutcome::Delivered.is_delivered());
        assert!(!SendOutcome::Transient("500".into()).is_delivered());
        assert!(!SendOutcome::Permanent("bad address".into()).is_delivered());
    }

    #[test]
    fn test_attempt_trail_entry() {
        let id = Uuid::new_v4();
        let attempt = DeliveryAttempt::new(id, ChannelKind::Telegram, AttemptOutcome::Transient)
            .with_error("HTTP 502");
        assert_eq!(attempt.message_id, id);
        assert_eq!(attempt.outcome, AttemptOutcome::Transient);
        assert_eq!(attempt.error.as_deref(), Some("HTTP 502"));
    }

    #[test]
    fn test_attempt_outcome_display() {
        assert_eq!(AttemptOutcome::Delivered.to_string(), "delivered");
        assert_eq!(AttemptOutcome::Timeout.to_string(), "timeout");
    }
}
