//! # Nudge Channels
//! Transport implementations behind the `Channel` trait, plus the factory
//! that builds them from configuration.

pub mod email;
pub mod factory;
pub mod telegram;
pub mod webhook;

pub use email::EmailChannel;
pub use factory::ChannelFactory;
pub use telegram::TelegramChannel;
pub use webhook::{SignatureVerifier, WebhookChannel};
