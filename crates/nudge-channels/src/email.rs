//! Email channel — SMTP delivery via lettre.
//!
//! Send-only: reminders go out as plain-text mail, nothing comes back.
//! STARTTLS relay with username/password auth.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use nudge_core::config::EmailConfig;
use nudge_core::error::{NudgeError, Result};
use nudge_core::traits::{Channel, InboundStream};
use nudge_core::types::{Capability, ChannelKind, HealthSignal, SendOutcome};

/// SMTP-backed email channel.
pub struct EmailChannel {
    config: EmailConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    connected: AtomicBool,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| NudgeError::channel(format!("SMTP relay setup failed: {e}")))?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self {
            config,
            transport,
            connected: AtomicBool::new(false),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn build_message(&self, recipient: &str, body: &str) -> std::result::Result<Message, String> {
        let from: Mailbox = self
            .config
            .from_address
            .parse()
            .map_err(|e| format!("bad from address {:?}: {e}", self.config.from_address))?;
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| format!("bad recipient {recipient:?}: {e}"))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(subject_for(body))
            .body(body.to_string())
            .map_err(|e| format!("message build failed: {e}"))
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Send, Capability::Health]
    }

    async fn initialize(&self) -> Result<()> {
        match self.transport.test_connection().await {
            Ok(true) => {
                tracing::info!(host = %self.config.smtp_host, "SMTP relay ready");
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            Ok(false) => Err(NudgeError::ChannelNotConnected(format!(
                "SMTP relay {} refused the connection test",
                self.config.smtp_host
            ))),
            Err(e) => Err(NudgeError::channel(format!("SMTP connect failed: {e}"))),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, recipient: &str, body: &str) -> SendOutcome {
        // Malformed addresses never improve with retries.
        let message = match self.build_message(recipient, body) {
            Ok(m) => m,
            Err(detail) => return SendOutcome::Permanent(detail),
        };

        match self.transport.send(message).await {
            Ok(_) => SendOutcome::Delivered,
            Err(e) if e.is_permanent() => SendOutcome::Permanent(format!("SMTP rejected: {e}")),
            Err(e) => SendOutcome::Transient(format!("SMTP send failed: {e}")),
        }
    }

    async fn health(&self) -> HealthSignal {
        let started = Instant::now();
        match self.transport.test_connection().await {
            Ok(true) => HealthSignal::healthy(started.elapsed()),
            Ok(false) => HealthSignal::unhealthy("connection test refused"),
            Err(e) => HealthSignal::unhealthy(format!("SMTP probe failed: {e}")),
        }
    }

    async fn listen(&self) -> Result<InboundStream> {
        Ok(Box::new(futures::stream::pending()))
    }
}

/// Subject line from the first line of the body, clipped to a sane length.
fn subject_for(body: &str) -> String {
    let first = body.lines().next().unwrap_or("").trim();
    if first.is_empty() {
        return "Nudge reminder".to_string();
    }
    let mut subject: String = first.chars().take(60).collect();
    if first.chars().count() > 60 {
        subject.push('…');
    }
    subject
}
