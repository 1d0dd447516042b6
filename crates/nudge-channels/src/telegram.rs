//! Telegram Bot API channel — REST sends plus getUpdates long-polling.
//!
//! Sends go through `sendMessage`; inbound messages arrive via a
//! background long-poll loop that reconnects with exponential backoff.

use async_trait::async_trait;
use nudge_core::config::TelegramConfig;
use nudge_core::error::{NudgeError, Result};
use nudge_core::traits::{Channel, InboundStream};
use nudge_core::types::{Capability, ChannelKind, HealthSignal, InboundEvent, SendOutcome};
use serde::Deserialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

/// Bot identity returned by getMe.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramBot {
    pub id: i64,
    #[serde(default)]
    pub username: String,
}

/// Telegram Bot API channel.
pub struct TelegramChannel {
    config: TelegramConfig,
    client: reqwest::Client,
    connected: AtomicBool,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundEvent>>>,
    poller: Mutex<Option<CancellationToken>>,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            client: reqwest::Client::new(),
            connected: AtomicBool::new(false),
            inbound_tx: tx,
            inbound_rx: Mutex::new(Some(rx)),
            poller: Mutex::new(None),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.config.api_base, &self.config.bot_token, method)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Verify the bot token against the API.
    pub async fn get_me(&self) -> Result<TelegramBot> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| NudgeError::channel(format!("getMe failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(NudgeError::AuthFailed(format!(
                "Telegram rejected the bot token: {status}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| NudgeError::channel(format!("Invalid getMe response: {e}")))?;
        serde_json::from_value(body["result"].clone())
            .map_err(|e| NudgeError::channel(format!("Invalid getMe payload: {e}")))
    }

    /// Start the long-poll loop once; later calls are no-ops.
    fn spawn_poller(&self) {
        let mut poller = self.poller.lock().unwrap_or_else(|p| p.into_inner());
        if poller.is_some() {
            return;
        }
        let token = CancellationToken::new();
        tokio::spawn(run_long_poll(
            self.client.clone(),
            self.config.clone(),
            self.inbound_tx.clone(),
            token.clone(),
        ));
        *poller = Some(token);
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Send, Capability::Receive, Capability::Health]
    }

    async fn initialize(&self) -> Result<()> {
        let bot = self.get_me().await?;
        tracing::info!("Telegram bot @{} ({}) ready", bot.username, bot.id);
        self.connected.store(true, Ordering::SeqCst);
        self.spawn_poller();
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        let token = self
            .poller
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(token) = token {
            token.cancel();
        }
        Ok(())
    }

    async fn send(&self, recipient: &str, body: &str) -> SendOutcome {
        let payload = serde_json::json!({ "chat_id": recipient, "text": body });
        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&payload)
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await;

        match response {
            Err(e) => SendOutcome::Transient(format!("Telegram request failed: {e}")),
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    SendOutcome::Delivered
                } else {
                    let detail = resp.text().await.unwrap_or_default();
                    classify_status(status, detail)
                }
            }
        }
    }

    async fn health(&self) -> HealthSignal {
        let started = std::time::Instant::now();
        match self.get_me().await {
            Ok(_) => HealthSignal::healthy(started.elapsed()),
            Err(e) => HealthSignal::unhealthy(e.to_string()),
        }
    }

    async fn listen(&self) -> Result<InboundStream> {
        let rx = self
            .inbound_rx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        match rx {
            Some(rx) => Ok(Box::new(UnboundedReceiverStream::new(rx))),
            None => Err(NudgeError::channel("Telegram inbound stream already taken")),
        }
    }
}

fn api_url(base: &str, token: &str, method: &str) -> String {
    format!("{}/bot{token}/{method}", base.trim_end_matches('/'))
}

/// Map a non-success HTTP status to a delivery outcome.
///
/// 429 and server errors are worth retrying; other client errors mean
/// the request itself is bad (unknown chat, revoked token).
fn classify_status(status: reqwest::StatusCode, detail: String) -> SendOutcome {
    if status.as_u16() == 429 {
        SendOutcome::Transient(format!("Telegram rate limited: {detail}"))
    } else if status.is_client_error() {
        SendOutcome::Permanent(format!("Telegram {status}: {detail}"))
    } else {
        SendOutcome::Transient(format!("Telegram {status}: {detail}"))
    }
}

/// Extract an inbound event from one getUpdates entry.
fn event_from_update(update: &serde_json::Value) -> Option<InboundEvent> {
    let message = update.get("message")?;
    let chat_id = message["chat"]["id"].as_i64()?;
    let text = message["text"].as_str().unwrap_or("");
    Some(InboundEvent::new(
        ChannelKind::Telegram,
        chat_id.to_string(),
        text,
    ))
}

/// Long-poll getUpdates until cancelled, reconnecting with backoff.
async fn run_long_poll(
    client: reqwest::Client,
    config: TelegramConfig,
    tx: mpsc::UnboundedSender<InboundEvent>,
    token: CancellationToken,
) {
    let url = api_url(&config.api_base, &config.bot_token, "getUpdates");
    let request_timeout = std::time::Duration::from_secs(config.poll_timeout_secs + 10);
    let mut offset: i64 = 0;
    let mut backoff_secs: u64 = 5;

    loop {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": config.poll_timeout_secs,
        });

        let response = tokio::select! {
            _ = token.cancelled() => break,
            r = client.post(&url).json(&body).timeout(request_timeout).send() => r,
        };

        match response {
            Ok(resp) => {
                let payload: serde_json::Value = match resp.json().await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("Telegram poll returned invalid JSON: {e}");
                        continue;
                    }
                };
                for update in payload["result"].as_array().into_iter().flatten() {
                    if let Some(id) = update["update_id"].as_i64() {
                        offset = offset.max(id + 1);
                    }
                    if let Some(event) = event_from_update(update) {
                        if tx.send(event).is_err() {
                            tracing::info!("Telegram inbound stream closed, stopping poll");
                            return;
                        }
                    }
                }
                backoff_secs = 5;
            }
            Err(e) => {
                tracing::warn!("Telegram poll failed: {e}, retrying in {backoff_secs}s");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)) => {}
                }
                backoff_secs = (backoff_secs * 2).min(60);
            }
        }
    }
    tracing::debug!("Telegram long-poll loop stopped");
}
