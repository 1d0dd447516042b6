//! Webhook channel — signed inbound HTTP events plus optional outbound POSTs.
//!
//! Inbound requests carry an RSA-SHA256 signature over `timestamp + body`.
//! Anything that fails verification is rejected at the boundary with 401 and
//! never reaches the inbound stream.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use nudge_core::config::WebhookConfig;
use nudge_core::error::{NudgeError, Result};
use nudge_core::traits::{Channel, InboundStream};
use nudge_core::types::{Capability, ChannelKind, HealthSignal, InboundEvent, SendOutcome};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::Sha256;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TIMESTAMP_HEADER: &str = "x-nudge-timestamp";
const SIGNATURE_HEADER: &str = "x-nudge-signature";

/// Verifies RSA-SHA256 signatures over `timestamp + body`.
pub struct SignatureVerifier {
    key: VerifyingKey<Sha256>,
    max_skew_secs: i64,
}

impl SignatureVerifier {
    pub fn from_pem(pem: &str, max_skew_secs: u64) -> Result<Self> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| NudgeError::config(format!("invalid webhook public key: {e}")))?;
        Ok(Self {
            key: VerifyingKey::<Sha256>::new(key),
            max_skew_secs: max_skew_secs as i64,
        })
    }

    /// The timestamp must be a unix-seconds string within the allowed skew,
    /// and the signature must cover the exact header string plus raw body.
    pub fn verify(&self, timestamp: &str, signature_b64: &str, body: &[u8]) -> Result<()> {
        let ts: i64 = timestamp
            .parse()
            .map_err(|_| NudgeError::signature(format!("bad timestamp {timestamp:?}")))?;
        let now = Utc::now().timestamp();
        if (now - ts).abs() > self.max_skew_secs {
            return Err(NudgeError::signature(format!(
                "timestamp {ts} outside allowed skew of {}s",
                self.max_skew_secs
            )));
        }

        let raw = STANDARD
            .decode(signature_b64)
            .map_err(|e| NudgeError::signature(format!("signature is not valid base64: {e}")))?;
        let signature = Signature::try_from(raw.as_slice())
            .map_err(|e| NudgeError::signature(format!("malformed signature: {e}")))?;

        let mut payload = Vec::with_capacity(timestamp.len() + body.len());
        payload.extend_from_slice(timestamp.as_bytes());
        payload.extend_from_slice(body);

        self.key
            .verify(&payload, &signature)
            .map_err(|_| NudgeError::signature("signature mismatch"))
    }
}

/// Shared state for the inbound HTTP listener.
struct InboundState {
    verifier: Option<Arc<SignatureVerifier>>,
    tx: mpsc::UnboundedSender<InboundEvent>,
}

/// Webhook channel: axum listener for inbound, plain POST for outbound.
pub struct WebhookChannel {
    config: WebhookConfig,
    client: reqwest::Client,
    connected: AtomicBool,
    verifier: Option<Arc<SignatureVerifier>>,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundEvent>>>,
    listener_stop: Mutex<Option<CancellationToken>>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let verifier = match &config.public_key_pem {
            Some(pem) => Some(Arc::new(SignatureVerifier::from_pem(pem, config.max_skew_secs as u64)?)),
            None => None,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            client: reqwest::Client::new(),
            connected: AtomicBool::new(false),
            verifier,
            inbound_tx: tx,
            inbound_rx: Mutex::new(Some(rx)),
            listener_stop: Mutex::new(None),
            listener_task: Mutex::new(None),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Send, Capability::Receive, Capability::Health]
    }

    async fn initialize(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let listener = tokio::net::TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| {
                NudgeError::channel(format!("webhook bind {} failed: {e}", self.config.bind_addr))
            })?;
        let bound = listener.local_addr().map_err(NudgeError::Io)?;

        if self.verifier.is_none() {
            tracing::warn!("webhook has no public key configured, all inbound events will be rejected");
        }

        let state = Arc::new(InboundState {
            verifier: self.verifier.clone(),
            tx: self.inbound_tx.clone(),
        });
        let stop = CancellationToken::new();
        let server = axum::serve(listener, inbound_router(state))
            .with_graceful_shutdown(stop.clone().cancelled_owned());
        let task = tokio::spawn(async move {
            if let Err(e) = server.await {
                tracing::error!("webhook listener failed: {e}");
            }
        });

        *self.listener_stop.lock().unwrap_or_else(|p| p.into_inner()) = Some(stop);
        *self.listener_task.lock().unwrap_or_else(|p| p.into_inner()) = Some(task);
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(addr = %bound, "webhook listener bound");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        let stop = self.listener_stop.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(stop) = stop {
            stop.cancel();
        }
        let task = self.listener_task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }
        Ok(())
    }

    async fn send(&self, recipient: &str, body: &str) -> SendOutcome {
        let Some(url) = &self.config.outbound_url else {
            return SendOutcome::Permanent("no outbound URL configured".to_string());
        };

        let payload = serde_json::json!({ "recipient": recipient, "body": body });
        let response = self
            .client
            .post(url)
            .json(&payload)
            .timeout(Duration::from_secs(15))
            .send()
            .await;

        match response {
            Err(e) => SendOutcome::Transient(format!("webhook POST failed: {e}")),
            Ok(r) if r.status().is_success() => SendOutcome::Delivered,
            Ok(r) => {
                let status = r.status();
                let detail = format!("webhook endpoint returned {status}");
                if status.as_u16() == 429 || !status.is_client_error() {
                    SendOutcome::Transient(detail)
                } else {
                    SendOutcome::Permanent(detail)
                }
            }
        }
    }

    async fn health(&self) -> HealthSignal {
        let started = Instant::now();
        if !self.is_connected() {
            return HealthSignal::unhealthy("listener not started");
        }
        let running = self
            .listener_task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished());
        if running {
            HealthSignal::healthy(started.elapsed())
        } else {
            HealthSignal::unhealthy("listener task exited")
        }
    }

    async fn listen(&self) -> Result<InboundStream> {
        let rx = self.inbound_rx.lock().unwrap_or_else(|p| p.into_inner()).take();
        match rx {
            Some(rx) => Ok(Box::new(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))),
            None => Err(NudgeError::channel("webhook inbound stream already taken")),
        }
    }
}

fn inbound_router(state: Arc<InboundState>) -> Router {
    Router::new()
        .route("/inbound", post(handle_inbound))
        .with_state(state)
}

async fn handle_inbound(
    State(state): State<Arc<InboundState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let (Some(timestamp), Some(signature)) = (
        header_str(&headers, TIMESTAMP_HEADER),
        header_str(&headers, SIGNATURE_HEADER),
    ) else {
        tracing::warn!("inbound webhook rejected: missing signature headers");
        return StatusCode::UNAUTHORIZED;
    };

    let Some(verifier) = &state.verifier else {
        tracing::warn!("inbound webhook rejected: no signature key configured");
        return StatusCode::UNAUTHORIZED;
    };

    if let Err(e) = verifier.verify(timestamp, signature, &body) {
        tracing::warn!("inbound webhook rejected: {e}");
        return StatusCode::UNAUTHORIZED;
    }

    let Ok(json) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return StatusCode::BAD_REQUEST;
    };

    // Validation pings are acknowledged but never forwarded.
    if json["kind"] == "ping" {
        return StatusCode::NO_CONTENT;
    }

    let event = InboundEvent::new(
        ChannelKind::Webhook,
        json["sender_id"].as_str().unwrap_or("external"),
        json["content"].as_str().unwrap_or_default(),
    );
    if state.tx.send(event).is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
