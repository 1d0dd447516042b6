//! HTTP status server for a running service.

use std::sync::Arc;
use std::time::Instant;

use axum::{Router, routing::get};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use nudge_core::config::GatewayConfig;
use nudge_core::error::{NudgeError, Result};
use nudge_orchestrator::{ChannelSlot, StatusBoard};
use nudge_scheduler::JobTable;

use crate::routes;

/// Shared state handed to every route handler.
pub struct AppState {
    pub config: GatewayConfig,
    pub board: Arc<StatusBoard>,
    pub slots: Arc<Vec<Arc<ChannelSlot>>>,
    pub jobs: Arc<JobTable>,
    pub start_time: Instant,
}

pub struct GatewayServer {
    state: Arc<AppState>,
}

impl GatewayServer {
    pub fn new(
        config: GatewayConfig,
        board: Arc<StatusBoard>,
        slots: Arc<Vec<Arc<ChannelSlot>>>,
        jobs: Arc<JobTable>,
    ) -> Self {
        Self {
            state: Arc::new(AppState {
                config,
                board,
                slots,
                jobs,
                start_time: Instant::now(),
            }),
        }
    }

    /// Router over the shared state, split out so tests can drive
    /// handlers without binding a socket.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(routes::healthz))
            .route("/status", get(routes::status))
            .route("/channels", get(routes::channels))
            .route("/jobs", get(routes::jobs))
            .layer(TraceLayer::new_for_http())
            // The admin display is a browser page on another origin.
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve until the token is cancelled.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| NudgeError::Gateway(format!("bind {addr}: {e}")))?;
        info!(%addr, "Status gateway listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(token.cancelled_owned())
            .await
            .map_err(|e| NudgeError::Gateway(e.to_string()))?;
        Ok(())
    }
}
