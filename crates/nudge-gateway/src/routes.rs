//! API route handlers for the status gateway.

use axum::{Json, extract::State};
use std::sync::Arc;

use super::server::AppState;

/// Liveness probe.
pub async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "nudge-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Service status: uptime, delivery counters, channel states, job count.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let channels: Vec<serde_json::Value> = state
        .slots
        .iter()
        .map(|slot| {
            let status = slot.status();
            serde_json::json!({
                "kind": status.kind.to_string(),
                "state": status.state.to_string(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "service": "nudge",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "messages": {
            "delivered": state.board.delivered(),
            "abandoned": state.board.abandoned(),
            "held": state.board.held(),
            "inbound": state.board.inbound(),
        },
        "channels": channels,
        "jobs": {
            "count": state.jobs.len(),
        },
    }))
}

/// Scheduled jobs and their next fire times.
pub async fn jobs(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let jobs: Vec<serde_json::Value> = state
        .jobs
        .snapshot()
        .into_iter()
        .map(|(key, job)| {
            serde_json::json!({
                "user_id": key.user_id,
                "category": key.category,
                "kind": job.kind.to_string(),
                "state": job.state.to_string(),
                "next_fire_time": job.next_fire_time.map(|at| at.to_rfc3339()),
            })
        })
        .collect();

    Json(serde_json::json!({ "jobs": jobs }))
}

/// Per-channel detail: state, last error, probe streak, capabilities.
pub async fn channels(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let channels: Vec<serde_json::Value> = state
        .slots
        .iter()
        .map(|slot| {
            let status = slot.status();
            serde_json::json!({
                "kind": status.kind.to_string(),
                "state": status.state.to_string(),
                "last_error": status.last_error,
                "unhealthy_streak": status.unhealthy_streak,
                "since": status.since.to_rfc3339(),
                "can_send": slot.channel().can_send(),
                "can_receive": slot.channel().can_receive(),
            })
        })
        .collect();

    Json(serde_json::json!({ "channels": channels }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::AppState;

    use async_trait::async_trait;
    use chrono::Utc;
    use nudge_core::config::GatewayConfig;
    use nudge_core::error::Result;
    use nudge_core::traits::{Channel, InboundStream};
    use nudge_core::types::{Capability, CategoryKind, ChannelKind, HealthSignal, SendOutcome};
    use nudge_orchestrator::{ChannelSlot, StatusBoard};
    use nudge_scheduler::{JobKey, JobTable};

    struct StubChannel;

    #[async_trait]
    impl Channel for StubChannel {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Telegram
        }

        fn capabilities(&self) -> &[Capability] {
            &[Capability::Send, Capability::Health]
        }

        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }

        async fn send(&self, _recipient: &str, _body: &str) -> SendOutcome {
            SendOutcome::Delivered
        }

        async fn health(&self) -> HealthSignal {
            HealthSignal::healthy(std::time::Duration::ZERO)
        }

        async fn listen(&self) -> Result<InboundStream> {
            Ok(Box::new(futures::stream::pending()))
        }
    }

    fn test_state(slots: Vec<Arc<ChannelSlot>>) -> State<Arc<AppState>> {
        State(Arc::new(AppState {
            config: GatewayConfig::default(),
            board: Arc::new(StatusBoard::default()),
            slots: Arc::new(slots),
            jobs: Arc::new(JobTable::new()),
            start_time: std::time::Instant::now(),
        }))
    }

    #[tokio::test]
    async fn test_healthz() {
        let json = healthz().await.0;
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn test_status_counters() {
        let state = test_state(Vec::new());
        state.0.board.record_delivered();
        state.0.board.record_delivered();
        state.0.board.record_abandoned();

        let json = status(state).await.0;
        assert_eq!(json["service"], "nudge");
        assert_eq!(json["messages"]["delivered"], 2);
        assert_eq!(json["messages"]["abandoned"], 1);
        assert_eq!(json["messages"]["held"], 0);
        assert_eq!(json["jobs"]["count"], 0);
    }

    #[tokio::test]
    async fn test_status_lists_channel_states() {
        let slot = Arc::new(ChannelSlot::new(Arc::new(StubChannel)));
        slot.mark_active();

        let json = status(test_state(vec![slot])).await.0;
        assert_eq!(json["channels"][0]["kind"], "telegram");
        assert_eq!(json["channels"][0]["state"], "active");
    }

    #[tokio::test]
    async fn test_channels_detail() {
        let slot = Arc::new(ChannelSlot::new(Arc::new(StubChannel)));
        slot.mark_stopped("connect refused");

        let json = channels(test_state(vec![slot])).await.0;
        let entry = &json["channels"][0];
        assert_eq!(entry["state"], "stopped");
        assert_eq!(entry["last_error"], "connect refused");
        assert_eq!(entry["can_send"], true);
        assert_eq!(entry["can_receive"], false);
    }

    #[tokio::test]
    async fn test_jobs_listing() {
        let state = test_state(Vec::new());
        let key = JobKey::new("ryan", "motivational");
        state.0.jobs.upsert(&key, CategoryKind::Message);
        state
            .0
            .jobs
            .set_scheduled(&key, Utc::now() + chrono::Duration::hours(2));
        let idle = JobKey::new("dana", "chores");
        state.0.jobs.upsert(&idle, CategoryKind::TaskReminder);

        let json = jobs(state).await.0;
        let list = json["jobs"].as_array().unwrap();
        assert_eq!(list.len(), 2);

        // Snapshot order follows the (user, category) key order.
        assert_eq!(list[0]["user_id"], "dana");
        assert_eq!(list[0]["kind"], "task_reminder");
        assert_eq!(list[0]["state"], "unscheduled");
        assert!(list[0]["next_fire_time"].is_null());

        assert_eq!(list[1]["user_id"], "ryan");
        assert_eq!(list[1]["category"], "motivational");
        assert_eq!(list[1]["kind"], "message");
        assert_eq!(list[1]["state"], "scheduled");
        assert!(list[1]["next_fire_time"].is_string());
    }
}
