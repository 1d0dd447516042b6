//! Channel health monitoring and recovery.
//!
//! The monitor sweeps every slot at a fixed interval. A configured number
//! of consecutive failed probes moves an Active channel to Degraded and
//! starts one bounded reconnect sequence. Exhausting the reconnect budget
//! moves it to Stopped; stopped channels get one restart attempt per sweep
//! until they come back.

use std::sync::Arc;
use std::time::Duration;

use nudge_core::config::MonitorConfig;
use nudge_core::error::Result;
use nudge_core::traits::Channel;
use nudge_core::types::{Capability, ChannelState};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::status::ChannelSlot;

pub struct Monitor {
    slots: Arc<Vec<Arc<ChannelSlot>>>,
    config: MonitorConfig,
    token: CancellationToken,
}

impl Monitor {
    pub fn new(
        slots: Arc<Vec<Arc<ChannelSlot>>>,
        config: MonitorConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            slots,
            config,
            token,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config.interval_secs,
            threshold = self.config.unhealthy_threshold,
            "channel monitor started"
        );
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => self.sweep().await,
            }
        }
        tracing::info!("channel monitor stopped");
    }

    async fn sweep(&self) {
        for slot in self.slots.iter() {
            match slot.state() {
                ChannelState::Active => self.probe_active(slot).await,
                ChannelState::Stopped => self.try_restart(slot).await,
                // Degraded slots are owned by their reconnect task.
                _ => {}
            }
        }
    }

    async fn probe_active(&self, slot: &Arc<ChannelSlot>) {
        if !slot.channel().capabilities().contains(&Capability::Health) {
            return;
        }

        let probe = tokio::time::timeout(
            Duration::from_secs(self.config.probe_timeout_secs),
            slot.channel().health(),
        )
        .await;

        let detail = match probe {
            Ok(signal) if signal.healthy => {
                slot.note_healthy();
                return;
            }
            Ok(signal) => signal.detail.unwrap_or_else(|| "unhealthy".to_string()),
            Err(_) => format!("health probe timed out after {}s", self.config.probe_timeout_secs),
        };

        let streak = slot.note_unhealthy(detail.clone());
        tracing::warn!(
            channel = %slot.kind(),
            streak,
            "health probe failed: {detail}"
        );

        // The state check keeps this transition from firing more than once
        // per outage.
        if streak >= self.config.unhealthy_threshold && slot.state() == ChannelState::Active {
            slot.mark_degraded(detail);
            tracing::warn!(channel = %slot.kind(), "channel degraded, starting reconnect");
            tokio::spawn(reconnect(
                slot.clone(),
                self.config.reconnect_attempts,
                self.token.clone(),
            ));
        }
    }

    async fn try_restart(&self, slot: &Arc<ChannelSlot>) {
        match restart(slot.channel()).await {
            Ok(()) => {
                slot.mark_active();
                tracing::info!(channel = %slot.kind(), "stopped channel recovered");
            }
            Err(e) => {
                tracing::debug!(channel = %slot.kind(), "restart attempt failed: {e}");
            }
        }
    }
}

/// Bounded reconnect sequence for one degraded channel. First attempt is
/// immediate, later ones back off.
async fn reconnect(slot: Arc<ChannelSlot>, max_attempts: u32, token: CancellationToken) {
    for attempt in 1..=max_attempts.max(1) {
        match restart(slot.channel()).await {
            Ok(()) => {
                slot.mark_active();
                tracing::info!(channel = %slot.kind(), attempt, "channel reconnected");
                return;
            }
            Err(e) => {
                tracing::warn!(channel = %slot.kind(), attempt, "reconnect failed: {e}");
            }
        }

        if attempt < max_attempts {
            let backoff = Duration::from_secs(5 * u64::from(attempt));
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    slot.mark_stopped(format!("reconnect failed after {max_attempts} attempts"));
    tracing::error!(
        channel = %slot.kind(),
        "channel stopped after {max_attempts} failed reconnect attempts"
    );
}

/// Tear the transport down before bringing it back so a half-open channel
/// cannot report ready without actually reconnecting.
async fn restart(channel: &Arc<dyn Channel>) -> Result<()> {
    if let Err(e) = channel.shutdown().await {
        tracing::debug!(channel = %channel.kind(), "shutdown before restart failed: {e}");
    }
    channel.initialize().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nudge_core::error::NudgeError;
    use nudge_core::traits::InboundStream;
    use nudge_core::types::{ChannelKind, HealthSignal, SendOutcome};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ProbeChannel {
        kind: ChannelKind,
        capabilities: Vec<Capability>,
        // Scripted probe results; empty means healthy.
        script: Mutex<VecDeque<bool>>,
        init_ok: AtomicBool,
        init_calls: AtomicU32,
        probe_calls: AtomicU32,
    }

    impl ProbeChannel {
        fn new(script: Vec<bool>, init_ok: bool) -> Arc<Self> {
            Arc::new(Self {
                kind: ChannelKind::Telegram,
                capabilities: vec![Capability::Send, Capability::Health],
                script: Mutex::new(script.into()),
                init_ok: AtomicBool::new(init_ok),
                init_calls: AtomicU32::new(0),
                probe_calls: AtomicU32::new(0),
            })
        }

        fn without_health_capability() -> Arc<Self> {
            Arc::new(Self {
                kind: ChannelKind::Telegram,
                capabilities: vec![Capability::Send],
                script: Mutex::new(VecDeque::new()),
                init_ok: AtomicBool::new(true),
                init_calls: AtomicU32::new(0),
                probe_calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Channel for ProbeChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }
        fn capabilities(&self) -> &[Capability] {
            &self.capabilities
        }
        async fn initialize(&self) -> Result<()> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if self.init_ok.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(NudgeError::channel("connect refused"))
            }
        }
        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
        async fn send(&self, _recipient: &str, _body: &str) -> SendOutcome {
            SendOutcome::Delivered
        }
        async fn health(&self) -> HealthSignal {
            self.probe_calls.fetch_add(1, Ordering::SeqCst);
            let healthy = self.script.lock().unwrap().pop_front().unwrap_or(true);
            if healthy {
                HealthSignal::healthy(Duration::ZERO)
            } else {
                HealthSignal::unhealthy("probe says no")
            }
        }
        async fn listen(&self) -> Result<InboundStream> {
            Ok(Box::new(futures::stream::pending()))
        }
    }

    fn monitor_config() -> MonitorConfig {
        MonitorConfig {
            interval_secs: 60,
            unhealthy_threshold: 2,
            reconnect_attempts: 2,
            probe_timeout_secs: 5,
        }
    }

    fn active_slot(channel: Arc<ProbeChannel>) -> Arc<ChannelSlot> {
        let slot = Arc::new(ChannelSlot::new(channel as Arc<dyn Channel>));
        slot.mark_active();
        slot
    }

    async fn wait_for_state(slot: &Arc<ChannelSlot>, state: ChannelState, max_secs: u64) {
        for _ in 0..max_secs * 2 {
            if slot.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        panic!("slot never reached {state}, still {}", slot.state());
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_degrades_once_then_stops() {
        let channel = ProbeChannel::new(vec![false; 10], false);
        let slot = active_slot(channel.clone());
        let token = CancellationToken::new();

        let monitor = Monitor::new(
            Arc::new(vec![slot.clone()]),
            monitor_config(),
            token.clone(),
        );
        tokio::spawn(monitor.run());

        // Two failed sweeps hit the threshold, then one reconnect sequence
        // of exactly two attempts runs before the slot parks in Stopped.
        wait_for_state(&slot, ChannelState::Stopped, 300).await;
        assert_eq!(channel.init_calls.load(Ordering::SeqCst), 2);
        let status = slot.status();
        assert!(status.last_error.as_deref().is_some_and(|e| e.contains("reconnect failed")));

        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_channel_recovers_on_later_sweep() {
        let channel = ProbeChannel::new(vec![false; 4], false);
        let slot = active_slot(channel.clone());
        let token = CancellationToken::new();

        let monitor = Monitor::new(
            Arc::new(vec![slot.clone()]),
            monitor_config(),
            token.clone(),
        );
        tokio::spawn(monitor.run());

        wait_for_state(&slot, ChannelState::Stopped, 300).await;

        // Transport comes back: the next sweep restarts the channel.
        channel.init_ok.store(true, Ordering::SeqCst);
        wait_for_state(&slot, ChannelState::Active, 300).await;
        assert_eq!(slot.status().unhealthy_streak, 0);

        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interleaved_healthy_probes_never_degrade() {
        let channel = ProbeChannel::new(vec![false, true, false, true, false], true);
        let slot = active_slot(channel.clone());
        let token = CancellationToken::new();

        let monitor = Monitor::new(
            Arc::new(vec![slot.clone()]),
            monitor_config(),
            token.clone(),
        );
        tokio::spawn(monitor.run());

        while channel.probe_calls.load(Ordering::SeqCst) < 5 {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        assert_eq!(slot.state(), ChannelState::Active);
        assert_eq!(channel.init_calls.load(Ordering::SeqCst), 0);

        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_channels_without_health_capability_are_left_alone() {
        let channel = ProbeChannel::without_health_capability();
        let slot = active_slot(channel.clone());
        let token = CancellationToken::new();

        let monitor = Monitor::new(
            Arc::new(vec![slot.clone()]),
            monitor_config(),
            token.clone(),
        );
        tokio::spawn(monitor.run());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(slot.state(), ChannelState::Active);
        assert_eq!(channel.probe_calls.load(Ordering::SeqCst), 0);

        token.cancel();
    }
}
