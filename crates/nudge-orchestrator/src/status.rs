//! Per-channel state tracking and delivery counters.
//!
//! Slots are shared between the orchestrator (routing decisions), the
//! monitor (health transitions), and the gateway (status surface).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use nudge_core::traits::Channel;
use nudge_core::types::{ChannelKind, ChannelState};

#[derive(Debug, Clone)]
struct SlotState {
    state: ChannelState,
    last_error: Option<String>,
    unhealthy_streak: u32,
    since: DateTime<Utc>,
}

/// One managed channel plus its tracked lifecycle state.
pub struct ChannelSlot {
    channel: Arc<dyn Channel>,
    state: Mutex<SlotState>,
}

impl ChannelSlot {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            channel,
            state: Mutex::new(SlotState {
                state: ChannelState::Unconfigured,
                last_error: None,
                unhealthy_streak: 0,
                since: Utc::now(),
            }),
        }
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub fn kind(&self) -> ChannelKind {
        self.channel.kind()
    }

    pub fn state(&self) -> ChannelState {
        self.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == ChannelState::Active
    }

    pub fn mark_starting(&self) {
        self.transition(ChannelState::Starting, None);
    }

    /// Active clears the error and the unhealthy streak.
    pub fn mark_active(&self) {
        let mut slot = self.lock();
        slot.state = ChannelState::Active;
        slot.last_error = None;
        slot.unhealthy_streak = 0;
        slot.since = Utc::now();
    }

    pub fn mark_degraded(&self, error: impl Into<String>) {
        self.transition(ChannelState::Degraded, Some(error.into()));
    }

    pub fn mark_stopped(&self, error: impl Into<String>) {
        self.transition(ChannelState::Stopped, Some(error.into()));
    }

    /// Records one failed health probe and returns the streak length.
    pub fn note_unhealthy(&self, detail: impl Into<String>) -> u32 {
        let mut slot = self.lock();
        slot.unhealthy_streak += 1;
        slot.last_error = Some(detail.into());
        slot.unhealthy_streak
    }

    pub fn note_healthy(&self) {
        self.lock().unhealthy_streak = 0;
    }

    pub fn status(&self) -> ChannelStatus {
        let slot = self.lock();
        ChannelStatus {
            kind: self.channel.kind(),
            state: slot.state,
            last_error: slot.last_error.clone(),
            unhealthy_streak: slot.unhealthy_streak,
            since: slot.since,
        }
    }

    fn transition(&self, state: ChannelState, error: Option<String>) {
        let mut slot = self.lock();
        slot.state = state;
        if error.is_some() {
            slot.last_error = error;
        }
        slot.since = Utc::now();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Point-in-time snapshot of one slot.
#[derive(Debug, Clone)]
pub struct ChannelStatus {
    pub kind: ChannelKind,
    pub state: ChannelState,
    pub last_error: Option<String>,
    pub unhealthy_streak: u32,
    pub since: DateTime<Utc>,
}

/// Process-wide delivery counters for the status surface.
#[derive(Debug, Default)]
pub struct StatusBoard {
    delivered: AtomicU64,
    abandoned: AtomicU64,
    held: AtomicU64,
    inbound: AtomicU64,
}

impl StatusBoard {
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_held(&self) {
        self.held.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inbound(&self) {
        self.inbound.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    pub fn held(&self) -> u64 {
        self.held.load(Ordering::Relaxed)
    }

    pub fn inbound(&self) -> u64 {
        self.inbound.load(Ordering::Relaxed)
    }
}
