//! Message routing and delivery across all managed channels.
//!
//! One dispatch loop owns every outbound message: routing, the per-call
//! send timeout, retry scheduling, and held-message recovery. Sends
//! themselves run as spawned tasks so one slow transport never stalls
//! the loop.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use nudge_core::error::{NudgeError, Result};
use nudge_core::traits::{Channel, Dispatch, InboundStream};
use nudge_core::types::{
    AttemptOutcome, ChannelKind, DeliveryAttempt, InboundEvent, OutboundMessage, SendOutcome,
    UserProfile,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::retry::RetryPolicy;
use crate::status::{ChannelSlot, StatusBoard};

/// How often parked messages are re-checked against channel states.
const HELD_RECHECK: Duration = Duration::from_secs(5);

/// Final fate of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Abandoned,
}

/// Emitted once per message when delivery finishes either way.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub message: OutboundMessage,
    pub outcome: DeliveryOutcome,
    pub attempts: Vec<DeliveryAttempt>,
}

/// A message working its way through delivery.
#[derive(Debug)]
struct DeliveryEntry {
    message: OutboundMessage,
    attempts: Vec<DeliveryAttempt>,
    failed_attempts: u32,
}

impl DeliveryEntry {
    fn new(message: OutboundMessage) -> Self {
        Self {
            message,
            attempts: Vec::new(),
            failed_attempts: 0,
        }
    }
}

/// Heap entry for a retry waiting on its backoff delay. Ordered by due
/// time, then submission sequence, so equal deadlines fire in order.
struct DueEntry {
    due_at: Instant,
    seq: u64,
    entry: DeliveryEntry,
}

impl PartialEq for DueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due_at == other.due_at && self.seq == other.seq
    }
}

impl Eq for DueEntry {}

impl PartialOrd for DueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due_at
            .cmp(&other.due_at)
            .then(self.seq.cmp(&other.seq))
    }
}

struct SendCompletion {
    entry: DeliveryEntry,
    channel: ChannelKind,
    outcome: AttemptOutcome,
    detail: Option<String>,
}

/// Construction knobs for the orchestrator.
pub struct OrchestratorOptions {
    pub users: Vec<UserProfile>,
    pub policy: RetryPolicy,
    /// How long shutdown waits for in-flight sends before aborting them.
    pub grace: Duration,
    pub token: CancellationToken,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            users: Vec::new(),
            policy: RetryPolicy::default(),
            grace: Duration::from_secs(10),
            token: CancellationToken::new(),
        }
    }
}

/// Owns channel lifecycle and the dispatch loop.
pub struct Orchestrator {
    slots: Arc<Vec<Arc<ChannelSlot>>>,
    users: BTreeMap<String, UserProfile>,
    policy: RetryPolicy,
    grace: Duration,
    board: Arc<StatusBoard>,
    token: CancellationToken,
    command_tx: mpsc::UnboundedSender<OutboundMessage>,
    command_rx: Option<mpsc::UnboundedReceiver<OutboundMessage>>,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    inbound_rx: Option<mpsc::UnboundedReceiver<InboundEvent>>,
    reports: broadcast::Sender<DeliveryReport>,
}

impl Orchestrator {
    pub fn new(channels: Vec<Arc<dyn Channel>>, options: OrchestratorOptions) -> Self {
        let slots = channels
            .into_iter()
            .map(|channel| Arc::new(ChannelSlot::new(channel)))
            .collect::<Vec<_>>();
        let users = options
            .users
            .into_iter()
            .map(|profile| (profile.user_id.clone(), profile))
            .collect();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (reports, _) = broadcast::channel(64);

        Self {
            slots: Arc::new(slots),
            users,
            policy: options.policy,
            grace: options.grace,
            board: Arc::new(StatusBoard::default()),
            token: options.token,
            command_tx,
            command_rx: Some(command_rx),
            inbound_tx,
            inbound_rx: Some(inbound_rx),
            reports,
        }
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            command_tx: self.command_tx.clone(),
            board: self.board.clone(),
            reports: self.reports.clone(),
        }
    }

    /// Slots are shared with the monitor and the status surface.
    pub fn slots(&self) -> Arc<Vec<Arc<ChannelSlot>>> {
        self.slots.clone()
    }

    pub fn board(&self) -> Arc<StatusBoard> {
        self.board.clone()
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_active()).count()
    }

    /// Kinds currently routable, as opposed to everything declared.
    pub fn active_channels(&self) -> Vec<ChannelKind> {
        self.slots
            .iter()
            .filter(|slot| slot.is_active())
            .map(|slot| slot.kind())
            .collect()
    }

    pub fn configured_channels(&self) -> Vec<ChannelKind> {
        self.slots.iter().map(|slot| slot.kind()).collect()
    }

    /// Merged stream of signature-valid inbound events from every
    /// receive-capable channel. Can only be taken once.
    pub fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<InboundEvent>> {
        self.inbound_rx.take()
    }

    /// Initialize every channel in parallel. One channel failing to come
    /// up leaves the others untouched.
    pub async fn start_all(&self) {
        let startups = self.slots.iter().map(|slot| {
            let slot = slot.clone();
            async move {
                slot.mark_starting();
                match slot.channel().initialize().await {
                    Ok(()) => {
                        slot.mark_active();
                        tracing::info!(channel = %slot.kind(), "channel active");
                    }
                    Err(e) => {
                        slot.mark_stopped(e.to_string());
                        tracing::error!(channel = %slot.kind(), "channel failed to start: {e}");
                    }
                }
            }
        });
        futures::future::join_all(startups).await;

        for slot in self.slots.iter() {
            if !slot.is_active() || !slot.channel().can_receive() {
                continue;
            }
            match slot.channel().listen().await {
                Ok(stream) => {
                    tokio::spawn(consume_inbound(
                        slot.kind(),
                        stream,
                        self.inbound_tx.clone(),
                        self.board.clone(),
                        self.token.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(channel = %slot.kind(), "inbound listener unavailable: {e}");
                }
            }
        }
    }

    /// The dispatch loop. Runs until the cancellation token fires, then
    /// drains in-flight sends and stops channels in reverse start order.
    pub async fn run(mut self) {
        let Some(mut commands) = self.command_rx.take() else {
            tracing::error!("dispatch loop started twice");
            return;
        };

        let token = self.token.clone();
        let mut due: BinaryHeap<Reverse<DueEntry>> = BinaryHeap::new();
        let mut held: Vec<DeliveryEntry> = Vec::new();
        let mut in_flight: JoinSet<SendCompletion> = JoinSet::new();
        let mut seq: u64 = 0;
        let mut held_tick = tokio::time::interval(HELD_RECHECK);
        held_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("dispatch loop started");
        loop {
            let next_due = due.peek().map(|Reverse(e)| e.due_at);
            let deadline = next_due.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                _ = token.cancelled() => break,

                command = commands.recv() => match command {
                    Some(message) => self.dispatch_new(message, &mut in_flight, &mut held),
                    None => break,
                },

                completion = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Some(Ok(completion)) = completion {
                        self.on_completion(completion, &mut due, &mut seq);
                    }
                }

                _ = tokio::time::sleep_until(deadline), if next_due.is_some() => {
                    self.fire_due(&mut due, &mut in_flight, &mut held);
                }

                _ = held_tick.tick(), if !held.is_empty() => {
                    self.recheck_held(&mut in_flight, &mut held);
                }
            }
        }

        self.drain(in_flight, due, held).await;
    }

    fn dispatch_new(
        &self,
        message: OutboundMessage,
        in_flight: &mut JoinSet<SendCompletion>,
        held: &mut Vec<DeliveryEntry>,
    ) {
        let entry = DeliveryEntry::new(message);
        let Some(profile) = self.users.get(&entry.message.user_id) else {
            self.finish_abandoned(entry, "no profile for user");
            return;
        };
        match self.route_for(profile) {
            Some(route) => self.launch(entry, route, in_flight),
            None => self.hold(entry, held),
        }
    }

    /// Preferred channel first, then any other Active send-capable channel
    /// the user has an address for.
    fn route_for(&self, profile: &UserProfile) -> Option<(Arc<dyn Channel>, ChannelKind, String)> {
        if let Some(preferred) = profile.preferred_channel {
            for slot in self.slots.iter() {
                if slot.kind() == preferred {
                    if let Some(route) = self.try_slot(slot, profile) {
                        return Some(route);
                    }
                }
            }
        }
        for slot in self.slots.iter() {
            if Some(slot.kind()) == profile.preferred_channel {
                continue;
            }
            if let Some(route) = self.try_slot(slot, profile) {
                return Some(route);
            }
        }
        None
    }

    fn try_slot(
        &self,
        slot: &ChannelSlot,
        profile: &UserProfile,
    ) -> Option<(Arc<dyn Channel>, ChannelKind, String)> {
        if !slot.is_active() || !slot.channel().can_send() {
            return None;
        }
        let address = profile.address_for(slot.kind())?;
        Some((slot.channel().clone(), slot.kind(), address.to_string()))
    }

    fn launch(
        &self,
        entry: DeliveryEntry,
        (channel, kind, recipient): (Arc<dyn Channel>, ChannelKind, String),
        in_flight: &mut JoinSet<SendCompletion>,
    ) {
        let timeout = self.policy.send_timeout();
        in_flight.spawn(async move {
            let result = tokio::time::timeout(
                timeout,
                channel.send(&recipient, &entry.message.body),
            )
            .await;
            let (outcome, detail) = match result {
                Err(_) => (
                    AttemptOutcome::Timeout,
                    Some(format!("send timed out after {}s", timeout.as_secs())),
                ),
                Ok(SendOutcome::Delivered) => (AttemptOutcome::Delivered, None),
                Ok(SendOutcome::Transient(detail)) => (AttemptOutcome::Transient, Some(detail)),
                Ok(SendOutcome::Permanent(detail)) => (AttemptOutcome::Permanent, Some(detail)),
            };
            SendCompletion {
                entry,
                channel: kind,
                outcome,
                detail,
            }
        });
    }

    fn hold(&self, entry: DeliveryEntry, held: &mut Vec<DeliveryEntry>) {
        tracing::warn!(
            user = %entry.message.user_id,
            "no active channel can reach user, holding message"
        );
        self.board.record_held();
        held.push(entry);
    }

    fn on_completion(
        &self,
        completion: SendCompletion,
        due: &mut BinaryHeap<Reverse<DueEntry>>,
        seq: &mut u64,
    ) {
        let SendCompletion {
            mut entry,
            channel,
            outcome,
            detail,
        } = completion;

        let mut attempt = DeliveryAttempt::new(entry.message.id, channel, outcome);
        if let Some(detail) = &detail {
            attempt = attempt.with_error(detail.clone());
        }
        entry.attempts.push(attempt);

        match outcome {
            AttemptOutcome::Delivered => self.finish_delivered(entry, channel),
            AttemptOutcome::Permanent => {
                self.finish_abandoned(entry, detail.as_deref().unwrap_or("permanent failure"));
            }
            AttemptOutcome::Transient | AttemptOutcome::Timeout => {
                entry.failed_attempts += 1;
                if self.policy.allows_retry(entry.failed_attempts) {
                    let delay = self.policy.delay_for(entry.failed_attempts);
                    tracing::debug!(
                        user = %entry.message.user_id,
                        attempt = entry.failed_attempts,
                        delay_secs = delay.as_secs(),
                        "transient failure, retry scheduled"
                    );
                    *seq += 1;
                    due.push(Reverse(DueEntry {
                        due_at: Instant::now() + delay,
                        seq: *seq,
                        entry,
                    }));
                } else {
                    let attempts = entry.failed_attempts;
                    self.finish_abandoned(entry, &format!("gave up after {attempts} attempts"));
                }
            }
        }
    }

    fn fire_due(
        &self,
        due: &mut BinaryHeap<Reverse<DueEntry>>,
        in_flight: &mut JoinSet<SendCompletion>,
        held: &mut Vec<DeliveryEntry>,
    ) {
        let now = Instant::now();
        while due.peek().is_some_and(|Reverse(e)| e.due_at <= now) {
            let Some(Reverse(DueEntry { entry, .. })) = due.pop() else {
                break;
            };
            let Some(profile) = self.users.get(&entry.message.user_id) else {
                self.finish_abandoned(entry, "no profile for user");
                continue;
            };
            // Routing is re-evaluated per retry so channel state changes
            // between attempts are honored.
            match self.route_for(profile) {
                Some(route) => self.launch(entry, route, in_flight),
                None => self.hold(entry, held),
            }
        }
    }

    fn recheck_held(
        &self,
        in_flight: &mut JoinSet<SendCompletion>,
        held: &mut Vec<DeliveryEntry>,
    ) {
        let parked = std::mem::take(held);
        for entry in parked {
            let Some(profile) = self.users.get(&entry.message.user_id) else {
                self.finish_abandoned(entry, "no profile for user");
                continue;
            };
            match self.route_for(profile) {
                Some(route) => {
                    tracing::info!(user = %entry.message.user_id, "held message has a route again");
                    self.launch(entry, route, in_flight);
                }
                None => held.push(entry),
            }
        }
    }

    fn finish_delivered(&self, entry: DeliveryEntry, channel: ChannelKind) {
        self.board.record_delivered();
        tracing::info!(
            user = %entry.message.user_id,
            channel = %channel,
            attempts = entry.attempts.len(),
            "message delivered"
        );
        let _ = self.reports.send(DeliveryReport {
            message: entry.message,
            outcome: DeliveryOutcome::Delivered,
            attempts: entry.attempts,
        });
    }

    fn finish_abandoned(&self, entry: DeliveryEntry, reason: &str) {
        self.board.record_abandoned();
        tracing::warn!(
            user = %entry.message.user_id,
            attempts = entry.attempts.len(),
            "message abandoned: {reason}"
        );
        let _ = self.reports.send(DeliveryReport {
            message: entry.message,
            outcome: DeliveryOutcome::Abandoned,
            attempts: entry.attempts,
        });
    }

    async fn drain(
        &self,
        mut in_flight: JoinSet<SendCompletion>,
        due: BinaryHeap<Reverse<DueEntry>>,
        held: Vec<DeliveryEntry>,
    ) {
        let pending = due.len() + held.len();
        if pending > 0 {
            tracing::warn!("{pending} undelivered message(s) discarded at shutdown");
        }

        let deadline = Instant::now() + self.grace;
        while !in_flight.is_empty() {
            match tokio::time::timeout_at(deadline, in_flight.join_next()).await {
                Ok(Some(Ok(completion))) => {
                    let SendCompletion {
                        mut entry,
                        channel,
                        outcome,
                        detail,
                    } = completion;
                    let mut attempt = DeliveryAttempt::new(entry.message.id, channel, outcome);
                    if let Some(detail) = &detail {
                        attempt = attempt.with_error(detail.clone());
                    }
                    entry.attempts.push(attempt);
                    match outcome {
                        AttemptOutcome::Delivered => self.finish_delivered(entry, channel),
                        AttemptOutcome::Permanent => {
                            self.finish_abandoned(entry, "permanent failure at shutdown");
                        }
                        // No rescheduling once the loop is gone.
                        _ => tracing::warn!(
                            user = %entry.message.user_id,
                            "in-flight send failed during shutdown, discarded"
                        ),
                    }
                }
                Ok(Some(Err(_))) => {}
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!("{} in-flight send(s) aborted at shutdown", in_flight.len());
                    in_flight.abort_all();
                    break;
                }
            }
        }

        for slot in self.slots.iter().rev() {
            if let Err(e) = slot.channel().shutdown().await {
                tracing::warn!(channel = %slot.kind(), "channel shutdown failed: {e}");
            }
            slot.mark_stopped("service shutdown");
        }
        tracing::info!("dispatch loop stopped");
    }
}

/// Cloneable submission handle. This is what the scheduler and the CLI
/// hold instead of the orchestrator itself.
#[derive(Clone)]
pub struct OrchestratorHandle {
    command_tx: mpsc::UnboundedSender<OutboundMessage>,
    board: Arc<StatusBoard>,
    reports: broadcast::Sender<DeliveryReport>,
}

impl OrchestratorHandle {
    pub fn board(&self) -> Arc<StatusBoard> {
        self.board.clone()
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<DeliveryReport> {
        self.reports.subscribe()
    }
}

#[async_trait::async_trait]
impl Dispatch for OrchestratorHandle {
    async fn submit(&self, message: OutboundMessage) -> Result<()> {
        self.command_tx
            .send(message)
            .map_err(|_| NudgeError::Other("dispatch loop is not running".to_string()))
    }
}

async fn consume_inbound(
    kind: ChannelKind,
    mut stream: InboundStream,
    tx: mpsc::UnboundedSender<InboundEvent>,
    board: Arc<StatusBoard>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = stream.next() => match event {
                Some(event) => {
                    board.record_inbound();
                    tracing::info!(
                        channel = %event.channel,
                        sender = %event.sender_id,
                        "inbound event"
                    );
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    tracing::debug!("inbound consumer for {kind} ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use nudge_core::config::RetryConfig;
    use nudge_core::error::Result;
    use nudge_core::types::{Capability, HealthSignal};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedChannel {
        kind: ChannelKind,
        outcomes: Mutex<VecDeque<SendOutcome>>,
        calls: Mutex<Vec<(String, Instant)>>,
        fail_init: bool,
        stops: Arc<Mutex<Vec<ChannelKind>>>,
        inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundEvent>>>,
    }

    impl ScriptedChannel {
        fn new(kind: ChannelKind, outcomes: Vec<SendOutcome>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(Vec::new()),
                fail_init: false,
                stops: Arc::new(Mutex::new(Vec::new())),
                inbound_rx: Mutex::new(None),
            })
        }

        fn failing_init(kind: ChannelKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                outcomes: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
                fail_init: true,
                stops: Arc::new(Mutex::new(Vec::new())),
                inbound_rx: Mutex::new(None),
            })
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl Channel for ScriptedChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }
        fn capabilities(&self) -> &[Capability] {
            &[Capability::Send, Capability::Receive, Capability::Health]
        }
        async fn initialize(&self) -> Result<()> {
            if self.fail_init {
                Err(NudgeError::channel("refused"))
            } else {
                Ok(())
            }
        }
        async fn shutdown(&self) -> Result<()> {
            self.stops.lock().unwrap().push(self.kind);
            Ok(())
        }
        async fn send(&self, recipient: &str, _body: &str) -> SendOutcome {
            self.calls
                .lock()
                .unwrap()
                .push((recipient.to_string(), Instant::now()));
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(SendOutcome::Delivered)
        }
        async fn health(&self) -> HealthSignal {
            HealthSignal::healthy(Duration::ZERO)
        }
        async fn listen(&self) -> Result<InboundStream> {
            match self.inbound_rx.lock().unwrap().take() {
                Some(rx) => Ok(Box::new(
                    tokio_stream::wrappers::UnboundedReceiverStream::new(rx),
                )),
                None => Ok(Box::new(futures::stream::pending())),
            }
        }
    }

    fn user(id: &str) -> UserProfile {
        UserProfile {
            user_id: id.to_string(),
            preferred_channel: Some(ChannelKind::Telegram),
            telegram_chat_id: Some("42".to_string()),
            email: Some("u@example.com".to_string()),
        }
    }

    fn options(users: Vec<UserProfile>) -> OrchestratorOptions {
        OrchestratorOptions {
            users,
            policy: RetryPolicy::from_config(&RetryConfig {
                base_delay_secs: 5,
                multiplier: 2.0,
                max_delay_secs: 300,
                max_attempts: 5,
                send_timeout_secs: 10,
            }),
            grace: Duration::from_secs(5),
            token: CancellationToken::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retry_with_backoff() {
        let channel = ScriptedChannel::new(
            ChannelKind::Telegram,
            vec![
                SendOutcome::Transient("flaky".into()),
                SendOutcome::Transient("flaky".into()),
            ],
        );
        let orchestrator =
            Orchestrator::new(vec![channel.clone() as Arc<dyn Channel>], options(vec![user("u1")]));
        let handle = orchestrator.handle();
        let mut reports = handle.subscribe_reports();

        orchestrator.start_all().await;
        tokio::spawn(orchestrator.run());

        handle
            .submit(OutboundMessage::new("u1", "motivational", "keep going"))
            .await
            .unwrap();

        let report = reports.recv().await.unwrap();
        assert_eq!(report.outcome, DeliveryOutcome::Delivered);
        assert_eq!(report.attempts.len(), 3);
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::Transient);
        assert_eq!(report.attempts[2].outcome, AttemptOutcome::Delivered);

        let times = channel.call_times();
        assert_eq!(times.len(), 3);
        let first_gap = times[1] - times[0];
        let second_gap = times[2] - times[1];
        assert!(first_gap >= Duration::from_secs(5));
        assert!(second_gap >= first_gap);
        assert_eq!(handle.board().delivered(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_abandons_immediately() {
        let channel = ScriptedChannel::new(
            ChannelKind::Telegram,
            vec![SendOutcome::Permanent("unknown chat".into())],
        );
        let orchestrator =
            Orchestrator::new(vec![channel.clone() as Arc<dyn Channel>], options(vec![user("u1")]));
        let handle = orchestrator.handle();
        let mut reports = handle.subscribe_reports();

        orchestrator.start_all().await;
        tokio::spawn(orchestrator.run());

        handle
            .submit(OutboundMessage::new("u1", "motivational", "hello"))
            .await
            .unwrap();

        let report = reports.recv().await.unwrap();
        assert_eq!(report.outcome, DeliveryOutcome::Abandoned);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(channel.call_count(), 1);
        assert_eq!(handle.board().abandoned(), 1);
        assert_eq!(handle.board().delivered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_failure_is_isolated() {
        let bad = ScriptedChannel::failing_init(ChannelKind::Telegram);
        let good = ScriptedChannel::new(ChannelKind::Email, vec![]);
        let orchestrator = Orchestrator::new(
            vec![bad as Arc<dyn Channel>, good as Arc<dyn Channel>],
            options(vec![]),
        );

        orchestrator.start_all().await;
        assert_eq!(orchestrator.active_count(), 1);
        assert_eq!(orchestrator.configured_channels().len(), 2);
        assert_eq!(orchestrator.active_channels(), vec![ChannelKind::Email]);

        let slots = orchestrator.slots();
        assert_eq!(slots[0].state(), nudge_core::types::ChannelState::Stopped);
        assert!(slots[0].status().last_error.is_some());
        assert_eq!(slots[1].state(), nudge_core::types::ChannelState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_down_preferred_channel_falls_back() {
        let preferred = ScriptedChannel::failing_init(ChannelKind::Telegram);
        let fallback = ScriptedChannel::new(ChannelKind::Email, vec![]);
        let orchestrator = Orchestrator::new(
            vec![
                preferred.clone() as Arc<dyn Channel>,
                fallback.clone() as Arc<dyn Channel>,
            ],
            options(vec![user("u1")]),
        );
        let handle = orchestrator.handle();
        let mut reports = handle.subscribe_reports();

        orchestrator.start_all().await;
        tokio::spawn(orchestrator.run());

        handle
            .submit(OutboundMessage::new("u1", "motivational", "hello"))
            .await
            .unwrap();

        let report = reports.recv().await.unwrap();
        assert_eq!(report.outcome, DeliveryOutcome::Delivered);
        assert_eq!(report.attempts[0].channel, ChannelKind::Email);
        assert_eq!(preferred.call_count(), 0);
        assert_eq!(fallback.call_count(), 1);
        // Email route uses the email address, not the telegram chat id.
        assert_eq!(fallback.calls.lock().unwrap()[0].0, "u@example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn test_preferred_channel_wins_when_active() {
        let telegram = ScriptedChannel::new(ChannelKind::Telegram, vec![]);
        let email = ScriptedChannel::new(ChannelKind::Email, vec![]);
        let orchestrator = Orchestrator::new(
            vec![
                email.clone() as Arc<dyn Channel>,
                telegram.clone() as Arc<dyn Channel>,
            ],
            options(vec![user("u1")]),
        );
        let handle = orchestrator.handle();
        let mut reports = handle.subscribe_reports();

        orchestrator.start_all().await;
        tokio::spawn(orchestrator.run());

        handle
            .submit(OutboundMessage::new("u1", "motivational", "hello"))
            .await
            .unwrap();

        reports.recv().await.unwrap();
        assert_eq!(telegram.call_count(), 1);
        assert_eq!(email.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_active_channel_holds_then_flushes() {
        let channel = ScriptedChannel::failing_init(ChannelKind::Telegram);
        let orchestrator =
            Orchestrator::new(vec![channel.clone() as Arc<dyn Channel>], options(vec![user("u1")]));
        let handle = orchestrator.handle();
        let mut reports = handle.subscribe_reports();
        let slots = orchestrator.slots();

        orchestrator.start_all().await;
        tokio::spawn(orchestrator.run());

        handle
            .submit(OutboundMessage::new("u1", "motivational", "hello"))
            .await
            .unwrap();

        // Give the loop a beat: message must be parked, not sent.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(channel.call_count(), 0);
        assert_eq!(handle.board().held(), 1);

        // Recovery (normally the monitor's doing) frees the message.
        slots[0].mark_active();
        let report = reports.recv().await.unwrap();
        assert_eq!(report.outcome, DeliveryOutcome::Delivered);
        assert_eq!(channel.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_user_is_abandoned() {
        let channel = ScriptedChannel::new(ChannelKind::Telegram, vec![]);
        let orchestrator =
            Orchestrator::new(vec![channel.clone() as Arc<dyn Channel>], options(vec![]));
        let handle = orchestrator.handle();
        let mut reports = handle.subscribe_reports();

        orchestrator.start_all().await;
        tokio::spawn(orchestrator.run());

        handle
            .submit(OutboundMessage::new("ghost", "motivational", "hello"))
            .await
            .unwrap();

        let report = reports.recv().await.unwrap();
        assert_eq!(report.outcome, DeliveryOutcome::Abandoned);
        assert!(report.attempts.is_empty());
        assert_eq!(channel.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_channels_in_reverse_order() {
        let stops = Arc::new(Mutex::new(Vec::new()));
        let mut a = ScriptedChannel::new(ChannelKind::Telegram, vec![]);
        let mut b = ScriptedChannel::new(ChannelKind::Email, vec![]);
        Arc::get_mut(&mut a).unwrap().stops = stops.clone();
        Arc::get_mut(&mut b).unwrap().stops = stops.clone();

        let token = CancellationToken::new();
        let orchestrator = Orchestrator::new(
            vec![a as Arc<dyn Channel>, b as Arc<dyn Channel>],
            OrchestratorOptions {
                token: token.clone(),
                ..options(vec![])
            },
        );
        orchestrator.start_all().await;
        let runner = tokio::spawn(orchestrator.run());

        token.cancel();
        runner.await.unwrap();

        assert_eq!(
            *stops.lock().unwrap(),
            vec![ChannelKind::Email, ChannelKind::Telegram]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_events_are_counted_and_merged() {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = ScriptedChannel::new(ChannelKind::Telegram, vec![]);
        *channel.inbound_rx.lock().unwrap() = Some(rx);

        let mut orchestrator =
            Orchestrator::new(vec![channel as Arc<dyn Channel>], options(vec![]));
        let board = orchestrator.board();
        let mut inbound = orchestrator.take_inbound().unwrap();

        orchestrator.start_all().await;
        tokio::spawn(orchestrator.run());

        tx.send(InboundEvent::new(ChannelKind::Telegram, "42", "done"))
            .unwrap();

        let event = inbound.recv().await.unwrap();
        assert_eq!(event.sender_id, "42");
        assert_eq!(board.inbound(), 1);
    }
}
