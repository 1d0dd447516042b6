//! Scheduler engine: the poll loop that keeps job fire times computed
//! and hands due jobs to the delivery pipeline.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nudge_core::error::{NudgeError, Result};
use nudge_core::traits::Dispatch;
use nudge_core::types::{CategoryKind, OutboundMessage};

use crate::bridge::RescheduleBridge;
use crate::jobs::{JobKey, JobTable};
use crate::periods;
use crate::store::ScheduleStore;
use crate::weights::WeightPolicy;

pub struct SchedulerEngine {
    store: ScheduleStore,
    bridge: RescheduleBridge,
    jobs: Arc<JobTable>,
    dispatch: Arc<dyn Dispatch>,
    weights: WeightPolicy,
    poll_interval: Duration,
    token: CancellationToken,
}

impl SchedulerEngine {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        dispatch: Arc<dyn Dispatch>,
        poll_interval: Duration,
        token: CancellationToken,
    ) -> Self {
        let data_dir = data_dir.into();
        Self {
            store: ScheduleStore::new(&data_dir),
            bridge: RescheduleBridge::new(&data_dir),
            jobs: Arc::new(JobTable::new()),
            dispatch,
            weights: WeightPolicy,
            poll_interval,
            token,
        }
    }

    /// Shared job table handle for status reporting.
    pub fn jobs(&self) -> Arc<JobTable> {
        Arc::clone(&self.jobs)
    }

    /// Boot pass: every pair on disk gets a fresh fire time, then any
    /// markers left over from downtime are swept. The sweep is pure
    /// deletion since the reschedule-all already covered every pair.
    pub fn startup(&self) {
        self.sync_jobs();
        let keys = self.jobs.keys();
        info!(jobs = keys.len(), "Recomputing all fire times at startup");
        for key in &keys {
            self.recompute(key);
        }

        match self.bridge.scan() {
            Ok(markers) => {
                for marker in &markers {
                    if let Err(e) = self.bridge.consume(marker) {
                        warn!(
                            marker = %marker.path.display(),
                            "Could not delete reschedule marker: {e}"
                        );
                    }
                }
                if !markers.is_empty() {
                    debug!(count = markers.len(), "Swept stale reschedule markers");
                }
            }
            Err(e) => warn!("Reschedule marker scan failed: {e}"),
        }
    }

    pub async fn run(self) {
        self.startup();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    info!("Scheduler stopping");
                    break;
                }
                _ = ticker.tick() => self.cycle().await,
            }
        }
    }

    /// One poll: storage sync, marker consumption, then firing.
    pub async fn cycle(&self) {
        self.sync_jobs();
        self.consume_markers();
        self.fire_due().await;
    }

    /// Mirror the set of schedule files into the job table. New pairs
    /// get an immediate recompute; pairs whose file disappeared are
    /// dropped.
    fn sync_jobs(&self) {
        let pairs = match self.store.list_pairs() {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!("Schedule listing failed: {e}");
                return;
            }
        };

        let keep: BTreeSet<JobKey> = pairs
            .iter()
            .map(|(user, category)| JobKey::new(user, category))
            .collect();

        let before = self.jobs.len();
        self.jobs.retain_keys(&keep);
        let dropped = before.saturating_sub(self.jobs.len());
        if dropped > 0 {
            debug!(dropped, "Removed jobs whose schedule files disappeared");
        }

        for key in &keep {
            if !self.jobs.contains(key) {
                debug!(job = %key, "New schedule discovered");
                self.recompute(key);
            }
        }
    }

    /// Apply and delete pending reschedule markers. Each marker reloads
    /// its pair from disk and recomputes that job only.
    fn consume_markers(&self) {
        let markers = match self.bridge.scan() {
            Ok(markers) => markers,
            Err(e) => {
                warn!("Reschedule marker scan failed: {e}");
                return;
            }
        };

        for marker in markers {
            let key = JobKey::new(&marker.request.user_id, &marker.request.category);
            info!(job = %key, "Applying reschedule marker");
            self.recompute(&key);
            if let Err(e) = self.bridge.consume(&marker) {
                warn!(
                    marker = %marker.path.display(),
                    "Could not delete reschedule marker: {e}"
                );
            }
        }
    }

    /// Fire every due job. Failures stay local to their job: a
    /// computation error parks it as Unscheduled, a failed hand-off
    /// leaves it Scheduled for the next poll.
    async fn fire_due(&self) {
        let due = self.jobs.take_due(Utc::now());
        for (key, kind, at) in due {
            let message = match self.build_message(&key, kind) {
                Ok(message) => message,
                Err(e) => {
                    warn!(job = %key, "Schedule computation error: {e}");
                    self.jobs.set_unscheduled(&key);
                    continue;
                }
            };

            info!(job = %key, message_id = %message.id, "Firing scheduled job");
            match self.dispatch.submit(message).await {
                Ok(()) => {
                    self.jobs.record_fired(&key, at.date_naive(), at.time());
                    self.recompute(&key);
                }
                Err(e) => {
                    warn!(job = %key, "Hand-off failed, will retry next poll: {e}");
                    self.jobs.set_scheduled(&key, at);
                }
            }
        }
    }

    /// Body for one firing. Plain categories send a fixed nudge line;
    /// task reminders draw one open task by weight at fire time.
    fn build_message(&self, key: &JobKey, kind: CategoryKind) -> Result<OutboundMessage> {
        let body = match kind {
            CategoryKind::Message => format!("Time for your {} nudge", key.category),
            CategoryKind::TaskReminder => {
                let tasks = self.store.load_tasks(&key.user_id)?;
                let now = Utc::now();
                let task = self
                    .weights
                    .choose(&tasks, now, &mut rand::thread_rng())
                    .ok_or_else(|| {
                        NudgeError::schedule(format!("No open tasks for {}", key.user_id))
                    })?;
                match task.due_date {
                    Some(due) => {
                        format!("Reminder: {} (due {})", task.title, due.format("%Y-%m-%d"))
                    }
                    None => format!("Reminder: {}", task.title),
                }
            }
        };
        Ok(OutboundMessage::new(&key.user_id, &key.category, body))
    }

    /// Recompute one job's next fire time from its on-disk schedule.
    /// Every failure path parks the job as Unscheduled instead of
    /// aborting the caller's sweep.
    fn recompute(&self, key: &JobKey) {
        let data = match self.store.load_schedule(&key.user_id, &key.category) {
            Ok(data) => data,
            Err(e) => {
                warn!(job = %key, "Schedule load failed: {e}");
                self.jobs.set_unscheduled(key);
                return;
            }
        };

        self.jobs.upsert(key, data.kind);
        if !data.enabled {
            debug!(job = %key, "Schedule disabled");
            self.jobs.set_unscheduled(key);
            return;
        }

        let now = Utc::now();
        let used = self.jobs.used_slots_on(key, now.date_naive());
        match periods::next_fire_time(&data, now, &used, &mut rand::thread_rng()) {
            Ok(at) => {
                debug!(job = %key, fire_at = %at, "Job scheduled");
                self.jobs.set_scheduled(key, at);
            }
            Err(e) => {
                warn!(job = %key, "No fire time computed: {e}");
                self.jobs.set_unscheduled(key);
            }
        }
    }
}
