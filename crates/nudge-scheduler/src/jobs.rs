//! In-memory table of scheduled jobs, one per (user, category).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use nudge_core::types::CategoryKind;

/// Identity of one job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobKey {
    pub user_id: String,
    pub category: String,
}

impl JobKey {
    pub fn new(user_id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            category: category.into(),
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_id, self.category)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// No valid fire time (disabled, no windows, computation failure).
    Unscheduled,
    /// Waiting for its fire time.
    Scheduled,
    /// Claimed by the current poll, about to fire.
    Due,
    /// Fired, waiting for its recompute.
    Fired,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Unscheduled => "unscheduled",
            JobState::Scheduled => "scheduled",
            JobState::Due => "due",
            JobState::Fired => "fired",
        };
        write!(f, "{s}")
    }
}

/// One job row.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub kind: CategoryKind,
    pub state: JobState,
    pub next_fire_time: Option<DateTime<Utc>>,
    /// Day the used slots below belong to.
    pub used_date: Option<NaiveDate>,
    /// Minute slots already fired on that day.
    pub used_slots: Vec<NaiveTime>,
}

impl ScheduledJob {
    fn new(kind: CategoryKind) -> Self {
        Self {
            kind,
            state: JobState::Unscheduled,
            next_fire_time: None,
            used_date: None,
            used_slots: Vec::new(),
        }
    }
}

/// Shared job table. The lock covers map operations only and is never
/// held across an await.
#[derive(Default)]
pub struct JobTable {
    inner: Mutex<BTreeMap<JobKey, ScheduledJob>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<JobKey, ScheduledJob>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, key: &JobKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn get(&self, key: &JobKey) -> Option<ScheduledJob> {
        self.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<JobKey> {
        self.lock().keys().cloned().collect()
    }

    /// Insert if absent; refresh the kind either way.
    pub fn upsert(&self, key: &JobKey, kind: CategoryKind) {
        let mut map = self.lock();
        map.entry(key.clone())
            .or_insert_with(|| ScheduledJob::new(kind))
            .kind = kind;
    }

    pub fn remove(&self, key: &JobKey) {
        self.lock().remove(key);
    }

    /// Drop every job whose key is no longer present in storage.
    pub fn retain_keys(&self, keep: &BTreeSet<JobKey>) {
        self.lock().retain(|key, _| keep.contains(key));
    }

    pub fn set_scheduled(&self, key: &JobKey, at: DateTime<Utc>) {
        if let Some(job) = self.lock().get_mut(key) {
            job.state = JobState::Scheduled;
            job.next_fire_time = Some(at);
        }
    }

    pub fn set_unscheduled(&self, key: &JobKey) {
        if let Some(job) = self.lock().get_mut(key) {
            job.state = JobState::Unscheduled;
            job.next_fire_time = None;
        }
    }

    /// Claim every job whose fire time has arrived, flipping it to Due
    /// so the same sweep cannot pick it up twice.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<(JobKey, CategoryKind, DateTime<Utc>)> {
        let mut map = self.lock();
        let mut due = Vec::new();
        for (key, job) in map.iter_mut() {
            let Some(at) = job.next_fire_time else {
                continue;
            };
            if job.state == JobState::Scheduled && at <= now {
                job.state = JobState::Due;
                due.push((key.clone(), job.kind, at));
            }
        }
        due
    }

    /// Record a fired slot and park the job until its recompute. Used
    /// slots reset when the day rolls over.
    pub fn record_fired(&self, key: &JobKey, date: NaiveDate, slot: NaiveTime) {
        if let Some(job) = self.lock().get_mut(key) {
            job.state = JobState::Fired;
            if job.used_date != Some(date) {
                job.used_date = Some(date);
                job.used_slots.clear();
            }
            job.used_slots.push(slot);
        }
    }

    /// Slots already fired on the given day.
    pub fn used_slots_on(&self, key: &JobKey, date: NaiveDate) -> Vec<NaiveTime> {
        let map = self.lock();
        match map.get(key) {
            Some(job) if job.used_date == Some(date) => job.used_slots.clone(),
            _ => Vec::new(),
        }
    }

    /// Ordered snapshot for status reporting.
    pub fn snapshot(&self) -> Vec<(JobKey, ScheduledJob)> {
        self.lock()
            .iter()
            .map(|(key, job)| (key.clone(), job.clone()))
            .collect()
    }
}
