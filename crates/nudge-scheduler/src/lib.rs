//! # Nudge Scheduler
//!
//! Computes randomized fire times inside user-defined periods and
//! hands due reminder jobs to the delivery pipeline.

pub mod bridge;
pub mod engine;
pub mod jobs;
pub mod periods;
pub mod store;
pub mod weights;

pub use bridge::{Marker, RescheduleBridge, RescheduleRequest};
pub use engine::SchedulerEngine;
pub use jobs::{JobKey, JobState, JobTable, ScheduledJob};
pub use store::ScheduleStore;
pub use weights::WeightPolicy;
