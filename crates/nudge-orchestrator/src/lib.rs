//! # Nudge Orchestrator
//! Channel lifecycle, message routing, retry scheduling, and health
//! monitoring.

pub mod monitor;
pub mod orchestrator;
pub mod retry;
pub mod status;

pub use monitor::Monitor;
pub use orchestrator::{
    DeliveryOutcome, DeliveryReport, Orchestrator, OrchestratorHandle, OrchestratorOptions,
};
pub use retry::RetryPolicy;
pub use status::{ChannelSlot, ChannelStatus, StatusBoard};
