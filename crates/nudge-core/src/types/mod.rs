//! Shared types used across Nudge crates.

pub mod channel;
pub mod message;
pub mod schedule;
pub mod task;
pub mod user;

pub use channel::{Capability, ChannelKind, ChannelState, HealthSignal};
pub use message::{AttemptOutcome, DeliveryAttempt, InboundEvent, OutboundMessage, SendOutcome};
pub use schedule::{CategoryKind, ScheduleData, SchedulePeriod};
pub use task::{TaskItem, TaskPriority};
pub use user::UserProfile;
