//! # Nudge Core
//! Shared errors, types, configuration, and trait seams for Nudge.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::NudgeConfig;
pub use error::{NudgeError, Result};
pub use traits::{Channel, Dispatch, InboundStream};
