//! # Nudge Gateway
//!
//! Read-only HTTP status surface for a running Nudge service.

pub mod routes;
pub mod server;

pub use server::{AppState, GatewayServer};
