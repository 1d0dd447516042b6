//! Trait seams: `Channel` for transports, `Dispatch` for handing
//! messages into the delivery pipeline.

use async_trait::async_trait;
use futures::stream::Stream;

use crate::error::Result;
use crate::types::{
    Capability, ChannelKind, HealthSignal, InboundEvent, OutboundMessage, SendOutcome,
};

/// Stream of inbound events produced by a Receive-capable channel.
pub type InboundStream = Box<dyn Stream<Item = InboundEvent> + Send + Unpin>;

/// A pluggable message transport.
///
/// One instance exists per configured kind (never per recipient) and is
/// shared between the orchestrator and the monitor, so implementations
/// keep their mutable state behind interior mutability.
/// `initialize`/`shutdown` are idempotent.
#[async_trait]
pub trait Channel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    fn capabilities(&self) -> &[Capability];

    /// Bring the transport up: verify credentials, bind listeners.
    async fn initialize(&self) -> Result<()>;

    /// Tear the transport down.
    async fn shutdown(&self) -> Result<()>;

    /// Deliver `body` to a channel-specific recipient address.
    ///
    /// Failures come back as values: transient outcomes are retried by
    /// the caller, permanent ones abandon the message.
    async fn send(&self, recipient: &str, body: &str) -> SendOutcome;

    /// Probe the transport.
    async fn health(&self) -> HealthSignal;

    /// Inbound event stream. Send-only channels return a stream that
    /// never yields.
    async fn listen(&self) -> Result<InboundStream>;

    fn can_send(&self) -> bool {
        self.capabilities().contains(&Capability::Send)
    }

    fn can_receive(&self) -> bool {
        self.capabilities().contains(&Capability::Receive)
    }
}

/// Hand-off seam between the scheduler and the delivery pipeline.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Queue a message for delivery. `Ok` means accepted, not delivered.
    async fn submit(&self, message: OutboundMessage) -> Result<()>;
}
