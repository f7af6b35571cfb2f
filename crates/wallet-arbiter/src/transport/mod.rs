//! Transports carrying messages between dApp pages and the arbiter

mod channel;
mod stdio;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;
use crate::protocol::Message;

pub use channel::{ChannelPeer, ChannelTransport};
pub use stdio::StdioTransport;

/// A bidirectional message pipe
///
/// Inbound messages are raw JSON so that the dispatcher can answer
/// malformed requests that still carry an event id.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a message to the page side
    async fn send(&self, message: Message) -> Result<(), TransportError>;

    /// Next inbound message; `None` once the page side has gone away
    async fn recv(&self) -> Result<Option<Value>, TransportError>;
}
