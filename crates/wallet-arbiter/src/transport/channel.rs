//! In-process transport over tokio channels

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use super::Transport;
use crate::error::TransportError;
use crate::protocol::Message;

/// Arbiter side of an in-process pipe
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<Message>,
    inbound: Mutex<mpsc::UnboundedReceiver<Value>>,
}

/// Page side of an in-process pipe
pub struct ChannelPeer {
    pub inbound: mpsc::UnboundedSender<Value>,
    pub outbound: mpsc::UnboundedReceiver<Message>,
}

impl ChannelTransport {
    /// Create a connected transport and peer
    pub fn pair() -> (Self, ChannelPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        (
            Self {
                outbound: outbound_tx,
                inbound: Mutex::new(inbound_rx),
            },
            ChannelPeer {
                inbound: inbound_tx,
                outbound: outbound_rx,
            },
        )
    }
}

impl ChannelPeer {
    /// Send a request as the page would
    pub fn send(&self, message: Value) -> Result<(), TransportError> {
        self.inbound.send(message).map_err(|_| TransportError::Closed)
    }

    /// Every message delivered so far
    pub fn drain(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        self.outbound.send(message).map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Result<Option<Value>, TransportError> {
        Ok(self.inbound.lock().await.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;
    use serde_json::json;

    #[tokio::test]
    async fn test_pair_delivers_both_ways() {
        let (transport, mut peer) = ChannelTransport::pair();

        peer.send(json!({ "eventId": "e1" })).unwrap();
        assert_eq!(transport.recv().await.unwrap(), Some(json!({ "eventId": "e1" })));

        transport
            .send(Message::response("e1", None, MessageType::Enable, json!({})))
            .await
            .unwrap();
        let delivered = peer.drain();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].event_id, "e1");

        drop(peer);
        assert_eq!(transport.recv().await.unwrap(), None);
    }
}
