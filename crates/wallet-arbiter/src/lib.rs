//! # wallet-arbiter
//!
//! Background arbiter for the extension wallet. Receives requests from dApp
//! pages, parks them until the user decides, and answers each one exactly
//! once. Pages talk to it over stdio (or an in-process channel); the wallet
//! UI uses the loopback HTTP/SSE approval surface.

pub mod dispatcher;
pub mod error;
pub mod http;
pub mod protocol;
mod server;
pub mod transport;

pub use dispatcher::{
    Decision, DecisionOutcome, DispatcherEvent, PendingRequest, RequestDispatcher, RequestState,
};
pub use error::{DispatchError, TransportError};
pub use http::{AccessPolicy, ApprovalServer};
pub use protocol::{ErrorCode, Message, MessageType, RequestEnvelope, WireError};
pub use server::ArbiterServer;
pub use transport::{ChannelPeer, ChannelTransport, StdioTransport, Transport};
