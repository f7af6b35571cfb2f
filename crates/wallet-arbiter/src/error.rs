//! Error types for the arbiter

use thiserror::Error;
use wallet_core::WalletError;

/// Errors returned to whoever submits requests or decisions
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Request {0} has already been submitted")]
    DuplicateRequest(String),

    #[error("Request {0} has already been responded to")]
    AlreadyResponded(String),

    #[error("Unknown request {0}")]
    UnknownRequest(String),

    #[error("Request {0} is already being processed")]
    Busy(String),

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Invalid decision: {0}")]
    InvalidDecision(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error(transparent)]
    Wallet(#[from] WalletError),
}

/// Errors moving messages in or out
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport closed")]
    Closed,
}
