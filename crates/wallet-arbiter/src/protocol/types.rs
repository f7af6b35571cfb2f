//! Wire message types exchanged with dApp pages

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::WireError;
use wallet_core::{normalize_origin, Address};

fn base64_decode(field: &str, encoded: &str) -> Result<Vec<u8>, WireError> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| WireError::invalid_input(format!("{} is not valid base64: {}", field, e)))
}

pub(crate) fn base64_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Message type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Enable,
    SignBytes,
    SignTxns,
    EnableResponse,
    SignBytesResponse,
    SignTxnsResponse,
}

impl MessageType {
    pub fn is_request(self) -> bool {
        matches!(self, Self::Enable | Self::SignBytes | Self::SignTxns)
    }

    /// The response type for a request type
    pub fn response(self) -> Self {
        match self {
            Self::Enable | Self::EnableResponse => Self::EnableResponse,
            Self::SignBytes | Self::SignBytesResponse => Self::SignBytesResponse,
            Self::SignTxns | Self::SignTxnsResponse => Self::SignTxnsResponse,
        }
    }
}

/// A message crossing the dApp boundary
///
/// Responses carry a payload or an error, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub event_id: String,
    #[serde(default)]
    pub tab_id: Option<u64>,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub error: Option<WireError>,
}

impl Message {
    /// Create a request message
    pub fn request(
        event_id: impl Into<String>,
        tab_id: Option<u64>,
        kind: MessageType,
        payload: Value,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            tab_id,
            kind,
            payload: Some(payload),
            error: None,
        }
    }

    /// Create a success response
    pub fn response(event_id: &str, tab_id: Option<u64>, kind: MessageType, payload: Value) -> Self {
        Self {
            event_id: event_id.to_string(),
            tab_id,
            kind: kind.response(),
            payload: Some(payload),
            error: None,
        }
    }

    /// Create an error response
    pub fn error_response(
        event_id: &str,
        tab_id: Option<u64>,
        kind: MessageType,
        error: WireError,
    ) -> Self {
        Self {
            event_id: event_id.to_string(),
            tab_id,
            kind: kind.response(),
            payload: None,
            error: Some(error),
        }
    }

    pub fn is_response(&self) -> bool {
        !self.kind.is_request()
    }
}

/// Where a request came from, as reported by the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginContext {
    pub host: String,
    pub app_name: String,
    #[serde(default)]
    pub icon_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnablePayload {
    #[serde(flatten)]
    origin: OriginContext,
    genesis_hash: String,
    #[serde(default)]
    genesis_id: Option<String>,
    #[serde(default)]
    authorized_addresses: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignBytesPayload {
    #[serde(flatten)]
    origin: OriginContext,
    encoded_data: String,
    #[serde(default)]
    signer: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignTxnsPayload {
    #[serde(flatten)]
    origin: OriginContext,
    encoded_txns: Vec<String>,
}

/// A validated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Enable {
        genesis_hash: String,
        genesis_id: Option<String>,
        /// Addresses the dApp asked for; a hint for the approval surface
        requested_addresses: Vec<Address>,
    },
    SignBytes {
        data: Vec<u8>,
        signer: Option<Address>,
    },
    SignTxns {
        txns: Vec<Vec<u8>>,
    },
}

impl Request {
    pub fn kind(&self) -> MessageType {
        match self {
            Self::Enable { .. } => MessageType::Enable,
            Self::SignBytes { .. } => MessageType::SignBytes,
            Self::SignTxns { .. } => MessageType::SignTxns,
        }
    }
}

/// A correlated request, parsed and validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    pub event_id: String,
    pub tab_id: Option<u64>,
    /// Origin with a normalised host
    pub origin: OriginContext,
    pub request: Request,
}

impl RequestEnvelope {
    /// Validate a request message
    pub fn from_message(message: &Message) -> Result<Self, WireError> {
        if !message.kind.is_request() {
            return Err(WireError::invalid_input(format!(
                "{:?} is not a request",
                message.kind
            )));
        }

        let payload = message
            .payload
            .clone()
            .ok_or_else(|| WireError::invalid_input("missing payload"))?;

        let invalid = |e: serde_json::Error| WireError::invalid_input(format!("invalid payload: {}", e));

        let (mut origin, request) = match message.kind {
            MessageType::Enable => {
                let payload: EnablePayload = serde_json::from_value(payload).map_err(invalid)?;
                if payload.genesis_hash.is_empty() {
                    return Err(WireError::invalid_input("genesisHash is empty"));
                }
                let requested_addresses = payload
                    .authorized_addresses
                    .unwrap_or_default()
                    .iter()
                    .map(|a| parse_address(a))
                    .collect::<Result<Vec<_>, _>>()?;

                (
                    payload.origin,
                    Request::Enable {
                        genesis_hash: payload.genesis_hash,
                        genesis_id: payload.genesis_id,
                        requested_addresses,
                    },
                )
            }
            MessageType::SignBytes => {
                let payload: SignBytesPayload = serde_json::from_value(payload).map_err(invalid)?;
                let data = base64_decode("encodedData", &payload.encoded_data)?;
                if data.is_empty() {
                    return Err(WireError::invalid_input("encodedData is empty"));
                }
                let signer = payload.signer.as_deref().map(parse_address).transpose()?;

                (payload.origin, Request::SignBytes { data, signer })
            }
            MessageType::SignTxns => {
                let payload: SignTxnsPayload = serde_json::from_value(payload).map_err(invalid)?;
                if payload.encoded_txns.is_empty() {
                    return Err(WireError::invalid_input("encodedTxns is empty"));
                }
                let txns = payload
                    .encoded_txns
                    .iter()
                    .map(|t| base64_decode("encodedTxns", t))
                    .collect::<Result<Vec<_>, _>>()?;
                if txns.iter().any(Vec::is_empty) {
                    return Err(WireError::invalid_input("encodedTxns contains an empty transaction"));
                }

                (payload.origin, Request::SignTxns { txns })
            }
            other => {
                return Err(WireError::invalid_input(format!(
                    "{:?} is not a request",
                    other
                )))
            }
        };

        origin.host = normalize_origin(&origin.host)
            .map_err(|e| WireError::invalid_input(e.to_string()))?;

        Ok(Self {
            event_id: message.event_id.clone(),
            tab_id: message.tab_id,
            origin,
            request,
        })
    }

    pub fn kind(&self) -> MessageType {
        self.request.kind()
    }

    /// Success response for this request
    pub fn respond(&self, payload: Value) -> Message {
        Message::response(&self.event_id, self.tab_id, self.kind(), payload)
    }

    /// Error response for this request
    pub fn fail(&self, error: WireError) -> Message {
        Message::error_response(&self.event_id, self.tab_id, self.kind(), error)
    }
}

fn parse_address(address: &str) -> Result<Address, WireError> {
    Address::parse(address).map_err(|e| WireError::invalid_input(e.to_string()))
}

/// An account as disclosed to a dApp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAccount {
    pub address: Address,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableResponse {
    pub accounts: Vec<WalletAccount>,
    pub genesis_hash: String,
    pub genesis_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignBytesResponse {
    pub encoded_signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignTxnsResponse {
    pub stxns: Vec<String>,
}
