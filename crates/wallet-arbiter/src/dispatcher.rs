//! Request dispatcher: correlates dApp requests with user decisions
//!
//! Every request moves through
//! `Received -> [AwaitingAuthorization] -> AwaitingUserDecision -> terminal`,
//! and every event id gets exactly one response. Responses are funnelled
//! through [`RequestDispatcher::respond`], which records the id as answered
//! before anything is sent.

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, TransportError};
use crate::protocol::{
    base64_encode, EnableResponse, ErrorCode, Message, MessageType, OriginContext, Request,
    RequestEnvelope, SignBytesResponse, SignTxnsResponse, WalletAccount, WireError,
};
use crate::transport::Transport;
use wallet_core::{Address, Network, Session, SigningPayload, Wallet, WalletError};

/// How many answered ids are remembered for duplicate detection
const RESPONDED_HISTORY: usize = 4096;

/// Capacity of the event broadcast channel
const EVENT_CAPACITY: usize = 64;

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Where an undecided request stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestState {
    /// The origin holds no session; the user must authorize it first
    AwaitingAuthorization,
    AwaitingUserDecision,
}

/// A user decision on a pending request
///
/// `Authorize` and `Sign` are the two forms of approval: the first grants
/// the origin a session, the second releases a signature.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Decision {
    Authorize {
        addresses: Vec<Address>,
    },
    Sign {
        signer: Address,
        password: String,
    },
    Deny {
        #[serde(default)]
        reason: Option<String>,
    },
    Cancel,
}

impl fmt::Debug for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authorize { addresses } => f
                .debug_struct("Authorize")
                .field("addresses", addresses)
                .finish(),
            Self::Sign { signer, .. } => f
                .debug_struct("Sign")
                .field("signer", signer)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::Deny { reason } => f.debug_struct("Deny").field("reason", reason).finish(),
            Self::Cancel => f.write_str("Cancel"),
        }
    }
}

/// What a successful decision did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DecisionOutcome {
    /// A session was granted; the request now awaits a signing decision
    Authorized,
    /// The request reached a terminal state and its response was sent
    Responded,
}

/// Snapshot of an undecided request for the approval surface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    pub event_id: String,
    pub tab_id: Option<u64>,
    pub kind: MessageType,
    pub origin: OriginContext,
    pub state: RequestState,
    /// Addresses an Enable asked for, to preselect in the prompt
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requested_addresses: Vec<Address>,
    /// The request payload as the page sent it
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

/// Notifications for the approval surface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DispatcherEvent {
    /// A request needs the user, or moved to a new state
    Pending(PendingRequest),
    /// A request was answered
    #[serde(rename_all = "camelCase")]
    Resolved {
        event_id: String,
        error: Option<ErrorCode>,
    },
}

/// Next move after a decision ran
enum Step {
    /// Terminal: answer the page
    Respond(std::result::Result<Value, WireError>),
    /// Park the request in a new state
    Await(RequestState),
}

struct Entry {
    envelope: RequestEnvelope,
    payload: Value,
    state: RequestState,
    received_at: DateTime<Utc>,
    /// Set while validation or signing runs outside the table lock
    busy: bool,
    /// Timed out or cancelled while busy; cancelled once work finishes
    expired: bool,
    timeout: Option<JoinHandle<()>>,
}

impl Entry {
    fn snapshot(&self) -> PendingRequest {
        PendingRequest {
            event_id: self.envelope.event_id.clone(),
            tab_id: self.envelope.tab_id,
            kind: self.envelope.kind(),
            origin: self.envelope.origin.clone(),
            state: self.state,
            requested_addresses: match &self.envelope.request {
                Request::Enable {
                    requested_addresses,
                    ..
                } => requested_addresses.clone(),
                _ => Vec::new(),
            },
            payload: self.payload.clone(),
            received_at: self.received_at,
        }
    }
}

#[derive(Default)]
struct Table {
    pending: HashMap<String, Entry>,
    responded: IndexSet<String>,
}

impl Table {
    fn knows(&self, event_id: &str) -> bool {
        self.pending.contains_key(event_id) || self.responded.contains(event_id)
    }
}

struct Inner {
    wallet: Arc<Wallet>,
    transport: Arc<dyn Transport>,
    table: Mutex<Table>,
    events: broadcast::Sender<DispatcherEvent>,
    timeout: Duration,
}

/// Request dispatcher
#[derive(Clone)]
pub struct RequestDispatcher {
    inner: Arc<Inner>,
}

impl RequestDispatcher {
    /// Create a dispatcher that answers through `transport`
    ///
    /// Requests not decided within `timeout` are cancelled.
    pub fn new(wallet: Arc<Wallet>, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                wallet,
                transport,
                table: Mutex::new(Table::default()),
                events,
                timeout,
            }),
        }
    }

    /// Subscribe to dispatcher events
    pub fn subscribe(&self) -> broadcast::Receiver<DispatcherEvent> {
        self.inner.events.subscribe()
    }

    /// Undecided requests, oldest first
    pub async fn pending(&self) -> Vec<PendingRequest> {
        let table = self.inner.table.lock().await;
        let mut pending: Vec<PendingRequest> =
            table.pending.values().map(Entry::snapshot).collect();
        pending.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        pending
    }

    /// Handle a raw inbound message
    ///
    /// A malformed request that still carries an event id is answered with
    /// `InvalidInputError`; one without an id cannot be answered at all.
    pub async fn receive(&self, raw: Value) -> Result<()> {
        let event_id = raw
            .get("eventId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DispatchError::MalformedMessage("missing eventId".to_string()))?;

        let kind = raw
            .get("type")
            .cloned()
            .and_then(|t| serde_json::from_value::<MessageType>(t).ok())
            .ok_or_else(|| DispatchError::MalformedMessage(format!("{}: unknown type", event_id)))?;

        if !kind.is_request() {
            debug!("Ignoring {:?} message {}", kind, event_id);
            return Ok(());
        }

        let tab_id = raw.get("tabId").and_then(Value::as_u64);
        let payload = raw.get("payload").cloned().unwrap_or(Value::Null);

        let parsed = serde_json::from_value::<Message>(raw)
            .map_err(|e| WireError::invalid_input(format!("invalid message: {}", e)))
            .and_then(|message| RequestEnvelope::from_message(&message));

        match parsed {
            Ok(envelope) => self.submit_with_payload(envelope, payload).await,
            Err(wire_error) => {
                {
                    let mut table = self.inner.table.lock().await;
                    if table.knows(&event_id) {
                        return Err(DispatchError::DuplicateRequest(event_id));
                    }
                    remember(&mut table, &event_id);
                }

                warn!("Rejecting malformed request {}: {}", event_id, wire_error.message);
                self.deliver(Message::error_response(&event_id, tab_id, kind, wire_error))
                    .await;
                Ok(())
            }
        }
    }

    /// Submit a validated request
    pub async fn submit(&self, envelope: RequestEnvelope) -> Result<()> {
        self.submit_with_payload(envelope, Value::Null).await
    }

    async fn submit_with_payload(&self, envelope: RequestEnvelope, payload: Value) -> Result<()> {
        let event_id = envelope.event_id.clone();

        // Reserve the id before anything is awaited
        {
            let mut table = self.inner.table.lock().await;
            if table.knows(&event_id) {
                warn!("Duplicate request {}", event_id);
                return Err(DispatchError::DuplicateRequest(event_id));
            }
            table.pending.insert(
                event_id.clone(),
                Entry {
                    envelope: envelope.clone(),
                    payload,
                    state: RequestState::AwaitingUserDecision,
                    received_at: Utc::now(),
                    busy: true,
                    expired: false,
                    timeout: None,
                },
            );
        }

        info!(
            "Received {:?} request {} from {}",
            envelope.kind(),
            event_id,
            envelope.origin.host
        );

        match self.route(&envelope).await {
            Ok(Some(state)) => {
                self.await_decision(&event_id, state).await;
            }
            Ok(None) => {}
            Err(e) => {
                error!("Failed to process request {}: {}", event_id, e);
                self.respond(&event_id, Err(WireError::unknown())).await;
            }
        }
        Ok(())
    }

    /// Decide where a fresh request goes; `None` means it was answered
    async fn route(&self, envelope: &RequestEnvelope) -> std::result::Result<Option<RequestState>, WalletError> {
        let wallet = &self.inner.wallet;
        let host = &envelope.origin.host;

        match &envelope.request {
            Request::Enable {
                genesis_hash,
                genesis_id,
                ..
            } => {
                let network = match self.resolve_network(genesis_hash, genesis_id.as_deref()).await {
                    Ok(network) => network,
                    Err(wire_error) => {
                        self.respond(&envelope.event_id, Err(wire_error)).await;
                        return Ok(None);
                    }
                };

                match wallet.sessions.get(host, &network.genesis_hash).await? {
                    Some(existing) => {
                        // Refresh usedAt without changing the grant
                        let touched = wallet
                            .sessions
                            .upsert(Session {
                                authorized_addresses: IndexSet::new(),
                                ..existing
                            })
                            .await?;
                        debug!("Origin {} already holds session {}", host, touched.id);

                        let response = self.enable_response(&touched).await?;
                        self.respond(&envelope.event_id, Ok(response)).await;
                        Ok(None)
                    }
                    None => Ok(Some(RequestState::AwaitingUserDecision)),
                }
            }
            Request::SignBytes { signer, .. } => {
                let authorized = wallet.sessions.authorized_addresses_for_origin(host).await?;
                if authorized.is_empty() {
                    return Ok(Some(RequestState::AwaitingAuthorization));
                }

                if let Some(signer) = signer {
                    if !authorized.contains(signer) {
                        self.respond(
                            &envelope.event_id,
                            Err(WireError::unauthorized_signer(format!(
                                "{} is not authorized for {}",
                                signer, host
                            ))),
                        )
                        .await;
                        return Ok(None);
                    }
                }
                Ok(Some(RequestState::AwaitingUserDecision))
            }
            Request::SignTxns { .. } => {
                let authorized = wallet.sessions.authorized_addresses_for_origin(host).await?;
                if authorized.is_empty() {
                    Ok(Some(RequestState::AwaitingAuthorization))
                } else {
                    Ok(Some(RequestState::AwaitingUserDecision))
                }
            }
        }
    }

    async fn resolve_network(
        &self,
        genesis_hash: &str,
        genesis_id: Option<&str>,
    ) -> std::result::Result<Network, WireError> {
        let settings = self.inner.wallet.settings().await;
        let network = settings
            .network(genesis_hash)
            .cloned()
            .ok_or_else(|| WireError::invalid_input(format!("unsupported network {}", genesis_hash)))?;

        if let Some(genesis_id) = genesis_id {
            if genesis_id != network.genesis_id {
                return Err(WireError::invalid_input(format!(
                    "genesisId {} does not match genesisHash {}",
                    genesis_id, genesis_hash
                )));
            }
        }
        Ok(network)
    }

    /// Park a request until the user decides, arming its timeout
    async fn await_decision(&self, event_id: &str, state: RequestState) {
        let snapshot = {
            let mut table = self.inner.table.lock().await;
            let Some(entry) = table.pending.get_mut(event_id) else {
                return;
            };

            entry.state = state;
            entry.busy = false;
            if entry.expired {
                None
            } else {
                if entry.timeout.is_none() {
                    entry.timeout = Some(self.spawn_timeout(event_id.to_string()));
                }
                Some(entry.snapshot())
            }
        };

        match snapshot {
            Some(snapshot) => {
                debug!("Request {} is {:?}", event_id, state);
                let _ = self.inner.events.send(DispatcherEvent::Pending(snapshot));
            }
            None => self.cancel(event_id, "request was cancelled").await,
        }
    }

    fn spawn_timeout(&self, event_id: String) -> JoinHandle<()> {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let timeout = self.inner.timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = inner.upgrade() {
                RequestDispatcher { inner }.expire(&event_id).await;
            }
        })
    }

    async fn expire(&self, event_id: &str) {
        {
            let mut table = self.inner.table.lock().await;
            let Some(entry) = table.pending.get_mut(event_id) else {
                return;
            };
            // The timeout task is finishing; do not abort it from respond()
            entry.timeout = None;
            if entry.busy {
                entry.expired = true;
                return;
            }
        }

        debug!("Request {} timed out", event_id);
        self.cancel(event_id, "the request timed out").await;
    }

    /// Cancel every pending request from a closed tab
    pub async fn cancel_tab(&self, tab_id: u64) -> usize {
        let idle: Vec<String> = {
            let mut table = self.inner.table.lock().await;
            let mut idle = Vec::new();
            for (event_id, entry) in table.pending.iter_mut() {
                if entry.envelope.tab_id != Some(tab_id) {
                    continue;
                }
                if entry.busy {
                    entry.expired = true;
                } else {
                    idle.push(event_id.clone());
                }
            }
            idle
        };

        for event_id in &idle {
            self.cancel(event_id, "the tab was closed").await;
        }

        debug!("Cancelled {} requests for closed tab {}", idle.len(), tab_id);
        idle.len()
    }

    /// Apply a user decision to a pending request
    pub async fn decide(&self, event_id: &str, decision: Decision) -> Result<DecisionOutcome> {
        let (envelope, state) = {
            let mut table = self.inner.table.lock().await;
            if table.responded.contains(event_id) {
                return Err(DispatchError::AlreadyResponded(event_id.to_string()));
            }
            let entry = table
                .pending
                .get_mut(event_id)
                .ok_or_else(|| DispatchError::UnknownRequest(event_id.to_string()))?;
            if entry.busy {
                return Err(DispatchError::Busy(event_id.to_string()));
            }

            match &decision {
                Decision::Deny { .. } | Decision::Cancel => {}
                _ => entry.busy = true,
            }
            (entry.envelope.clone(), entry.state)
        };

        debug!("Decision {:?} for request {}", decision, event_id);

        match decision {
            Decision::Deny { reason } => {
                let message = match reason {
                    Some(reason) => format!("the user denied the request: {}", reason),
                    None => "the user denied the request".to_string(),
                };
                self.respond(event_id, Err(WireError::canceled(message))).await;
                Ok(DecisionOutcome::Responded)
            }
            Decision::Cancel => {
                self.cancel(event_id, "the user cancelled the request").await;
                Ok(DecisionOutcome::Responded)
            }
            Decision::Authorize { addresses } => {
                let result = self.authorize(&envelope, state, addresses).await;
                self.settle(event_id, result).await
            }
            Decision::Sign { signer, password } => {
                let result = self.sign(&envelope, state, &signer, &password).await;
                self.settle(event_id, result).await
            }
        }
    }

    /// Resolve the outcome of a decision that ran outside the table lock
    async fn settle(
        &self,
        event_id: &str,
        result: Result<Step>,
    ) -> Result<DecisionOutcome> {
        match result {
            Ok(Step::Respond(response)) => {
                if self.is_expired(event_id).await {
                    self.cancel(event_id, "request was cancelled").await;
                } else {
                    self.respond(event_id, response).await;
                }
                Ok(DecisionOutcome::Responded)
            }
            Ok(Step::Await(state)) => {
                self.await_decision(event_id, state).await;
                Ok(DecisionOutcome::Authorized)
            }
            // Recoverable: the request stays open for another decision
            Err(e @ (DispatchError::InvalidPassword | DispatchError::InvalidDecision(_))) => {
                let state = self.current_state(event_id).await;
                if let Some(state) = state {
                    self.await_decision(event_id, state).await;
                }
                Err(e)
            }
            Err(e) => {
                error!("Request {} failed: {}", event_id, e);
                self.respond(event_id, Err(WireError::unknown())).await;
                Ok(DecisionOutcome::Responded)
            }
        }
    }

    async fn is_expired(&self, event_id: &str) -> bool {
        let table = self.inner.table.lock().await;
        table.pending.get(event_id).is_some_and(|entry| entry.expired)
    }

    async fn current_state(&self, event_id: &str) -> Option<RequestState> {
        let table = self.inner.table.lock().await;
        table.pending.get(event_id).map(|entry| entry.state)
    }

    async fn authorize(
        &self,
        envelope: &RequestEnvelope,
        state: RequestState,
        addresses: Vec<Address>,
    ) -> Result<Step> {
        let wallet = &self.inner.wallet;

        let genesis_hash = match (&envelope.request, state) {
            (Request::Enable { genesis_hash, .. }, RequestState::AwaitingUserDecision) => {
                genesis_hash.clone()
            }
            (_, RequestState::AwaitingAuthorization) => {
                wallet.settings().await.selected_network_genesis_hash
            }
            _ => {
                return Err(DispatchError::InvalidDecision(
                    "this request is already authorized and needs a signing decision".to_string(),
                ))
            }
        };

        if addresses.is_empty() {
            return Err(DispatchError::InvalidDecision(
                "at least one address must be authorized".to_string(),
            ));
        }
        if let Request::SignBytes {
            signer: Some(signer),
            ..
        } = &envelope.request
        {
            if !addresses.contains(signer) {
                return Err(DispatchError::InvalidDecision(format!(
                    "the request must be signed by {}, which is not being authorized",
                    signer
                )));
            }
        }
        for address in &addresses {
            if wallet.accounts.get_by_address(address).await?.is_none() {
                return Err(DispatchError::InvalidDecision(format!(
                    "{} is not an account in this wallet",
                    address
                )));
            }
        }

        let network = match self.resolve_network(&genesis_hash, None).await {
            Ok(network) => network,
            Err(wire_error) => return Ok(Step::Respond(Err(wire_error))),
        };

        let session = wallet
            .sessions
            .upsert(Session::new(
                &envelope.origin.host,
                envelope.origin.app_name.clone(),
                envelope.origin.icon_url.clone(),
                network.genesis_hash.clone(),
                network.genesis_id.clone(),
                addresses,
            )?)
            .await?;
        info!("Authorized {} for session {}", envelope.origin.host, session.id);

        match envelope.request {
            Request::Enable { .. } => Ok(Step::Respond(Ok(self.enable_response(&session).await?))),
            _ => Ok(Step::Await(RequestState::AwaitingUserDecision)),
        }
    }

    async fn sign(
        &self,
        envelope: &RequestEnvelope,
        state: RequestState,
        signer: &Address,
        password: &str,
    ) -> Result<Step> {
        if state != RequestState::AwaitingUserDecision {
            return Err(DispatchError::InvalidDecision(
                "the origin must be authorized before signing".to_string(),
            ));
        }

        let payloads: Vec<SigningPayload<'_>> = match &envelope.request {
            Request::Enable { .. } => {
                return Err(DispatchError::InvalidDecision(
                    "enable requests are approved with an authorization".to_string(),
                ))
            }
            Request::SignBytes {
                data,
                signer: requested,
            } => {
                if let Some(requested) = requested.as_ref().filter(|r| *r != signer) {
                    return Err(DispatchError::InvalidDecision(format!(
                        "the request must be signed by {}",
                        requested
                    )));
                }
                vec![SigningPayload::Bytes(data)]
            }
            Request::SignTxns { txns } => txns.iter().map(|t| SigningPayload::Transaction(t)).collect(),
        };

        let authorized = self
            .inner
            .wallet
            .sessions
            .authorized_addresses_for_origin(&envelope.origin.host)
            .await?;
        if !authorized.contains(signer) {
            return Err(DispatchError::InvalidDecision(format!(
                "{} is not authorized for {}",
                signer, envelope.origin.host
            )));
        }

        let signatures = match self.inner.wallet.sign(signer, password, &payloads).await {
            Ok(signatures) => signatures,
            Err(e) if e.is_credential_error() => {
                debug!("Wrong password for request {}", envelope.event_id);
                return Err(DispatchError::InvalidPassword);
            }
            Err(WalletError::NotFound(what)) => {
                return Err(DispatchError::InvalidDecision(format!("{} not found", what)))
            }
            Err(e) => return Err(e.into()),
        };

        let response = match envelope.request {
            Request::SignBytes { .. } => serde_json::to_value(SignBytesResponse {
                encoded_signature: signatures
                    .first()
                    .map(|s| base64_encode(s))
                    .unwrap_or_default(),
            }),
            _ => serde_json::to_value(SignTxnsResponse {
                stxns: signatures.iter().map(|s| base64_encode(s)).collect(),
            }),
        }
        .map_err(WalletError::from)?;

        info!("Signed request {} with {}", envelope.event_id, signer);
        Ok(Step::Respond(Ok(response)))
    }

    async fn enable_response(&self, session: &Session) -> std::result::Result<Value, WalletError> {
        let mut accounts = Vec::with_capacity(session.authorized_addresses.len());
        for address in &session.authorized_addresses {
            let name = self
                .inner
                .wallet
                .accounts
                .get_by_address(address)
                .await?
                .and_then(|account| account.name);
            accounts.push(WalletAccount {
                address: address.clone(),
                name,
            });
        }

        Ok(serde_json::to_value(EnableResponse {
            accounts,
            genesis_hash: session.genesis_hash.clone(),
            genesis_id: session.genesis_id.clone(),
            session_id: session.id.to_string(),
        })?)
    }

    async fn cancel(&self, event_id: &str, reason: &str) {
        self.respond(event_id, Err(WireError::canceled(reason))).await;
    }

    /// Send the one response for `event_id`; later calls are no-ops
    async fn respond(&self, event_id: &str, outcome: std::result::Result<Value, WireError>) -> bool {
        let entry = {
            let mut table = self.inner.table.lock().await;
            let Some(entry) = table.pending.remove(event_id) else {
                return false;
            };
            remember(&mut table, event_id);
            entry
        };

        if let Some(timeout) = entry.timeout {
            timeout.abort();
        }

        let error_code = outcome.as_ref().err().map(|e| e.code);
        let message = match outcome {
            Ok(payload) => entry.envelope.respond(payload),
            Err(error) => {
                if error.code == ErrorCode::OperationCanceledError {
                    debug!("Request {} cancelled: {}", event_id, error.message);
                }
                entry.envelope.fail(error)
            }
        };

        self.deliver(message).await;
        let _ = self.inner.events.send(DispatcherEvent::Resolved {
            event_id: event_id.to_string(),
            error: error_code,
        });
        true
    }

    async fn deliver(&self, message: Message) {
        let event_id = message.event_id.clone();
        if let Err(e) = self.inner.transport.send(message).await {
            match e {
                TransportError::Closed => warn!("Page for request {} is gone", event_id),
                e => error!("Failed to send response for {}: {}", event_id, e),
            }
        }
    }
}

fn remember(table: &mut Table, event_id: &str) {
    table.responded.insert(event_id.to_string());
    if table.responded.len() > RESPONDED_HISTORY {
        table.responded.shift_remove_index(0);
    }
}
