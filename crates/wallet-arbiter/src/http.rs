//! HTTP/SSE approval surface for the wallet UI
//!
//! Bound to loopback only. Every request must name the loopback host and
//! port in `Host`, carry no `Origin` other than an allowed UI origin, and
//! present the per-launch bearer token. No CORS layer is installed.

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::dispatcher::{Decision, DecisionOutcome, PendingRequest, RequestDispatcher};
use crate::error::DispatchError;

/// Who may talk to the approval surface
#[derive(Clone)]
pub struct AccessPolicy {
    port: u16,
    token: Arc<str>,
    allowed_origins: Arc<[String]>,
}

impl AccessPolicy {
    /// Policy for `port` with a caller-supplied token
    pub fn new(port: u16, token: impl Into<String>) -> Self {
        Self {
            port,
            token: Arc::from(token.into()),
            allowed_origins: Arc::from(Vec::new()),
        }
    }

    /// Policy for `port` with a fresh random token
    pub fn generate(port: u16) -> Self {
        Self::new(port, hex::encode(rand::random::<[u8; 32]>()))
    }

    /// Accept requests whose `Origin` is the wallet UI's
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        let mut origins = self.allowed_origins.to_vec();
        origins.push(origin.into().trim_end_matches('/').to_ascii_lowercase());
        self.allowed_origins = Arc::from(origins);
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The bearer token the UI must present
    pub fn token(&self) -> &str {
        &self.token
    }

    fn host_allowed(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        host == format!("127.0.0.1:{}", self.port) || host == format!("localhost:{}", self.port)
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        let origin = origin.trim_end_matches('/').to_ascii_lowercase();
        self.allowed_origins.iter().any(|allowed| *allowed == origin)
    }

    fn token_matches(&self, presented: &str) -> bool {
        let expected = self.token.as_bytes();
        let presented = presented.as_bytes();
        if expected.len() != presented.len() {
            return false;
        }
        expected
            .iter()
            .zip(presented)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    /// Status to refuse `headers` with, if any
    fn check(&self, headers: &HeaderMap) -> Option<(StatusCode, &'static str)> {
        let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
        if !host.is_some_and(|host| self.host_allowed(host)) {
            return Some((StatusCode::FORBIDDEN, "host not allowed"));
        }

        if let Some(origin) = headers.get(header::ORIGIN) {
            let allowed = origin.to_str().is_ok_and(|origin| self.origin_allowed(origin));
            if !allowed {
                return Some((StatusCode::FORBIDDEN, "origin not allowed"));
            }
        }

        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if !token.is_some_and(|token| self.token_matches(token)) {
            return Some((StatusCode::UNAUTHORIZED, "missing or invalid token"));
        }

        None
    }
}

impl fmt::Debug for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessPolicy")
            .field("port", &self.port)
            .field("token", &"[REDACTED]")
            .field("allowed_origins", &self.allowed_origins)
            .finish()
    }
}

/// HTTP approval surface
pub struct ApprovalServer {
    dispatcher: RequestDispatcher,
    policy: AccessPolicy,
}

impl ApprovalServer {
    pub fn new(dispatcher: RequestDispatcher, policy: AccessPolicy) -> Self {
        Self { dispatcher, policy }
    }

    /// Build the router
    pub fn router(dispatcher: RequestDispatcher, policy: AccessPolicy) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/requests", get(list_requests))
            .route("/requests/:event_id/decision", post(decide))
            .route("/tabs/:tab_id/cancel", post(cancel_tab))
            .route("/events", get(events))
            .layer(middleware::from_fn_with_state(policy, enforce_policy))
            .layer(TraceLayer::new_for_http())
            .with_state(dispatcher)
    }

    /// Run the HTTP server
    pub async fn run(&self) -> std::io::Result<()> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.policy.port()));
        info!("Starting approval server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            Self::router(self.dispatcher.clone(), self.policy.clone()),
        )
        .await
    }
}

type ApiError = (StatusCode, Json<serde_json::Value>);

async fn enforce_policy(
    State(policy): State<AccessPolicy>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some((status, reason)) = policy.check(request.headers()) {
        warn!(
            "Refused {} {}: {}",
            request.method(),
            request.uri().path(),
            reason
        );
        return Err((status, Json(json!({ "error": reason }))));
    }
    Ok(next.run(request).await)
}

fn api_error(error: DispatchError) -> ApiError {
    let status = match &error {
        DispatchError::UnknownRequest(_) => StatusCode::NOT_FOUND,
        DispatchError::AlreadyResponded(_)
        | DispatchError::DuplicateRequest(_)
        | DispatchError::Busy(_) => StatusCode::CONFLICT,
        DispatchError::InvalidPassword => StatusCode::UNAUTHORIZED,
        DispatchError::InvalidDecision(_) | DispatchError::MalformedMessage(_) => {
            StatusCode::BAD_REQUEST
        }
        DispatchError::Wallet(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let message = match &error {
        DispatchError::Wallet(e) => {
            warn!("Wallet error while deciding: {}", e);
            "internal error".to_string()
        }
        other => other.to_string(),
    };

    (status, Json(json!({ "error": message })))
}

/// Health check endpoint
async fn health() -> &'static str {
    "OK"
}

async fn list_requests(State(dispatcher): State<RequestDispatcher>) -> Json<Vec<PendingRequest>> {
    Json(dispatcher.pending().await)
}

async fn decide(
    State(dispatcher): State<RequestDispatcher>,
    Path(event_id): Path<String>,
    Json(decision): Json<Decision>,
) -> Result<Json<serde_json::Value>, ApiError> {
    debug!("Decision for {}: {:?}", event_id, decision);

    let outcome: DecisionOutcome = dispatcher
        .decide(&event_id, decision)
        .await
        .map_err(api_error)?;
    Ok(Json(json!({ "outcome": outcome })))
}

async fn cancel_tab(
    State(dispatcher): State<RequestDispatcher>,
    Path(tab_id): Path<u64>,
) -> Json<serde_json::Value> {
    let cancelled = dispatcher.cancel_tab(tab_id).await;
    Json(json!({ "cancelled": cancelled }))
}

/// Stream dispatcher events as Server-Sent Events
async fn events(
    State(dispatcher): State<RequestDispatcher>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("SSE connection established");
    let mut receiver = dispatcher.subscribe();

    let stream = async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(event) => match Event::default().json_data(&event) {
                    Ok(event) => yield Ok(event),
                    Err(e) => warn!("Failed to encode event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SSE client lagged, {} events skipped", skipped);
                    yield Ok(Event::default().event("lagged").data(skipped.to_string()));
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
