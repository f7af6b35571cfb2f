//! Main arbiter orchestration

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::dispatcher::RequestDispatcher;
use crate::error::TransportError;
use crate::http::{AccessPolicy, ApprovalServer};
use crate::transport::Transport;
use wallet_core::Wallet;

/// Arbiter: pumps page messages into the dispatcher and serves the UI
pub struct ArbiterServer {
    dispatcher: RequestDispatcher,
    transport: Arc<dyn Transport>,
    approval: Option<AccessPolicy>,
}

impl ArbiterServer {
    /// Create an arbiter answering through `transport`
    pub async fn new(wallet: Arc<Wallet>, transport: Arc<dyn Transport>) -> Self {
        let timeout = wallet.settings().await.request_timeout();
        let dispatcher = RequestDispatcher::new(wallet, transport.clone(), timeout);

        Self {
            dispatcher,
            transport,
            approval: None,
        }
    }

    /// Also serve the approval surface, guarded by `policy`
    pub fn with_approval(mut self, policy: AccessPolicy) -> Self {
        self.approval = Some(policy);
        self
    }

    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    /// Run until the page side closes the transport
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match &self.approval {
            Some(policy) => {
                let approval = ApprovalServer::new(self.dispatcher.clone(), policy.clone());
                tokio::select! {
                    result = self.pump() => result?,
                    result = approval.run() => result?,
                }
            }
            None => self.pump().await?,
        }

        info!("Arbiter stopped");
        Ok(())
    }

    async fn pump(&self) -> Result<(), TransportError> {
        while let Some(raw) = self.transport.recv().await? {
            let dispatcher = self.dispatcher.clone();
            // Each request is handled on its own task so a slow lookup never
            // holds up the next message
            tokio::spawn(async move {
                if let Err(e) = dispatcher.receive(raw).await {
                    warn!("Rejected inbound message: {}", e);
                }
            });
        }

        debug!("Transport closed");
        Ok(())
    }
}
