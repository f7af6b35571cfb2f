//! Background polling of account information

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::directory::AccountDirectory;
use crate::network::Network;

/// Handle to a running refresh loop
///
/// Refreshes are fire-and-forget. The loop lives as long as the handle:
/// dropping it or calling `stop()` ends polling and cancels a refresh in
/// flight.
pub struct AccountRefresher {
    online: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AccountRefresher {
    /// Start refreshing every `interval`, staggering accounts by `request_delay`
    pub fn start(
        directory: Arc<AccountDirectory>,
        network: Network,
        interval: Duration,
        request_delay: Duration,
    ) -> Self {
        let (online, mut online_rx) = watch::channel(true);

        let task = tokio::spawn(async move {
            loop {
                if *online_rx.borrow_and_update() {
                    tokio::select! {
                        result = directory.refresh_all(&network, request_delay) => {
                            if let Err(e) = result {
                                warn!("Account refresh failed: {}", e);
                            }
                        }
                        offline = online_rx.wait_for(|online| !*online) => {
                            if offline.is_err() {
                                debug!("Refresher handle dropped, stopping");
                                break;
                            }
                            debug!("Network went offline, cancelling account refresh");
                        }
                    }
                } else {
                    debug!("Offline, skipping account refresh");
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = online_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self { online, task }
    }

    /// Switch network mode; going offline cancels an in-flight refresh
    pub fn set_online(&self, online: bool) {
        self.online.send_replace(online);
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Stop polling
    pub fn stop(self) {
        self.task.abort();
    }
}
