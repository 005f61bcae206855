//! Worker host runtime: drives the install phase and routes requests.
//!
//! [`WorkerHost`] sits between the gateway and the event dispatcher. At
//! startup it delivers the install event and awaits every future the
//! listeners parked on it; once all of them succeed the host flips to
//! installed and starts routing requests through the fetch listeners.
//! Until then every request is forwarded straight to the origin, so a cold
//! or failing precache never blocks the gateway.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{OfflineError, Result};
use crate::events::{EventDispatcher, FetchDispatch};
use crate::fetch::FetchClient;
use crate::health::{HealthRegistry, HealthStatus};
use crate::http::{Request, Response};

/// Name of the health check the host maintains for the install phase.
pub const WORKER_CHECK: &str = "worker";

/// Host-side runtime for the offline worker.
pub struct WorkerHost {
    dispatcher: Arc<EventDispatcher>,
    client: Arc<dyn FetchClient>,
    installed: AtomicBool,
    retry_secs: u64,
    max_attempts: u64,
    health: Option<HealthRegistry>,
}

impl WorkerHost {
    pub fn new(dispatcher: Arc<EventDispatcher>, client: Arc<dyn FetchClient>) -> Self {
        Self {
            dispatcher,
            client,
            installed: AtomicBool::new(false),
            retry_secs: 30,
            max_attempts: 0,
            health: None,
        }
    }

    /// Set the retry backoff and attempt cap for [`Self::install_with_retry`].
    /// `max_attempts` of 0 means retry forever.
    pub fn with_retry_policy(mut self, retry_secs: u64, max_attempts: u64) -> Self {
        self.retry_secs = retry_secs;
        self.max_attempts = max_attempts;
        self
    }

    /// Report install progress to a health registry under the
    /// [`WORKER_CHECK`] name. The check itself must already be registered.
    pub fn with_health(mut self, registry: HealthRegistry) -> Self {
        self.health = Some(registry);
        self
    }

    /// Whether the install phase has completed successfully.
    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    /// Run the install phase once.
    ///
    /// Dispatches the install event and awaits every future the listeners
    /// registered, in order. All must succeed; the first failure aborts and
    /// leaves the host uninstalled. With no listeners the install completes
    /// trivially.
    pub async fn install_once(&self) -> Result<()> {
        let pending = self.dispatcher.dispatch_install();
        let tasks = pending.len();
        for fut in pending {
            fut.await?;
        }
        self.installed.store(true, Ordering::SeqCst);
        info!(tasks, "Install phase complete");
        Ok(())
    }

    /// Run the install phase, retrying on failure until it succeeds, the
    /// attempt cap is reached, or `shutdown_rx` signals `true` during
    /// backoff.
    pub async fn install_with_retry(
        &self,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match self.install_once().await {
                Ok(()) => {
                    if let Some(ref registry) = self.health {
                        registry.update(
                            WORKER_CHECK,
                            HealthStatus::Ok,
                            Some(format!("precache complete (attempt {})", attempt)),
                        );
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Install attempt failed");
                    if let Some(ref registry) = self.health {
                        registry.bump_retry(WORKER_CHECK);
                        registry.set_error(WORKER_CHECK, &e.to_string());
                    }
                    if self.max_attempts > 0 && attempt >= self.max_attempts {
                        return Err(OfflineError::Install(format!(
                            "giving up after {} attempts: {}",
                            attempt, e
                        )));
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(self.retry_secs)) => {}
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                return Err(OfflineError::Install(
                                    "install cancelled by shutdown".to_string(),
                                ));
                            }
                        }
                    }
                }
            }
        }
    }

    /// Route one intercepted request.
    ///
    /// Before the install phase completes, requests bypass the fetch
    /// listeners entirely and go straight to the origin. After install,
    /// the fetch event is dispatched: a claimed request resolves through
    /// the listener's future, an unclaimed one falls back to the origin.
    pub async fn handle_request(&self, request: Request) -> Result<Response> {
        if !self.is_installed() {
            debug!(url = %request.url, "Forwarding request, install not complete");
            return self.client.fetch(&request).await;
        }
        match self.dispatcher.dispatch_fetch(request) {
            FetchDispatch::Claimed(fut) => fut.await,
            FetchDispatch::Unclaimed(request) => {
                debug!(url = %request.url, "No listener claimed request, forwarding to origin");
                self.client.fetch(&request).await
            }
        }
    }
}
