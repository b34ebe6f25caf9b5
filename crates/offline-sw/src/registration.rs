//! Registration: drives worker versions of one scope through install and
//! activation.

use std::sync::Arc;

use offline_net::Origin;
use tracing::{info, warn};
use url::Url;

use crate::intercept::{FetchEvent, FetchOutcome};
use crate::lifecycle::CleanupReport;
use crate::worker::{ServiceWorker, ServiceWorkerState};
use crate::{Result, ServiceWorkerError};

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    installing: Option<Arc<ServiceWorker>>,

    /// Waiting worker (installed but not active).
    waiting: Option<Arc<ServiceWorker>>,

    /// Active worker.
    active: Option<Arc<ServiceWorker>>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    pub fn installing(&self) -> Option<&Arc<ServiceWorker>> {
        self.installing.as_ref()
    }

    pub fn waiting(&self) -> Option<&Arc<ServiceWorker>> {
        self.waiting.as_ref()
    }

    pub fn active(&self) -> Option<&Arc<ServiceWorker>> {
        self.active.as_ref()
    }

    /// Install a new worker version.
    ///
    /// A failed install leaves the current active worker in place. A
    /// successful one activates right away if the worker skips waiting or
    /// nothing is active yet; otherwise it waits for [`Self::activate_waiting`].
    pub async fn update(&mut self, worker: Arc<ServiceWorker>) -> Result<ServiceWorkerState> {
        if !Origin::from_url(&self.scope).same_origin(worker.origin()) {
            return Err(ServiceWorkerError::Security(format!(
                "script {} is outside scope {}",
                worker.script_url(),
                self.scope
            )));
        }

        self.installing = Some(Arc::clone(&worker));

        let installed = worker.install().await;
        self.installing = None;

        if let Err(e) = installed {
            warn!(scope = %self.scope, error = %e, "Install failed, keeping current worker");
            return Err(e);
        }

        if let Some(superseded) = self.waiting.replace(Arc::clone(&worker)) {
            superseded.retire();
        }

        if worker.wants_skip_waiting() || self.active.is_none() {
            self.activate_waiting().await?;
        } else {
            info!(scope = %self.scope, worker = %worker.id(), "Installed, waiting for clients to close");
        }

        Ok(worker.state())
    }

    /// Activate the waiting worker, retiring the current active one.
    pub async fn activate_waiting(&mut self) -> Result<Option<CleanupReport>> {
        let Some(worker) = self.waiting.take() else {
            return Ok(None);
        };

        if let Some(old) = self.active.take() {
            old.retire();
        }

        let report = worker.activate().await?;
        self.active = Some(worker);
        Ok(Some(report))
    }

    /// Route a fetch to the active worker, if any.
    pub async fn handle_fetch(&self, event: FetchEvent) -> Result<FetchOutcome> {
        match self.active {
            Some(ref worker) => worker.handle_fetch(event).await,
            None => Ok(FetchOutcome::Passthrough(event.request)),
        }
    }

    /// Unregister, marking every worker redundant.
    pub fn unregister(&mut self) {
        for worker in [
            self.active.take(),
            self.waiting.take(),
            self.installing.take(),
        ]
        .into_iter()
        .flatten()
        {
            worker.retire();
        }
    }
}
