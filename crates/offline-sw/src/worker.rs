//! A single worker version and its lifecycle state machine.
//!
//! ```text
//! Parsed → Installing → Installed → Activating → Activated
//!               │            │
//!               └────────────┴──→ Redundant
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use offline_net::{Fetcher, Origin};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace};
use url::Url;

use crate::cache::{CacheStore, RequestKey};
use crate::clients::{ClientMatchOptions, ClientRegistry, ClientType};
use crate::config::WorkerConfig;
use crate::intercept::{FetchEvent, FetchOutcome, RequestInterceptor};
use crate::lifecycle::{self, CleanupReport, InstallReport};
use crate::{Result, ServiceWorkerError};

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Initial state, not yet installing.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and handling fetches.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

impl ServiceWorkerState {
    /// Only an activated worker intercepts fetches.
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, ServiceWorkerState::Activated)
    }
}

impl std::fmt::Display for ServiceWorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServiceWorkerState::Parsed => "parsed",
            ServiceWorkerState::Installing => "installing",
            ServiceWorkerState::Installed => "installed",
            ServiceWorkerState::Activating => "activating",
            ServiceWorkerState::Activated => "activated",
            ServiceWorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Service worker events.
#[derive(Debug, Clone)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// A client is now controlled by a different worker.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
    /// Message received from a client.
    Message {
        worker_id: ServiceWorkerId,
        data: JsonValue,
    },
}

/// Host capabilities shared by every worker version of a scope.
#[derive(Clone)]
pub struct WorkerContext {
    /// Cache storage.
    pub caches: Arc<dyn CacheStore>,

    /// Clients.
    pub clients: Arc<dyn ClientRegistry>,

    /// Live network.
    pub network: Arc<dyn Fetcher>,

    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl WorkerContext {
    /// Create a context and the receiving end of its event channel.
    pub fn new(
        caches: Arc<dyn CacheStore>,
        clients: Arc<dyn ClientRegistry>,
        network: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                caches,
                clients,
                network,
                event_tx,
            },
            event_rx,
        )
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        // The host may have dropped its receiver; events are advisory.
        let _ = self.event_tx.send(event);
    }
}

/// One version of the offline worker.
pub struct ServiceWorker {
    id: ServiceWorkerId,
    script_url: Url,
    origin: Origin,
    config: Arc<WorkerConfig>,
    state: watch::Sender<ServiceWorkerState>,
    skip_waiting: AtomicBool,
    context: WorkerContext,
    interceptor: RequestInterceptor,
}

impl ServiceWorker {
    /// Create a worker for `script_url`. The worker's origin is the script's.
    pub fn new(script_url: Url, config: WorkerConfig, context: WorkerContext) -> Result<Self> {
        config.validate(&script_url)?;

        let origin = Origin::from_url(&script_url);
        if origin.is_opaque() {
            return Err(ServiceWorkerError::Security(format!(
                "script URL {} has an opaque origin",
                script_url
            )));
        }

        let mut interceptor = RequestInterceptor::new(
            origin.clone(),
            config.progressive_bucket.clone(),
            Arc::clone(&context.caches),
            Arc::clone(&context.network),
        );
        if let Some(fallback) = config.resolve_fallback(&script_url)? {
            interceptor = interceptor.with_offline_fallback(RequestKey::from_url(&fallback));
        }

        let (state, _) = watch::channel(ServiceWorkerState::Parsed);

        Ok(Self {
            id: ServiceWorkerId::new(),
            script_url,
            origin,
            config: Arc::new(config),
            state,
            skip_waiting: AtomicBool::new(false),
            context,
            interceptor,
        })
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn script_url(&self) -> &Url {
        &self.script_url
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> ServiceWorkerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServiceWorkerState> {
        self.state.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.state() == ServiceWorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state() == ServiceWorkerState::Redundant
    }

    /// Whether the worker asked to skip the waiting state.
    pub fn wants_skip_waiting(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    /// Run the install phase: precache every configured asset.
    ///
    /// On failure the worker becomes redundant and the error is returned so
    /// the host can retry installation from scratch later.
    pub async fn install(&self) -> Result<InstallReport> {
        self.transition(ServiceWorkerState::Parsed, ServiceWorkerState::Installing)?;
        info!(worker = %self.id, version = %self.config.version, "Installing");

        let result = lifecycle::precache(
            &self.config,
            &self.script_url,
            self.context.caches.as_ref(),
            self.context.network.as_ref(),
        )
        .await;

        match result {
            Ok(report) => {
                if self.config.skip_waiting {
                    self.skip_waiting.store(true, Ordering::Release);
                }
                self.set_state(ServiceWorkerState::Installed);
                Ok(report)
            }
            Err(e) => {
                error!(
                    worker = %self.id,
                    version = %self.config.version,
                    error = %e,
                    "An error occurred during install"
                );
                self.set_state(ServiceWorkerState::Redundant);
                Err(e)
            }
        }
    }

    /// Run the activate phase: delete stale buckets, optionally claim clients.
    ///
    /// Cleanup failures are reported, never fatal; the worker always ends up
    /// activated once this returns `Ok`.
    pub async fn activate(&self) -> Result<CleanupReport> {
        self.transition(ServiceWorkerState::Installed, ServiceWorkerState::Activating)?;

        let clients = self
            .context
            .clients
            .match_all(
                self.id,
                ClientMatchOptions {
                    include_uncontrolled: true,
                    client_type: ClientType::All,
                },
            )
            .await;
        let urls: Vec<&str> = clients.iter().map(|c| c.url.as_str()).collect();
        debug!(worker = %self.id, clients = %urls.join(", "), "Matching clients");

        let report = lifecycle::cleanup(self.context.caches.as_ref(), &self.config.allow_list()).await;

        if self.config.claim_clients {
            self.claim().await;
        }

        self.set_state(ServiceWorkerState::Activated);
        info!(
            worker = %self.id,
            version = %self.config.version,
            "Version active, now ready to handle fetches"
        );

        Ok(report)
    }

    async fn claim(&self) {
        match self.context.clients.claim(self.id, &self.origin).await {
            Ok(claimed) => {
                info!(worker = %self.id, count = claimed.len(), "Claiming clients for new version");
                for client_id in claimed {
                    self.context.emit(ServiceWorkerEvent::ControllerChange {
                        client_id,
                        worker_id: self.id,
                    });
                }
            }
            Err(e) => error!(worker = %self.id, error = %e, "Failed to claim clients"),
        }
    }

    /// Handle a fetch event. A worker that is not active never intercepts.
    pub async fn handle_fetch(&self, event: FetchEvent) -> Result<FetchOutcome> {
        if !self.state().can_intercept_fetch() {
            trace!(worker = %self.id, state = %self.state(), "Worker not active, not intercepting");
            return Ok(FetchOutcome::Passthrough(event.request));
        }
        self.interceptor.handle(event).await
    }

    /// Handle a message from a client. Only logged and forwarded to the host.
    pub fn handle_message(&self, data: JsonValue) {
        info!(worker = %self.id, data = %data, "Received message");
        self.context.emit(ServiceWorkerEvent::Message {
            worker_id: self.id,
            data,
        });
    }

    /// Mark the worker redundant (superseded or unregistered).
    pub(crate) fn retire(&self) {
        if !self.is_redundant() {
            debug!(worker = %self.id, "Worker retired");
            self.set_state(ServiceWorkerState::Redundant);
        }
    }

    fn transition(&self, from: ServiceWorkerState, to: ServiceWorkerState) -> Result<()> {
        let mut actual = from;
        let changed = self.state.send_if_modified(|state| {
            actual = *state;
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });

        if !changed {
            return Err(ServiceWorkerError::State(format!(
                "cannot move to {} from {} (expected {})",
                to, actual, from
            )));
        }

        self.context.emit(ServiceWorkerEvent::StateChange {
            worker_id: self.id,
            new_state: to,
        });
        Ok(())
    }

    fn set_state(&self, state: ServiceWorkerState) {
        self.state.send_replace(state);
        self.context.emit(ServiceWorkerEvent::StateChange {
            worker_id: self.id,
            new_state: state,
        });
    }
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("script_url", &self.script_url.as_str())
            .field("version", &self.config.version)
            .field("state", &self.state())
            .finish()
    }
}
