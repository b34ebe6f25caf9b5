//! Clients API: the pages a worker may control.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hashbrown::HashMap;
use offline_net::Origin;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::{Result, ServiceWorkerId};

/// A client (controlled page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Worker currently controlling this client.
    pub controller: Option<ServiceWorkerId>,
}

impl Client {
    /// A window with no controller.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            controller: None,
        }
    }
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// Options for `match_all`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Host view of open clients, injected into the worker.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Clients matching the options. Without `include_uncontrolled`, only
    /// clients controlled by `worker` are returned.
    async fn match_all(&self, worker: ServiceWorkerId, options: ClientMatchOptions)
        -> Vec<Client>;

    /// Make `worker` the controller of every client in `origin`.
    /// Returns the IDs of clients whose controller changed.
    async fn claim(&self, worker: ServiceWorkerId, origin: &Origin) -> Result<Vec<String>>;
}

/// In-memory client registry.
#[derive(Debug, Default)]
pub struct Clients {
    clients: RwLock<HashMap<String, Client>>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// Open a window.
    pub async fn open_window(&self, url: Url) -> Client {
        let client = Client::window(url);
        self.add(client.clone()).await;
        client
    }

    /// Add a client.
    pub async fn add(&self, client: Client) {
        self.clients.write().await.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub async fn remove(&self, id: &str) -> Option<Client> {
        self.clients.write().await.remove(id)
    }
}

#[async_trait]
impl ClientRegistry for Clients {
    async fn match_all(
        &self,
        worker: ServiceWorkerId,
        options: ClientMatchOptions,
    ) -> Vec<Client> {
        self.clients
            .read()
            .await
            .values()
            .filter(|c| options.include_uncontrolled || c.controller == Some(worker))
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .cloned()
            .collect()
    }

    async fn claim(&self, worker: ServiceWorkerId, origin: &Origin) -> Result<Vec<String>> {
        let mut clients = self.clients.write().await;
        let mut claimed = Vec::new();

        for client in clients.values_mut() {
            if origin.contains(&client.url) && client.controller != Some(worker) {
                client.controller = Some(worker);
                claimed.push(client.id.clone());
            }
        }

        debug!(worker = %worker, count = claimed.len(), "Claimed clients");
        Ok(claimed)
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
