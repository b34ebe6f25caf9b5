//! Shared fakes for the worker integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};
use offline_net::{Fetcher, NetError, Request, Response};
use offline_sw::{
    CacheStorage, CacheStore, Clients, RequestKey, ServiceWorker, ServiceWorkerError,
    ServiceWorkerEvent, WorkerConfig, WorkerContext,
};
use tokio::sync::mpsc;
use url::Url;

pub const SCRIPT: &str = "https://example.com/service-worker.js";

pub fn url(path: &str) -> Url {
    Url::parse(SCRIPT).unwrap().join(path).unwrap()
}

pub fn key(path: &str) -> RequestKey {
    RequestKey::from_url(&url(path))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Scripted network with an online switch and per-URL failures.
#[derive(Default)]
pub struct MockNetwork {
    routes: Mutex<HashMap<String, (u16, String)>>,
    failing: Mutex<HashSet<String>>,
    offline: AtomicBool,
    calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, path: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url(path).to_string(), (status, body.to_string()));
    }

    pub fn fail(&self, path: &str) {
        self.failing.lock().unwrap().insert(url(path).to_string());
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_to(&self, path: &str) -> usize {
        let target = url(path).to_string();
        self.requested
            .lock()
            .unwrap()
            .iter()
            .filter(|u| **u == target)
            .count()
    }
}

#[async_trait]
impl Fetcher for MockNetwork {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let target = request.url.to_string();
        self.requested.lock().unwrap().push(target.clone());

        if self.offline.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&target) {
            return Err(NetError::RequestFailed(format!("network unreachable: {}", target)));
        }

        let (status, body) = self
            .routes
            .lock()
            .unwrap()
            .get(&target)
            .cloned()
            .unwrap_or((404, "not found".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert("x-served-by", HeaderValue::from_static("mock"));

        Ok(Response::new(
            request.url,
            StatusCode::from_u16(status).unwrap(),
            headers,
            Bytes::from(body),
        ))
    }
}

/// Cache storage whose deletes or single writes fail for chosen buckets.
#[derive(Default)]
pub struct FlakyStore {
    inner: CacheStorage,
    broken_deletes: HashSet<String>,
    broken_puts: HashSet<String>,
}

impl FlakyStore {
    pub fn failing_delete(names: &[&str]) -> Self {
        Self {
            broken_deletes: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn failing_put(names: &[&str]) -> Self {
        Self {
            broken_puts: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn open(&self, name: &str) -> offline_sw::Result<()> {
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> offline_sw::Result<bool> {
        self.inner.has(name).await
    }

    async fn delete(&self, name: &str) -> offline_sw::Result<bool> {
        if self.broken_deletes.contains(name) {
            return Err(ServiceWorkerError::Cache(format!("{} is locked", name)));
        }
        self.inner.delete(name).await
    }

    async fn keys(&self) -> offline_sw::Result<Vec<String>> {
        self.inner.keys().await
    }

    async fn put(&self, name: &str, key: RequestKey, response: Response) -> offline_sw::Result<()> {
        if self.broken_puts.contains(name) {
            return Err(ServiceWorkerError::Cache(format!("quota exceeded for {}", name)));
        }
        self.inner.put(name, key, response).await
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(RequestKey, Response)>,
    ) -> offline_sw::Result<()> {
        self.inner.put_all(name, entries).await
    }

    async fn match_in(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> offline_sw::Result<Option<Response>> {
        self.inner.match_in(name, key).await
    }

    async fn match_request(&self, key: &RequestKey) -> offline_sw::Result<Option<Response>> {
        self.inner.match_request(key).await
    }

    async fn bucket_keys(&self, name: &str) -> offline_sw::Result<Vec<RequestKey>> {
        self.inner.bucket_keys(name).await
    }
}

/// A worker environment over in-memory storage and a scripted network.
pub struct Harness {
    pub caches: Arc<dyn CacheStore>,
    pub clients: Arc<Clients>,
    pub network: Arc<MockNetwork>,
    pub context: WorkerContext,
    pub events: mpsc::UnboundedReceiver<ServiceWorkerEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(CacheStorage::new()))
    }

    pub fn with_store(caches: Arc<dyn CacheStore>) -> Self {
        init_tracing();

        let network = MockNetwork::new();
        network.route("/", 200, "<html>home</html>");
        network.route("/styles/styles.css", 200, "body { margin: 0 }");
        network.route("/script/main.js", 200, "main();");
        network.route("/offline.html", 200, "<html>offline</html>");
        network.route("/api/data.json", 200, r#"{"v":1}"#);

        let clients = Arc::new(Clients::new());
        let (context, events) = WorkerContext::new(
            Arc::clone(&caches),
            clients.clone() as Arc<dyn offline_sw::ClientRegistry>,
            network.clone() as Arc<dyn Fetcher>,
        );

        Self {
            caches,
            clients,
            network,
            context,
            events,
        }
    }

    pub fn worker(&self, config: WorkerConfig) -> Arc<ServiceWorker> {
        Arc::new(ServiceWorker::new(url(SCRIPT), config, self.context.clone()).unwrap())
    }

    /// A worker for `version` that has been installed and activated.
    pub async fn active_worker(&self, config: WorkerConfig) -> Arc<ServiceWorker> {
        let worker = self.worker(config);
        worker.install().await.unwrap();
        worker.activate().await.unwrap();
        worker
    }

    pub async fn bucket_names(&self) -> Vec<String> {
        let mut names = self.caches.keys().await.unwrap();
        names.sort();
        names
    }

    pub fn drain_events(&mut self) -> Vec<ServiceWorkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
