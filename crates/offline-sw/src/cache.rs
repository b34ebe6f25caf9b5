//! Cache storage: named buckets of request → response snapshots.

use async_trait::async_trait;
use hashbrown::HashMap;
use http::Method;
use offline_net::{Request, Response};
use tokio::sync::RwLock;
use tracing::trace;
use url::Url;

use crate::Result;

// ==================== Request Key ====================

/// Key under which a response is stored: the request URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
    /// Key for a URL.
    pub fn from_url(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(url.into())
    }

    /// Key for a request. Only `GET` requests are cacheable.
    pub fn for_request(request: &Request) -> Option<Self> {
        (request.method == Method::GET).then(|| Self::from_url(&request.url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ==================== Cache ====================

/// A cached request/response pair. Never mutated once stored.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: RequestKey,
    pub response: Response,
}

impl CacheEntry {
    pub fn new(key: RequestKey, response: Response) -> Self {
        Self { key, response }
    }
}

/// A single named bucket.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request key.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Store an entry, replacing any previous one under the same key.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Get all keys.
    pub fn keys(&self) -> Vec<&RequestKey> {
        self.entries.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Store ====================

/// Host cache storage as seen by the worker.
///
/// Every operation is atomic on its own; the worker never holds a bucket
/// across operations.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Open a bucket, creating it if absent.
    async fn open(&self, name: &str) -> Result<()>;

    /// Check if a bucket exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Delete a bucket. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// All bucket names.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Store one response, creating the bucket if absent.
    async fn put(&self, name: &str, key: RequestKey, response: Response) -> Result<()>;

    /// Store a batch of responses as a single write.
    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, Response)>) -> Result<()>;

    /// Look up a key in one bucket.
    async fn match_in(&self, name: &str, key: &RequestKey) -> Result<Option<Response>>;

    /// Look up a key across all buckets; the first hit wins.
    async fn match_request(&self, key: &RequestKey) -> Result<Option<Response>>;

    /// Keys stored in one bucket.
    async fn bucket_keys(&self, name: &str) -> Result<Vec<RequestKey>>;
}

/// In-memory cache storage.
///
/// Buckets are searched in creation order by [`CacheStore::match_request`].
#[derive(Debug, Default)]
pub struct CacheStorage {
    inner: RwLock<Buckets>,
}

#[derive(Debug, Default)]
struct Buckets {
    caches: HashMap<String, Cache>,
    order: Vec<String>,
}

impl Buckets {
    fn open(&mut self, name: &str) -> &mut Cache {
        if !self.caches.contains_key(name) {
            trace!(bucket = %name, "Creating cache bucket");
            self.order.push(name.to_string());
        }
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a bucket, if it exists.
    pub async fn bucket_len(&self, name: &str) -> Option<usize> {
        self.inner.read().await.caches.get(name).map(Cache::len)
    }
}

#[async_trait]
impl CacheStore for CacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        self.inner.write().await.open(name);
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.inner.read().await.caches.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut buckets = self.inner.write().await;
        buckets.order.retain(|n| n != name);
        Ok(buckets.caches.remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().await.order.clone())
    }

    async fn put(&self, name: &str, key: RequestKey, response: Response) -> Result<()> {
        self.inner
            .write()
            .await
            .open(name)
            .put(CacheEntry::new(key, response));
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, Response)>) -> Result<()> {
        let mut buckets = self.inner.write().await;
        let cache = buckets.open(name);
        for (key, response) in entries {
            cache.put(CacheEntry::new(key, response));
        }
        Ok(())
    }

    async fn match_in(&self, name: &str, key: &RequestKey) -> Result<Option<Response>> {
        let buckets = self.inner.read().await;
        Ok(buckets
            .caches
            .get(name)
            .and_then(|cache| cache.match_request(key))
            .map(|entry| entry.response.clone()))
    }

    async fn match_request(&self, key: &RequestKey) -> Result<Option<Response>> {
        let buckets = self.inner.read().await;
        for name in &buckets.order {
            if let Some(entry) = buckets
                .caches
                .get(name)
                .and_then(|cache| cache.match_request(key))
            {
                trace!(bucket = %name, key = %key, "Cache hit");
                return Ok(Some(entry.response.clone()));
            }
        }
        Ok(None)
    }

    async fn bucket_keys(&self, name: &str) -> Result<Vec<RequestKey>> {
        let buckets = self.inner.read().await;
        Ok(buckets
            .caches
            .get(name)
            .map(|cache| cache.keys().into_iter().cloned().collect())
            .unwrap_or_default())
    }
}
