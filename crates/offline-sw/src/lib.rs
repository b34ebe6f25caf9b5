//! # Offline Service Worker
//!
//! An offline-caching service worker: install-time precaching into a
//! versioned bucket, activation-time cleanup of stale buckets, and
//! cache-first request interception with progressive caching.
//!
//! ## Features
//!
//! - **Lifecycle**: install, activate, fetch, message events
//! - **Cache API**: named buckets of request → response snapshots
//! - **Clients API**: survey and claim controlled pages
//! - **Fetch Interception**: same-origin, cache-first, network fallback
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerRegistration (one scope)
//!     ├── installing (ServiceWorker)
//!     ├── waiting (ServiceWorker)
//!     └── active (ServiceWorker)
//!             ├── WorkerConfig (version, precache list, bucket names)
//!             ├── RequestInterceptor
//!             └── WorkerContext
//!                     ├── CacheStore   (caches)
//!                     ├── ClientRegistry (clients)
//!                     └── Fetcher      (network)
//!
//! CacheStore
//!     ├── <prefix>-v<version>   precache bucket
//!     └── progressive-cache     filled lazily on cache misses
//! ```
//!
//! Handlers never return before the cache and network work they started has
//! settled: install resolves only once the whole precache batch is stored,
//! activate only once every stale-bucket deletion has finished, and a fetch
//! only once the progressive copy has been written.

use offline_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod intercept;
pub mod lifecycle;
pub mod registration;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheStorage, CacheStore, RequestKey};
pub use clients::{Client, ClientMatchOptions, ClientRegistry, ClientType, Clients};
pub use config::{VersionTag, WorkerConfig};
pub use intercept::{FetchEvent, FetchOutcome, RequestInterceptor};
pub use lifecycle::{CleanupReport, InstallReport};
pub use registration::ServiceWorkerRegistration;
pub use worker::{
    ServiceWorker, ServiceWorkerEvent, ServiceWorkerId, ServiceWorkerState, WorkerContext,
};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Precache failed for {url}: {reason}")]
    Precache { url: String, reason: String },

    #[error("Security error: {0}")]
    Security(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A live fetch rejection, carried unchanged.
    #[error(transparent)]
    Network(#[from] NetError),
}

/// Result type alias for service worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
