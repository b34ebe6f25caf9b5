//! Cache lifecycle: install-time precaching and activation-time cleanup.

use futures::future::{join_all, try_join_all};
use hashbrown::HashSet;
use offline_net::{Fetcher, Request, Response};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStore, RequestKey};
use crate::config::WorkerConfig;
use crate::{Result, ServiceWorkerError};

/// Outcome of a successful precache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Precache bucket that was populated.
    pub bucket: String,
    /// Number of assets stored.
    pub cached: usize,
}

/// Outcome of an activation cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Buckets on the allow-list that were left alone.
    pub kept: Vec<String>,
    /// Stale buckets that were deleted.
    pub deleted: Vec<String>,
    /// Stale buckets whose deletion failed, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Populate the precache bucket with every configured asset.
///
/// All assets are fetched before anything is written; the batch is stored in
/// one write only if every fetch resolved with a 2xx status. A single failure
/// fails the whole install and leaves the bucket contents untouched.
pub async fn precache(
    config: &WorkerConfig,
    script_url: &Url,
    caches: &dyn CacheStore,
    network: &dyn Fetcher,
) -> Result<InstallReport> {
    let bucket = config.precache_bucket();

    caches.open(&bucket).await?;
    info!(bucket = %bucket, "Opened cache");

    let urls = config.resolve_precache(script_url)?;
    let entries = try_join_all(urls.into_iter().map(|url| fetch_asset(network, url))).await?;
    let cached = entries.len();

    caches.put_all(&bucket, entries).await?;
    info!(bucket = %bucket, cached, "Precache populated");

    Ok(InstallReport { bucket, cached })
}

async fn fetch_asset(network: &dyn Fetcher, url: Url) -> Result<(RequestKey, Response)> {
    let key = RequestKey::from_url(&url);

    let response = network
        .fetch(Request::get(url.clone()))
        .await
        .map_err(|e| ServiceWorkerError::Precache {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if !response.ok() {
        return Err(ServiceWorkerError::Precache {
            url: url.to_string(),
            reason: format!("unexpected status {}", response.status),
        });
    }

    debug!(url = %url, "Fetched precache asset");
    Ok((key, response))
}

/// Delete every bucket whose name is not on the allow-list.
///
/// Deletions run concurrently and independently: one failure is recorded in
/// the report and never stops the others. Failing to enumerate buckets skips
/// cleanup for this cycle.
pub async fn cleanup(caches: &dyn CacheStore, allow_list: &HashSet<String>) -> CleanupReport {
    let names = match caches.keys().await {
        Ok(names) => names,
        Err(e) => {
            warn!(error = %e, "Could not list cache buckets, skipping cleanup");
            return CleanupReport::default();
        }
    };

    let (kept, stale): (Vec<String>, Vec<String>) =
        names.into_iter().partition(|name| allow_list.contains(name));

    let results = join_all(stale.into_iter().map(|name| async move {
        let result = caches.delete(&name).await;
        (name, result)
    }))
    .await;

    let mut report = CleanupReport {
        kept,
        ..Default::default()
    };

    for (name, result) in results {
        match result {
            Ok(_) => {
                info!(bucket = %name, "Deleted stale cache");
                report.deleted.push(name);
            }
            Err(e) => {
                warn!(bucket = %name, error = %e, "Failed to delete stale cache");
                report.failed.push((name, e.to_string()));
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStorage;

    fn allow(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_cleanup_deletes_only_stale_buckets() {
        let storage = CacheStorage::new();
        for name in ["precache-v1", "precache-v2", "progressive-cache"] {
            storage.open(name).await.unwrap();
        }

        let report = cleanup(&storage, &allow(&["precache-v2", "progressive-cache"])).await;

        assert_eq!(report.deleted, vec!["precache-v1"]);
        assert_eq!(report.kept, vec!["precache-v2", "progressive-cache"]);
        assert!(report.failed.is_empty());
        assert_eq!(
            storage.keys().await.unwrap(),
            vec!["precache-v2", "progressive-cache"]
        );
    }

    #[tokio::test]
    async fn test_cleanup_with_nothing_stale() {
        let storage = CacheStorage::new();
        storage.open("precache-v1").await.unwrap();

        let report = cleanup(&storage, &allow(&["precache-v1"])).await;

        assert!(report.deleted.is_empty());
        assert_eq!(report.kept, vec!["precache-v1"]);
    }
}
