//! Offline worker smoke harness
//!
//! Registers one worker version against the live network, optionally
//! replays a list of fetches through it, and prints a JSON summary of what
//! was cached and where each response came from.

use std::sync::Arc;
use std::time::Instant;

use offline_common::{init_logging, LogConfig, LogFormat, OfflineError, OptionExt, ResultExt};
use offline_net::{Fetcher, LoaderConfig, Request, ResourceLoader};
use offline_sw::{
    CacheStorage, CacheStore, ClientRegistry, Clients, FetchEvent, ServiceWorker,
    ServiceWorkerRegistration, WorkerConfig, WorkerContext,
};
use serde_json::json;
use tracing::{error, info, warn};
use url::Url;

/// Parse command line arguments
struct Args {
    script: Option<String>,
    version: String,
    precache: Vec<String>,
    fetch: Vec<String>,
    log: LogFormat,
    claim: bool,
}

impl Args {
    fn parse() -> offline_common::Result<Self> {
        let mut args = std::env::args().skip(1);
        let mut script = None;
        let mut version = "1".to_string();
        let mut precache = Vec::new();
        let mut fetch = Vec::new();
        let mut log = LogFormat::Compact;
        let mut claim = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--script" => script = args.next(),
                "--version" => {
                    if let Some(val) = args.next() {
                        version = val;
                    }
                }
                "--precache" => precache.extend(args.next()),
                "--fetch" => fetch.extend(args.next()),
                "--log" => {
                    if let Some(val) = args.next() {
                        log = val.parse()?;
                    }
                }
                "--claim" => claim = true,
                other => eprintln!("Warning: ignoring unknown argument {}", other),
            }
        }

        Ok(Self {
            script,
            version,
            precache,
            fetch,
            log,
            claim,
        })
    }

    fn config(&self) -> WorkerConfig {
        let precache = if self.precache.is_empty() {
            WorkerConfig::default().precache_urls
        } else {
            self.precache.clone()
        };
        WorkerConfig::new(self.version.as_str(), precache).with_claim_clients(self.claim)
    }
}

#[tokio::main]
async fn main() {
    let args = match Args::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = init_logging(LogConfig::default().with_format(args.log)) {
        eprintln!("Warning: {}", e);
    }

    match run(args).await {
        Ok(summary) => {
            let installed = summary["installed"].as_bool().unwrap_or(false);
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).unwrap_or_else(|_| summary.to_string())
            );
            if !installed {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!(error = %e, category = e.category(), "Smoke run failed");
            std::process::exit(2);
        }
    }
}

async fn run(args: Args) -> offline_common::Result<serde_json::Value> {
    let script = args
        .script
        .as_deref()
        .ok_or_else(|| OfflineError::InvalidArgument("--script <url> is required".into()))?;
    let script_url = Url::parse(script).context("invalid --script URL")?;
    let scope = script_url.join("./").context("cannot derive scope")?;

    info!(script = %script_url, version = %args.version, "Starting offline worker smoke run");

    let network = ResourceLoader::new(LoaderConfig::default()).context("network setup failed")?;
    let caches = Arc::new(CacheStorage::new());
    let clients = Arc::new(Clients::new());
    clients.open_window(scope.clone()).await;

    let (context, mut events) = WorkerContext::new(
        caches.clone() as Arc<dyn CacheStore>,
        clients.clone() as Arc<dyn ClientRegistry>,
        Arc::new(network) as Arc<dyn Fetcher>,
    );

    let worker = Arc::new(
        ServiceWorker::new(script_url.clone(), args.config(), context)
            .context("invalid worker configuration")?,
    );
    let precache_bucket = worker.config().precache_bucket();

    let mut registration = ServiceWorkerRegistration::new(scope);
    let started = Instant::now();
    let update = registration.update(Arc::clone(&worker)).await;
    let install_ms = started.elapsed().as_millis() as u64;

    let (installed, install_error) = match update {
        Ok(state) => {
            info!(state = %state, install_ms, "Worker registered");
            (true, None)
        }
        Err(e) => {
            warn!(error = %e, "Install failed");
            (false, Some(e.to_string()))
        }
    };

    let mut fetches = Vec::new();
    for target in &args.fetch {
        let url = script_url
            .join(target)
            .context(format!("invalid --fetch URL {}", target))?;
        let event = FetchEvent::new(Request::get(url.clone()));

        let entry = match registration.handle_fetch(event).await {
            Ok(outcome) => json!({
                "url": url.as_str(),
                "source": outcome.source(),
                "status": outcome.response().map(|r| r.status.as_u16()),
            }),
            Err(e) => json!({
                "url": url.as_str(),
                "source": "error",
                "error": e.to_string(),
            }),
        };
        fetches.push(entry);
    }

    let mut buckets = serde_json::Map::new();
    for name in caches.keys().await.context("listing caches failed")? {
        let len = caches
            .bucket_len(&name)
            .await
            .ok_or_not_found(format!("cache bucket {}", name))?;
        buckets.insert(name, json!(len));
    }

    let mut state_changes = Vec::new();
    while let Ok(event) = events.try_recv() {
        state_changes.push(format!("{:?}", event));
    }

    Ok(json!({
        "script": script_url.as_str(),
        "version": args.version,
        "precache_bucket": precache_bucket,
        "installed": installed,
        "install_error": install_error,
        "install_ms": install_ms,
        "state": worker.state(),
        "buckets": buckets,
        "fetches": fetches,
        "events": state_changes,
    }))
}
