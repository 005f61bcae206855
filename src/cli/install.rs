//! Install command: precache once and exit.

use std::sync::Arc;

use anyhow::{Context, Result};

use carolus_offline::cache::CacheStorage;
use carolus_offline::config::Config;
use carolus_offline::events::EventDispatcher;
use carolus_offline::fetch::{FetchClient, HttpFetchClient};
use carolus_offline::runtime::WorkerHost;
use carolus_offline::worker::{OfflineWorker, CACHE_NAME, PRECACHE_ASSETS};

/// Precache the UI assets into the on-disk cache and exit.
pub(crate) async fn cmd_install(mut config: Config, origin: Option<String>) -> Result<()> {
    if let Some(o) = origin {
        config.origin.url = o;
    }

    let cache_dir = config.cache.dir();
    println!(
        "Precaching {} assets from {}",
        PRECACHE_ASSETS.len(),
        config.origin.url
    );

    let storage = Arc::new(CacheStorage::new(&cache_dir));
    let client: Arc<dyn FetchClient> = Arc::new(
        HttpFetchClient::new(&config.origin.url)
            .with_context(|| format!("Invalid origin URL '{}'", config.origin.url))?,
    );
    let dispatcher = Arc::new(EventDispatcher::new());
    let worker = OfflineWorker::new(storage.clone(), client.clone());
    worker.register(&dispatcher);

    let host = WorkerHost::new(dispatcher, client);
    host.install_once().await.context("Install phase failed")?;

    let cache = storage.open(CACHE_NAME)?;
    println!();
    println!("Install complete.");
    println!("  Cache:     {} ({} entries)", cache.name(), cache.len());
    println!("  Directory: {}", cache_dir.display());

    Ok(())
}
