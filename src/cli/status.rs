//! Status command: show configuration and cache contents.

use anyhow::Result;

use carolus_offline::cache::CacheStorage;
use carolus_offline::config::Config;

/// Show system status.
pub(crate) async fn cmd_status(config: Config) -> Result<()> {
    println!("Carolus Offline Status");
    println!("======================");
    println!();

    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("Configuration");
    println!("-------------");
    println!("  Config file:   {:?}", Config::path());
    println!("  Config exists: {}", Config::path().exists());
    println!("  Origin:        {}", config.origin.url);
    println!(
        "  Gateway:       http://{}:{}",
        config.gateway.host, config.gateway.port
    );
    if config.health.enabled {
        println!(
            "  Health:        http://{}:{}/health",
            config.health.host, config.health.port
        );
    } else {
        println!("  Health:        disabled");
    }
    if config.install.max_attempts == 0 {
        println!(
            "  Install retry: every {}s, unlimited attempts",
            config.install.retry_secs
        );
    } else {
        println!(
            "  Install retry: every {}s, up to {} attempts",
            config.install.retry_secs, config.install.max_attempts
        );
    }
    println!();

    println!("Caches");
    println!("------");
    let cache_dir = config.cache.dir();
    println!("  Directory: {}", cache_dir.display());
    println!("  Exists:    {}", cache_dir.exists());
    let storage = CacheStorage::new(&cache_dir);
    let caches = storage.caches();
    if caches.is_empty() {
        println!("  (no caches on disk)");
    } else {
        for cache in caches {
            println!();
            println!("  {} ({} entries)", cache.name(), cache.len());
            for (url, size) in cache.summary() {
                println!("    {:<44} {:>9} bytes", url, size);
            }
        }
    }
    println!();

    Ok(())
}
