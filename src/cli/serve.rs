//! Serve command: run the offline gateway.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use carolus_offline::cache::CacheStorage;
use carolus_offline::config::Config;
use carolus_offline::events::EventDispatcher;
use carolus_offline::fetch::{FetchClient, HttpFetchClient};
use carolus_offline::gateway::{start_gateway, GatewayState};
use carolus_offline::health::{
    start_health_server, start_periodic_usage_flush, GatewayMetrics, HealthCheck, HealthRegistry,
    HealthStatus,
};
use carolus_offline::runtime::{WorkerHost, WORKER_CHECK};
use carolus_offline::worker::{OfflineWorker, PRECACHE_ASSETS};

/// Run the gateway: precache in the background, proxy in the foreground.
pub(crate) async fn cmd_serve(
    mut config: Config,
    port: Option<u16>,
    origin: Option<String>,
) -> Result<()> {
    if let Some(p) = port {
        config.gateway.port = p;
    }
    if let Some(o) = origin {
        config.origin.url = o;
    }

    let cache_dir = config.cache.dir();
    let storage = Arc::new(CacheStorage::new(&cache_dir));
    let client: Arc<dyn FetchClient> = Arc::new(
        HttpFetchClient::new(&config.origin.url)
            .with_context(|| format!("Invalid origin URL '{}'", config.origin.url))?,
    );
    let dispatcher = Arc::new(EventDispatcher::new());
    let metrics = Arc::new(GatewayMetrics::new());

    let worker = OfflineWorker::new(storage.clone(), client.clone()).with_metrics(metrics.clone());
    worker.register(&dispatcher);

    let registry = HealthRegistry::new();
    registry.set_metrics(metrics.clone());
    registry.register(HealthCheck {
        name: WORKER_CHECK.to_string(),
        status: HealthStatus::Down,
        message: Some(format!("precaching {} assets", PRECACHE_ASSETS.len())),
        ..Default::default()
    });

    let host = Arc::new(
        WorkerHost::new(dispatcher, client)
            .with_retry_policy(config.install.retry_secs, config.install.max_attempts)
            .with_health(registry.clone()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Precache in the background; the gateway proxies meanwhile.
    let install_host = host.clone();
    let install_rx = shutdown_rx.clone();
    let install_task = tokio::spawn(async move {
        if let Err(e) = install_host.install_with_retry(install_rx).await {
            warn!(error = %e, "Install phase did not complete");
        }
    });

    let health_handle = if config.health.enabled {
        Some(start_health_server(&config.health.host, config.health.port, registry.clone()).await?)
    } else {
        None
    };
    let flush_handle = start_periodic_usage_flush(metrics.clone(), shutdown_rx.clone());

    println!("carolus-offline v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Gateway:   http://{}:{}",
        config.gateway.host, config.gateway.port
    );
    println!("Origin:    {}", config.origin.url);
    println!("Cache:     {}", cache_dir.display());
    if config.health.enabled {
        println!(
            "Health:    http://{}:{}/health",
            config.health.host, config.health.port
        );
    }
    println!("Press Ctrl+C to stop.");

    let state = GatewayState::new(host, metrics);
    let gateway_host = config.gateway.host.clone();
    let gateway_port = config.gateway.port;
    let gateway_rx = shutdown_rx.clone();
    let mut gateway_task =
        tokio::spawn(
            async move { start_gateway(&gateway_host, gateway_port, state, gateway_rx).await },
        );

    let serve_result = tokio::select! {
        result = &mut gateway_task => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
            (&mut gateway_task).await?
        }
    };

    // Stop the background tasks before reporting the gateway outcome.
    let _ = shutdown_tx.send(true);
    install_task.abort();
    let _ = flush_handle.await;
    if let Some(handle) = health_handle {
        handle.abort();
    }

    serve_result?;
    Ok(())
}
