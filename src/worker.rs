//! The offline worker: the install/fetch handler pair.
//!
//! At install time the worker opens the named cache and stores a fixed
//! list of UI assets, all-or-nothing. For every intercepted request it
//! answers cache-first: a match anywhere in cache storage is served
//! without touching the network, anything else goes to the origin exactly
//! once and is returned verbatim. There is no offline fallback page and
//! no revalidation — cached content is served until something replaces it.

use std::sync::Arc;
use tracing::debug;

use crate::cache::CacheStorage;
use crate::events::EventDispatcher;
use crate::fetch::FetchClient;
use crate::health::GatewayMetrics;

/// Name of the cache that receives the precached UI assets.
pub const CACHE_NAME: &str = "carolus-cache";

/// The fixed set of UI resources cached at install time.
pub const PRECACHE_ASSETS: [&str; 11] = [
    "/",
    "/static/manifest.json",
    "/static/css/style.css",
    "/static/img/arrow-back.svg",
    "/static/img/arrow-forward.svg",
    "/static/img/carolus.svg",
    "/static/img/book.svg",
    "/static/img/info.svg",
    "/static/img/unfold-more.svg",
    "/static/js/autocomplete.min.js",
    "/static/js/main.js",
];

/// Install and fetch handlers over shared cache storage and a fetch client.
pub struct OfflineWorker {
    storage: Arc<CacheStorage>,
    client: Arc<dyn FetchClient>,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl OfflineWorker {
    pub fn new(storage: Arc<CacheStorage>, client: Arc<dyn FetchClient>) -> Self {
        Self {
            storage,
            client,
            metrics: None,
        }
    }

    /// Record cache hits and misses on `metrics`. Observability only —
    /// handler behavior is identical with or without it.
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Subscribe both handlers on the dispatcher.
    pub fn register(&self, dispatcher: &EventDispatcher) {
        self.register_install(dispatcher);
        self.register_fetch(dispatcher);
    }

    fn register_install(&self, dispatcher: &EventDispatcher) {
        let storage = self.storage.clone();
        let client = self.client.clone();
        dispatcher.on_install(move |event| {
            let storage = storage.clone();
            let client = client.clone();
            event.wait_until(async move {
                let cache = storage.open(CACHE_NAME)?;
                cache.add_all(client.as_ref(), &PRECACHE_ASSETS).await
            });
        });
    }

    fn register_fetch(&self, dispatcher: &EventDispatcher) {
        let storage = self.storage.clone();
        let client = self.client.clone();
        let metrics = self.metrics.clone();
        dispatcher.on_fetch(move |event| {
            let storage = storage.clone();
            let client = client.clone();
            let metrics = metrics.clone();
            let request = event.request().clone();
            event.respond_with(async move {
                if let Some(hit) = storage.match_request(&request) {
                    if let Some(m) = &metrics {
                        m.record_hit();
                    }
                    return Ok(hit);
                }
                if let Some(m) = &metrics {
                    m.record_miss();
                }
                debug!(method = %request.method, url = %request.url, "cache miss, fetching live");
                client.fetch(&request).await
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::events::FetchDispatch;
    use crate::fetch::MockFetchClient;
    use crate::http::{Request, Response};
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dispatcher: EventDispatcher,
        storage: Arc<CacheStorage>,
        client: Arc<MockFetchClient>,
        _dir: TempDir,
    }

    fn fixture(mock: MockFetchClient) -> Fixture {
        let dir = tempdir().unwrap();
        let storage = Arc::new(CacheStorage::new(dir.path()));
        let client = Arc::new(mock);
        let worker = OfflineWorker::new(storage.clone(), client.clone());
        let dispatcher = EventDispatcher::new();
        worker.register(&dispatcher);
        Fixture {
            dispatcher,
            storage,
            client,
            _dir: dir,
        }
    }

    async fn run_install(dispatcher: &EventDispatcher) -> Result<()> {
        for fut in dispatcher.dispatch_install() {
            fut.await?;
        }
        Ok(())
    }

    async fn claimed_response(dispatcher: &EventDispatcher, request: Request) -> Result<Response> {
        match dispatcher.dispatch_fetch(request) {
            FetchDispatch::Claimed(fut) => fut.await,
            FetchDispatch::Unclaimed(req) => panic!("fetch handler did not claim {}", req.url),
        }
    }

    #[test]
    fn test_register_subscribes_both_handlers() {
        let f = fixture(MockFetchClient::new());
        assert_eq!(f.dispatcher.install_listener_count(), 1);
        assert_eq!(f.dispatcher.fetch_listener_count(), 1);
    }

    #[tokio::test]
    async fn test_install_precaches_all_assets() {
        let f = fixture(MockFetchClient::serving_precache_assets());
        run_install(&f.dispatcher).await.unwrap();

        let cache = f.storage.open(CACHE_NAME).unwrap();
        assert_eq!(cache.len(), PRECACHE_ASSETS.len());
        for path in PRECACHE_ASSETS {
            assert!(cache.contains(path), "{path} should be precached");
        }
        assert_eq!(f.client.fetch_count(), PRECACHE_ASSETS.len());
    }

    #[tokio::test]
    async fn test_install_stores_responses_fetched_at_install_time() {
        let f = fixture(MockFetchClient::serving_precache_assets());
        run_install(&f.dispatcher).await.unwrap();

        let resp = claimed_response(&f.dispatcher, Request::get("/static/img/carolus.svg"))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.header("content-type"), Some("image/svg+xml"));
        let body = resp.body.bytes().await.unwrap();
        assert_eq!(&body[..], b"asset:/static/img/carolus.svg");
    }

    #[tokio::test]
    async fn test_cache_hit_makes_zero_network_calls() {
        let f = fixture(MockFetchClient::serving_precache_assets());
        run_install(&f.dispatcher).await.unwrap();
        f.client.reset_count();

        let resp = claimed_response(&f.dispatcher, Request::get("/static/css/style.css"))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        let body = resp.body.bytes().await.unwrap();
        assert_eq!(&body[..], b"asset:/static/css/style.css");
        assert_eq!(f.client.fetch_count(), 0, "hits must not touch the network");
    }

    #[tokio::test]
    async fn test_cache_miss_fetches_exactly_once() {
        let f = fixture(MockFetchClient::serving_precache_assets());
        run_install(&f.dispatcher).await.unwrap();
        f.client.reset_count();

        let resp = claimed_response(&f.dispatcher, Request::get("/api/albums"))
            .await
            .unwrap();
        assert_eq!(resp.status, 404, "live result returned verbatim");
        assert_eq!(f.client.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_miss_on_empty_cache_goes_to_network_once() {
        // No install has run; every lookup misses.
        let f = fixture(MockFetchClient::new());
        let resp = claimed_response(&f.dispatcher, Request::get("/unlisted/path.png"))
            .await
            .unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(f.client.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_miss_transport_failure_propagates() {
        let f = fixture(MockFetchClient::new().failing_url("/flaky"));
        let err = claimed_response(&f.dispatcher, Request::get("/flaky"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/flaky"));
    }

    #[tokio::test]
    async fn test_failed_asset_aborts_whole_install() {
        let mock = MockFetchClient::serving_precache_assets().failing_url("/static/js/main.js");
        let f = fixture(mock);

        let err = run_install(&f.dispatcher).await.unwrap_err();
        assert!(err.to_string().contains("/static/js/main.js"));
        let cache = f.storage.open(CACHE_NAME).unwrap();
        assert!(cache.is_empty(), "failed install must store nothing");
    }

    #[tokio::test]
    async fn test_non_success_asset_aborts_whole_install() {
        let mock = MockFetchClient::serving_precache_assets().with_status("/static/manifest.json", 503);
        let f = fixture(mock);

        assert!(run_install(&f.dispatcher).await.is_err());
        let cache = f.storage.open(CACHE_NAME).unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_install_is_idempotent() {
        let f = fixture(MockFetchClient::serving_precache_assets());
        run_install(&f.dispatcher).await.unwrap();
        run_install(&f.dispatcher).await.unwrap();

        let cache = f.storage.open(CACHE_NAME).unwrap();
        assert_eq!(cache.len(), PRECACHE_ASSETS.len(), "no duplicates");
    }

    #[tokio::test]
    async fn test_metrics_record_hits_and_misses() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(CacheStorage::new(dir.path()));
        let client = Arc::new(MockFetchClient::serving_precache_assets());
        let metrics = Arc::new(GatewayMetrics::new());
        let worker =
            OfflineWorker::new(storage.clone(), client.clone()).with_metrics(metrics.clone());
        let dispatcher = EventDispatcher::new();
        worker.register(&dispatcher);

        run_install(&dispatcher).await.unwrap();
        claimed_response(&dispatcher, Request::get("/")).await.unwrap();
        claimed_response(&dispatcher, Request::get("/nope")).await.unwrap();

        assert_eq!(metrics.cache_hits(), 1);
        assert_eq!(metrics.cache_misses(), 1);
    }
}
