//! Local HTTP gateway that fronts the origin server.
//!
//! Every request, regardless of method or path, lands in a single fallback
//! handler, which buffers the request body, hands the request to the
//! [`WorkerHost`], and converts the outcome back. Cached responses come
//! back as buffered bytes; live origin responses stream through without
//! buffering. A fetch error on a cache miss surfaces as 502.

use std::sync::Arc;

use axum::body::Body as AxumBody;
use axum::extract::{Request as AxumRequest, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response as AxumResponse;
use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::health::GatewayMetrics;
use crate::http::{is_hop_by_hop, Body, Request, Response};
use crate::runtime::WorkerHost;

/// Cap on buffered request bodies. The UI never uploads anything close to
/// this; it exists so a runaway client cannot exhaust memory.
const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Shared state for the gateway router.
#[derive(Clone)]
pub struct GatewayState {
    host: Arc<WorkerHost>,
    metrics: Arc<GatewayMetrics>,
}

impl GatewayState {
    pub fn new(host: Arc<WorkerHost>, metrics: Arc<GatewayMetrics>) -> Self {
        Self { host, metrics }
    }
}

/// Build the gateway router: one fallback route that proxies everything,
/// wrapped in request tracing.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .fallback(proxy_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the gateway listener and serve until `shutdown_rx` signals `true`.
pub async fn start_gateway(
    host: &str,
    port: u16,
    state: GatewayState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while shutdown_rx.changed().await.is_ok() {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        })
        .await?;
    info!("Gateway stopped");
    Ok(())
}

// ============================================================================
// Request handling
// ============================================================================

async fn proxy_request(State(state): State<GatewayState>, request: AxumRequest) -> AxumResponse {
    state.metrics.record_request();

    let (parts, body) = request.into_parts();
    let body_bytes = match axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) if is_length_limit(&e) => {
            state.metrics.record_error();
            error!(error = %e, "Request body exceeded the buffer cap");
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
        Err(e) => {
            state.metrics.record_error();
            error!(error = %e, "Failed to read request body");
            return error_response(StatusCode::BAD_REQUEST, "failed to read request body");
        }
    };

    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let mut headers = Vec::with_capacity(parts.headers.len());
    for (name, value) in parts.headers.iter() {
        match value.to_str() {
            Ok(v) => headers.push((name.as_str().to_string(), v.to_string())),
            Err(_) => debug!(header = %name, "Skipping non-UTF-8 header value"),
        }
    }

    let request = Request {
        method: parts.method.as_str().to_string(),
        url,
        headers,
        body: if body_bytes.is_empty() {
            None
        } else {
            Some(body_bytes)
        },
    };

    match state.host.handle_request(request).await {
        Ok(response) => into_axum_response(response),
        Err(e) => {
            state.metrics.record_error();
            error!(error = %e, "Request failed");
            error_response(StatusCode::BAD_GATEWAY, "upstream fetch failed")
        }
    }
}

fn into_axum_response(response: Response) -> AxumResponse {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = AxumResponse::builder().status(status);
    for (name, value) in &response.headers {
        // Hop-by-hop headers are connection-scoped; content-length is
        // recomputed for the outgoing body.
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        let parsed = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        );
        if let (Ok(name), Ok(value)) = parsed {
            builder = builder.header(name, value);
        }
    }
    let body = match response.body {
        Body::Bytes(bytes) => AxumBody::from(bytes),
        Body::Stream(stream) => AxumBody::from_stream(stream),
    };
    match builder.body(body) {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Failed to assemble proxied response");
            error_response(StatusCode::BAD_GATEWAY, "response assembly failed")
        }
    }
}

/// `to_bytes` reports the length cap and transport failures through the
/// same error type; only the cap may surface as 413.
fn is_length_limit(err: &axum::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if inner.is::<http_body_util::LengthLimitError>() {
            return true;
        }
        source = inner.source();
    }
    false
}

fn error_response(status: StatusCode, message: &'static str) -> AxumResponse {
    let mut response = AxumResponse::new(AxumBody::from(message));
    *response.status_mut() = status;
    response
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStorage;
    use crate::events::EventDispatcher;
    use crate::fetch::{FetchClient, MockFetchClient};
    use crate::worker::OfflineWorker;
    use axum::http::Request as HttpRequest;
    use tempfile::tempdir;
    use tower::util::ServiceExt;

    struct Fixture {
        app: Router,
        client: Arc<MockFetchClient>,
        metrics: Arc<GatewayMetrics>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(mock: MockFetchClient, install: bool) -> Fixture {
        let dir = tempdir().unwrap();
        let storage = Arc::new(CacheStorage::new(dir.path()));
        let client = Arc::new(mock);
        let dispatcher = Arc::new(EventDispatcher::new());
        let metrics = Arc::new(GatewayMetrics::new());

        let worker = OfflineWorker::new(
            Arc::clone(&storage),
            Arc::clone(&client) as Arc<dyn FetchClient>,
        )
        .with_metrics(Arc::clone(&metrics));
        worker.register(&dispatcher);

        let host = Arc::new(WorkerHost::new(
            Arc::clone(&dispatcher),
            Arc::clone(&client) as Arc<dyn FetchClient>,
        ));
        if install {
            host.install_once().await.unwrap();
            client.reset_count();
        }

        let app = build_router(GatewayState::new(host, Arc::clone(&metrics)));
        Fixture {
            app,
            client,
            metrics,
            _dir: dir,
        }
    }

    async fn body_string(response: AxumResponse) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8_lossy(&bytes).to_string()
    }

    #[tokio::test]
    async fn test_precached_path_served_without_network() {
        let fx = fixture(MockFetchClient::serving_precache_assets(), true).await;

        let req = HttpRequest::builder()
            .uri("/")
            .body(AxumBody::empty())
            .unwrap();
        let resp = fx.app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "asset:/");
        assert_eq!(fx.client.fetch_count(), 0, "cache hit must not touch origin");
        assert_eq!(fx.metrics.requests(), 1);
        assert_eq!(fx.metrics.cache_hits(), 1);
    }

    #[tokio::test]
    async fn test_cached_headers_forwarded() {
        let fx = fixture(MockFetchClient::serving_precache_assets(), true).await;

        let req = HttpRequest::builder()
            .uri("/static/css/style.css")
            .body(AxumBody::empty())
            .unwrap();
        let resp = fx.app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "text/css",
            "stored response headers come back verbatim"
        );
    }

    #[tokio::test]
    async fn test_miss_forwards_to_origin_verbatim() {
        let fx = fixture(MockFetchClient::serving_precache_assets(), true).await;

        // Unknown path: the mock origin answers 404, and that answer must
        // reach the client untouched.
        let req = HttpRequest::builder()
            .uri("/api/texts/ovidius")
            .body(AxumBody::empty())
            .unwrap();
        let resp = fx.app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(resp).await, "not found");
        assert_eq!(fx.client.fetch_count(), 1);
        assert_eq!(fx.metrics.cache_misses(), 1);
    }

    #[tokio::test]
    async fn test_query_is_part_of_cache_identity() {
        let fx = fixture(MockFetchClient::serving_precache_assets(), true).await;

        let req = HttpRequest::builder()
            .uri("/?lang=la")
            .body(AxumBody::empty())
            .unwrap();
        let _ = fx.app.oneshot(req).await.unwrap();

        assert_eq!(
            fx.client.fetch_count(),
            1,
            "`/?lang=la` is a different identity than the precached `/`"
        );
    }

    #[tokio::test]
    async fn test_post_bypasses_cache() {
        let fx = fixture(MockFetchClient::serving_precache_assets(), true).await;

        let req = HttpRequest::builder()
            .method("POST")
            .uri("/")
            .body(AxumBody::from("payload"))
            .unwrap();
        let resp = fx.app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(fx.client.fetch_count(), 1, "non-GET always goes to origin");
        assert_eq!(fx.metrics.cache_hits(), 0);
    }

    #[tokio::test]
    async fn test_fetch_error_becomes_502() {
        let fx = fixture(
            MockFetchClient::serving_precache_assets().failing_url("/api/search"),
            true,
        )
        .await;

        let req = HttpRequest::builder()
            .uri("/api/search")
            .body(AxumBody::empty())
            .unwrap();
        let resp = fx.app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_string(resp).await, "upstream fetch failed");
        assert_eq!(fx.metrics.errors(), 1);
    }

    #[tokio::test]
    async fn test_oversized_body_is_413() {
        let fx = fixture(MockFetchClient::serving_precache_assets(), true).await;

        let req = HttpRequest::builder()
            .method("POST")
            .uri("/upload")
            .body(AxumBody::from(vec![0u8; MAX_REQUEST_BODY_BYTES + 1]))
            .unwrap();
        let resp = fx.app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_string(resp).await, "request body too large");
        assert_eq!(fx.client.fetch_count(), 0, "capped request never reaches origin");
        assert_eq!(fx.metrics.errors(), 1);
    }

    #[tokio::test]
    async fn test_broken_body_read_is_400_not_413() {
        let fx = fixture(MockFetchClient::serving_precache_assets(), true).await;

        // Body stream dies mid-read; that is a client failure, not a size cap.
        let broken = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(axum::body::Bytes::from_static(b"partial")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            )),
        ]);
        let req = HttpRequest::builder()
            .method("POST")
            .uri("/upload")
            .body(AxumBody::from_stream(broken))
            .unwrap();
        let resp = fx.app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(resp).await, "failed to read request body");
        assert_eq!(fx.metrics.errors(), 1);
    }

    #[tokio::test]
    async fn test_requests_pass_through_before_install() {
        let fx = fixture(MockFetchClient::serving_precache_assets(), false).await;

        let req = HttpRequest::builder()
            .uri("/")
            .body(AxumBody::empty())
            .unwrap();
        let resp = fx.app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            fx.client.fetch_count(),
            1,
            "no cache involvement while install is pending"
        );
        assert_eq!(fx.metrics.cache_hits(), 0);
        assert_eq!(fx.metrics.cache_misses(), 0);
    }
}
