//! Network fetch trait and implementations.
//!
//! `FetchClient` abstracts the origin round-trip for testability.
//! `HttpFetchClient` performs real HTTP requests against the configured
//! origin. `MockFetchClient` is used in tests and counts every call, so
//! tests can assert exactly how often the network was touched.

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;
use url::Url;

use crate::error::{OfflineError, Result};
use crate::http::{is_hop_by_hop, Body, Request, Response};

/// Abstracts the live network fetch the worker falls back to.
///
/// A non-2xx response is a successful fetch and is returned verbatim; only
/// transport-level failures produce an `Err`.
#[async_trait]
pub trait FetchClient: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Real client resolving origin-form URLs against the configured origin.
///
/// No request timeout is set; platform defaults apply.
pub struct HttpFetchClient {
    client: reqwest::Client,
    origin: Url,
}

impl HttpFetchClient {
    /// Build a client for the given origin base URL (scheme + authority).
    pub fn new(origin: &str) -> Result<Self> {
        let origin = Url::parse(origin)
            .map_err(|e| OfflineError::Config(format!("Invalid origin URL '{}': {}", origin, e)))?;
        if origin.cannot_be_a_base() || origin.host_str().is_none() {
            return Err(OfflineError::Config(format!(
                "Origin URL '{}' has no host",
                origin
            )));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| OfflineError::Fetch(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, origin })
    }

    /// Resolve an origin-form URL (path + optional query) against the origin.
    fn resolve(&self, url: &str) -> Result<Url> {
        self.origin
            .join(url)
            .map_err(|e| OfflineError::Fetch(format!("Invalid request URL '{}': {}", url, e)))
    }

    /// Forwardable subset of the incoming headers. Hop-by-hop headers stay
    /// behind, as do `Host` and `Content-Length` which the client derives
    /// itself. Unparseable names or values are skipped, not fatal.
    fn forward_headers(request: &Request) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &request.headers {
            if is_hop_by_hop(name)
                || name.eq_ignore_ascii_case("host")
                || name.eq_ignore_ascii_case("content-length")
            {
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(n), Ok(v)) => {
                    map.append(n, v);
                }
                _ => debug!(header = %name, "skipping unparseable request header"),
            }
        }
        map
    }
}

#[async_trait]
impl FetchClient for HttpFetchClient {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let url = self.resolve(&request.url)?;
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| OfflineError::Fetch(format!("Invalid method '{}': {}", request.method, e)))?;

        let mut builder = self
            .client
            .request(method, url)
            .headers(Self::forward_headers(request));
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().await.map_err(|e| {
            OfflineError::Fetch(format!("{} {}: {}", request.method, request.url, e))
        })?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        // Hand the body through as a stream; the gateway forwards it
        // without buffering, the cache buffers it only at install time.
        let stream = resp
            .bytes_stream()
            .map_err(|e| OfflineError::Fetch(format!("Body stream failed: {}", e)));
        Ok(Response {
            status,
            headers,
            body: Body::Stream(Box::pin(stream)),
        })
    }
}

/// Mock client serving canned responses and counting calls.
#[cfg(test)]
pub struct MockFetchClient {
    /// Canned responses keyed by origin-form URL: (status, content type, body).
    pub responses: std::sync::Mutex<std::collections::HashMap<String, (u16, String, Vec<u8>)>>,
    /// URLs that fail at the transport level.
    pub failures: std::sync::Mutex<std::collections::HashSet<String>>,
    /// The next N calls fail at the transport level regardless of URL.
    pub transient_failures: std::sync::atomic::AtomicUsize,
    /// Total number of `fetch()` calls observed.
    pub calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockFetchClient {
    /// Empty mock: every URL answers 404.
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(std::collections::HashMap::new()),
            failures: std::sync::Mutex::new(std::collections::HashSet::new()),
            transient_failures: std::sync::atomic::AtomicUsize::new(0),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Mock origin that serves every precache asset with a body of
    /// `asset:<path>` and a content type matching the extension.
    pub fn serving_precache_assets() -> Self {
        let mock = Self::new();
        for path in crate::worker::PRECACHE_ASSETS {
            let content_type = if path.ends_with(".css") {
                "text/css"
            } else if path.ends_with(".js") {
                "application/javascript"
            } else if path.ends_with(".svg") {
                "image/svg+xml"
            } else if path.ends_with(".json") {
                "application/json"
            } else {
                "text/html"
            };
            mock.responses.lock().unwrap().insert(
                path.to_string(),
                (200, content_type.to_string(), format!("asset:{path}").into_bytes()),
            );
        }
        mock
    }

    pub fn with_asset(self, url: &str, content_type: &str, body: &[u8]) -> Self {
        self.responses.lock().unwrap().insert(
            url.to_string(),
            (200, content_type.to_string(), body.to_vec()),
        );
        self
    }

    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, "text/plain".to_string(), Vec::new()));
        self
    }

    pub fn failing_url(self, url: &str) -> Self {
        self.failures.lock().unwrap().insert(url.to_string());
        self
    }

    /// Make the next `n` calls fail at the transport level.
    pub fn fail_next(&self, n: usize) {
        self.transient_failures
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn reset_count(&self) {
        self.calls.store(0, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
#[async_trait]
impl FetchClient for MockFetchClient {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        use axum::body::Bytes;
        use std::sync::atomic::Ordering;
        self.calls.fetch_add(1, Ordering::SeqCst);
        let transient = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            return Err(OfflineError::Fetch("simulated transport failure".to_string()));
        }
        if self.failures.lock().unwrap().contains(&request.url) {
            return Err(OfflineError::Fetch(format!(
                "simulated transport failure for {}",
                request.url
            )));
        }
        match self.responses.lock().unwrap().get(&request.url) {
            Some((status, content_type, body)) => Ok(Response {
                status: *status,
                headers: vec![("content-type".to_string(), content_type.clone())],
                body: Body::Bytes(Bytes::from(body.clone())),
            }),
            None => Ok(Response::new(404).with_body("not found")),
        }
    }
}
