//! A single named cache mapping request identity to a stored response.
//!
//! Persists to one JSON file per cache under the cache directory (body
//! bytes base64-encoded). Only GET requests are stored or matched; identity
//! is the origin-form URL compared exactly, then filtered by the stored
//! response's `Vary` header. Entries are never expired or evicted — a
//! cached response is served until something overwrites it.

use axum::body::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::error::{OfflineError, Result};
use crate::fetch::FetchClient;
use crate::http::{vary_allows_match, Body, Request, Response};

/// Request half of a cache entry, kept for header-sensitive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Response half of a cache entry, buffered in full.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
}

impl StoredResponse {
    /// Buffer a response into its storable form, draining the body stream.
    pub async fn from_response(response: Response) -> Result<Self> {
        let Response {
            status,
            headers,
            body,
        } = response;
        Ok(Self {
            status,
            headers,
            body: body.bytes().await?.to_vec(),
        })
    }
}

/// One cached request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub request: StoredRequest,
    pub response: StoredResponse,
    /// Unix timestamp when the entry was stored.
    pub stored_at: u64,
}

/// On-disk snapshot, serialized to JSON. Entries are kept in a BTreeMap so
/// the file content is stable across saves.
#[derive(Debug, Serialize, Deserialize)]
struct CacheSnapshot {
    name: String,
    created_at: u64,
    entries: BTreeMap<String, CacheEntry>,
}

/// A named cache with JSON persistence.
pub struct Cache {
    name: String,
    path: PathBuf,
    created_at: u64,
    entries: DashMap<String, CacheEntry>,
}

impl Cache {
    /// Open the named cache under `dir`, loading any existing snapshot.
    ///
    /// A missing file yields an empty cache; a corrupt one is logged at
    /// warn and treated as empty rather than aborting startup.
    pub fn open(dir: &Path, name: &str) -> Self {
        let path = dir.join(format!("{}.json", name));
        match Self::load_from_disk(&path) {
            Some(snapshot) => {
                debug!(
                    cache = %name,
                    entries = snapshot.entries.len(),
                    "loaded cache snapshot from disk"
                );
                Self {
                    name: name.to_string(),
                    path,
                    created_at: snapshot.created_at,
                    entries: snapshot.entries.into_iter().collect(),
                }
            }
            None => Self {
                name: name.to_string(),
                path,
                created_at: now_secs(),
                entries: DashMap::new(),
            },
        }
    }

    /// Look up a response for `request` under default matching rules:
    /// GET only, exact URL (query included), `Vary` honored, `Vary: *`
    /// never matches.
    pub fn match_request(&self, request: &Request) -> Option<Response> {
        if !request.is_get() {
            return None;
        }
        let entry = self.entries.get(&request.url)?;
        if !vary_allows_match(
            &entry.response.headers,
            &entry.request.headers,
            &request.headers,
        ) {
            debug!(cache = %self.name, url = %request.url, "vary mismatch, treating as miss");
            return None;
        }
        debug!(cache = %self.name, url = %request.url, "cache hit");
        Some(response_from_entry(&entry))
    }

    /// Store one request/response pair and persist. Overwrites any existing
    /// entry for the same URL.
    pub async fn put(&self, request: &Request, response: Response) -> Result<()> {
        if !request.is_get() {
            return Err(OfflineError::Cache(format!(
                "Only GET requests can be stored (got {})",
                request.method
            )));
        }
        let stored = StoredResponse::from_response(response).await?;
        self.insert(request, stored);
        self.save()
    }

    /// Fetch every path and store all responses, atomically with respect to
    /// failure: if any single fetch fails (transport error or non-2xx
    /// status) the whole batch fails and nothing is inserted. Re-running
    /// with the same list overwrites in place.
    pub async fn add_all(&self, client: &dyn FetchClient, paths: &[&str]) -> Result<()> {
        let fetches = paths.iter().map(|path| {
            let request = Request::get(*path);
            async move {
                let response = client.fetch(&request).await.map_err(|e| {
                    OfflineError::Install(format!("Failed to fetch {}: {}", request.url, e))
                })?;
                if !response.is_success() {
                    return Err(OfflineError::Install(format!(
                        "{} answered HTTP {}",
                        request.url, response.status
                    )));
                }
                let stored = StoredResponse::from_response(response).await?;
                Ok((request, stored))
            }
        });

        // Every fetch runs to completion before the batch is judged, so a
        // failed install still leaves the cache exactly as it was.
        let results = futures::future::join_all(fetches).await;
        let mut staged = Vec::with_capacity(results.len());
        for result in results {
            staged.push(result?);
        }
        for (request, stored) in staged {
            self.insert(&request, stored);
        }
        self.save()?;
        info!(cache = %self.name, assets = paths.len(), "stored asset batch");
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unix timestamp of first creation; survives restarts via the snapshot.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    /// Cached URLs with their body sizes, sorted by URL.
    pub fn summary(&self) -> Vec<(String, usize)> {
        let mut entries: Vec<(String, usize)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().response.body.len()))
            .collect();
        entries.sort();
        entries
    }

    // -- private helpers ---------------------------------------------------

    fn insert(&self, request: &Request, response: StoredResponse) {
        let entry = CacheEntry {
            request: StoredRequest {
                method: request.method.clone(),
                url: request.url.clone(),
                headers: request.headers.clone(),
            },
            response,
            stored_at: now_secs(),
        };
        self.entries.insert(request.url.clone(), entry);
    }

    fn load_from_disk(path: &Path) -> Option<CacheSnapshot> {
        match std::fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!("Cache file {} is corrupt, starting empty: {}", path.display(), e);
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read cache file {}, starting empty: {}", path.display(), e);
                None
            }
        }
    }

    fn save(&self) -> Result<()> {
        let snapshot = CacheSnapshot {
            name: self.name.clone(),
            created_at: self.created_at,
            entries: self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&snapshot)?;
        // Temp file + rename: an interrupted save never clobbers the
        // previous snapshot. The scan in CacheStorage only picks up
        // `.json` files, so a leftover `.tmp` is inert.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| {
                OfflineError::Cache(format!(
                    "Failed to save cache {} to {}: {}",
                    self.name,
                    self.path.display(),
                    e
                ))
            })?;
        Ok(())
    }
}

fn response_from_entry(entry: &CacheEntry) -> Response {
    Response {
        status: entry.response.status,
        headers: entry.response.headers.clone(),
        body: Body::Bytes(Bytes::from(entry.response.body.clone())),
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

mod base64_bytes {
    //! Serde adapter: raw bytes as base64 strings in the JSON snapshot.

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MockFetchClient;
    use crate::worker::PRECACHE_ASSETS;
    use tempfile::tempdir;

    fn get_with_headers(url: &str, headers: &[(&str, &str)]) -> Request {
        let mut req = Request::get(url);
        req.headers = headers
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        req
    }

    #[tokio::test]
    async fn test_put_then_match_roundtrip() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path(), "test");
        let req = Request::get("/static/css/style.css");
        let resp = Response::new(200)
            .with_header("content-type", "text/css")
            .with_body("body { margin: 0 }");
        cache.put(&req, resp).await.unwrap();

        let hit = cache.match_request(&req).expect("stored entry should match");
        assert_eq!(hit.status, 200);
        assert_eq!(hit.header("content-type"), Some("text/css"));
        let body = hit.body.bytes().await.unwrap();
        assert_eq!(&body[..], b"body { margin: 0 }");
    }

    #[tokio::test]
    async fn test_match_on_empty_cache_misses() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path(), "test");
        assert!(cache.match_request(&Request::get("/")).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_non_get_never_matches() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path(), "test");
        let get = Request::get("/api/data");
        cache.put(&get, Response::new(200).with_body("x")).await.unwrap();

        let mut post = Request::get("/api/data");
        post.method = "POST".to_string();
        assert!(cache.match_request(&post).is_none());
        assert!(cache.match_request(&get).is_some());
    }

    #[tokio::test]
    async fn test_put_rejects_non_get() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path(), "test");
        let mut post = Request::get("/api/data");
        post.method = "POST".to_string();
        let err = cache.put(&post, Response::new(200)).await.unwrap_err();
        assert!(err.to_string().contains("POST"));
    }

    #[tokio::test]
    async fn test_query_string_is_part_of_identity() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path(), "test");
        let with_query = Request::get("/search?q=bach");
        cache
            .put(&with_query, Response::new(200).with_body("results"))
            .await
            .unwrap();

        assert!(cache.match_request(&with_query).is_some());
        assert!(cache.match_request(&Request::get("/search")).is_none());
        assert!(cache.match_request(&Request::get("/search?q=handel")).is_none());
    }

    #[tokio::test]
    async fn test_vary_header_filters_matches() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path(), "test");
        let stored_req = get_with_headers("/page", &[("Accept", "text/html")]);
        let resp = Response::new(200)
            .with_header("Vary", "Accept")
            .with_body("<html>");
        cache.put(&stored_req, resp).await.unwrap();

        let same = get_with_headers("/page", &[("Accept", "text/html")]);
        let different = get_with_headers("/page", &[("Accept", "application/json")]);
        assert!(cache.match_request(&same).is_some());
        assert!(cache.match_request(&different).is_none());
    }

    #[tokio::test]
    async fn test_vary_star_never_matches() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path(), "test");
        let req = Request::get("/volatile");
        let resp = Response::new(200).with_header("Vary", "*").with_body("x");
        cache.put(&req, resp).await.unwrap();
        assert!(cache.match_request(&req).is_none());
    }

    #[tokio::test]
    async fn test_add_all_stores_every_path() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path(), "precache");
        let mock = MockFetchClient::serving_precache_assets();
        cache.add_all(&mock, &PRECACHE_ASSETS).await.unwrap();

        assert_eq!(cache.len(), PRECACHE_ASSETS.len());
        for path in PRECACHE_ASSETS {
            assert!(cache.contains(path), "{path} should be cached");
        }
        assert_eq!(mock.fetch_count(), PRECACHE_ASSETS.len());
    }

    #[tokio::test]
    async fn test_add_all_transport_failure_is_all_or_nothing() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path(), "precache");
        let mock = MockFetchClient::serving_precache_assets().failing_url("/static/js/main.js");

        let err = cache.add_all(&mock, &PRECACHE_ASSETS).await.unwrap_err();
        assert!(err.to_string().contains("/static/js/main.js"));
        assert!(cache.is_empty(), "no entry may survive a failed batch");
    }

    #[tokio::test]
    async fn test_add_all_http_error_is_all_or_nothing() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path(), "precache");
        let mock = MockFetchClient::serving_precache_assets().with_status("/static/img/book.svg", 500);

        let err = cache.add_all(&mock, &PRECACHE_ASSETS).await.unwrap_err();
        assert!(err.to_string().contains("500"));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_add_all_overwrites_in_place() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path(), "precache");
        let mock = MockFetchClient::serving_precache_assets();
        cache.add_all(&mock, &PRECACHE_ASSETS).await.unwrap();
        cache.add_all(&mock, &PRECACHE_ASSETS).await.unwrap();
        assert_eq!(cache.len(), PRECACHE_ASSETS.len(), "no duplicates after re-run");
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let cache = Cache::open(dir.path(), "persist");
            let req = Request::get("/static/js/main.js");
            cache
                .put(&req, Response::new(200).with_body("console.log(1)"))
                .await
                .unwrap();
        }
        let reopened = Cache::open(dir.path(), "persist");
        assert_eq!(reopened.len(), 1);
        let hit = reopened
            .match_request(&Request::get("/static/js/main.js"))
            .expect("entry should survive reopen");
        let body = hit.body.bytes().await.unwrap();
        assert_eq!(&body[..], b"console.log(1)");
    }

    #[tokio::test]
    async fn test_reopen_preserves_created_at() {
        let dir = tempdir().unwrap();
        let created = {
            let cache = Cache::open(dir.path(), "stamped");
            cache
                .put(&Request::get("/"), Response::new(200))
                .await
                .unwrap();
            cache.created_at()
        };
        let reopened = Cache::open(dir.path(), "stamped");
        assert_eq!(reopened.created_at(), created);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let cache = Cache::open(dir.path(), "broken");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_put_reports_snapshot_write_failure() {
        let dir = tempdir().unwrap();
        // A directory squatting on the snapshot path makes the rename fail.
        std::fs::create_dir_all(dir.path().join("persist.json").join("x")).unwrap();
        let cache = Cache::open(dir.path(), "persist");

        let err = cache
            .put(&Request::get("/"), Response::new(200).with_body("x"))
            .await
            .unwrap_err();
        assert!(
            err.to_string().contains("Failed to save cache"),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn test_add_all_reports_snapshot_write_failure() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("precache.json").join("x")).unwrap();
        let cache = Cache::open(dir.path(), "precache");
        let mock = MockFetchClient::serving_precache_assets();

        let err = cache.add_all(&mock, &PRECACHE_ASSETS).await.unwrap_err();
        assert!(
            err.to_string().contains("Failed to save cache"),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn test_summary_sorted_with_sizes() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path(), "test");
        cache
            .put(&Request::get("/b"), Response::new(200).with_body("four"))
            .await
            .unwrap();
        cache
            .put(&Request::get("/a"), Response::new(200).with_body("xx"))
            .await
            .unwrap();
        let summary = cache.summary();
        assert_eq!(
            summary,
            vec![("/a".to_string(), 2), ("/b".to_string(), 4)]
        );
    }
}
