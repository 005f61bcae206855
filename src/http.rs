//! HTTP request/response types shared by the cache, the fetch client, and
//! the gateway.
//!
//! Requests carry origin-form URLs (path + optional query) — the gateway and
//! the precache list both speak paths, never absolute URLs. Response bodies
//! are either buffered bytes (everything served from cache) or a stream
//! (live origin responses passed through the gateway unbuffered).

use crate::error::Result;
use axum::body::Bytes;
use futures::stream::BoxStream;
use futures::TryStreamExt;

/// An intercepted HTTP request.
///
/// `url` is origin-form and compared exactly by the cache: `/a?x=1` and `/a`
/// are distinct identities.
#[derive(Debug, Clone)]
pub struct Request {
    /// Uppercase HTTP method (`GET`, `POST`, ...).
    pub method: String,
    /// Origin-form URL: path plus optional query string.
    pub url: String,
    /// Header pairs in arrival order. Names keep their original casing;
    /// lookups are case-insensitive.
    pub headers: Vec<(String, String)>,
    /// Buffered request body, if any.
    pub body: Option<Bytes>,
}

impl Request {
    /// Build a bare GET request for the given origin-form URL.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// First value of the named header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }
}

/// Response payload: buffered for cached entries, streamed for live
/// origin responses.
pub enum Body {
    Bytes(Bytes),
    Stream(BoxStream<'static, Result<Bytes>>),
}

impl Body {
    pub fn empty() -> Self {
        Body::Bytes(Bytes::new())
    }

    /// Collect the full body into memory. Buffered bodies return without
    /// copying; streams are drained chunk by chunk.
    pub async fn bytes(self) -> Result<Bytes> {
        match self {
            Body::Bytes(bytes) => Ok(bytes),
            Body::Stream(mut stream) => {
                let mut buf = Vec::new();
                while let Some(chunk) = stream.try_next().await? {
                    buf.extend_from_slice(&chunk);
                }
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Bytes(b) => write!(f, "Body::Bytes({} bytes)", b.len()),
            Body::Stream(_) => write!(f, "Body::Stream"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::Bytes(Bytes::from_static(s.as_bytes()))
    }
}

/// An HTTP response as seen by the worker: status and headers verbatim from
/// the origin (or from the cache), body per [`Body`].
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl Response {
    /// Build a response with an empty body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::empty(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of the named header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// Consume the response, draining a streamed body into buffered bytes.
    pub async fn buffered(self) -> Result<Self> {
        let Response {
            status,
            headers,
            body,
        } = self;
        Ok(Response {
            status,
            headers,
            body: Body::Bytes(body.bytes().await?),
        })
    }
}

// ============================================================================
// Header helpers
// ============================================================================

/// First value of the named header in a header list, case-insensitive.
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// All values of the named header joined with `", "`, the combined form
/// used when comparing header-sensitive cache entries. `None` when the
/// header is absent entirely.
pub fn combined_header_value(headers: &[(String, String)], name: &str) -> Option<String> {
    let values: Vec<&str> = headers
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

/// Connection-scoped headers a forwarding hop must not relay (RFC 9110 §7.6.1).
pub fn is_hop_by_hop(name: &str) -> bool {
    name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("keep-alive")
        || name.eq_ignore_ascii_case("proxy-authenticate")
        || name.eq_ignore_ascii_case("proxy-authorization")
        || name.eq_ignore_ascii_case("proxy-connection")
        || name.eq_ignore_ascii_case("te")
        || name.eq_ignore_ascii_case("trailer")
        || name.eq_ignore_ascii_case("transfer-encoding")
        || name.eq_ignore_ascii_case("upgrade")
}

// ============================================================================
// Vary matching
// ============================================================================

/// Whether a stored response's `Vary` header permits serving it for the
/// incoming request.
///
/// Every header named by `Vary` must carry the same combined value on the
/// stored request and the incoming request. `Vary: *` never matches.
pub fn vary_allows_match(
    stored_response_headers: &[(String, String)],
    stored_request_headers: &[(String, String)],
    incoming_headers: &[(String, String)],
) -> bool {
    let vary = match combined_header_value(stored_response_headers, "vary") {
        Some(v) => v,
        None => return true,
    };
    for name in vary.split(',') {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        if name == "*" {
            return false;
        }
        let stored = combined_header_value(stored_request_headers, name);
        let incoming = combined_header_value(incoming_headers, name);
        if stored != incoming {
            return false;
        }
    }
    true
}
