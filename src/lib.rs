//! Offline-first caching gateway for the Carolus web UI.
//!
//! Sits between an HTTP client and the Carolus origin server. At startup
//! an install phase precaches a fixed set of UI assets into a named,
//! disk-backed cache; from then on every GET for one of those assets is
//! answered locally and everything else is forwarded to the origin
//! unchanged. If the origin is unreachable during install, the gateway
//! keeps serving as a transparent proxy and retries in the background.
//!
//! The moving parts:
//! - [`events`] — install/fetch event dispatch between host and worker
//! - [`worker`] — the offline worker: precache list plus cache-first lookup
//! - [`cache`] — named caches with JSON snapshots on disk
//! - [`fetch`] — origin HTTP client
//! - [`runtime`] — install orchestration and request routing
//! - [`gateway`] — the axum listener fronting everything
//! - [`health`] — health endpoints and usage metrics

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod gateway;
pub mod health;
pub mod http;
pub mod runtime;
pub mod worker;

pub use error::{OfflineError, Result};
