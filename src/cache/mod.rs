//! Named request/response caches with JSON persistence.

pub mod storage;
pub mod store;

pub use storage::CacheStorage;
pub use store::{Cache, CacheEntry, StoredRequest, StoredResponse};
