//! On-disk byte cache for raw feed payloads.
//!
//! One file per URL under a configurable root directory. The file's
//! modification time is the only freshness signal, so there is no index
//! or metadata to keep in sync.

mod store;

pub use store::{cache_key, CacheError, CacheStore, CachedFeed};
