//! Cache backend trait and supporting types.
//!
//! This module defines the contract the attribute cache requires from a
//! key/value cache service. Storage, eviction and expiry are the backend's
//! business; the store only issues the calls below.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use attrcache_core::AttrCacheResult;
use serde::{Deserialize, Serialize};

use super::key::CacheKey;

/// Opaque invalidation condition attached to a cache entry.
///
/// The attribute cache never interprets a token. Backends shipped with this
/// crate treat it as a tag: invalidating a token drops every entry written
/// with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyToken(String);

impl DependencyToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DependencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache backend trait for pluggable cache implementations.
///
/// Implementations must be safe for concurrent use; the attribute cache
/// adds no locking of its own.
///
/// # Values
///
/// Values are opaque bytes. Serialization is done by the caller.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Whether a live entry exists for `key`.
    async fn exists(&self, key: &CacheKey) -> AttrCacheResult<bool>;

    /// Read an entry. `None` means no live entry.
    async fn get(&self, key: &CacheKey) -> AttrCacheResult<Option<Vec<u8>>>;

    /// Unconditional write. Returns whether the backend accepted it.
    ///
    /// `ttl` of `None` means the entry does not expire.
    async fn set(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Option<Duration>,
        dependency: Option<&DependencyToken>,
    ) -> AttrCacheResult<bool>;

    /// Write only if no live entry exists. Returns `false` and leaves the
    /// existing entry untouched otherwise.
    async fn add(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Option<Duration>,
        dependency: Option<&DependencyToken>,
    ) -> AttrCacheResult<bool>;

    /// Remove an entry. Returns whether a live entry was removed.
    async fn delete(&self, key: &CacheKey) -> AttrCacheResult<bool>;

    /// Drop every entry written with `token`. Returns the number removed.
    async fn invalidate_dependency(&self, token: &DependencyToken) -> AttrCacheResult<u64>;

    /// Get cache statistics.
    async fn stats(&self) -> AttrCacheResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate stored value size in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped because they expired.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
