//! In-process cache backend.
//!
//! Entries live in a `HashMap` behind a tokio `RwLock`. Expiry is checked
//! lazily: an expired entry is dropped (and counted as an eviction) the
//! next time it is touched. `add` checks and writes under one write lock,
//! so it is atomic with respect to other callers of this backend.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use attrcache_core::AttrCacheResult;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::key::CacheKey;
use super::traits::{CacheBackend, CacheStats, DependencyToken};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
    dependency: Option<DependencyToken>,
}

impl Entry {
    fn new(value: Vec<u8>, ttl: Option<Duration>, dependency: Option<&DependencyToken>) -> Self {
        Self {
            value,
            expires_at: expiry_from(Utc::now(), ttl),
            dependency: dependency.cloned(),
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Expiry instant for a TTL; `None` (never) if the TTL is absent or too large.
pub(crate) fn expiry_from(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl?).ok()?;
    now.checked_add_signed(ttl)
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<CacheKey, Entry>,
    stats: CacheStats,
}

impl State {
    /// Drop `key` if it has expired. Returns the live entry, if any.
    fn live(&mut self, key: &CacheKey, now: DateTime<Utc>) -> Option<&Entry> {
        let expired = self.entries.get(key).is_some_and(|e| !e.is_live(now));
        if expired {
            self.remove(key);
            self.stats.evictions += 1;
        }
        self.entries.get(key)
    }

    fn insert(&mut self, key: &CacheKey, entry: Entry) {
        let size = entry.value.len() as u64;
        match self.entries.insert(key.clone(), entry) {
            Some(old) => {
                self.stats.memory_bytes = self
                    .stats
                    .memory_bytes
                    .saturating_sub(old.value.len() as u64);
            }
            None => self.stats.entry_count += 1,
        }
        self.stats.memory_bytes += size;
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Entry> {
        let removed = self.entries.remove(key)?;
        self.stats.entry_count = self.stats.entry_count.saturating_sub(1);
        self.stats.memory_bytes = self
            .stats
            .memory_bytes
            .saturating_sub(removed.value.len() as u64);
        Some(removed)
    }
}

/// In-memory cache backend.
///
/// Suitable for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    state: RwLock<State>,
}

impl InMemoryCacheBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including any not yet found to be expired.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove every entry.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.stats.entry_count = 0;
        state.stats.memory_bytes = 0;
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn exists(&self, key: &CacheKey) -> AttrCacheResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.live(key, Utc::now()).is_some())
    }

    async fn get(&self, key: &CacheKey) -> AttrCacheResult<Option<Vec<u8>>> {
        let mut state = self.state.write().await;
        let value = state.live(key, Utc::now()).map(|e| e.value.clone());
        if value.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        Ok(value)
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Option<Duration>,
        dependency: Option<&DependencyToken>,
    ) -> AttrCacheResult<bool> {
        let mut state = self.state.write().await;
        state.insert(key, Entry::new(value, ttl, dependency));
        Ok(true)
    }

    async fn add(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Option<Duration>,
        dependency: Option<&DependencyToken>,
    ) -> AttrCacheResult<bool> {
        let mut state = self.state.write().await;
        if state.live(key, Utc::now()).is_some() {
            return Ok(false);
        }
        state.insert(key, Entry::new(value, ttl, dependency));
        Ok(true)
    }

    async fn delete(&self, key: &CacheKey) -> AttrCacheResult<bool> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        Ok(state.remove(key).is_some_and(|e| e.is_live(now)))
    }

    async fn invalidate_dependency(&self, token: &DependencyToken) -> AttrCacheResult<u64> {
        let mut state = self.state.write().await;
        let keys: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, e)| e.dependency.as_ref() == Some(token))
            .map(|(k, _)| k.clone())
            .collect();

        let mut deleted = 0u64;
        for key in &keys {
            if state.remove(key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn stats(&self) -> AttrCacheResult<CacheStats> {
        Ok(self.state.read().await.stats.clone())
    }
}
