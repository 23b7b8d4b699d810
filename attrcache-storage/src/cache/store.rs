//! Generic attribute cache primitives.
//!
//! `AttributeCacheStore` turns typed values into backend calls: it builds
//! namespaced keys, serializes payloads as JSON, applies the default
//! duration, and applies the configured [`BackendFailurePolicy`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use attrcache_core::{
    AttrCacheError, AttrCacheResult, AttributeMap, BackendError, BackendFailurePolicy,
    ResolvedCacheConfig,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::key::{CacheKey, RecordNamespace};
use super::traits::{CacheBackend, CacheStats, DependencyToken};

/// Per-call write options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Entry lifetime. `None` falls back to the store default; a zero
    /// duration means the entry never expires.
    pub duration: Option<Duration>,
    /// Opaque invalidation condition handed to the backend.
    pub dependency: Option<DependencyToken>,
}

impl WriteOptions {
    /// Options that defer entirely to the store defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an explicit duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Attach a dependency token.
    pub fn with_dependency(mut self, dependency: DependencyToken) -> Self {
        self.dependency = Some(dependency);
        self
    }
}

/// Cache primitives over one record-type namespace.
///
/// # Type Parameters
///
/// - `C`: The cache backend holding the entries
///
/// # Atomicity
///
/// Every operation is one backend round trip except
/// [`get_or_set`](Self::get_or_set), which reads then writes. Concurrent
/// `get_or_set` calls on the same missing key may each run their supplier;
/// the last write wins.
pub struct AttributeCacheStore<C: CacheBackend> {
    backend: Arc<C>,
    namespace: RecordNamespace,
    default_duration: Option<Duration>,
    failure_policy: BackendFailurePolicy,
}

impl<C: CacheBackend> AttributeCacheStore<C> {
    /// Create a store with no default duration and the `Propagate` policy.
    pub fn new(backend: Arc<C>, namespace: RecordNamespace) -> Self {
        Self {
            backend,
            namespace,
            default_duration: None,
            failure_policy: BackendFailurePolicy::Propagate,
        }
    }

    /// Create a store from a resolved record-type configuration.
    pub fn from_config(backend: Arc<C>, config: &ResolvedCacheConfig) -> Self {
        Self {
            backend,
            namespace: RecordNamespace::from_segments(config.namespace.iter().cloned()),
            default_duration: config.default_duration,
            failure_policy: config.backend_failure_policy,
        }
    }

    /// Set the duration applied when a write omits one.
    pub fn with_default_duration(mut self, duration: Duration) -> Self {
        self.default_duration = if duration.is_zero() { None } else { Some(duration) };
        self
    }

    pub fn with_failure_policy(mut self, policy: BackendFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn backend(&self) -> &C {
        &self.backend
    }

    pub fn namespace(&self) -> &RecordNamespace {
        &self.namespace
    }

    pub fn default_duration(&self) -> Option<Duration> {
        self.default_duration
    }

    pub fn failure_policy(&self) -> BackendFailurePolicy {
        self.failure_policy
    }

    /// Key for already-normalized key-attribute values.
    pub fn key(&self, key_values: &AttributeMap) -> CacheKey {
        CacheKey::build(&self.namespace, key_values)
    }

    /// Free-form key inside this store's namespace.
    pub fn labeled_key(&self, label: &str) -> CacheKey {
        CacheKey::labeled(&self.namespace, label)
    }

    pub async fn exists(&self, key: &CacheKey) -> AttrCacheResult<bool> {
        let result = self.backend.exists(key).await;
        self.absorb_read_failure("exists", key, result, false)
    }

    /// Read and decode an entry. `Ok(None)` means no entry, which is
    /// distinct from an entry holding a falsy value.
    pub async fn get<V: DeserializeOwned>(&self, key: &CacheKey) -> AttrCacheResult<Option<V>> {
        let result = match self.backend.get(key).await {
            Ok(Some(bytes)) => decode(&bytes).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        self.absorb_read_failure("get", key, result, None)
    }

    /// Unconditional write.
    pub async fn set<V: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &V,
        options: &WriteOptions,
    ) -> AttrCacheResult<bool> {
        let bytes = encode(value)?;
        self.backend
            .set(key, bytes, self.ttl_for(options), options.dependency.as_ref())
            .await
    }

    /// Write only if no entry exists. Returns `false` and leaves the
    /// existing entry untouched otherwise.
    pub async fn add<V: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &V,
        options: &WriteOptions,
    ) -> AttrCacheResult<bool> {
        let bytes = encode(value)?;
        self.backend
            .add(key, bytes, self.ttl_for(options), options.dependency.as_ref())
            .await
    }

    /// Returns whether an entry was removed.
    pub async fn delete(&self, key: &CacheKey) -> AttrCacheResult<bool> {
        self.backend.delete(key).await
    }

    /// Return the cached value, or run `supplier` and cache what it returns.
    ///
    /// A supplier returning `Ok(None)` means "do not cache" (for example the
    /// record does not exist); nothing is written and `Ok(None)` is returned.
    pub async fn get_or_set<V, F, Fut>(
        &self,
        key: &CacheKey,
        supplier: F,
        options: &WriteOptions,
    ) -> AttrCacheResult<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AttrCacheResult<Option<V>>>,
    {
        if let Some(cached) = self.get::<V>(key).await? {
            return Ok(Some(cached));
        }

        match supplier().await? {
            Some(value) => {
                self.set(key, &value, options).await?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Drop every entry written with `token`.
    pub async fn invalidate_dependency(&self, token: &DependencyToken) -> AttrCacheResult<u64> {
        self.backend.invalidate_dependency(token).await
    }

    pub async fn stats(&self) -> AttrCacheResult<CacheStats> {
        self.backend.stats().await
    }

    fn ttl_for(&self, options: &WriteOptions) -> Option<Duration> {
        match options.duration {
            Some(duration) if duration.is_zero() => None,
            Some(duration) => Some(duration),
            None => self.default_duration,
        }
    }

    fn absorb_read_failure<T>(
        &self,
        operation: &'static str,
        key: &CacheKey,
        result: AttrCacheResult<T>,
        miss: T,
    ) -> AttrCacheResult<T> {
        match result {
            Err(e) if e.is_backend() && self.failure_policy == BackendFailurePolicy::TreatAsMiss => {
                tracing::warn!(
                    operation,
                    key = %key,
                    error = %e,
                    "Cache backend failure treated as miss"
                );
                Ok(miss)
            }
            other => other,
        }
    }
}

impl<C: CacheBackend> Clone for AttributeCacheStore<C> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            namespace: self.namespace.clone(),
            default_duration: self.default_duration,
            failure_policy: self.failure_policy,
        }
    }
}

fn encode<V: Serialize + ?Sized>(value: &V) -> AttrCacheResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        AttrCacheError::from(BackendError::Serialization {
            reason: e.to_string(),
        })
    })
}

fn decode<V: DeserializeOwned>(bytes: &[u8]) -> AttrCacheResult<V> {
    serde_json::from_slice(bytes).map_err(|e| {
        AttrCacheError::from(BackendError::Deserialization {
            reason: e.to_string(),
        })
    })
}
