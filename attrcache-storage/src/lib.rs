//! attrcache Storage - Attribute Cache and Lifecycle Invalidation
//!
//! Caches flat attribute projections of records, keyed by a subset of their
//! attributes, and keeps those entries consistent as records are inserted,
//! updated and deleted.
//!
//! # Layers
//!
//! - [`cache`]: key composition, the backend trait, in-memory and LMDB
//!   backends, and the typed [`AttributeCacheStore`]
//! - [`projector`] and [`normalizer`]: record projection and key input
//!   validation
//! - [`RecordCache`]: the per-record-type facade
//! - [`LifecycleInvalidator`]: mutation-driven invalidation
//! - [`find_or_populate`]: load a record through the cache
//!
//! # Example
//!
//! ```ignore
//! let backend = Arc::new(InMemoryCacheBackend::new());
//! let users = RecordCache::<User, _>::new(backend, &AttributeCacheConfig::new())?;
//! let invalidator = LifecycleInvalidator::new(users.clone());
//! record_store.subscribe(Arc::new(invalidator));
//!
//! let user = find_or_populate(&users, &record_store, 7i64, &WriteOptions::new()).await?;
//! ```

pub mod cache;
pub mod lifecycle;
pub mod normalizer;
pub mod populate;
pub mod projector;
pub mod record_cache;

#[cfg(test)]
mod test_support;

pub use cache::{
    AttributeCacheStore, CacheBackend, CacheKey, CacheStats, DependencyToken,
    InMemoryCacheBackend, LmdbCacheBackend, LmdbCacheError, RecordNamespace, WriteOptions,
};
pub use lifecycle::{LifecycleInvalidator, LifecycleState, MutationContext, MutationObserver};
pub use normalizer::{KeyInput, KeyInputNormalizer};
pub use populate::{find_or_populate, RecordLoader};
pub use projector::{project, project_persisted};
pub use record_cache::RecordCache;
