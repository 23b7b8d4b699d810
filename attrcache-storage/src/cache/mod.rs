//! Cache layer: key composition, backends and the generic store.
//!
//! Keys are built by [`CacheKey`] and always carry a [`RecordNamespace`], so
//! record types sharing one backend cannot collide. [`AttributeCacheStore`]
//! adds typed payloads, default durations and the backend failure policy on
//! top of any [`CacheBackend`].
//!
//! # Example
//!
//! ```ignore
//! let backend = Arc::new(InMemoryCacheBackend::new());
//! let store = AttributeCacheStore::new(backend, RecordNamespace::new("users"));
//!
//! let key = store.key(&AttributeMap::new().with("id", 7i64));
//! store.add(&key, &projection, &WriteOptions::new()).await?;
//! let cached: Option<AttributeMap> = store.get(&key).await?;
//! ```

pub mod key;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod store;
pub mod traits;

pub use key::{CacheKey, RecordNamespace};
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory_backend::InMemoryCacheBackend;
pub use store::{AttributeCacheStore, WriteOptions};
pub use traits::{CacheBackend, CacheStats, DependencyToken};
