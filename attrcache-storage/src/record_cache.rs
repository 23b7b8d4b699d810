//! Per-record-type cache facade.
//!
//! A [`RecordCache`] is built once per record type at startup and passed
//! explicitly to whatever needs it. It pairs an [`AttributeCacheStore`] with
//! the resolved key and value attribute lists.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use attrcache_core::{
    AttrCacheResult, AttributeCacheConfig, AttributeMap, RecordSchema, ResolvedCacheConfig,
    TrackedRecord,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::{AttributeCacheStore, CacheBackend, CacheKey, WriteOptions};
use crate::normalizer::{KeyInput, KeyInputNormalizer};
use crate::projector::project_persisted;

/// Cache operations for one record type.
///
/// Two surfaces are offered:
/// - `*_by_attribute` methods accept loose [`KeyInput`] and normalize it
/// - the plain methods take an already-normalized key map, such as one
///   captured with [`cache_key_of`](Self::cache_key_of) before a long
///   transaction
pub struct RecordCache<R: RecordSchema, C: CacheBackend> {
    store: AttributeCacheStore<C>,
    normalizer: KeyInputNormalizer,
    value_attributes: Vec<String>,
    _record: PhantomData<fn() -> R>,
}

impl<R: RecordSchema, C: CacheBackend> RecordCache<R, C> {
    /// Resolve `config` against `R` and build the cache.
    ///
    /// # Errors
    ///
    /// Any `ConfigError` from [`AttributeCacheConfig::resolve`].
    pub fn new(backend: Arc<C>, config: &AttributeCacheConfig) -> AttrCacheResult<Self> {
        let resolved = config.resolve::<R>()?;
        Ok(Self::from_resolved(backend, &resolved))
    }

    pub fn from_resolved(backend: Arc<C>, config: &ResolvedCacheConfig) -> Self {
        Self {
            store: AttributeCacheStore::from_config(backend, config),
            normalizer: KeyInputNormalizer::new(config.key_attributes.iter().cloned()),
            value_attributes: config.value_attributes.clone(),
            _record: PhantomData,
        }
    }

    pub fn store(&self) -> &AttributeCacheStore<C> {
        &self.store
    }

    pub fn key_attributes(&self) -> &[String] {
        self.normalizer.key_attributes()
    }

    pub fn value_attributes(&self) -> &[String] {
        &self.value_attributes
    }

    /// Validate loose key input and return it as a named map in key order.
    pub fn normalize(&self, input: impl Into<KeyInput>) -> AttrCacheResult<AttributeMap> {
        Ok(self.normalizer.normalize(input)?)
    }

    /// Backend key for a normalized key map.
    pub fn key_for(&self, key_values: &AttributeMap) -> CacheKey {
        self.store.key(key_values)
    }

    /// Persisted key-attribute values of `record`; `None` if unsaved.
    pub fn cache_key_of(&self, record: &TrackedRecord<R>) -> AttrCacheResult<Option<AttributeMap>> {
        project_persisted(record, self.key_attributes())
    }

    /// Persisted value-attribute projection of `record`; `None` if unsaved.
    pub fn cache_value_of(&self, record: &TrackedRecord<R>) -> AttrCacheResult<Option<AttributeMap>> {
        project_persisted(record, &self.value_attributes)
    }

    // ========================================================================
    // NORMALIZED KEY OPERATIONS
    // ========================================================================

    pub async fn exists(&self, key_values: &AttributeMap) -> AttrCacheResult<bool> {
        self.store.exists(&self.key_for(key_values)).await
    }

    pub async fn get<V: DeserializeOwned>(&self, key_values: &AttributeMap) -> AttrCacheResult<Option<V>> {
        self.store.get(&self.key_for(key_values)).await
    }

    pub async fn set<V: Serialize + ?Sized>(
        &self,
        key_values: &AttributeMap,
        value: &V,
        options: &WriteOptions,
    ) -> AttrCacheResult<bool> {
        self.store.set(&self.key_for(key_values), value, options).await
    }

    pub async fn add<V: Serialize + ?Sized>(
        &self,
        key_values: &AttributeMap,
        value: &V,
        options: &WriteOptions,
    ) -> AttrCacheResult<bool> {
        self.store.add(&self.key_for(key_values), value, options).await
    }

    pub async fn delete(&self, key_values: &AttributeMap) -> AttrCacheResult<bool> {
        self.store.delete(&self.key_for(key_values)).await
    }

    pub async fn get_or_set<V, F, Fut>(
        &self,
        key_values: &AttributeMap,
        supplier: F,
        options: &WriteOptions,
    ) -> AttrCacheResult<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AttrCacheResult<Option<V>>>,
    {
        self.store
            .get_or_set(&self.key_for(key_values), supplier, options)
            .await
    }

    // ========================================================================
    // BY-ATTRIBUTE OPERATIONS
    // ========================================================================

    pub async fn exists_by_attribute(&self, input: impl Into<KeyInput>) -> AttrCacheResult<bool> {
        let key_values = self.normalize(input)?;
        self.exists(&key_values).await
    }

    pub async fn get_by_attribute<V: DeserializeOwned>(
        &self,
        input: impl Into<KeyInput>,
    ) -> AttrCacheResult<Option<V>> {
        let key_values = self.normalize(input)?;
        self.get(&key_values).await
    }

    pub async fn set_by_attribute<V: Serialize + ?Sized>(
        &self,
        input: impl Into<KeyInput>,
        value: &V,
        options: &WriteOptions,
    ) -> AttrCacheResult<bool> {
        let key_values = self.normalize(input)?;
        self.set(&key_values, value, options).await
    }

    pub async fn add_by_attribute<V: Serialize + ?Sized>(
        &self,
        input: impl Into<KeyInput>,
        value: &V,
        options: &WriteOptions,
    ) -> AttrCacheResult<bool> {
        let key_values = self.normalize(input)?;
        self.add(&key_values, value, options).await
    }

    pub async fn delete_by_attribute(&self, input: impl Into<KeyInput>) -> AttrCacheResult<bool> {
        let key_values = self.normalize(input)?;
        self.delete(&key_values).await
    }

    pub async fn get_or_set_by_attribute<V, F, Fut>(
        &self,
        input: impl Into<KeyInput>,
        supplier: F,
        options: &WriteOptions,
    ) -> AttrCacheResult<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AttrCacheResult<Option<V>>>,
    {
        let key_values = self.normalize(input)?;
        self.get_or_set(&key_values, supplier, options).await
    }
}

impl<R: RecordSchema, C: CacheBackend> Clone for RecordCache<R, C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            normalizer: self.normalizer.clone(),
            value_attributes: self.value_attributes.clone(),
            _record: PhantomData,
        }
    }
}
