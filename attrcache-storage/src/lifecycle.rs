//! Lifecycle-driven cache invalidation.
//!
//! The record layer notifies a [`MutationObserver`] around every insert,
//! update and delete. [`LifecycleInvalidator`] snapshots a record's cache key
//! before an update or delete (the old key is unreadable afterwards) and
//! decides afterwards which entries to drop.
//!
//! # State machine
//!
//! ```text
//! Clean --before-update--> PendingUpdate(old key) --after-update--> Clean
//! Clean --before-delete--> PendingDelete(old key) --after-delete--> Clean
//! ```
//!
//! The snapshot lives in a [`MutationContext`] owned by the record layer and
//! scoped to one mutation of one record instance; the invalidator itself is
//! shared and stateless.

use async_trait::async_trait;
use attrcache_core::{
    AttrCacheResult, AttributeMap, MutationEvent, MutationPhase, RecordSchema, TrackedRecord,
};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::cache::{CacheBackend, WriteOptions};
use crate::record_cache::RecordCache;

/// Pending-old-key slot of one mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum LifecycleState {
    #[default]
    Clean,
    PendingUpdate(AttributeMap),
    PendingDelete(AttributeMap),
}

/// Per-instance, per-mutation context passed to every hook.
///
/// The record layer creates one for each observer when a mutation starts and
/// hands the same context to the before and after hooks.
#[derive(Debug, Default)]
pub struct MutationContext {
    state: LifecycleState,
}

impl MutationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn is_clean(&self) -> bool {
        self.state == LifecycleState::Clean
    }

    /// Return the current state and reset to `Clean`.
    fn take(&mut self) -> LifecycleState {
        std::mem::take(&mut self.state)
    }
}

/// Receiver of record mutation notifications.
///
/// # Ordering
///
/// Before-hooks run before the write is attempted. After-hooks run only
/// once the write has committed; the record layer must not fire them for a
/// failed or rolled-back write.
#[async_trait]
pub trait MutationObserver<R: RecordSchema>: Send + Sync {
    async fn on_mutation(
        &self,
        record: &TrackedRecord<R>,
        context: &mut MutationContext,
        event: &MutationEvent,
    ) -> AttrCacheResult<()>;
}

/// Keeps cached projections of `R` consistent with its lifecycle.
pub struct LifecycleInvalidator<R: RecordSchema, C: CacheBackend> {
    cache: RecordCache<R, C>,
}

impl<R: RecordSchema, C: CacheBackend> LifecycleInvalidator<R, C> {
    pub fn new(cache: RecordCache<R, C>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &RecordCache<R, C> {
        &self.cache
    }

    // ========================================================================
    // OWN-RECORD SURFACE
    // ========================================================================
    //
    // Each method is a no-op returning `None`/`false` for an unsaved record
    // and never reaches the backend in that case.

    /// Read this record's cached projection.
    pub async fn get<V: DeserializeOwned>(&self, record: &TrackedRecord<R>) -> AttrCacheResult<Option<V>> {
        match self.cache.cache_key_of(record)? {
            Some(key) => self.cache.get(&key).await,
            None => Ok(None),
        }
    }

    pub async fn exists(&self, record: &TrackedRecord<R>) -> AttrCacheResult<bool> {
        match self.cache.cache_key_of(record)? {
            Some(key) => self.cache.exists(&key).await,
            None => Ok(false),
        }
    }

    /// Cache this record's persisted value projection, overwriting.
    pub async fn set(&self, record: &TrackedRecord<R>, options: &WriteOptions) -> AttrCacheResult<bool> {
        match self.own_entry(record)? {
            Some((key, value)) => self.cache.set(&key, &value, options).await,
            None => Ok(false),
        }
    }

    /// Cache this record's persisted value projection unless an entry exists.
    pub async fn add(&self, record: &TrackedRecord<R>, options: &WriteOptions) -> AttrCacheResult<bool> {
        match self.own_entry(record)? {
            Some((key, value)) => self.cache.add(&key, &value, options).await,
            None => Ok(false),
        }
    }

    pub async fn delete(&self, record: &TrackedRecord<R>) -> AttrCacheResult<bool> {
        match self.cache.cache_key_of(record)? {
            Some(key) => self.cache.delete(&key).await,
            None => Ok(false),
        }
    }

    fn own_entry(&self, record: &TrackedRecord<R>) -> AttrCacheResult<Option<(AttributeMap, AttributeMap)>> {
        let key = self.cache.cache_key_of(record)?;
        let value = self.cache.cache_value_of(record)?;
        Ok(key.zip(value))
    }

    // ========================================================================
    // HOOKS
    // ========================================================================

    async fn after_insert(&self, record: &TrackedRecord<R>) -> AttrCacheResult<()> {
        debug!(record_type = R::RECORD_TYPE, "Delete cache after insert");
        self.delete(record).await?;
        Ok(())
    }

    fn snapshot(&self, record: &TrackedRecord<R>, context: &mut MutationContext, phase: MutationPhase) -> AttrCacheResult<()> {
        if !context.is_clean() {
            warn!(
                record_type = R::RECORD_TYPE,
                ?phase,
                state = ?context.state(),
                "Overwriting unconsumed cache key snapshot"
            );
        }
        context.state = match self.cache.cache_key_of(record)? {
            Some(key) if phase == MutationPhase::BeforeDelete => LifecycleState::PendingDelete(key),
            Some(key) => LifecycleState::PendingUpdate(key),
            None => LifecycleState::Clean,
        };
        Ok(())
    }

    async fn after_update(
        &self,
        record: &TrackedRecord<R>,
        context: &mut MutationContext,
        event: &MutationEvent,
    ) -> AttrCacheResult<()> {
        let pending = context.take();

        if event.touches(self.cache.key_attributes()) {
            match pending {
                LifecycleState::PendingUpdate(old_key) => {
                    debug!(record_type = R::RECORD_TYPE, old_key = ?old_key, "Delete old cache after update");
                    self.cache.delete(&old_key).await?;
                }
                other => warn!(
                    record_type = R::RECORD_TYPE,
                    state = ?other,
                    "Key attributes changed without an old key snapshot"
                ),
            }
            debug!(record_type = R::RECORD_TYPE, "Delete new cache after update");
            self.delete(record).await?;
        } else if event.touches(self.cache.value_attributes()) {
            debug!(record_type = R::RECORD_TYPE, "Delete cache after update");
            self.delete(record).await?;
        }

        Ok(())
    }

    async fn after_delete(&self, context: &mut MutationContext) -> AttrCacheResult<()> {
        match context.take() {
            LifecycleState::PendingDelete(old_key) => {
                debug!(record_type = R::RECORD_TYPE, old_key = ?old_key, "Delete cache after delete");
                self.cache.delete(&old_key).await?;
            }
            other => warn!(
                record_type = R::RECORD_TYPE,
                state = ?other,
                "Record deleted without an old key snapshot"
            ),
        }
        Ok(())
    }
}

#[async_trait]
impl<R: RecordSchema, C: CacheBackend> MutationObserver<R> for LifecycleInvalidator<R, C> {
    async fn on_mutation(
        &self,
        record: &TrackedRecord<R>,
        context: &mut MutationContext,
        event: &MutationEvent,
    ) -> AttrCacheResult<()> {
        match event.phase {
            MutationPhase::AfterInsert => self.after_insert(record).await,
            MutationPhase::BeforeUpdate | MutationPhase::BeforeDelete => {
                self.snapshot(record, context, event.phase)
            }
            MutationPhase::AfterUpdate => self.after_update(record, context, event).await,
            MutationPhase::AfterDelete => self.after_delete(context).await,
        }
    }
}

impl<R: RecordSchema, C: CacheBackend> Clone for LifecycleInvalidator<R, C> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBackend, CacheKey, CacheStats, DependencyToken, InMemoryCacheBackend};
    use crate::test_support::Member;
    use attrcache_core::AttributeCacheConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn invalidator(config: AttributeCacheConfig) -> LifecycleInvalidator<Member, InMemoryCacheBackend> {
        let cache = RecordCache::new(Arc::new(InMemoryCacheBackend::new()), &config).unwrap();
        LifecycleInvalidator::new(cache)
    }

    fn by_id(id: i64) -> AttributeMap {
        AttributeMap::new().with("id", id)
    }

    /// Drive one update through the hooks the way a record layer would.
    async fn update<C: CacheBackend>(
        invalidator: &LifecycleInvalidator<Member, C>,
        record: &mut TrackedRecord<Member>,
        edit: impl FnOnce(&mut Member),
    ) {
        let mut context = MutationContext::new();
        invalidator
            .on_mutation(record, &mut context, &MutationEvent::before_update())
            .await
            .unwrap();
        edit(record.current_mut());
        let changed = record.mark_persisted();
        invalidator
            .on_mutation(record, &mut context, &MutationEvent::after_update(changed))
            .await
            .unwrap();
        assert!(context.is_clean());
    }

    #[tokio::test]
    async fn test_after_insert_purges_prepopulated_entry() {
        let invalidator = invalidator(AttributeCacheConfig::new());
        let cache = invalidator.cache();
        cache.set(&by_id(7), "stale", &WriteOptions::new()).await.unwrap();

        let mut record = TrackedRecord::new(Member::new(7, "g@example.com", "Grace"));
        record.mark_persisted();
        invalidator
            .on_mutation(&record, &mut MutationContext::new(), &MutationEvent::after_insert())
            .await
            .unwrap();

        assert!(!cache.exists(&by_id(7)).await.unwrap());
    }

    #[tokio::test]
    async fn test_value_change_drops_entry() {
        let invalidator = invalidator(AttributeCacheConfig::new());
        let mut record = TrackedRecord::loaded(Member::new(1, "a@example.com", "A"));
        assert!(invalidator.set(&record, &WriteOptions::new()).await.unwrap());

        update(&invalidator, &mut record, |m| m.name = "B".to_string()).await;

        assert!(!invalidator.exists(&record).await.unwrap());
        assert!(invalidator.get::<AttributeMap>(&record).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_key_change_drops_old_and_new_entries() {
        let invalidator = invalidator(AttributeCacheConfig::new().with_key_attributes(["id", "org"]));
        let cache = invalidator.cache();
        let mut member = Member::new(1, "a@example.com", "A");
        member.org = Some(2);
        let mut record = TrackedRecord::loaded(member);

        let old_key = AttributeMap::new().with("id", 1i64).with("org", 2i64);
        let new_key = AttributeMap::new().with("id", 3i64).with("org", 2i64);
        invalidator.set(&record, &WriteOptions::new()).await.unwrap();
        // Another writer pre-populated the new key.
        cache.set(&new_key, "dirty", &WriteOptions::new()).await.unwrap();

        update(&invalidator, &mut record, |m| m.id = 3).await;

        assert!(!cache.exists(&old_key).await.unwrap());
        assert!(!cache.exists(&new_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_unrelated_change_keeps_entry() {
        let invalidator = invalidator(AttributeCacheConfig::new().with_value_attributes(["id", "name"]));
        let mut record = TrackedRecord::loaded(Member::new(1, "a@example.com", "A"));
        invalidator.set(&record, &WriteOptions::new()).await.unwrap();

        update(&invalidator, &mut record, |m| m.email = "b@example.com".to_string()).await;

        assert!(invalidator.exists(&record).await.unwrap());
    }

    #[tokio::test]
    async fn test_overlapping_attribute_takes_key_branch() {
        // `email` is both a key and a value attribute.
        let invalidator = invalidator(
            AttributeCacheConfig::new()
                .with_key_attributes(["email"])
                .with_value_attributes(["email", "name"]),
        );
        let cache = invalidator.cache();
        let mut record = TrackedRecord::loaded(Member::new(1, "a@example.com", "A"));
        invalidator.set(&record, &WriteOptions::new()).await.unwrap();

        update(&invalidator, &mut record, |m| m.email = "b@example.com".to_string()).await;

        assert!(!cache
            .exists(&AttributeMap::new().with("email", "a@example.com"))
            .await
            .unwrap());
        assert!(!invalidator.exists(&record).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_uses_snapshot() {
        let invalidator = invalidator(AttributeCacheConfig::new());
        let cache = invalidator.cache();
        let mut record = TrackedRecord::loaded(Member::new(5, "e@example.com", "E"));
        invalidator.set(&record, &WriteOptions::new()).await.unwrap();

        let mut context = MutationContext::new();
        invalidator
            .on_mutation(&record, &mut context, &MutationEvent::before_delete())
            .await
            .unwrap();
        assert_eq!(context.state(), &LifecycleState::PendingDelete(by_id(5)));

        record.mark_deleted();
        invalidator
            .on_mutation(&record, &mut context, &MutationEvent::after_delete())
            .await
            .unwrap();

        assert!(context.is_clean());
        assert!(!cache.exists(&by_id(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_reads_persisted_key() {
        let invalidator = invalidator(AttributeCacheConfig::new());
        let mut record = TrackedRecord::loaded(Member::new(1, "a@example.com", "A"));
        record.current_mut().id = 99;

        let mut context = MutationContext::new();
        invalidator
            .on_mutation(&record, &mut context, &MutationEvent::before_update())
            .await
            .unwrap();
        assert_eq!(context.state(), &LifecycleState::PendingUpdate(by_id(1)));
    }

    #[tokio::test]
    async fn test_after_delete_without_snapshot_is_harmless() {
        let invalidator = invalidator(AttributeCacheConfig::new());
        let cache = invalidator.cache();
        cache.set(&by_id(1), "kept", &WriteOptions::new()).await.unwrap();

        let record = TrackedRecord::loaded(Member::new(1, "a@example.com", "A"));
        invalidator
            .on_mutation(&record, &mut MutationContext::new(), &MutationEvent::after_delete())
            .await
            .unwrap();

        assert!(cache.exists(&by_id(1)).await.unwrap());
    }

    /// Backend that counts every call and stores nothing.
    #[derive(Default)]
    struct CountingBackend {
        calls: AtomicUsize,
    }

    impl CountingBackend {
        fn hit(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CacheBackend for CountingBackend {
        async fn exists(&self, _key: &CacheKey) -> AttrCacheResult<bool> {
            self.hit();
            Ok(false)
        }
        async fn get(&self, _key: &CacheKey) -> AttrCacheResult<Option<Vec<u8>>> {
            self.hit();
            Ok(None)
        }
        async fn set(
            &self,
            _key: &CacheKey,
            _value: Vec<u8>,
            _ttl: Option<Duration>,
            _dependency: Option<&DependencyToken>,
        ) -> AttrCacheResult<bool> {
            self.hit();
            Ok(true)
        }
        async fn add(
            &self,
            _key: &CacheKey,
            _value: Vec<u8>,
            _ttl: Option<Duration>,
            _dependency: Option<&DependencyToken>,
        ) -> AttrCacheResult<bool> {
            self.hit();
            Ok(true)
        }
        async fn delete(&self, _key: &CacheKey) -> AttrCacheResult<bool> {
            self.hit();
            Ok(false)
        }
        async fn invalidate_dependency(&self, _token: &DependencyToken) -> AttrCacheResult<u64> {
            self.hit();
            Ok(0)
        }
        async fn stats(&self) -> AttrCacheResult<CacheStats> {
            Ok(CacheStats::default())
        }
    }

    #[tokio::test]
    async fn test_unsaved_record_never_touches_backend() {
        let backend = Arc::new(CountingBackend::default());
        let cache = RecordCache::<Member, _>::new(Arc::clone(&backend), &AttributeCacheConfig::new()).unwrap();
        let invalidator = LifecycleInvalidator::new(cache);
        let record = TrackedRecord::new(Member::new(1, "a@example.com", "A"));

        assert!(invalidator.get::<AttributeMap>(&record).await.unwrap().is_none());
        assert!(!invalidator.exists(&record).await.unwrap());
        assert!(!invalidator.set(&record, &WriteOptions::new()).await.unwrap());
        assert!(!invalidator.add(&record, &WriteOptions::new()).await.unwrap());
        assert!(!invalidator.delete(&record).await.unwrap());

        let mut context = MutationContext::new();
        invalidator
            .on_mutation(&record, &mut context, &MutationEvent::before_update())
            .await
            .unwrap();
        assert!(context.is_clean());

        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
