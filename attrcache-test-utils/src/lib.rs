//! attrcache Test Utilities
//!
//! Centralized test infrastructure for the attrcache workspace:
//! - Record fixtures mirroring common key shapes (single, composite, custom)
//! - An in-memory record store that fires mutation events
//! - A failure-injecting cache backend wrapper
//! - Proptest generators for values, maps and records
//! - Custom assertions for attrcache error variants

// Re-export core types for convenience
pub use attrcache_core::{
    AttrCacheError, AttrCacheResult, AttributeCacheConfig, AttributeMap, AttributeValue,
    BackendError, BackendFailurePolicy, ConfigError, FieldReader, KeyInputError, MutationEvent,
    MutationPhase, RecordError, RecordSchema, TrackedRecord,
};
pub use attrcache_storage::{
    find_or_populate, AttributeCacheStore, CacheBackend, CacheKey, CacheStats, DependencyToken,
    InMemoryCacheBackend, KeyInput, KeyInputNormalizer, LifecycleInvalidator, MutationContext,
    MutationObserver, RecordCache, RecordLoader, RecordNamespace, WriteOptions,
};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use attrcache_storage::project;

/// Install a fmt subscriber for test output.
///
/// Honors `RUST_LOG`; defaults to debug output from the storage crate.
/// Safe to call from every test.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("attrcache_storage=debug,warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Record types and cache configurations used across the test suites.

    use super::*;
    use serde::{Deserialize, Serialize};

    fn required_int(attributes: &AttributeMap, record_type: &str, name: &str) -> AttrCacheResult<i64> {
        match attributes.get(name) {
            Some(AttributeValue::Int(value)) => Ok(*value),
            other => Err(ConfigError::InvalidValue {
                field: format!("{record_type}.{name}"),
                value: format!("{other:?}"),
                reason: "expected an integer".to_string(),
            }
            .into()),
        }
    }

    fn optional_int(attributes: &AttributeMap, name: &str) -> Option<i64> {
        match attributes.get(name) {
            Some(AttributeValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    fn text_or_default(attributes: &AttributeMap, name: &str) -> String {
        match attributes.get(name) {
            Some(AttributeValue::Text(value)) => value.clone(),
            _ => String::new(),
        }
    }

    /// Single integer primary key `id`.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct User {
        pub id: i64,
        pub id2: Option<i64>,
        pub name: String,
    }

    impl User {
        pub fn new(id: i64, name: &str) -> Self {
            Self {
                id,
                id2: None,
                name: name.to_string(),
            }
        }
    }

    impl FieldReader for User {
        fn field(&self, name: &str) -> Option<AttributeValue> {
            match name {
                "id" => Some(self.id.into()),
                "id2" => Some(self.id2.into()),
                "name" => Some(self.name.as_str().into()),
                _ => None,
            }
        }
    }

    impl RecordSchema for User {
        const RECORD_TYPE: &'static str = "user";

        fn attribute_names() -> &'static [&'static str] {
            &["id", "id2", "name"]
        }

        fn identity_attributes() -> &'static [&'static str] {
            &["id"]
        }

        fn from_attributes(attributes: &AttributeMap) -> AttrCacheResult<Self> {
            Ok(Self {
                id: required_int(attributes, Self::RECORD_TYPE, "id")?,
                id2: optional_int(attributes, "id2"),
                name: text_or_default(attributes, "name"),
            })
        }
    }

    /// Composite primary key `(id1, id2)`.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CompositeRecord {
        pub id1: i64,
        pub id2: i64,
        pub name: String,
    }

    impl CompositeRecord {
        pub fn new(id1: i64, id2: i64, name: &str) -> Self {
            Self {
                id1,
                id2,
                name: name.to_string(),
            }
        }
    }

    impl FieldReader for CompositeRecord {
        fn field(&self, name: &str) -> Option<AttributeValue> {
            match name {
                "id1" => Some(self.id1.into()),
                "id2" => Some(self.id2.into()),
                "name" => Some(self.name.as_str().into()),
                _ => None,
            }
        }
    }

    impl RecordSchema for CompositeRecord {
        const RECORD_TYPE: &'static str = "composite_record";

        fn attribute_names() -> &'static [&'static str] {
            &["id1", "id2", "name"]
        }

        fn identity_attributes() -> &'static [&'static str] {
            &["id1", "id2"]
        }

        fn from_attributes(attributes: &AttributeMap) -> AttrCacheResult<Self> {
            Ok(Self {
                id1: required_int(attributes, Self::RECORD_TYPE, "id1")?,
                id2: required_int(attributes, Self::RECORD_TYPE, "id2")?,
                name: text_or_default(attributes, "name"),
            })
        }
    }

    /// Primary key `id`, but cached by the unique `name` column and
    /// projecting only `id` and `name`. See [`active_config`].
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ActiveRecord {
        pub id: i64,
        pub name: String,
        pub status: String,
    }

    impl ActiveRecord {
        pub fn new(id: i64, name: &str, status: &str) -> Self {
            Self {
                id,
                name: name.to_string(),
                status: status.to_string(),
            }
        }
    }

    impl FieldReader for ActiveRecord {
        fn field(&self, name: &str) -> Option<AttributeValue> {
            match name {
                "id" => Some(self.id.into()),
                "name" => Some(self.name.as_str().into()),
                "status" => Some(self.status.as_str().into()),
                _ => None,
            }
        }
    }

    impl RecordSchema for ActiveRecord {
        const RECORD_TYPE: &'static str = "active_record";

        fn attribute_names() -> &'static [&'static str] {
            &["id", "name", "status"]
        }

        fn identity_attributes() -> &'static [&'static str] {
            &["id"]
        }

        fn from_attributes(attributes: &AttributeMap) -> AttrCacheResult<Self> {
            Ok(Self {
                id: required_int(attributes, Self::RECORD_TYPE, "id")?,
                name: text_or_default(attributes, "name"),
                status: text_or_default(attributes, "status"),
            })
        }
    }

    /// `User` cache with default key and value attributes.
    pub fn user_config() -> AttributeCacheConfig {
        AttributeCacheConfig::new()
            .with_namespace(["attrcache-tests", "User"])
            .with_default_duration(Duration::from_secs(600))
    }

    /// `CompositeRecord` cache with default key and value attributes.
    pub fn composite_config() -> AttributeCacheConfig {
        AttributeCacheConfig::new()
            .with_namespace(["attrcache-tests", "CompositeRecord"])
            .with_default_duration(Duration::from_secs(600))
    }

    /// `ActiveRecord` cache keyed by `name`, caching `id` and `name` only.
    pub fn active_config() -> AttributeCacheConfig {
        AttributeCacheConfig::new()
            .with_namespace(["attrcache-tests", "ActiveRecord"])
            .with_default_duration(Duration::from_secs(600))
            .with_key_attributes(["name"])
            .with_value_attributes(["id", "name"])
    }

    /// Build a record cache over a fresh in-memory backend.
    pub fn memory_cache<R: RecordSchema>(
        config: &AttributeCacheConfig,
    ) -> AttrCacheResult<RecordCache<R, InMemoryCacheBackend>> {
        RecordCache::new(Arc::new(InMemoryCacheBackend::new()), config)
    }
}

// ============================================================================
// IN-MEMORY RECORD STORE
// ============================================================================

/// Record store that fires mutation events like an ORM would.
///
/// # Event order
///
/// - insert: write, then `AfterInsert`
/// - update: `BeforeUpdate`, write, then `AfterUpdate` with the changed
///   attribute names
/// - delete: `BeforeDelete`, write, then `AfterDelete`
///
/// After-events are not fired when the write fails. Each observer gets its
/// own [`MutationContext`] per mutation.
pub struct InMemoryRecordStore<R: RecordSchema> {
    rows: tokio::sync::RwLock<Vec<R>>,
    observers: RwLock<Vec<Arc<dyn MutationObserver<R>>>>,
    events: Mutex<Vec<MutationEvent>>,
    fail_next_write: AtomicBool,
    queries: AtomicUsize,
}

impl<R: RecordSchema> Default for InMemoryRecordStore<R> {
    fn default() -> Self {
        Self {
            rows: tokio::sync::RwLock::new(Vec::new()),
            observers: RwLock::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            fail_next_write: AtomicBool::new(false),
            queries: AtomicUsize::new(0),
        }
    }
}

impl<R: RecordSchema> InMemoryRecordStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed rows directly, without firing events.
    pub fn with_rows(rows: impl IntoIterator<Item = R>) -> Self {
        Self {
            rows: tokio::sync::RwLock::new(rows.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Register an observer for every subsequent mutation.
    pub fn subscribe(&self, observer: Arc<dyn MutationObserver<R>>) {
        if let Ok(mut observers) = self.observers.write() {
            observers.push(observer);
        }
    }

    /// Make the next write fail after its before-event has fired.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Every event fired so far, in order.
    pub fn events(&self) -> Vec<MutationEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of `find_one` calls served.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Persist a new record and fire `AfterInsert`.
    pub async fn insert(&self, record: &mut TrackedRecord<R>) -> AttrCacheResult<()> {
        let identity = identity_of(record.current())?;
        if !record.is_new_record() {
            return Err(duplicate::<R>(&identity));
        }
        if self.take_failure() {
            return Err(write_failed::<R>("insert"));
        }

        {
            let mut rows = self.rows.write().await;
            if rows.iter().any(|row| matches(row, &identity)) {
                return Err(duplicate::<R>(&identity));
            }
            rows.push(record.current().clone());
        }
        record.mark_persisted();

        let observers = self.observers();
        let mut contexts = fresh_contexts(observers.len());
        self.notify(&observers, &mut contexts, record, MutationEvent::after_insert())
            .await
    }

    /// Persist edits to a loaded record.
    ///
    /// Returns the names of attributes whose persisted value changed. An
    /// update with no changes still fires both events.
    pub async fn update(&self, record: &mut TrackedRecord<R>) -> AttrCacheResult<Vec<String>> {
        let old_identity = match record.persisted() {
            Some(persisted) => identity_of(persisted)?,
            None => return Err(not_persisted::<R>()),
        };
        let new_identity = identity_of(record.current())?;

        let observers = self.observers();
        let mut contexts = fresh_contexts(observers.len());
        self.notify(&observers, &mut contexts, record, MutationEvent::before_update())
            .await?;

        if self.take_failure() {
            return Err(write_failed::<R>("update"));
        }
        {
            let mut rows = self.rows.write().await;
            let index = rows
                .iter()
                .position(|row| matches(row, &old_identity))
                .ok_or_else(|| not_found::<R>(&old_identity))?;
            let collides = rows
                .iter()
                .enumerate()
                .any(|(i, row)| i != index && matches(row, &new_identity));
            if collides {
                return Err(duplicate::<R>(&new_identity));
            }
            rows[index] = record.current().clone();
        }
        let changed = record.mark_persisted();

        self.notify(
            &observers,
            &mut contexts,
            record,
            MutationEvent::after_update(changed.clone()),
        )
        .await?;
        Ok(changed)
    }

    /// Insert a new record or update a loaded one.
    pub async fn save(&self, record: &mut TrackedRecord<R>) -> AttrCacheResult<()> {
        if record.is_new_record() {
            self.insert(record).await
        } else {
            self.update(record).await.map(|_| ())
        }
    }

    /// Remove a loaded record. The record becomes unsaved afterwards.
    pub async fn delete(&self, record: &mut TrackedRecord<R>) -> AttrCacheResult<()> {
        let identity = match record.persisted() {
            Some(persisted) => identity_of(persisted)?,
            None => return Err(not_persisted::<R>()),
        };

        let observers = self.observers();
        let mut contexts = fresh_contexts(observers.len());
        self.notify(&observers, &mut contexts, record, MutationEvent::before_delete())
            .await?;

        if self.take_failure() {
            return Err(write_failed::<R>("delete"));
        }
        {
            let mut rows = self.rows.write().await;
            let index = rows
                .iter()
                .position(|row| matches(row, &identity))
                .ok_or_else(|| not_found::<R>(&identity))?;
            rows.remove(index);
        }
        record.mark_deleted();

        self.notify(&observers, &mut contexts, record, MutationEvent::after_delete())
            .await
    }

    fn observers(&self) -> Vec<Arc<dyn MutationObserver<R>>> {
        self.observers
            .read()
            .map(|o| o.clone())
            .unwrap_or_default()
    }

    fn take_failure(&self) -> bool {
        self.fail_next_write.swap(false, Ordering::SeqCst)
    }

    async fn notify(
        &self,
        observers: &[Arc<dyn MutationObserver<R>>],
        contexts: &mut [MutationContext],
        record: &TrackedRecord<R>,
        event: MutationEvent,
    ) -> AttrCacheResult<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        for (observer, context) in observers.iter().zip(contexts.iter_mut()) {
            observer.on_mutation(record, context, &event).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<R: RecordSchema> RecordLoader<R> for InMemoryRecordStore<R> {
    async fn find_one(&self, condition: &AttributeMap) -> AttrCacheResult<Option<TrackedRecord<R>>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .find(|row| matches(*row, condition))
            .cloned()
            .map(TrackedRecord::loaded))
    }
}

fn identity_of<R: RecordSchema>(record: &R) -> AttrCacheResult<AttributeMap> {
    project(record, R::RECORD_TYPE, R::identity_attributes())
}

/// Row matches when every condition attribute has the same canonical value.
fn matches<R: FieldReader>(row: &R, condition: &AttributeMap) -> bool {
    condition.iter().all(|(name, expected)| {
        row.field(name)
            .is_some_and(|actual| actual.canonical() == expected.canonical())
    })
}

fn fresh_contexts(count: usize) -> Vec<MutationContext> {
    (0..count).map(|_| MutationContext::new()).collect()
}

fn describe(identity: &AttributeMap) -> String {
    identity
        .iter()
        .map(|(name, value)| {
            format!("{name}={}", value.canonical().unwrap_or_else(|| "null".to_string()))
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn duplicate<R: RecordSchema>(identity: &AttributeMap) -> AttrCacheError {
    RecordError::Duplicate {
        record_type: R::RECORD_TYPE.to_string(),
        key: describe(identity),
    }
    .into()
}

fn not_found<R: RecordSchema>(identity: &AttributeMap) -> AttrCacheError {
    RecordError::NotFound {
        record_type: R::RECORD_TYPE.to_string(),
        key: describe(identity),
    }
    .into()
}

fn not_persisted<R: RecordSchema>() -> AttrCacheError {
    RecordError::NotPersisted {
        record_type: R::RECORD_TYPE.to_string(),
    }
    .into()
}

fn write_failed<R: RecordSchema>(operation: &str) -> AttrCacheError {
    tracing::debug!(record_type = R::RECORD_TYPE, operation, "Injected write failure");
    RecordError::WriteFailed {
        record_type: R::RECORD_TYPE.to_string(),
        reason: format!("injected failure during {operation}"),
    }
    .into()
}

// ============================================================================
// FAILURE-INJECTING BACKEND
// ============================================================================

/// Wraps a backend and fails calls on demand.
pub struct FlakyBackend<C: CacheBackend> {
    inner: C,
    failing: AtomicBool,
    failures_remaining: AtomicUsize,
    calls: AtomicUsize,
}

impl<C: CacheBackend> FlakyBackend<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            failures_remaining: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Fail every call until turned off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `count` calls.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Calls received, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &str) -> AttrCacheResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = self.failing.load(Ordering::SeqCst)
            || self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if fail {
            return Err(BackendError::Unavailable {
                reason: format!("injected failure in {operation}"),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl<C: CacheBackend> CacheBackend for FlakyBackend<C> {
    async fn exists(&self, key: &CacheKey) -> AttrCacheResult<bool> {
        self.check("exists")?;
        self.inner.exists(key).await
    }

    async fn get(&self, key: &CacheKey) -> AttrCacheResult<Option<Vec<u8>>> {
        self.check("get")?;
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Option<Duration>,
        dependency: Option<&DependencyToken>,
    ) -> AttrCacheResult<bool> {
        self.check("set")?;
        self.inner.set(key, value, ttl, dependency).await
    }

    async fn add(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Option<Duration>,
        dependency: Option<&DependencyToken>,
    ) -> AttrCacheResult<bool> {
        self.check("add")?;
        self.inner.add(key, value, ttl, dependency).await
    }

    async fn delete(&self, key: &CacheKey) -> AttrCacheResult<bool> {
        self.check("delete")?;
        self.inner.delete(key).await
    }

    async fn invalidate_dependency(&self, token: &DependencyToken) -> AttrCacheResult<u64> {
        self.check("invalidate_dependency")?;
        self.inner.invalidate_dependency(token).await
    }

    async fn stats(&self) -> AttrCacheResult<CacheStats> {
        self.inner.stats().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for attribute values, maps and fixtures.

    use super::fixtures::{CompositeRecord, User};
    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a timestamp with millisecond precision (2020-2030).
    pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (1_577_836_800_000i64..1_893_456_000_000i64).prop_map(|millis| {
            DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
        })
    }

    /// Generate any attribute value.
    pub fn arb_attribute_value() -> impl Strategy<Value = AttributeValue> {
        prop_oneof![
            Just(AttributeValue::Null),
            any::<bool>().prop_map(AttributeValue::Bool),
            any::<i64>().prop_map(AttributeValue::Int),
            // Quarter steps survive a JSON round trip exactly.
            (-4_000_000i32..4_000_000).prop_map(|n| AttributeValue::Float(f64::from(n) / 4.0)),
            "[a-zA-Z0-9 _:~#-]{0,16}".prop_map(AttributeValue::Text),
            arb_uuid().prop_map(AttributeValue::Uuid),
            arb_timestamp().prop_map(AttributeValue::Timestamp),
        ]
    }

    /// Generate an attribute name.
    pub fn arb_attribute_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,8}"
    }

    /// Generate a non-empty list of unique attribute names.
    pub fn arb_key_attributes() -> impl Strategy<Value = Vec<String>> {
        prop::collection::hash_set(arb_attribute_name(), 1..5)
            .prop_map(|names| names.into_iter().collect())
    }

    /// Generate key attributes together with one value per key attribute.
    pub fn arb_key_attributes_with_values() -> impl Strategy<Value = (Vec<String>, Vec<AttributeValue>)> {
        arb_key_attributes().prop_flat_map(|names| {
            let len = names.len();
            (Just(names), prop::collection::vec(arb_attribute_value(), len))
        })
    }

    /// Generate an attribute map with unique names.
    pub fn arb_attribute_map() -> impl Strategy<Value = AttributeMap> {
        prop::collection::vec((arb_attribute_name(), arb_attribute_value()), 0..6)
            .prop_map(|pairs| pairs.into_iter().collect())
    }

    pub fn arb_user() -> impl Strategy<Value = User> {
        (any::<i64>(), prop::option::of(any::<i64>()), "[A-Za-z ]{0,20}").prop_map(
            |(id, id2, name)| User { id, id2, name },
        )
    }

    pub fn arb_composite_record() -> impl Strategy<Value = CompositeRecord> {
        (any::<i64>(), any::<i64>(), "[A-Za-z ]{0,20}")
            .prop_map(|(id1, id2, name)| CompositeRecord { id1, id2, name })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for attrcache error variants.

    use super::*;

    /// Assert that an AttrCacheResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &AttrCacheResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that an AttrCacheResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &AttrCacheResult<T>) {
        match result {
            Err(AttrCacheError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that an AttrCacheResult is a specific KeyInput error.
    #[track_caller]
    pub fn assert_key_input_error<T: std::fmt::Debug>(
        result: &AttrCacheResult<T>,
        expected: &KeyInputError,
    ) {
        match result {
            Err(AttrCacheError::KeyInput(err)) => assert_eq!(err, expected),
            other => panic!("Expected KeyInput error {:?}, got: {:?}", expected, other),
        }
    }

    /// Assert that an AttrCacheResult is a Backend error.
    #[track_caller]
    pub fn assert_backend_error<T: std::fmt::Debug>(result: &AttrCacheResult<T>) {
        match result {
            Err(AttrCacheError::Backend(_)) => {}
            other => panic!("Expected Backend error, got: {:?}", other),
        }
    }

    /// Assert that an AttrCacheResult is a Record error.
    #[track_caller]
    pub fn assert_record_error<T: std::fmt::Debug>(result: &AttrCacheResult<T>) {
        match result {
            Err(AttrCacheError::Record(_)) => {}
            other => panic!("Expected Record error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
