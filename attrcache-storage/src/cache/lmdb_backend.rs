//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store that survives process restarts.
//!
//! # Layout
//!
//! Keys are the 32-byte SHA-256 digest of the [`CacheKey`] encoding, which
//! keeps them under LMDB's key-size limit regardless of attribute values.
//! Stored values carry a small header:
//!
//! ```text
//! [expires_at millis: i64 LE, 0 = never][dependency len: u32 LE][dependency][value]
//! ```
//!
//! A dependency length of `u32::MAX` marks an entry written without a
//! dependency, so an empty token and no token stay distinct.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `exists` and `get`
//! - Write transactions for `set`, `add`, `delete` and `invalidate_dependency`
//! - `add` checks and writes inside a single write transaction

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use attrcache_core::{AttrCacheResult, BackendError};
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};

use super::key::CacheKey;
use super::memory_backend::expiry_from;
use super::traits::{CacheBackend, CacheStats, DependencyToken};

const EXPIRY_LEN: usize = 8;
const DEPENDENCY_LEN: usize = 4;
const HEADER_LEN: usize = EXPIRY_LEN + DEPENDENCY_LEN;
const NO_DEPENDENCY: u32 = u32::MAX;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored entry is too short or otherwise malformed.
    #[error("Corrupt cache entry: {0}")]
    CorruptEntry(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbCacheError to AttrCacheError.
impl From<LmdbCacheError> for attrcache_core::AttrCacheError {
    fn from(e: LmdbCacheError) -> Self {
        let reason = e.to_string();
        match e {
            LmdbCacheError::EnvOpen(_) | LmdbCacheError::DbOpen(_) | LmdbCacheError::Io(_) => {
                BackendError::Unavailable { reason }.into()
            }
            LmdbCacheError::Transaction(_) => BackendError::Transaction { reason }.into(),
            LmdbCacheError::CorruptEntry(_) => BackendError::Deserialization { reason }.into(),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// A decoded stored entry.
struct StoredEntry<'a> {
    expires_at: Option<DateTime<Utc>>,
    dependency: Option<&'a [u8]>,
    value: &'a [u8],
}

impl<'a> StoredEntry<'a> {
    fn encode(value: &[u8], expires_at: Option<DateTime<Utc>>, dependency: Option<&DependencyToken>) -> Vec<u8> {
        let dependency = dependency.map(|d| d.as_str().as_bytes());
        let millis = expires_at.map_or(0, |at| at.timestamp_millis());
        let dep_bytes = dependency.unwrap_or_default();
        let dep_len = dependency.map_or(NO_DEPENDENCY, |d| d.len() as u32);

        let mut bytes = Vec::with_capacity(HEADER_LEN + dep_bytes.len() + value.len());
        bytes.extend_from_slice(&millis.to_le_bytes());
        bytes.extend_from_slice(&dep_len.to_le_bytes());
        bytes.extend_from_slice(dep_bytes);
        bytes.extend_from_slice(value);
        bytes
    }

    fn decode(bytes: &'a [u8]) -> Result<Self, LmdbCacheError> {
        if bytes.len() < HEADER_LEN {
            return Err(LmdbCacheError::CorruptEntry(format!(
                "entry is {} bytes, header needs {}",
                bytes.len(),
                HEADER_LEN
            )));
        }

        let millis_bytes: [u8; EXPIRY_LEN] = bytes[0..EXPIRY_LEN]
            .try_into()
            .map_err(|_| LmdbCacheError::CorruptEntry("invalid expiry".into()))?;
        let dep_len_bytes: [u8; DEPENDENCY_LEN] = bytes[EXPIRY_LEN..HEADER_LEN]
            .try_into()
            .map_err(|_| LmdbCacheError::CorruptEntry("invalid dependency length".into()))?;

        let millis = i64::from_le_bytes(millis_bytes);
        let (dependency, dep_end) = match u32::from_le_bytes(dep_len_bytes) {
            NO_DEPENDENCY => (None, HEADER_LEN),
            len => {
                let dep_end = HEADER_LEN + len as usize;
                if bytes.len() < dep_end {
                    return Err(LmdbCacheError::CorruptEntry("dependency overruns entry".into()));
                }
                (Some(&bytes[HEADER_LEN..dep_end]), dep_end)
            }
        };

        let expires_at = if millis == 0 {
            None
        } else {
            DateTime::from_timestamp_millis(millis)
        };

        Ok(Self {
            expires_at,
            dependency,
            value: &bytes[dep_end..],
        })
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Liveness of a stored entry. An entry that fails to decode counts as dead
/// so that writes and deletes can still replace or drop it.
fn live_or_corrupt(key: &CacheKey, bytes: &[u8], now: DateTime<Utc>) -> bool {
    match StoredEntry::decode(bytes) {
        Ok(entry) => entry.is_live(now),
        Err(e) => {
            tracing::warn!(key = %key.digest_hex(), error = %e, "Replacing corrupt cache entry");
            false
        }
    }
}

/// LMDB-backed cache.
///
/// Transactions run synchronously on the calling task, so each call can
/// block the executor thread for the duration of an LMDB transaction.
///
/// # Example
///
/// ```ignore
/// use attrcache_storage::cache::LmdbCacheBackend;
///
/// let backend = LmdbCacheBackend::new("/tmp/attrcache", 100)?;
/// backend.set(&key, bytes, None, None).await?;
/// ```
pub struct LmdbCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Hit/miss/eviction counters. Entry count is read from LMDB.
    stats: Arc<RwLock<CacheStats>>,
}

impl LmdbCacheBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            db,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        })
    }

    fn record_hit(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.hits += 1;
        }
    }

    fn record_miss(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.misses += 1;
        }
    }

    fn record_evictions(&self, count: u64) {
        if count == 0 {
            return;
        }
        if let Ok(mut stats) = self.stats.write() {
            stats.evictions += count;
        }
    }

    /// Read a live value. Expired entries are reported as absent and
    /// flagged for removal through the returned bool.
    fn read_live(&self, rtxn: &RoTxn<'_>, digest: &[u8]) -> Result<(Option<Vec<u8>>, bool), LmdbCacheError> {
        match self.db.get(rtxn, digest).map_err(txn_err)? {
            Some(bytes) => {
                let entry = StoredEntry::decode(bytes)?;
                if entry.is_live(Utc::now()) {
                    Ok((Some(entry.value.to_vec()), false))
                } else {
                    Ok((None, true))
                }
            }
            None => Ok((None, false)),
        }
    }

    /// Delete `digest` if it is still expired.
    fn evict_expired(&self, digest: &[u8]) -> Result<(), LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let expired = match self.db.get(&wtxn, digest).map_err(txn_err)? {
            Some(bytes) => !StoredEntry::decode(bytes)?.is_live(Utc::now()),
            None => false,
        };
        if expired {
            self.db.delete(&mut wtxn, digest).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;
        if expired {
            self.record_evictions(1);
        }
        Ok(())
    }

    fn lookup(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, LmdbCacheError> {
        let digest = key.digest();
        let (value, expired) = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            self.read_live(&rtxn, &digest)?
        };
        if expired {
            self.evict_expired(&digest)?;
        }
        Ok(value)
    }

    fn write(
        &self,
        key: &CacheKey,
        value: &[u8],
        ttl: Option<Duration>,
        dependency: Option<&DependencyToken>,
        only_if_absent: bool,
    ) -> Result<bool, LmdbCacheError> {
        let digest = key.digest();
        let now = Utc::now();
        let bytes = StoredEntry::encode(value, expiry_from(now, ttl), dependency);

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut evicted = 0;
        if only_if_absent {
            let existing = match self.db.get(&wtxn, &digest).map_err(txn_err)? {
                Some(existing) => Some(live_or_corrupt(key, existing, now)),
                None => None,
            };
            match existing {
                Some(true) => return Ok(false),
                Some(false) => evicted = 1,
                None => {}
            }
        }

        self.db.put(&mut wtxn, &digest, &bytes).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        self.record_evictions(evicted);
        Ok(true)
    }

    fn remove(&self, key: &CacheKey) -> Result<bool, LmdbCacheError> {
        let digest = key.digest();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let live = match self.db.get(&wtxn, &digest).map_err(txn_err)? {
            Some(bytes) => live_or_corrupt(key, bytes, Utc::now()),
            None => false,
        };
        let deleted = self.db.delete(&mut wtxn, &digest).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted && live)
    }

    /// Collect every key whose entry was written with `dependency`.
    fn collect_keys_with_dependency(&self, dependency: &[u8]) -> Result<Vec<Vec<u8>>, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;

        let mut keys = Vec::new();
        let iter = self.db.iter(&rtxn).map_err(txn_err)?;
        for result in iter {
            let (key, bytes) = result.map_err(txn_err)?;
            match StoredEntry::decode(bytes) {
                Ok(entry) if entry.dependency == Some(dependency) => keys.push(key.to_vec()),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Skipping corrupt cache entry"),
            }
        }

        Ok(keys)
    }

    fn drop_dependency(&self, token: &DependencyToken) -> Result<u64, LmdbCacheError> {
        let keys_to_delete = self.collect_keys_with_dependency(token.as_str().as_bytes())?;

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in &keys_to_delete {
            if self.db.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;

        Ok(deleted)
    }

    fn snapshot_stats(&self) -> Result<CacheStats, LmdbCacheError> {
        let mut stats = self
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();

        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut entry_count = 0u64;
        let mut memory_bytes = 0u64;
        for result in self.db.iter(&rtxn).map_err(txn_err)? {
            let (_, bytes) = result.map_err(txn_err)?;
            entry_count += 1;
            memory_bytes += bytes.len() as u64;
        }
        stats.entry_count = entry_count;
        stats.memory_bytes = memory_bytes;
        Ok(stats)
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn exists(&self, key: &CacheKey) -> AttrCacheResult<bool> {
        Ok(self.lookup(key)?.is_some())
    }

    async fn get(&self, key: &CacheKey) -> AttrCacheResult<Option<Vec<u8>>> {
        match self.lookup(key) {
            Ok(Some(value)) => {
                self.record_hit();
                Ok(Some(value))
            }
            Ok(None) => {
                self.record_miss();
                Ok(None)
            }
            Err(e) => {
                self.record_miss();
                Err(e.into())
            }
        }
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Option<Duration>,
        dependency: Option<&DependencyToken>,
    ) -> AttrCacheResult<bool> {
        Ok(self.write(key, &value, ttl, dependency, false)?)
    }

    async fn add(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Option<Duration>,
        dependency: Option<&DependencyToken>,
    ) -> AttrCacheResult<bool> {
        Ok(self.write(key, &value, ttl, dependency, true)?)
    }

    async fn delete(&self, key: &CacheKey) -> AttrCacheResult<bool> {
        Ok(self.remove(key)?)
    }

    async fn invalidate_dependency(&self, token: &DependencyToken) -> AttrCacheResult<u64> {
        Ok(self.drop_dependency(token)?)
    }

    async fn stats(&self) -> AttrCacheResult<CacheStats> {
        Ok(self.snapshot_stats()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::RecordNamespace;
    use attrcache_core::{AttrCacheError, AttributeMap};
    use tempfile::TempDir;

    fn create_test_backend() -> (LmdbCacheBackend, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend =
            LmdbCacheBackend::new(temp_dir.path(), 10).expect("backend creation should succeed");
        (backend, temp_dir)
    }

    fn key(id: i64) -> CacheKey {
        CacheKey::build(
            &RecordNamespace::from_segments(["users", "attributes"]),
            &AttributeMap::new().with("id", id),
        )
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (backend, _temp_dir) = create_test_backend();

        assert!(backend
            .set(&key(1), b"{\"name\":\"ada\"}".to_vec(), None, None)
            .await
            .expect("set should succeed"));

        let cached = backend.get(&key(1)).await.expect("get should succeed");
        assert_eq!(cached, Some(b"{\"name\":\"ada\"}".to_vec()));
        assert!(backend.exists(&key(1)).await.expect("exists should succeed"));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (backend, _temp_dir) = create_test_backend();

        let cached = backend.get(&key(42)).await.expect("get should succeed");
        assert!(cached.is_none());
        assert!(!backend.exists(&key(42)).await.expect("exists should succeed"));
    }

    #[tokio::test]
    async fn test_empty_value_is_present() {
        let (backend, _temp_dir) = create_test_backend();

        backend.set(&key(1), Vec::new(), None, None).await.expect("set should succeed");
        assert_eq!(
            backend.get(&key(1)).await.expect("get should succeed"),
            Some(Vec::new())
        );
    }

    #[tokio::test]
    async fn test_delete() {
        let (backend, _temp_dir) = create_test_backend();

        backend.set(&key(1), b"v".to_vec(), None, None).await.expect("set should succeed");
        assert!(backend.delete(&key(1)).await.expect("delete should succeed"));
        assert!(!backend.delete(&key(1)).await.expect("delete should succeed"));
        assert!(backend.get(&key(1)).await.expect("get should succeed").is_none());
    }

    #[tokio::test]
    async fn test_add_only_when_absent() {
        let (backend, _temp_dir) = create_test_backend();

        assert!(backend.add(&key(1), b"first".to_vec(), None, None).await.expect("add"));
        assert!(!backend.add(&key(1), b"second".to_vec(), None, None).await.expect("add"));
        assert_eq!(
            backend.get(&key(1)).await.expect("get should succeed"),
            Some(b"first".to_vec())
        );
    }

    #[tokio::test]
    async fn test_expiry() {
        let (backend, _temp_dir) = create_test_backend();

        backend
            .set(&key(1), b"short".to_vec(), Some(Duration::from_millis(20)), None)
            .await
            .expect("set should succeed");
        backend
            .set(&key(2), b"long".to_vec(), Some(Duration::from_secs(3600)), None)
            .await
            .expect("set should succeed");

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(backend.get(&key(1)).await.expect("get should succeed").is_none());
        assert!(backend.exists(&key(2)).await.expect("exists should succeed"));
        assert!(backend.add(&key(1), b"again".to_vec(), None, None).await.expect("add"));

        let stats = backend.stats().await.expect("stats should succeed");
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entry_count, 2);
    }

    #[tokio::test]
    async fn test_invalidate_dependency() {
        let (backend, _temp_dir) = create_test_backend();
        let org = DependencyToken::new("org-7");
        let other = DependencyToken::new("org-8");

        for id in 0..5 {
            backend
                .set(&key(id), b"x".to_vec(), None, Some(&org))
                .await
                .expect("set should succeed");
        }
        backend
            .set(&key(10), b"y".to_vec(), None, Some(&other))
            .await
            .expect("set should succeed");
        backend.set(&key(11), b"z".to_vec(), None, None).await.expect("set should succeed");

        let deleted = backend
            .invalidate_dependency(&org)
            .await
            .expect("invalidate_dependency should succeed");
        assert_eq!(deleted, 5);

        assert!(backend.exists(&key(10)).await.expect("exists"));
        assert!(backend.exists(&key(11)).await.expect("exists"));
        assert_eq!(backend.stats().await.expect("stats").entry_count, 2);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let backend = LmdbCacheBackend::new(temp_dir.path(), 10).expect("open");
            backend.set(&key(1), b"kept".to_vec(), None, None).await.expect("set");
        }
        let backend = LmdbCacheBackend::new(temp_dir.path(), 10).expect("reopen");
        assert_eq!(backend.get(&key(1)).await.expect("get"), Some(b"kept".to_vec()));
    }

    #[tokio::test]
    async fn test_hit_miss_stats() {
        let (backend, _temp_dir) = create_test_backend();

        let _ = backend.get(&key(1)).await;
        backend.set(&key(1), b"abc".to_vec(), None, None).await.expect("set");
        let _ = backend.get(&key(1)).await;

        let stats = backend.stats().await.expect("stats");
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_stored_entry_layout() {
        let token = DependencyToken::new("dep");
        let bytes = StoredEntry::encode(b"val", None, Some(&token));
        assert_eq!(bytes.len(), HEADER_LEN + 3 + 3);

        let entry = StoredEntry::decode(&bytes).expect("decode");
        assert!(entry.expires_at.is_none());
        assert_eq!(entry.dependency, Some(&b"dep"[..]));
        assert_eq!(entry.value, b"val");
    }

    #[test]
    fn test_stored_entry_distinguishes_empty_and_missing_dependency() {
        let empty = DependencyToken::new("");
        let tagged = StoredEntry::encode(b"v", None, Some(&empty));
        let untagged = StoredEntry::encode(b"v", None, None);

        assert_eq!(StoredEntry::decode(&tagged).expect("decode").dependency, Some(&b""[..]));
        assert_eq!(StoredEntry::decode(&untagged).expect("decode").dependency, None);
        assert_eq!(StoredEntry::decode(&untagged).expect("decode").value, b"v");
    }

    #[tokio::test]
    async fn test_empty_dependency_leaves_untagged_entries() {
        let (backend, _temp_dir) = create_test_backend();
        let empty = DependencyToken::new("");

        backend.set(&key(1), b"x".to_vec(), None, None).await.expect("set");
        backend.set(&key(2), b"y".to_vec(), None, Some(&empty)).await.expect("set");

        assert_eq!(backend.invalidate_dependency(&empty).await.expect("invalidate"), 1);
        assert!(backend.exists(&key(1)).await.expect("exists"));
        assert!(!backend.exists(&key(2)).await.expect("exists"));
    }

    fn put_raw(backend: &LmdbCacheBackend, key: &CacheKey, bytes: &[u8]) {
        let mut wtxn = backend.env.write_txn().expect("write txn");
        backend.db.put(&mut wtxn, &key.digest(), bytes).expect("put");
        wtxn.commit().expect("commit");
    }

    #[tokio::test]
    async fn test_corrupt_entry_can_be_deleted() {
        let (backend, _temp_dir) = create_test_backend();
        put_raw(&backend, &key(1), b"bad");

        assert!(!backend.delete(&key(1)).await.expect("delete should succeed"));
        assert_eq!(backend.stats().await.expect("stats").entry_count, 0);
        assert!(backend.get(&key(1)).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_add_replaces_corrupt_entry() {
        let (backend, _temp_dir) = create_test_backend();
        put_raw(&backend, &key(1), b"bad");

        assert!(backend.add(&key(1), b"fresh".to_vec(), None, None).await.expect("add"));
        assert_eq!(backend.get(&key(1)).await.expect("get"), Some(b"fresh".to_vec()));
    }

    #[test]
    fn test_corrupt_entry_maps_to_deserialization() {
        let err = StoredEntry::decode(b"short").err().expect("should fail");
        let err: AttrCacheError = err.into();
        assert!(matches!(
            err,
            AttrCacheError::Backend(BackendError::Deserialization { .. })
        ));
    }
}
