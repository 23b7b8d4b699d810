//! Find-or-populate: load a record through the cache.

use async_trait::async_trait;
use attrcache_core::{AttrCacheResult, AttributeMap, RecordSchema, TrackedRecord};
use tracing::debug;

use crate::cache::{CacheBackend, WriteOptions};
use crate::normalizer::KeyInput;
use crate::record_cache::RecordCache;

/// Loads records from durable storage.
#[async_trait]
pub trait RecordLoader<R: RecordSchema>: Send + Sync {
    /// Find the single record whose attributes equal `condition`.
    async fn find_one(&self, condition: &AttributeMap) -> AttrCacheResult<Option<TrackedRecord<R>>>;
}

/// Return the record addressed by `input`, from cache if possible.
///
/// On a miss the record is loaded through `loader` and its value projection
/// cached. A record that does not exist is not cached. The returned record
/// is rebuilt from the value projection and marked persisted.
///
/// # Errors
///
/// Invalid key input, loader failures, backend failures, and
/// `R::from_attributes` rejecting the cached projection.
pub async fn find_or_populate<R, C, L>(
    cache: &RecordCache<R, C>,
    loader: &L,
    input: impl Into<KeyInput>,
    options: &WriteOptions,
) -> AttrCacheResult<Option<TrackedRecord<R>>>
where
    R: RecordSchema,
    C: CacheBackend,
    L: RecordLoader<R> + ?Sized,
{
    let condition = cache.normalize(input)?;

    let projection: Option<AttributeMap> = cache
        .get_or_set(
            &condition,
            || async {
                debug!(
                    record_type = R::RECORD_TYPE,
                    "Cache does not exist, querying the record store"
                );
                match loader.find_one(&condition).await? {
                    Some(record) => cache.cache_value_of(&record),
                    None => Ok(None),
                }
            },
            options,
        )
        .await?;

    projection
        .map(|attributes| R::from_attributes(&attributes).map(TrackedRecord::loaded))
        .transpose()
}
