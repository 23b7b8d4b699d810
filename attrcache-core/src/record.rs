//! Record collaborator contract.
//!
//! The cache never reflects over records. Each record type exposes its
//! closed field set through [`FieldReader`] and describes itself through
//! [`RecordSchema`]. [`TrackedRecord`] pairs the in-progress values with the
//! last-persisted snapshot, which is what cache entries are built from.

use crate::{AttrCacheResult, AttributeMap, AttributeValue};

/// Typed, name-based read access over a record's fields.
pub trait FieldReader {
    /// Read a field by name.
    ///
    /// Returns `None` if `name` is not a field of this record type. A field
    /// that exists but holds no value is `Some(AttributeValue::Null)`.
    fn field(&self, name: &str) -> Option<AttributeValue>;
}

/// Static description of a cacheable record type.
///
/// # Implementation Requirements
///
/// - `RECORD_TYPE` must be stable; it seeds the default cache namespace
/// - `attribute_names()` lists every field `field()` answers for
/// - `identity_attributes()` is the primary key, in key order
/// - `from_attributes()` rebuilds a record from a cached projection
pub trait RecordSchema: FieldReader + Clone + Send + Sync + 'static {
    const RECORD_TYPE: &'static str;

    fn attribute_names() -> &'static [&'static str];

    fn identity_attributes() -> &'static [&'static str];

    fn from_attributes(attributes: &AttributeMap) -> AttrCacheResult<Self>;
}

/// A record instance together with its last-persisted state.
#[derive(Debug, Clone)]
pub struct TrackedRecord<R> {
    current: R,
    persisted: Option<R>,
}

impl<R: RecordSchema> TrackedRecord<R> {
    /// Wrap a fresh, never-persisted record.
    pub fn new(record: R) -> Self {
        Self {
            current: record,
            persisted: None,
        }
    }

    /// Wrap a record just read from durable storage.
    pub fn loaded(record: R) -> Self {
        Self {
            persisted: Some(record.clone()),
            current: record,
        }
    }

    /// In-progress values, including unsaved edits.
    pub fn current(&self) -> &R {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut R {
        &mut self.current
    }

    /// Last-persisted values, or `None` for an unsaved record.
    pub fn persisted(&self) -> Option<&R> {
        self.persisted.as_ref()
    }

    pub fn is_new_record(&self) -> bool {
        self.persisted.is_none()
    }

    /// Attribute names whose in-progress value differs from the persisted one.
    ///
    /// Every attribute is dirty on an unsaved record.
    pub fn dirty_attributes(&self) -> Vec<&'static str> {
        R::attribute_names()
            .iter()
            .copied()
            .filter(|name| match &self.persisted {
                Some(persisted) => persisted.field(name) != self.current.field(name),
                None => true,
            })
            .collect()
    }

    /// Commit the in-progress values as the persisted state.
    ///
    /// Returns the names of attributes whose persisted value changed.
    pub fn mark_persisted(&mut self) -> Vec<String> {
        let changed = self
            .dirty_attributes()
            .into_iter()
            .map(str::to_string)
            .collect();
        self.persisted = Some(self.current.clone());
        changed
    }

    /// Forget the persisted state after the backing row is removed.
    pub fn mark_deleted(&mut self) {
        self.persisted = None;
    }

    pub fn into_inner(self) -> R {
        self.current
    }
}
