//! Attribute projection.
//!
//! Builds the ordered name→value maps used as cache keys and cached values.
//! Projections of a [`TrackedRecord`] read the last-persisted state, never
//! in-progress edits.

use attrcache_core::{
    AttrCacheResult, AttributeMap, ConfigError, FieldReader, RecordSchema, TrackedRecord,
};

/// Project `names` out of `record`, in the order given.
///
/// # Errors
///
/// `ConfigError::UnknownAttribute` if a name is not a field of the record
/// type.
pub fn project<F, S>(record: &F, record_type: &str, names: &[S]) -> AttrCacheResult<AttributeMap>
where
    F: FieldReader + ?Sized,
    S: AsRef<str>,
{
    let mut projected = AttributeMap::with_capacity(names.len());
    for name in names {
        let name = name.as_ref();
        let value = record.field(name).ok_or_else(|| ConfigError::UnknownAttribute {
            record_type: record_type.to_string(),
            attribute: name.to_string(),
        })?;
        projected.insert(name, value);
    }
    Ok(projected)
}

/// Project the persisted state of a tracked record.
///
/// Returns `Ok(None)` for a record that has never been persisted.
pub fn project_persisted<R, S>(
    record: &TrackedRecord<R>,
    names: &[S],
) -> AttrCacheResult<Option<AttributeMap>>
where
    R: RecordSchema,
    S: AsRef<str>,
{
    record
        .persisted()
        .map(|persisted| project(persisted, R::RECORD_TYPE, names))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use attrcache_core::{AttrCacheError, AttributeValue};

    #[derive(Debug, Clone, PartialEq)]
    struct Widget {
        id: i64,
        label: Option<String>,
    }

    impl FieldReader for Widget {
        fn field(&self, name: &str) -> Option<AttributeValue> {
            match name {
                "id" => Some(self.id.into()),
                "label" => Some(self.label.clone().into()),
                _ => None,
            }
        }
    }

    impl RecordSchema for Widget {
        const RECORD_TYPE: &'static str = "widget";

        fn attribute_names() -> &'static [&'static str] {
            &["id", "label"]
        }

        fn identity_attributes() -> &'static [&'static str] {
            &["id"]
        }

        fn from_attributes(_attributes: &AttributeMap) -> AttrCacheResult<Self> {
            Ok(Self { id: 0, label: None })
        }
    }

    fn widget() -> Widget {
        Widget {
            id: 3,
            label: Some("gear".to_string()),
        }
    }

    #[test]
    fn test_project_keeps_requested_order() {
        let projected = project(&widget(), "widget", &["label", "id"]).unwrap();
        let names: Vec<&str> = projected.names().collect();
        assert_eq!(names, vec!["label", "id"]);
        assert_eq!(projected.get("id"), Some(&AttributeValue::Int(3)));
    }

    #[test]
    fn test_project_null_field() {
        let widget = Widget { id: 1, label: None };
        let projected = project(&widget, "widget", &["label"]).unwrap();
        assert_eq!(projected.get("label"), Some(&AttributeValue::Null));
    }

    #[test]
    fn test_unknown_attribute_is_config_error() {
        let err = project(&widget(), "widget", &["colour"]).unwrap_err();
        match err {
            AttrCacheError::Config(ConfigError::UnknownAttribute {
                record_type,
                attribute,
            }) => {
                assert_eq!(record_type, "widget");
                assert_eq!(attribute, "colour");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_project_persisted_ignores_unsaved_edits() {
        let mut tracked = TrackedRecord::loaded(widget());
        tracked.current_mut().label = Some("sprocket".to_string());

        let projected = project_persisted(&tracked, &["label"]).unwrap().unwrap();
        assert_eq!(
            projected.get("label"),
            Some(&AttributeValue::Text("gear".to_string()))
        );
    }

    #[test]
    fn test_project_persisted_unsaved_record() {
        let tracked = TrackedRecord::new(widget());
        assert!(project_persisted(&tracked, &["id"]).unwrap().is_none());
    }
}
