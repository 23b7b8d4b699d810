//! Attribute values and ordered attribute maps.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single record attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
}

impl AttributeValue {
    /// Returns true if this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Type-stable text form used when composing cache keys.
    ///
    /// Values the record layer treats as equal render identically:
    /// `Int(1)`, `Float(1.0)`, `Bool(true)` and `Text("1")` all yield `"1"`.
    /// `Null` has no canonical text and returns `None`.
    pub fn canonical(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(canonical_float(*f)),
            Self::Text(s) => Some(s.clone()),
            Self::Uuid(u) => Some(u.hyphenated().to_string()),
            Self::Timestamp(ts) => Some(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }
}

fn canonical_float(f: f64) -> String {
    // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        (f as i64).to_string()
    } else {
        f.to_string()
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for AttributeValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Uuid> for AttributeValue {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Insertion-ordered attribute name to value mapping.
///
/// Used for key-attribute values (where order follows the key attribute
/// configuration) and for cached value projections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeMap {
    entries: Vec<(String, AttributeValue)>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Insert a value, replacing in place if the name is already present.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attribute names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl FromIterator<(String, AttributeValue)> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = (String, AttributeValue)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

impl IntoIterator for AttributeMap {
    type Item = (String, AttributeValue);
    type IntoIter = std::vec::IntoIter<(String, AttributeValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_collapses_equal_forms() {
        assert_eq!(AttributeValue::Int(1).canonical(), AttributeValue::from("1").canonical());
        assert_eq!(AttributeValue::Float(1.0).canonical(), Some("1".to_string()));
        assert_eq!(AttributeValue::Bool(true).canonical(), Some("1".to_string()));
        assert_eq!(AttributeValue::Float(1.5).canonical(), Some("1.5".to_string()));
        assert_eq!(AttributeValue::Null.canonical(), None);
    }

    #[test]
    fn test_canonical_uuid_and_timestamp() {
        let id = Uuid::nil();
        assert_eq!(
            AttributeValue::Uuid(id).canonical(),
            Some("00000000-0000-0000-0000-000000000000".to_string())
        );

        let ts = DateTime::from_timestamp(0, 0).unwrap_or_default();
        assert_eq!(
            AttributeValue::Timestamp(ts).canonical(),
            Some("1970-01-01T00:00:00.000Z".to_string())
        );
    }

    #[test]
    fn test_option_into_null() {
        let none: Option<i64> = None;
        assert!(AttributeValue::from(none).is_null());
        assert_eq!(AttributeValue::from(Some(4i64)), AttributeValue::Int(4));
    }

    #[test]
    fn test_attribute_map_preserves_order_and_replaces() {
        let mut map = AttributeMap::new().with("b", 2i64).with("a", 1i64);
        map.insert("b", 20i64);

        assert_eq!(map.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(map.get("b"), Some(&AttributeValue::Int(20)));
        assert_eq!(map.len(), 2);
        assert!(!map.contains("c"));
    }

    #[test]
    fn test_attribute_map_serde_roundtrip_keeps_falsy_values() {
        let map = AttributeMap::new()
            .with("flag", false)
            .with("name", "")
            .with("gone", AttributeValue::Null);

        let json = serde_json::to_string(&map).expect("serialize should succeed");
        let back: AttributeMap = serde_json::from_str(&json).expect("deserialize should succeed");
        assert_eq!(map, back);
    }
}
