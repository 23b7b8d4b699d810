//! Canonical cache key composition.
//!
//! A `CacheKey` is derived from a record-type namespace and an ordered set
//! of key-attribute values. `CacheKey`'s private constructor means every key
//! in the system carries a namespace, so two record types sharing a backend
//! cannot collide.

use std::fmt;

use attrcache_core::AttributeMap;
use sha2::{Digest, Sha256};

/// Marks an attribute-derived key body.
const ATTRIBUTE_TAG: u8 = b'A';
/// Marks a free-form labeled key body.
const LABEL_TAG: u8 = b'L';
/// Stands in for a length-prefixed value when the attribute is null.
const NULL_MARKER: u8 = b'~';
/// Terminates the namespace segment count.
const COUNT_TERMINATOR: u8 = b'#';
/// Terminates a length prefix.
const LENGTH_TERMINATOR: u8 = b':';

/// Stable identifier for a record type's slice of the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordNamespace {
    segments: Vec<String>,
}

impl RecordNamespace {
    /// Single-segment namespace.
    pub fn new(segment: impl Into<String>) -> Self {
        Self {
            segments: vec![segment.into()],
        }
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.segments.len().to_string().as_bytes());
        buf.push(COUNT_TERMINATOR);
        for segment in &self.segments {
            write_segment(buf, segment.as_bytes());
        }
    }
}

/// An encoded cache key.
///
/// # Encoding
///
/// The encoding is prefix-free and therefore injective:
/// - namespace segment count, then `#`
/// - each namespace segment as `<len>:<bytes>`
/// - a body tag: `A` for attribute keys, `L` for labeled keys
/// - attribute keys: per attribute, `<len>:<name>` followed by either
///   `<len>:<canonical value>` or `~` for null
/// - labeled keys: `<len>:<label>`
///
/// Values go through [`AttributeValue::canonical`](attrcache_core::AttributeValue::canonical),
/// so values the record layer treats as equal produce the same key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    encoded: Vec<u8>,
}

impl CacheKey {
    /// Build a key from a namespace and ordered key-attribute values.
    ///
    /// Order is significant: callers pass values already normalized into
    /// key-attribute order.
    pub fn build(namespace: &RecordNamespace, key_values: &AttributeMap) -> Self {
        let mut encoded = Vec::with_capacity(64);
        namespace.encode_into(&mut encoded);
        encoded.push(ATTRIBUTE_TAG);
        for (name, value) in key_values.iter() {
            write_segment(&mut encoded, name.as_bytes());
            match value.canonical() {
                Some(text) => write_segment(&mut encoded, text.as_bytes()),
                None => encoded.push(NULL_MARKER),
            }
        }
        Self { encoded }
    }

    /// Build a free-form key from a namespace and an arbitrary label.
    pub fn labeled(namespace: &RecordNamespace, label: &str) -> Self {
        let mut encoded = Vec::with_capacity(32 + label.len());
        namespace.encode_into(&mut encoded);
        encoded.push(LABEL_TAG);
        write_segment(&mut encoded, label.as_bytes());
        Self { encoded }
    }

    /// The full encoded key.
    pub fn as_bytes(&self) -> &[u8] {
        &self.encoded
    }

    /// Fixed 32-byte SHA-256 form for backends with key-size limits.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.encoded);
        hasher.finalize().into()
    }

    /// Hex rendering of [`digest`](Self::digest).
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CacheKey")
            .field(&String::from_utf8_lossy(&self.encoded))
            .finish()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.encoded))
    }
}

fn write_segment(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(bytes.len().to_string().as_bytes());
    buf.push(LENGTH_TERMINATOR);
    buf.extend_from_slice(bytes);
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use attrcache_core::AttributeValue;
    use proptest::prelude::*;

    fn namespace_strategy() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[a-z:#~0-9]{0,6}", 1..3)
    }

    fn pairs_strategy() -> impl Strategy<Value = Vec<(String, Option<String>)>> {
        prop::collection::vec(("[a-z:~0-9]{0,4}", prop::option::of("[a-z:~0-9]{0,4}")), 0..4)
    }

    fn to_map(pairs: &[(String, Option<String>)]) -> AttributeMap {
        let mut map = AttributeMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), AttributeValue::from(value.clone()));
        }
        map
    }

    fn dedup(pairs: Vec<(String, Option<String>)>) -> Vec<(String, Option<String>)> {
        to_map(&pairs)
            .into_iter()
            .map(|(n, v)| match v {
                AttributeValue::Text(s) => (n, Some(s)),
                _ => (n, None),
            })
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: Key encoding is injective over (namespace, names, values).
        #[test]
        fn prop_encoding_is_injective(
            ns1 in namespace_strategy(),
            ns2 in namespace_strategy(),
            pairs1 in pairs_strategy().prop_map(dedup),
            pairs2 in pairs_strategy().prop_map(dedup),
        ) {
            let key1 = CacheKey::build(&RecordNamespace::from_segments(ns1.clone()), &to_map(&pairs1));
            let key2 = CacheKey::build(&RecordNamespace::from_segments(ns2.clone()), &to_map(&pairs2));

            if ns1 == ns2 && pairs1 == pairs2 {
                prop_assert_eq!(key1, key2);
            } else {
                prop_assert_ne!(key1, key2, "Different inputs must have different keys");
            }
        }

        /// Property: The namespace encoding is a prefix of every key in it.
        #[test]
        fn prop_namespace_is_prefix(
            ns in namespace_strategy(),
            pairs in pairs_strategy(),
        ) {
            let namespace = RecordNamespace::from_segments(ns);
            let mut prefix = Vec::new();
            namespace.encode_into(&mut prefix);
            let key = CacheKey::build(&namespace, &to_map(&pairs));
            prop_assert!(key.as_bytes().starts_with(&prefix));
        }
    }
}
