//! Key input normalization.
//!
//! Every "by attribute" cache operation passes through
//! [`KeyInputNormalizer::normalize`] before a key is built. Output is always
//! a named map in key-attribute order, so positional and named input for the
//! same values produce the same key.

use attrcache_core::{AttributeMap, AttributeValue, KeyInputError};

/// Caller-supplied key-attribute values.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyInput {
    /// A bare value; only valid for a single key attribute.
    Scalar(AttributeValue),
    /// Values in key-attribute order.
    Positional(Vec<AttributeValue>),
    /// Values by key-attribute name.
    Named(AttributeMap),
}

impl From<AttributeValue> for KeyInput {
    fn from(v: AttributeValue) -> Self {
        Self::Scalar(v)
    }
}

impl From<i64> for KeyInput {
    fn from(v: i64) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<i32> for KeyInput {
    fn from(v: i32) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<&str> for KeyInput {
    fn from(v: &str) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<String> for KeyInput {
    fn from(v: String) -> Self {
        Self::Scalar(v.into())
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for KeyInput {
    fn from(v: Vec<T>) -> Self {
        Self::Positional(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<AttributeValue>, const N: usize> From<[T; N]> for KeyInput {
    fn from(v: [T; N]) -> Self {
        Self::Positional(v.into_iter().map(Into::into).collect())
    }
}

impl From<AttributeMap> for KeyInput {
    fn from(v: AttributeMap) -> Self {
        Self::Named(v)
    }
}

/// Validates key input against a configured key-attribute list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInputNormalizer {
    key_attributes: Vec<String>,
}

impl KeyInputNormalizer {
    pub fn new<I, S>(key_attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key_attributes: key_attributes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn key_attributes(&self) -> &[String] {
        &self.key_attributes
    }

    /// Normalize `input` into a named map in key-attribute order.
    ///
    /// # Errors
    ///
    /// - `Empty` for an empty sequence or map
    /// - `ArityMismatch` when the value count differs from the key attributes
    /// - `NameMismatch` when named input uses other names
    /// - `ScalarForCompositeKey` for a bare value against a composite key
    pub fn normalize(&self, input: impl Into<KeyInput>) -> Result<AttributeMap, KeyInputError> {
        match input.into() {
            KeyInput::Scalar(value) => match self.key_attributes.as_slice() {
                [only] => Ok(AttributeMap::new().with(only.clone(), value)),
                _ => Err(KeyInputError::ScalarForCompositeKey {
                    attributes: self.key_attributes.clone(),
                }),
            },
            KeyInput::Positional(values) => {
                self.check_arity(values.len())?;
                Ok(self.key_attributes.iter().cloned().zip(values).collect())
            }
            KeyInput::Named(map) => {
                self.check_arity(map.len())?;
                let mut normalized = AttributeMap::with_capacity(map.len());
                for name in &self.key_attributes {
                    match map.get(name) {
                        Some(value) => normalized.insert(name.clone(), value.clone()),
                        None => {
                            return Err(KeyInputError::NameMismatch {
                                expected: self.key_attributes.clone(),
                                got: map.names().map(str::to_string).collect(),
                            })
                        }
                    }
                }
                Ok(normalized)
            }
        }
    }

    fn check_arity(&self, got: usize) -> Result<(), KeyInputError> {
        if got == 0 {
            return Err(KeyInputError::Empty);
        }
        if got != self.key_attributes.len() {
            return Err(KeyInputError::ArityMismatch {
                expected: self.key_attributes.len(),
                got,
            });
        }
        Ok(())
    }
}
