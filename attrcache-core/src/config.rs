//! Configuration types

use crate::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Default prefix for environment configuration.
pub const ENV_PREFIX: &str = "ATTRCACHE";

/// A list of names that may also be written as a single bare name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NameList {
    One(String),
    Many(Vec<String>),
}

impl NameList {
    pub fn many<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Many(names.into_iter().map(Into::into).collect())
    }

    fn parse_env(raw: &str) -> Option<Self> {
        let names: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            None
        } else {
            Some(Self::Many(names))
        }
    }
}

/// What the cache store does when the backend call itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFailurePolicy {
    /// Return the failure to the caller.
    #[default]
    Propagate,
    /// Report reads (`exists`, `get`) as a miss and log the failure.
    /// Writes still propagate.
    TreatAsMiss,
}

impl std::str::FromStr for BackendFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "propagate" => Ok(Self::Propagate),
            "treat_as_miss" | "treat-as-miss" => Ok(Self::TreatAsMiss),
            other => Err(ConfigError::InvalidValue {
                field: "backend_failure_policy".to_string(),
                value: other.to_string(),
                reason: "expected `propagate` or `treat_as_miss`".to_string(),
            }),
        }
    }
}

/// Per-record-type cache configuration.
///
/// The backend itself is not part of the configuration; it is injected when
/// the cache is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeCacheConfig {
    /// Record-type namespace segments. Defaults to `[RECORD_TYPE, "attributes"]`.
    pub namespace: Option<NameList>,
    /// Applied when a write omits an explicit duration. `0` means never expire.
    pub default_duration_secs: Option<u64>,
    /// Ordered key attributes. Defaults to the record's identity attributes.
    pub key_attributes: Option<NameList>,
    /// Attributes projected into cached values. Defaults to all attributes.
    pub value_attributes: Option<NameList>,
    pub backend_failure_policy: BackendFailurePolicy,
}

impl AttributeCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the namespace segments.
    pub fn with_namespace<I, S>(mut self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespace = Some(NameList::many(segments));
        self
    }

    /// Set the default entry duration. Fractional seconds round up so a
    /// short non-zero duration never becomes "never expire".
    pub fn with_default_duration(mut self, duration: Duration) -> Self {
        let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
        self.default_duration_secs = Some(secs);
        self
    }

    /// Set the ordered key attributes.
    pub fn with_key_attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_attributes = Some(NameList::many(names));
        self
    }

    /// Set the value attributes.
    pub fn with_value_attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.value_attributes = Some(NameList::many(names));
        self
    }

    /// Set the backend failure policy.
    pub fn with_backend_failure_policy(mut self, policy: BackendFailurePolicy) -> Self {
        self.backend_failure_policy = policy;
        self
    }

    /// Parse from a TOML document.
    pub fn from_toml_str(raw: &str) -> AttrCacheResult<Self> {
        toml::from_str(raw).map_err(|e| {
            ConfigError::Parse {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Create from `ATTRCACHE_*` environment variables with fallback to defaults.
    pub fn from_env() -> Self {
        Self::from_env_prefixed(ENV_PREFIX)
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables (shown for prefix `ATTRCACHE`):
    /// - `ATTRCACHE_NAMESPACE`: comma-separated namespace segments
    /// - `ATTRCACHE_DEFAULT_DURATION_SECS`: default entry duration in seconds
    /// - `ATTRCACHE_KEY_ATTRIBUTES`: comma-separated key attribute names
    /// - `ATTRCACHE_VALUE_ATTRIBUTES`: comma-separated value attribute names
    /// - `ATTRCACHE_BACKEND_FAILURE_POLICY`: `propagate` or `treat_as_miss`
    pub fn from_env_prefixed(prefix: &str) -> Self {
        let var = |name: &str| std::env::var(format!("{}_{}", prefix, name)).ok();
        let defaults = Self::default();

        Self {
            namespace: var("NAMESPACE")
                .and_then(|s| NameList::parse_env(&s))
                .or(defaults.namespace),
            default_duration_secs: var("DEFAULT_DURATION_SECS")
                .and_then(|s| s.trim().parse().ok())
                .or(defaults.default_duration_secs),
            key_attributes: var("KEY_ATTRIBUTES")
                .and_then(|s| NameList::parse_env(&s))
                .or(defaults.key_attributes),
            value_attributes: var("VALUE_ATTRIBUTES")
                .and_then(|s| NameList::parse_env(&s))
                .or(defaults.value_attributes),
            backend_failure_policy: var("BACKEND_FAILURE_POLICY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.backend_failure_policy),
        }
    }

    /// Validate against a record type and fill in defaults.
    ///
    /// Fails with a `ConfigError` naming the offending field if:
    /// - the namespace is empty or has an empty segment
    /// - key attributes are empty or repeat a name
    /// - value attributes are given as a single bare name
    /// - any attribute is not an attribute of `R`
    pub fn resolve<R: RecordSchema>(&self) -> AttrCacheResult<ResolvedCacheConfig> {
        let namespace = match &self.namespace {
            None => vec![R::RECORD_TYPE.to_string(), "attributes".to_string()],
            Some(NameList::One(segment)) => vec![segment.clone()],
            Some(NameList::Many(segments)) => segments.clone(),
        };
        if namespace.is_empty() || namespace.iter().any(String::is_empty) {
            return Err(ConfigError::InvalidValue {
                field: "namespace".to_string(),
                value: format!("{:?}", namespace),
                reason: "namespace must have at least one non-empty segment".to_string(),
            }
            .into());
        }

        let key_attributes = match &self.key_attributes {
            None => R::identity_attributes()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            Some(NameList::One(name)) => vec![name.clone()],
            Some(NameList::Many(names)) => names.clone(),
        };
        if key_attributes.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "key_attributes".to_string(),
            }
            .into());
        }
        let mut seen = HashSet::new();
        if let Some(dup) = key_attributes.iter().find(|n| !seen.insert(n.as_str())) {
            return Err(ConfigError::InvalidValue {
                field: "key_attributes".to_string(),
                value: dup.clone(),
                reason: "key attribute names must be unique".to_string(),
            }
            .into());
        }
        check_known::<R>(&key_attributes)?;

        let value_attributes = match &self.value_attributes {
            None => R::attribute_names().iter().map(|s| s.to_string()).collect(),
            Some(NameList::One(name)) => {
                return Err(ConfigError::InvalidValue {
                    field: "value_attributes".to_string(),
                    value: name.clone(),
                    reason: "value_attributes must be a list of attribute names".to_string(),
                }
                .into())
            }
            Some(NameList::Many(names)) => {
                let mut seen = HashSet::new();
                names
                    .iter()
                    .filter(|n| seen.insert(n.as_str()))
                    .cloned()
                    .collect::<Vec<_>>()
            }
        };
        check_known::<R>(&value_attributes)?;

        let default_duration = match self.default_duration_secs {
            None | Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        };

        Ok(ResolvedCacheConfig {
            namespace,
            default_duration,
            key_attributes,
            value_attributes,
            backend_failure_policy: self.backend_failure_policy,
        })
    }
}

fn check_known<R: RecordSchema>(names: &[String]) -> AttrCacheResult<()> {
    let known = R::attribute_names();
    match names.iter().find(|n| !known.contains(&n.as_str())) {
        Some(unknown) => Err(ConfigError::UnknownAttribute {
            record_type: R::RECORD_TYPE.to_string(),
            attribute: unknown.clone(),
        }
        .into()),
        None => Ok(()),
    }
}

/// Configuration validated against a record type, with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCacheConfig {
    pub namespace: Vec<String>,
    /// `None` means entries never expire unless a write says otherwise.
    pub default_duration: Option<Duration>,
    pub key_attributes: Vec<String>,
    pub value_attributes: Vec<String>,
    pub backend_failure_policy: BackendFailurePolicy,
}

// =============================================================================
// TESTS
// =============================================================================
