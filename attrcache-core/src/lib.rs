//! attrcache Core - Data Types
//!
//! Pure data structures shared by the attribute cache layer. All other
//! crates depend on this. Behavior (key encoding, cache operations,
//! invalidation) lives in attrcache-storage.

pub mod config;
pub mod error;
pub mod event;
pub mod record;
pub mod value;

pub use config::{
    AttributeCacheConfig, BackendFailurePolicy, NameList, ResolvedCacheConfig, ENV_PREFIX,
};
pub use error::{
    AttrCacheError, AttrCacheResult, BackendError, ConfigError, KeyInputError, RecordError,
};
pub use event::{MutationEvent, MutationPhase};
pub use record::{FieldReader, RecordSchema, TrackedRecord};
pub use value::{AttributeMap, AttributeValue};
