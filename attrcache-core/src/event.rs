//! Record mutation events delivered by the record layer.

use serde::{Deserialize, Serialize};

/// Point in a record's mutation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationPhase {
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
}

/// A single mutation notification.
///
/// `changed_attributes` is only populated for `AfterUpdate` and lists the
/// attributes whose persisted value actually changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub phase: MutationPhase,
    pub changed_attributes: Vec<String>,
}

impl MutationEvent {
    pub fn after_insert() -> Self {
        Self::bare(MutationPhase::AfterInsert)
    }

    pub fn before_update() -> Self {
        Self::bare(MutationPhase::BeforeUpdate)
    }

    pub fn after_update(changed_attributes: Vec<String>) -> Self {
        Self {
            phase: MutationPhase::AfterUpdate,
            changed_attributes,
        }
    }

    pub fn before_delete() -> Self {
        Self::bare(MutationPhase::BeforeDelete)
    }

    pub fn after_delete() -> Self {
        Self::bare(MutationPhase::AfterDelete)
    }

    fn bare(phase: MutationPhase) -> Self {
        Self {
            phase,
            changed_attributes: Vec::new(),
        }
    }

    /// Returns true if any changed attribute is one of `names`.
    pub fn touches<S: AsRef<str>>(&self, names: &[S]) -> bool {
        self.changed_attributes
            .iter()
            .any(|changed| names.iter().any(|n| n.as_ref() == changed))
    }
}
