//! Error types for the store crate.

use thiserror::Error;

use crate::entity::LocalId;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the local entity store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No entity exists under the given identity.
    #[error("no entity with id {id}")]
    EntityMissing {
        /// The identity that failed to resolve.
        id: LocalId,
    },
}

impl StoreError {
    /// Creates an entity-missing error.
    pub fn entity_missing(id: LocalId) -> Self {
        Self::EntityMissing { id }
    }
}
