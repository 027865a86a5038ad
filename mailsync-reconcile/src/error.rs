//! Error types for mailsync-reconcile.

use thiserror::Error;

use mailsync_core::{FetchError, MutationError, QueryError};

/// A cycle failed; the variant tells which phase gave up.
#[derive(Debug, Error)]
pub enum CycleError {
    /// The directory could not be queried. Nothing was mutated.
    #[error("directory query failed: {0}")]
    Query(#[from] QueryError),

    /// A backend snapshot could not be loaded. Nothing was mutated.
    #[error("snapshot load failed: {0}")]
    Fetch(#[from] FetchError),

    /// The backend rejected a mutation. Earlier mutations of this cycle stay
    /// applied.
    #[error("apply aborted: {0}")]
    Mutation(#[from] MutationError),
}

impl CycleError {
    /// Whether the failure happened after mutations may have started.
    pub fn during_apply(&self) -> bool {
        matches!(self, CycleError::Mutation(_))
    }
}
