//! Engine error taxonomy.

use tutti_storage::StorageError;

/// Error type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can escape the dispatch engine.
///
/// Conflicts over a musician are deliberately NOT here: being reserved
/// elsewhere is a normal exclusion outcome, surfaced as a skip reason.
/// Token problems are [`crate::ResponseOutcome`] variants, not errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Rejected need configuration, checked before any state mutation
    #[error("validation failed: {0}")]
    Validation(#[from] tutti_core::ValidationError),

    /// Referenced entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency retries exhausted; transient, safe to retry
    #[error("concurrent write lost after {attempts} attempts, safe to retry")]
    ConcurrentWriteLost {
        /// How many attempts were made
        attempts: u32,
    },

    /// Storage failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
