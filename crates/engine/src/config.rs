//! Configuration for the dispatch engine.

/// Behavior knobs for [`crate::DispatchEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often a dispatch retries after losing a versioned write before
    /// surfacing [`crate::EngineError::ConcurrentWriteLost`]
    pub max_write_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: 3,
        }
    }
}
