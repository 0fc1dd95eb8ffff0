//! Project model and conflict-resolution configuration.

use crate::id::{MusicianId, NeedId, ProjectId};
use crate::request::ExclusionReason;
use crate::Time;
use serde::{Deserialize, Serialize};

/// A project groups the needs of one production period.
///
/// The project is also the conflict scope: a musician holds at most one live
/// request across all needs of the same project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier
    pub id: ProjectId,

    /// Project name
    pub name: String,

    /// How cross-need conflicts over the same musician are resolved
    pub conflict_strategy: ConflictStrategy,

    /// Creation timestamp
    pub created_at: Time,
}

impl Project {
    /// Create a project with the given name and the `Simple` conflict strategy.
    pub fn new(name: impl Into<String>, created_at: Time) -> Self {
        Self {
            id: ProjectId::new(),
            name: name.into(),
            conflict_strategy: ConflictStrategy::Simple,
            created_at,
        }
    }

    /// Set the conflict strategy.
    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }
}

/// Tie-break policy when several needs of a project compete for a musician.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// First need processed wins; others silently skip the musician.
    Simple,
    /// Like `Simple`, but every skipped conflict is retained as an audit entry.
    Detailed,
    /// The musician goes to the need where their rank is numerically best
    /// (lowest), computed from a snapshot at batch start; equal ranks fall
    /// back to batch processing order.
    Smart,
}

/// Audit entry for a conflict skip, retained under the `Detailed` strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictAudit {
    /// Project the conflict occurred in
    pub project_id: ProjectId,

    /// Musician both needs wanted
    pub musician_id: MusicianId,

    /// Need that skipped the musician
    pub skipped_need_id: NeedId,

    /// Need that holds (or will receive) the musician
    pub held_by_need_id: NeedId,

    /// Why the musician was unavailable (`has_pending`, `has_accepted` or
    /// `will_receive_request`)
    pub reason: ExclusionReason,

    /// When the skip happened
    pub recorded_at: Time,
}
