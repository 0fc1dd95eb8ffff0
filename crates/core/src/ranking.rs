//! Ranking lists - ordered musician preferences per position.

use crate::id::{MusicianId, ProjectId, RankingListId};
use serde::{Deserialize, Serialize};

/// An ordered preference list of musicians for one position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingList {
    /// Unique identifier
    pub id: RankingListId,

    /// Position this list ranks (e.g. "Violin I", "Trombone")
    pub position: String,

    /// Entries in rank-ascending order
    pub entries: Vec<RankingEntry>,

    /// Whether this is the shared standard list or a project-scoped override
    pub scope: RankingScope,
}

impl RankingList {
    /// Create a standard list for a position.
    pub fn standard(position: impl Into<String>) -> Self {
        Self {
            id: RankingListId::new(),
            position: position.into(),
            entries: Vec::new(),
            scope: RankingScope::Standard,
        }
    }

    /// Create a project-scoped custom list for a position.
    pub fn custom(position: impl Into<String>, project_id: ProjectId) -> Self {
        Self {
            id: RankingListId::new(),
            position: position.into(),
            entries: Vec::new(),
            scope: RankingScope::Custom { project_id },
        }
    }

    /// Append a musician at the next rank.
    pub fn push(&mut self, musician_id: MusicianId) {
        let rank = self.entries.last().map(|e| e.rank + 1).unwrap_or(1);
        self.entries.push(RankingEntry { rank, musician_id });
    }

    /// Entries in rank-ascending order with duplicate musicians removed
    /// (first occurrence wins).
    pub fn deduplicated(&self) -> Vec<RankingEntry> {
        let mut sorted = self.entries.clone();
        sorted.sort_by_key(|e| e.rank);

        let mut seen = std::collections::HashSet::new();
        sorted.retain(|e| seen.insert(e.musician_id));
        sorted
    }
}

/// One position in a ranking list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEntry {
    /// Rank, ascending (1 = most preferred)
    pub rank: u32,

    /// The ranked musician
    pub musician_id: MusicianId,
}

/// Scope of a ranking list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingScope {
    /// Shared across projects
    Standard,
    /// Overrides the standard list for one project
    Custom {
        /// Owning project
        project_id: ProjectId,
    },
}
