//! Ranking resolution.
//!
//! A need's candidate order comes from a project-scoped custom list when one
//! exists for the position, falling back to the list the need references.

use crate::error::{EngineError, Result};
use tutti_core::{MusicianId, Need};
use tutti_storage::Storage;

/// A musician in a resolved ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankedCandidate {
    /// The ranked musician
    pub musician_id: MusicianId,

    /// Rank, ascending (1 = most preferred)
    pub rank: u32,
}

/// Resolve the ordered, de-duplicated candidate sequence for a need.
pub async fn resolve_candidates(
    storage: &dyn Storage,
    need: &Need,
) -> Result<Vec<RankedCandidate>> {
    let list = match storage
        .find_custom_list(need.project_id, &need.position)
        .await?
    {
        Some(custom) => custom,
        None => storage
            .load_ranking_list(need.ranking_list_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("ranking list {}", need.ranking_list_id))
            })?,
    };

    Ok(list
        .deduplicated()
        .into_iter()
        .map(|e| RankedCandidate {
            musician_id: e.musician_id,
            rank: e.rank,
        })
        .collect())
}
