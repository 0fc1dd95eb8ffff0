//! Conflict registry.
//!
//! Derives, per project, which musicians already hold a live request and
//! resolves cross-need competition over the same musician. The reservation
//! itself is the live request row: `Storage::commit_dispatch` checks the
//! claim and creates the request in one atomic step, so the registry never
//! has separate state to keep in sync.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use tutti_core::{
    Clock, ConflictAudit, ConflictStrategy, ExclusionReason, MusicianId, Need, NeedId,
    RequestStatus,
};
use tutti_storage::Storage;

use crate::error::Result;
use crate::plan::PlannedContact;

/// A musician's live hold within a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    /// Need holding the musician
    pub need_id: NeedId,

    /// Status of the holding request (pending or accepted)
    pub status: RequestStatus,
}

impl Claim {
    /// The exclusion reason this claim imposes on other needs.
    pub fn reason(&self) -> ExclusionReason {
        match self.status {
            RequestStatus::Accepted => ExclusionReason::HasAccepted,
            _ => ExclusionReason::HasPending,
        }
    }
}

/// Conflict lookups and audit retention over a storage handle.
#[derive(Clone)]
pub struct ConflictRegistry {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
}

impl ConflictRegistry {
    /// Create a registry.
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Live claims of a project, keyed by musician.
    pub async fn claims(
        &self,
        project_id: tutti_core::ProjectId,
    ) -> Result<HashMap<MusicianId, Claim>> {
        let requests = self.storage.list_requests_for_project(project_id).await?;
        Ok(requests
            .into_iter()
            .filter(|r| r.status.holds_reservation())
            .map(|r| {
                (
                    r.musician_id,
                    Claim {
                        need_id: r.need_id,
                        status: r.status,
                    },
                )
            })
            .collect())
    }

    /// Record a conflict skip observed during dispatch.
    ///
    /// Under `Simple` and `Smart` the skip is only logged; `Detailed`
    /// additionally retains an audit entry.
    pub async fn record_conflict(
        &self,
        strategy: ConflictStrategy,
        need: &Need,
        musician_id: MusicianId,
        held_by_need_id: NeedId,
        reason: ExclusionReason,
    ) -> Result<()> {
        debug!(
            musician = %musician_id,
            need = %need.id,
            held_by = %held_by_need_id,
            reason = %reason,
            "skipped reserved musician"
        );

        if strategy == ConflictStrategy::Detailed {
            self.storage
                .save_conflict_audit(&ConflictAudit {
                    project_id: need.project_id,
                    musician_id,
                    skipped_need_id: need.id,
                    held_by_need_id,
                    reason,
                    recorded_at: self.clock.now(),
                })
                .await?;
        }
        Ok(())
    }
}

/// Assign each contested musician to one need, from a batch-start snapshot.
///
/// `prospects` is the batch in processing order, each need paired with the
/// contacts it would make in isolation. A musician wanted by several needs
/// goes to the one where their rank is numerically lowest; on equal ranks
/// the need processed first in the batch keeps them.
pub fn smart_claims(prospects: &[(NeedId, Vec<PlannedContact>)]) -> HashMap<MusicianId, NeedId> {
    let mut best: HashMap<MusicianId, (u32, NeedId)> = HashMap::new();
    for (need_id, contacts) in prospects {
        for contact in contacts {
            match best.get(&contact.musician_id) {
                Some((rank, _)) if *rank <= contact.rank => {}
                _ => {
                    best.insert(contact.musician_id, (contact.rank, *need_id));
                }
            }
        }
    }
    best.into_iter().map(|(m, (_, n))| (m, n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(musician_id: MusicianId, rank: u32) -> PlannedContact {
        PlannedContact { musician_id, rank }
    }

    #[test]
    fn smart_claims_prefer_lowest_rank() {
        let m = MusicianId::new();
        let need_a = NeedId::new();
        let need_b = NeedId::new();

        let claims = smart_claims(&[
            (need_a, vec![contact(m, 5)]),
            (need_b, vec![contact(m, 2)]),
        ]);
        assert_eq!(claims.get(&m), Some(&need_b));
    }

    #[test]
    fn smart_claims_tie_goes_to_first_need_in_batch() {
        let m = MusicianId::new();
        let need_a = NeedId::new();
        let need_b = NeedId::new();

        let claims = smart_claims(&[
            (need_a, vec![contact(m, 3)]),
            (need_b, vec![contact(m, 3)]),
        ]);
        assert_eq!(claims.get(&m), Some(&need_a));
    }
}
