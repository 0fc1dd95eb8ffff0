//! Preview - side-effect-free simulation of dispatch.
//!
//! Runs exactly the planner live dispatch commits, against current persisted
//! state, and returns the annotated plan without creating requests,
//! reservations or tokens.

use serde::Serialize;
use tutti_core::{ExclusionReason, MusicianId, NeedId, ProjectId, Strategy};

use crate::dispatch::{plan_snapshot, DispatchEngine, Snapshot};
use crate::error::{EngineError, Result};
use crate::plan::{DispatchPlan, PlannedContact};

/// A candidate shown on the preview, with their rank.
#[derive(Debug, Clone, Serialize)]
pub struct MusicianWithRank {
    /// The musician
    pub musician_id: MusicianId,

    /// Display name (empty if the row is missing)
    pub name: String,

    /// Rank on the resolved list
    pub rank: u32,
}

/// An excluded candidate with the reason live dispatch would skip them for.
#[derive(Debug, Clone, Serialize)]
pub struct ExcludedMusician {
    /// The musician
    pub musician_id: MusicianId,

    /// Display name (empty if the row is missing)
    pub name: String,

    /// Rank on the resolved list
    pub rank: u32,

    /// Exclusion reason, identical to live dispatch
    pub reason: ExclusionReason,
}

/// What a dispatch call would do to one need right now.
#[derive(Debug, Clone, Serialize)]
pub struct NeedPreview {
    /// The previewed need
    pub need_id: NeedId,

    /// Position being staffed
    pub position: String,

    /// Dispatch strategy
    pub strategy: Strategy,

    /// The need's quantity is already met
    pub already_complete: bool,

    /// Musicians a dispatch call would contact now
    pub to_contact: Vec<MusicianWithRank>,

    /// Candidates the eligibility filter removes, with reasons
    pub excluded: Vec<ExcludedMusician>,

    /// Eligible musicians waiting behind the current send slots
    pub next_in_queue: Vec<MusicianWithRank>,
}

impl DispatchEngine {
    /// Simulate [`DispatchEngine::dispatch`] for one need. Read-only.
    pub async fn preview(&self, need_id: NeedId) -> Result<NeedPreview> {
        let need = self.load_need(need_id).await?;
        let project = self
            .storage()
            .load_project(need.project_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("project {}", need.project_id)))?;

        let batch = self.batch_claims(&project).await?;
        let snap = self.snapshot(need_id).await?;
        let plan = plan_snapshot(&snap, &batch);
        Ok(to_preview(&snap, plan))
    }

    /// Simulate dispatching every open need of a project, in creation order.
    ///
    /// Later needs see musicians promised to earlier needs in the batch as
    /// `will_receive_request`. Read-only.
    pub async fn preview_all(&self, project_id: ProjectId) -> Result<Vec<NeedPreview>> {
        let project = self
            .storage()
            .load_project(project_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("project {project_id}")))?;
        let needs = self.storage().list_needs(project_id).await?;

        let mut batch = self.batch_claims(&project).await?;
        let mut previews = Vec::new();
        for need in needs {
            if need.is_closed() {
                continue;
            }
            let snap = self.snapshot(need.id).await?;
            let plan = plan_snapshot(&snap, &batch);
            for contact in &plan.to_contact {
                batch.entry(contact.musician_id).or_insert(need.id);
            }
            previews.push(to_preview(&snap, plan));
        }
        Ok(previews)
    }
}

fn to_preview(snap: &Snapshot, plan: DispatchPlan) -> NeedPreview {
    let name = |musician_id: MusicianId| {
        snap.musicians
            .get(&musician_id)
            .map(|m| m.name.clone())
            .unwrap_or_default()
    };
    let with_rank = |contacts: &[PlannedContact]| {
        contacts
            .iter()
            .map(|c| MusicianWithRank {
                musician_id: c.musician_id,
                name: name(c.musician_id),
                rank: c.rank,
            })
            .collect::<Vec<_>>()
    };

    NeedPreview {
        need_id: snap.need.id,
        position: snap.need.position.clone(),
        strategy: snap.need.strategy,
        already_complete: plan.already_complete,
        to_contact: with_rank(&plan.to_contact),
        excluded: plan
            .excluded
            .iter()
            .map(|e| ExcludedMusician {
                musician_id: e.musician_id,
                name: name(e.musician_id),
                rank: e.rank,
                reason: e.reason,
            })
            .collect(),
        next_in_queue: with_rank(&plan.next_in_queue),
    }
}
