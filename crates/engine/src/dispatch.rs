//! The dispatch engine - evaluates needs and creates requests.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use tutti_core::{
    Clock, ConflictStrategy, ExclusionReason, Musician, MusicianId, Need, NeedId, NeedLifecycle,
    Project, ProjectId, Request, RequestId, RequestStatus, ResponseToken, Strategy,
};
use tutti_notify::{DispatchEvent, Notifier};
use tutti_storage::{Storage, StorageError};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::plan::{plan, DispatchPlan, PlanContext};
use crate::ranking::{resolve_candidates, RankedCandidate};
use crate::registry::{smart_claims, Claim, ConflictRegistry};
use crate::token::TokenService;

/// One request created by a dispatch call.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSummary {
    /// The new request
    pub request_id: RequestId,

    /// Contacted musician
    pub musician_id: MusicianId,

    /// Rank snapshot at send time
    pub rank: u32,
}

/// Result of a dispatch call.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    /// Requests created by this call, rank ascending
    pub created: Vec<RequestSummary>,

    /// The need's quantity was already met before this call
    pub already_complete: bool,
}

/// Everything one dispatch decision reads, from one storage snapshot.
pub(crate) struct Snapshot {
    pub(crate) need: Need,
    pub(crate) project: Project,
    pub(crate) candidates: Vec<RankedCandidate>,
    pub(crate) musicians: HashMap<MusicianId, Musician>,
    pub(crate) own_requests: Vec<Request>,
    /// Live claims held by OTHER needs of the project
    pub(crate) claims: HashMap<MusicianId, Claim>,
}

/// The strategy state machine that creates and cancels requests.
///
/// Cheap to clone; all collaborators are shared handles. No ambient state:
/// storage, clock and notifier are injected, so independent instances can be
/// constructed per call-site.
#[derive(Clone)]
pub struct DispatchEngine {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    registry: ConflictRegistry,
    tokens: TokenService,
    config: EngineConfig,
}

impl DispatchEngine {
    /// Create an engine over the given collaborators.
    pub fn new(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry: ConflictRegistry::new(storage.clone(), clock.clone()),
            tokens: TokenService::new(clock.clone()),
            storage,
            clock,
            notifier,
            config: EngineConfig::default(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Evaluate one need and create whatever requests its strategy wants.
    ///
    /// No-op (not an error) for completed and archived needs. Safe to call
    /// repeatedly: a need whose strategy is satisfied creates nothing.
    pub async fn dispatch(&self, need_id: NeedId) -> Result<DispatchOutcome> {
        let need = self.load_need(need_id).await?;
        let project = self.load_project(need.project_id).await?;
        let batch = self.batch_claims(&project).await?;
        self.dispatch_with_claims(need_id, &batch).await
    }

    /// Dispatch every open need of a project, in creation order, against one
    /// conflict snapshot taken at batch start.
    pub async fn dispatch_all(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<(NeedId, DispatchOutcome)>> {
        let project = self.load_project(project_id).await?;
        let needs = self.storage.list_needs(project_id).await?;
        let batch = self.batch_claims(&project).await?;

        let mut outcomes = Vec::new();
        for need in needs {
            if need.is_closed() {
                continue;
            }
            let outcome = self.dispatch_with_claims(need.id, &batch).await?;
            outcomes.push((need.id, outcome));
        }
        Ok(outcomes)
    }

    /// Dispatch one need under a fixed batch-claim snapshot.
    pub(crate) async fn dispatch_with_claims(
        &self,
        need_id: NeedId,
        batch_claims: &HashMap<MusicianId, NeedId>,
    ) -> Result<DispatchOutcome> {
        let mut created = Vec::new();
        let mut attempts = 0u32;
        let mut audited: HashSet<MusicianId> = HashSet::new();

        loop {
            let snap = self.snapshot(need_id).await?;
            snap.need.validate()?;

            let plan = plan_snapshot(&snap, batch_claims);
            self.audit_conflicts(&snap, &plan, batch_claims, &mut audited)
                .await?;

            if plan.to_contact.is_empty() {
                // Quantity met but the lifecycle still says active: the
                // completion write was lost earlier (retry budget exhausted
                // after the accept had already landed). Re-run the
                // idempotent completion so a retrying caller heals the need
                // instead of short-circuiting forever.
                if plan.already_complete && !snap.need.is_closed() {
                    self.maybe_complete(snap.need.id).await?;
                }
                return Ok(DispatchOutcome {
                    created,
                    already_complete: plan.already_complete,
                });
            }

            let now = self.clock.now();
            let sends: Vec<(Request, ResponseToken)> = plan
                .to_contact
                .iter()
                .map(|c| {
                    let request = Request::new(
                        snap.need.id,
                        snap.need.project_id,
                        c.musician_id,
                        c.rank,
                        now,
                    );
                    let token = self.tokens.issue(request.id, snap.need.response_window);
                    (request, token)
                })
                .collect();
            let token_strings: HashMap<RequestId, String> = sends
                .iter()
                .map(|(r, t)| (r.id, t.token.clone()))
                .collect();

            match self
                .storage
                .commit_dispatch(snap.need.id, snap.need.version, sends)
                .await
            {
                Ok(commit) => {
                    attempts = 0;

                    for skip in &commit.skipped {
                        let reason = match skip.held_status {
                            RequestStatus::Accepted => ExclusionReason::HasAccepted,
                            _ => ExclusionReason::HasPending,
                        };
                        if audited.insert(skip.musician_id) {
                            self.registry
                                .record_conflict(
                                    snap.project.conflict_strategy,
                                    &snap.need,
                                    skip.musician_id,
                                    skip.held_by_need_id,
                                    reason,
                                )
                                .await?;
                        }
                    }

                    for request in &commit.created {
                        info!(
                            request = %request.id,
                            need = %snap.need.id,
                            musician = %request.musician_id,
                            rank = request.rank,
                            strategy = %snap.need.strategy,
                            "request sent"
                        );
                        let token = token_strings
                            .get(&request.id)
                            .cloned()
                            .unwrap_or_default();
                        self.notifier
                            .notify(DispatchEvent::RequestSent {
                                request_id: request.id,
                                need_id: snap.need.id,
                                musician_id: request.musician_id,
                                token,
                            })
                            .await;
                        created.push(RequestSummary {
                            request_id: request.id,
                            musician_id: request.musician_id,
                            rank: request.rank,
                        });
                    }

                    if commit.skipped.is_empty() {
                        return Ok(DispatchOutcome {
                            created,
                            already_complete: false,
                        });
                    }
                    // Some slots were lost to concurrent reservations;
                    // re-plan against fresh state to fill them.
                }
                Err(StorageError::VersionConflict { .. }) => {
                    attempts += 1;
                    if attempts >= self.config.max_write_attempts {
                        return Err(EngineError::ConcurrentWriteLost { attempts });
                    }
                    debug!(need = %need_id, attempts, "dispatch lost versioned write, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Retain audit entries for the conflict exclusions a plan observed.
    ///
    /// Only the `Detailed` strategy persists anything; `audited` dedupes
    /// across the retry iterations of one dispatch call.
    async fn audit_conflicts(
        &self,
        snap: &Snapshot,
        plan: &DispatchPlan,
        batch_claims: &HashMap<MusicianId, NeedId>,
        audited: &mut HashSet<MusicianId>,
    ) -> Result<()> {
        if snap.project.conflict_strategy != ConflictStrategy::Detailed {
            return Ok(());
        }

        for excluded in &plan.excluded {
            let held_by = match excluded.reason {
                ExclusionReason::HasPending | ExclusionReason::HasAccepted => {
                    snap.claims.get(&excluded.musician_id).map(|c| c.need_id)
                }
                ExclusionReason::WillReceiveRequest => {
                    batch_claims.get(&excluded.musician_id).copied()
                }
                _ => None,
            };
            let Some(held_by_need_id) = held_by else {
                continue;
            };
            if audited.insert(excluded.musician_id) {
                self.registry
                    .record_conflict(
                        snap.project.conflict_strategy,
                        &snap.need,
                        excluded.musician_id,
                        held_by_need_id,
                        excluded.reason,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Decline-equivalent follow-up after a decline or timeout.
    ///
    /// Sequential and parallel needs immediately advance/top up; first-come
    /// needs only ever extend on a manual re-dispatch.
    pub(crate) async fn follow_up(&self, need: &Need) -> Result<()> {
        match need.strategy {
            Strategy::Sequential | Strategy::Parallel => {
                self.dispatch(need.id).await?;
            }
            Strategy::FirstCome => {}
        }
        Ok(())
    }

    /// Mark the need completed if its quantity is met. Returns whether THIS
    /// call performed the completion.
    ///
    /// For first-come needs, completion cancels every remaining pending
    /// sibling, strictly after the accept that caused it.
    pub(crate) async fn maybe_complete(&self, need_id: NeedId) -> Result<bool> {
        let mut attempts = 0u32;
        loop {
            let need = self.load_need(need_id).await?;
            if need.is_closed() {
                return Ok(false);
            }

            let requests = self.storage.list_requests_for_need(need_id).await?;
            let accepted = requests
                .iter()
                .filter(|r| r.status == RequestStatus::Accepted)
                .count() as u32;
            if accepted < need.quantity {
                return Ok(false);
            }

            let mut updated = need.clone();
            updated.lifecycle = NeedLifecycle::Completed;
            updated.updated_at = self.clock.now();

            match self
                .storage
                .save_need_versioned(&updated, need.version)
                .await
            {
                Ok(()) => {
                    info!(need = %need_id, "need completed");
                    self.notifier
                        .notify(DispatchEvent::NeedCompleted {
                            need_id,
                            project_id: need.project_id,
                        })
                        .await;
                    if need.strategy == Strategy::FirstCome {
                        self.cancel_pending(&need, &requests).await?;
                    }
                    return Ok(true);
                }
                Err(StorageError::VersionConflict { .. }) => {
                    attempts += 1;
                    if attempts >= self.config.max_write_attempts {
                        return Err(EngineError::ConcurrentWriteLost { attempts });
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Withdraw the remaining pending requests of a filled first-come need,
    /// releasing their reservations.
    async fn cancel_pending(&self, need: &Need, requests: &[Request]) -> Result<()> {
        let now = self.clock.now();
        for request in requests.iter().filter(|r| r.status == RequestStatus::Pending) {
            let cancelled = self
                .storage
                .transition_request(
                    request.id,
                    RequestStatus::Pending,
                    RequestStatus::Cancelled,
                    now,
                )
                .await?;
            if cancelled {
                info!(request = %request.id, need = %need.id, "request cancelled (need filled)");
                self.notifier
                    .notify(DispatchEvent::RequestCancelled {
                        request_id: request.id,
                        need_id: need.id,
                        musician_id: request.musician_id,
                    })
                    .await;
            }
        }
        Ok(())
    }

    /// Smart-strategy batch snapshot: each contested musician is promised to
    /// the need where their rank is numerically best. Empty for the other
    /// conflict strategies.
    pub(crate) async fn batch_claims(
        &self,
        project: &Project,
    ) -> Result<HashMap<MusicianId, NeedId>> {
        if project.conflict_strategy != ConflictStrategy::Smart {
            return Ok(HashMap::new());
        }

        let needs = self.storage.list_needs(project.id).await?;
        let mut prospects = Vec::new();
        for need in needs {
            if need.lifecycle != NeedLifecycle::Active {
                continue;
            }
            let need_id = need.id;
            let snap = self.snapshot_of(need).await?;
            let prospective = plan_snapshot(&snap, &HashMap::new());
            prospects.push((need_id, prospective.to_contact));
        }
        Ok(smart_claims(&prospects))
    }

    /// Read everything one planning decision needs, by need id.
    pub(crate) async fn snapshot(&self, need_id: NeedId) -> Result<Snapshot> {
        let need = self.load_need(need_id).await?;
        self.snapshot_of(need).await
    }

    async fn snapshot_of(&self, need: Need) -> Result<Snapshot> {
        let project = self.load_project(need.project_id).await?;
        let candidates = resolve_candidates(self.storage.as_ref(), &need).await?;

        let ids: Vec<MusicianId> = candidates.iter().map(|c| c.musician_id).collect();
        let musicians = self.storage.load_musicians(&ids).await?;

        let mut claims = self.registry.claims(project.id).await?;
        claims.retain(|_, claim| claim.need_id != need.id);

        let own_requests = self.storage.list_requests_for_need(need.id).await?;

        Ok(Snapshot {
            need,
            project,
            candidates,
            musicians,
            own_requests,
            claims,
        })
    }

    pub(crate) async fn load_need(&self, need_id: NeedId) -> Result<Need> {
        self.storage
            .load_need(need_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("need {need_id}")))
    }

    async fn load_project(&self, project_id: ProjectId) -> Result<Project> {
        self.storage
            .load_project(project_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("project {project_id}")))
    }

    pub(crate) fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }
}

/// Run the pure planner over a snapshot.
pub(crate) fn plan_snapshot(
    snap: &Snapshot,
    batch_claims: &HashMap<MusicianId, NeedId>,
) -> DispatchPlan {
    plan(&PlanContext {
        need: &snap.need,
        own_requests: &snap.own_requests,
        candidates: &snap.candidates,
        musicians: &snap.musicians,
        claims: &snap.claims,
        batch_claims,
    })
}
