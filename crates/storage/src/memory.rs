//! In-memory storage implementation.
//!
//! All state lives in maps behind a single `tokio::sync::Mutex`, which makes
//! every trait method (in particular the conditional writes) one atomic
//! step. Used by the engine tests and by embedded single-process
//! deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tutti_core::{
    ConflictAudit, Musician, MusicianId, Need, NeedId, Project, ProjectId, RankingList,
    RankingListId, RankingScope, Request, RequestId, RequestStatus, ResponseToken, Time,
};

use super::{DispatchCommit, Result, SkippedConflict, Storage, StorageError};

#[derive(Default)]
struct Inner {
    projects: HashMap<ProjectId, Project>,
    musicians: HashMap<MusicianId, Musician>,
    ranking_lists: HashMap<RankingListId, RankingList>,
    needs: HashMap<NeedId, Need>,
    requests: HashMap<RequestId, Request>,
    tokens: HashMap<String, ResponseToken>,
    conflict_audits: Vec<ConflictAudit>,
}

impl Inner {
    /// Live (pending/accepted) requests of a project, keyed by musician.
    fn live_claims(&self, project_id: ProjectId) -> HashMap<MusicianId, &Request> {
        self.requests
            .values()
            .filter(|r| r.project_id == project_id && r.status.holds_reservation())
            .map(|r| (r.musician_id, r))
            .collect()
    }
}

/// Map-backed storage, fully in memory.
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_project(&self, project: &Project) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn load_project(&self, id: ProjectId) -> Result<Option<Project>> {
        let inner = self.inner.lock().await;
        Ok(inner.projects.get(&id).cloned())
    }

    async fn save_musician(&self, musician: &Musician) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.musicians.insert(musician.id, musician.clone());
        Ok(())
    }

    async fn load_musician(&self, id: MusicianId) -> Result<Option<Musician>> {
        let inner = self.inner.lock().await;
        Ok(inner.musicians.get(&id).cloned())
    }

    async fn load_musicians(&self, ids: &[MusicianId]) -> Result<HashMap<MusicianId, Musician>> {
        let inner = self.inner.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| inner.musicians.get(id).map(|m| (*id, m.clone())))
            .collect())
    }

    async fn save_ranking_list(&self, list: &RankingList) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ranking_lists.insert(list.id, list.clone());
        Ok(())
    }

    async fn load_ranking_list(&self, id: RankingListId) -> Result<Option<RankingList>> {
        let inner = self.inner.lock().await;
        Ok(inner.ranking_lists.get(&id).cloned())
    }

    async fn find_custom_list(
        &self,
        project_id: ProjectId,
        position: &str,
    ) -> Result<Option<RankingList>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .ranking_lists
            .values()
            .find(|l| {
                l.position == position
                    && matches!(l.scope, RankingScope::Custom { project_id: p } if p == project_id)
            })
            .cloned())
    }

    async fn save_need(&self, need: &Need) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.needs.insert(need.id, need.clone());
        Ok(())
    }

    async fn save_need_versioned(&self, need: &Need, expected: u64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let found = inner
            .needs
            .get(&need.id)
            .ok_or_else(|| StorageError::NotFound(format!("need {}", need.id)))?
            .version;

        if found != expected {
            return Err(StorageError::VersionConflict {
                need_id: need.id,
                expected,
                found,
            });
        }

        let mut updated = need.clone();
        updated.version = expected + 1;
        inner.needs.insert(need.id, updated);
        Ok(())
    }

    async fn load_need(&self, id: NeedId) -> Result<Option<Need>> {
        let inner = self.inner.lock().await;
        Ok(inner.needs.get(&id).cloned())
    }

    async fn list_needs(&self, project_id: ProjectId) -> Result<Vec<Need>> {
        let inner = self.inner.lock().await;
        let mut needs: Vec<Need> = inner
            .needs
            .values()
            .filter(|n| n.project_id == project_id)
            .cloned()
            .collect();
        needs.sort_by_key(|n| n.created_at);
        Ok(needs)
    }

    async fn delete_need(&self, id: NeedId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.requests.values().any(|r| r.need_id == id) {
            return Err(StorageError::Rejected(format!(
                "need {id} has requests and can only be archived"
            )));
        }
        inner
            .needs
            .remove(&id)
            .ok_or_else(|| StorageError::NotFound(format!("need {id}")))?;
        Ok(())
    }

    async fn commit_dispatch(
        &self,
        need_id: NeedId,
        expected: u64,
        sends: Vec<(Request, ResponseToken)>,
    ) -> Result<DispatchCommit> {
        let mut inner = self.inner.lock().await;

        let need = inner
            .needs
            .get(&need_id)
            .ok_or_else(|| StorageError::NotFound(format!("need {need_id}")))?;
        if need.version != expected {
            return Err(StorageError::VersionConflict {
                need_id,
                expected,
                found: need.version,
            });
        }
        let project_id = need.project_id;

        let mut created = Vec::new();
        let mut skipped = Vec::new();
        for (request, token) in sends {
            // Re-check under the lock: the claim may have appeared since the
            // caller planned this send.
            let claim = inner
                .live_claims(project_id)
                .get(&request.musician_id)
                .map(|r| (r.need_id, r.status));

            match claim {
                Some((held_by_need_id, held_status)) => skipped.push(SkippedConflict {
                    musician_id: request.musician_id,
                    held_by_need_id,
                    held_status,
                }),
                None => {
                    inner.tokens.insert(token.token.clone(), token);
                    inner.requests.insert(request.id, request.clone());
                    created.push(request);
                }
            }
        }

        let version = expected + 1;
        if let Some(need) = inner.needs.get_mut(&need_id) {
            need.version = version;
        }

        Ok(DispatchCommit {
            created,
            skipped,
            version,
        })
    }

    async fn load_request(&self, id: RequestId) -> Result<Option<Request>> {
        let inner = self.inner.lock().await;
        Ok(inner.requests.get(&id).cloned())
    }

    async fn list_requests_for_need(&self, need_id: NeedId) -> Result<Vec<Request>> {
        let inner = self.inner.lock().await;
        let mut requests: Vec<Request> = inner
            .requests
            .values()
            .filter(|r| r.need_id == need_id)
            .cloned()
            .collect();
        requests.sort_by_key(|r| (r.sent_at, r.rank));
        Ok(requests)
    }

    async fn list_requests_for_project(&self, project_id: ProjectId) -> Result<Vec<Request>> {
        let inner = self.inner.lock().await;
        let mut requests: Vec<Request> = inner
            .requests
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        requests.sort_by_key(|r| (r.sent_at, r.rank));
        Ok(requests)
    }

    async fn list_pending_requests(&self) -> Result<Vec<Request>> {
        let inner = self.inner.lock().await;
        let mut requests: Vec<Request> = inner
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending)
            .cloned()
            .collect();
        requests.sort_by_key(|r| (r.sent_at, r.rank));
        Ok(requests)
    }

    async fn transition_request(
        &self,
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
        responded_at: Time,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let request = inner
            .requests
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("request {id}")))?;

        if request.status != from {
            return Ok(false);
        }
        request.status = to;
        request.responded_at = Some(responded_at);
        Ok(true)
    }

    async fn find_token(&self, token: &str) -> Result<Option<ResponseToken>> {
        let inner = self.inner.lock().await;
        Ok(inner.tokens.get(token).cloned())
    }

    async fn mark_token_used(&self, token: &str, used_at: Time) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .tokens
            .get_mut(token)
            .ok_or_else(|| StorageError::NotFound(format!("token {token}")))?;

        if stored.used_at.is_some() {
            return Ok(false);
        }
        stored.used_at = Some(used_at);
        Ok(true)
    }

    async fn save_conflict_audit(&self, audit: &ConflictAudit) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.conflict_audits.push(audit.clone());
        Ok(())
    }

    async fn list_conflict_audits(&self, project_id: ProjectId) -> Result<Vec<ConflictAudit>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .conflict_audits
            .iter()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect())
    }
}
