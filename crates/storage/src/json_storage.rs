//! JSON file storage implementation.
//!
//! Stores each entity as a JSON file in a `.tutti` directory tree. A single
//! process-wide lock serializes writers, which gives the conditional
//! operations the same atomicity as the in-memory backend. Suitable for the
//! CLI and single-instance deployments; anything larger should bring its own
//! backend behind the [`Storage`] trait.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tutti_core::{
    ConflictAudit, Musician, MusicianId, Need, NeedId, Project, ProjectId, RankingList,
    RankingListId, RankingScope, Request, RequestId, RequestStatus, ResponseToken, Time,
};

use super::{DispatchCommit, Result, SkippedConflict, Storage, StorageError};

const KINDS: &[&str] = &[
    "projects",
    "musicians",
    "ranking_lists",
    "needs",
    "requests",
    "tokens",
];

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
    lock: Mutex<()>,
}

impl JsonStorage {
    /// Create storage rooted at `root`, creating the entity directories.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for kind in KINDS {
            fs::create_dir_all(root.join(kind)).await?;
        }
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    fn path(&self, kind: &str, id: &str) -> PathBuf {
        self.root.join(kind).join(format!("{id}.json"))
    }

    fn audits_path(&self) -> PathBuf {
        self.root.join("conflict_audits.json")
    }

    async fn write<T: Serialize>(&self, kind: &str, id: &str, value: &T) -> Result<()> {
        let path = self.path(kind, id);
        fs::write(&path, serde_json::to_string_pretty(value)?).await?;
        Ok(())
    }

    async fn read<T: DeserializeOwned>(&self, kind: &str, id: &str) -> Result<Option<T>> {
        let path = self.path(kind, id);
        match fs::read_to_string(&path).await {
            Ok(s) => Ok(Some(serde_json::from_str(&s)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_all<T: DeserializeOwned>(&self, kind: &str) -> Result<Vec<T>> {
        let mut out = Vec::new();
        let mut dir = fs::read_dir(self.root.join(kind)).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let s = fs::read_to_string(entry.path()).await?;
            out.push(serde_json::from_str(&s)?);
        }
        Ok(out)
    }

    async fn read_audits(&self) -> Result<Vec<ConflictAudit>> {
        match fs::read_to_string(self.audits_path()).await {
            Ok(s) => Ok(serde_json::from_str(&s)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Live (pending/accepted) requests of a project, keyed by musician.
    async fn live_claims(
        &self,
        project_id: ProjectId,
    ) -> Result<HashMap<MusicianId, (NeedId, RequestStatus)>> {
        let requests: Vec<Request> = self.read_all("requests").await?;
        Ok(requests
            .into_iter()
            .filter(|r| r.project_id == project_id && r.status.holds_reservation())
            .map(|r| (r.musician_id, (r.need_id, r.status)))
            .collect())
    }
}

#[async_trait]
impl Storage for JsonStorage {
    async fn save_project(&self, project: &Project) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write("projects", &project.id.to_string(), project).await
    }

    async fn load_project(&self, id: ProjectId) -> Result<Option<Project>> {
        self.read("projects", &id.to_string()).await
    }

    async fn save_musician(&self, musician: &Musician) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write("musicians", &musician.id.to_string(), musician)
            .await
    }

    async fn load_musician(&self, id: MusicianId) -> Result<Option<Musician>> {
        self.read("musicians", &id.to_string()).await
    }

    async fn load_musicians(&self, ids: &[MusicianId]) -> Result<HashMap<MusicianId, Musician>> {
        let mut out = HashMap::new();
        for id in ids {
            if let Some(m) = self.load_musician(*id).await? {
                out.insert(*id, m);
            }
        }
        Ok(out)
    }

    async fn save_ranking_list(&self, list: &RankingList) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write("ranking_lists", &list.id.to_string(), list).await
    }

    async fn load_ranking_list(&self, id: RankingListId) -> Result<Option<RankingList>> {
        self.read("ranking_lists", &id.to_string()).await
    }

    async fn find_custom_list(
        &self,
        project_id: ProjectId,
        position: &str,
    ) -> Result<Option<RankingList>> {
        let lists: Vec<RankingList> = self.read_all("ranking_lists").await?;
        Ok(lists.into_iter().find(|l| {
            l.position == position
                && matches!(l.scope, RankingScope::Custom { project_id: p } if p == project_id)
        }))
    }

    async fn save_need(&self, need: &Need) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write("needs", &need.id.to_string(), need).await
    }

    async fn save_need_versioned(&self, need: &Need, expected: u64) -> Result<()> {
        let _guard = self.lock.lock().await;
        let stored: Need = self
            .read("needs", &need.id.to_string())
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("need {}", need.id)))?;

        if stored.version != expected {
            return Err(StorageError::VersionConflict {
                need_id: need.id,
                expected,
                found: stored.version,
            });
        }

        let mut updated = need.clone();
        updated.version = expected + 1;
        self.write("needs", &need.id.to_string(), &updated).await
    }

    async fn load_need(&self, id: NeedId) -> Result<Option<Need>> {
        self.read("needs", &id.to_string()).await
    }

    async fn list_needs(&self, project_id: ProjectId) -> Result<Vec<Need>> {
        let mut needs: Vec<Need> = self.read_all("needs").await?;
        needs.retain(|n| n.project_id == project_id);
        needs.sort_by_key(|n| n.created_at);
        Ok(needs)
    }

    async fn delete_need(&self, id: NeedId) -> Result<()> {
        let _guard = self.lock.lock().await;
        let requests: Vec<Request> = self.read_all("requests").await?;
        if requests.iter().any(|r| r.need_id == id) {
            return Err(StorageError::Rejected(format!(
                "need {id} has requests and can only be archived"
            )));
        }

        let path = self.path("needs", &id.to_string());
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("need {id}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn commit_dispatch(
        &self,
        need_id: NeedId,
        expected: u64,
        sends: Vec<(Request, ResponseToken)>,
    ) -> Result<DispatchCommit> {
        let _guard = self.lock.lock().await;

        let stored: Need = self
            .read("needs", &need_id.to_string())
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("need {need_id}")))?;
        if stored.version != expected {
            return Err(StorageError::VersionConflict {
                need_id,
                expected,
                found: stored.version,
            });
        }

        let mut claims = self.live_claims(stored.project_id).await?;

        let mut created = Vec::new();
        let mut skipped = Vec::new();
        for (request, token) in sends {
            match claims.get(&request.musician_id) {
                Some((held_by_need_id, held_status)) => skipped.push(SkippedConflict {
                    musician_id: request.musician_id,
                    held_by_need_id: *held_by_need_id,
                    held_status: *held_status,
                }),
                None => {
                    self.write("tokens", &token.token, &token).await?;
                    self.write("requests", &request.id.to_string(), &request)
                        .await?;
                    claims.insert(request.musician_id, (request.need_id, request.status));
                    created.push(request);
                }
            }
        }

        let version = expected + 1;
        let mut updated = stored;
        updated.version = version;
        self.write("needs", &need_id.to_string(), &updated).await?;

        Ok(DispatchCommit {
            created,
            skipped,
            version,
        })
    }

    async fn load_request(&self, id: RequestId) -> Result<Option<Request>> {
        self.read("requests", &id.to_string()).await
    }

    async fn list_requests_for_need(&self, need_id: NeedId) -> Result<Vec<Request>> {
        let mut requests: Vec<Request> = self.read_all("requests").await?;
        requests.retain(|r| r.need_id == need_id);
        requests.sort_by_key(|r| (r.sent_at, r.rank));
        Ok(requests)
    }

    async fn list_requests_for_project(&self, project_id: ProjectId) -> Result<Vec<Request>> {
        let mut requests: Vec<Request> = self.read_all("requests").await?;
        requests.retain(|r| r.project_id == project_id);
        requests.sort_by_key(|r| (r.sent_at, r.rank));
        Ok(requests)
    }

    async fn list_pending_requests(&self) -> Result<Vec<Request>> {
        let mut requests: Vec<Request> = self.read_all("requests").await?;
        requests.retain(|r| r.status == RequestStatus::Pending);
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
        let _guard = self.lock.lock().await;
        let mut request: Request = self
            .read("requests", &id.to_string())
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("request {id}")))?;

        if request.status != from {
            return Ok(false);
        }
        request.status = to;
        request.responded_at = Some(responded_at);
        self.write("requests", &id.to_string(), &request).await?;
        Ok(true)
    }

    async fn find_token(&self, token: &str) -> Result<Option<ResponseToken>> {
        self.read("tokens", token).await
    }

    async fn mark_token_used(&self, token: &str, used_at: Time) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut stored: ResponseToken = self
            .read("tokens", token)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("token {token}")))?;

        if stored.used_at.is_some() {
            return Ok(false);
        }
        stored.used_at = Some(used_at);
        self.write("tokens", token, &stored).await?;
        Ok(true)
    }

    async fn save_conflict_audit(&self, audit: &ConflictAudit) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut audits = self.read_audits().await?;
        audits.push(audit.clone());
        fs::write(self.audits_path(), serde_json::to_string_pretty(&audits)?).await?;
        Ok(())
    }

    async fn list_conflict_audits(&self, project_id: ProjectId) -> Result<Vec<ConflictAudit>> {
        let audits = self.read_audits().await?;
        Ok(audits
            .into_iter()
            .filter(|a| a.project_id == project_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tutti_core::Strategy;

    async fn storage() -> (tempfile::TempDir, JsonStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn need_round_trip() {
        let (_dir, storage) = storage().await;
        let need = Need::new(
            ProjectId::new(),
            "Cello",
            2,
            Strategy::Parallel,
            RankingListId::new(),
            Duration::from_secs(24 * 3600),
            chrono::Utc::now(),
        );
        storage.save_need(&need).await.unwrap();

        let loaded = storage.load_need(need.id).await.unwrap().unwrap();
        assert_eq!(loaded.position, "Cello");
        assert_eq!(loaded.strategy, Strategy::Parallel);
        assert_eq!(loaded.response_window, need.response_window);
    }

    #[tokio::test]
    async fn custom_list_overrides_lookup() {
        let (_dir, storage) = storage().await;
        let project_id = ProjectId::new();

        let standard = RankingList::standard("Oboe");
        let custom = RankingList::custom("Oboe", project_id);
        storage.save_ranking_list(&standard).await.unwrap();
        storage.save_ranking_list(&custom).await.unwrap();

        let found = storage
            .find_custom_list(project_id, "Oboe")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, custom.id);

        let other = storage
            .find_custom_list(ProjectId::new(), "Oboe")
            .await
            .unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn commit_dispatch_enforces_version_and_reservation() {
        let (_dir, storage) = storage().await;
        let project_id = ProjectId::new();
        let musician_id = MusicianId::new();
        let now = chrono::Utc::now();

        let need = Need::new(
            project_id,
            "Horn",
            1,
            Strategy::Sequential,
            RankingListId::new(),
            Duration::from_secs(3600),
            now,
        );
        storage.save_need(&need).await.unwrap();

        let send = |need: &Need| {
            let request = Request::new(need.id, project_id, musician_id, 1, now);
            let token = ResponseToken {
                token: format!("tok-{}", request.id),
                request_id: request.id,
                expires_at: now + chrono::Duration::hours(1),
                used_at: None,
            };
            (request, token)
        };

        let commit = storage
            .commit_dispatch(need.id, 0, vec![send(&need)])
            .await
            .unwrap();
        assert_eq!(commit.created.len(), 1);
        assert_eq!(commit.version, 1);

        // Stale version loses.
        let stale = storage.commit_dispatch(need.id, 0, vec![send(&need)]).await;
        assert!(matches!(stale, Err(StorageError::VersionConflict { .. })));

        // Fresh version, but the musician is reserved now.
        let commit = storage
            .commit_dispatch(need.id, 1, vec![send(&need)])
            .await
            .unwrap();
        assert!(commit.created.is_empty());
        assert_eq!(commit.skipped.len(), 1);
    }
}
