//! Storage trait abstraction.

use async_trait::async_trait;
use std::collections::HashMap;
use tutti_core::{
    ConflictAudit, Musician, MusicianId, Need, NeedId, Project, ProjectId, RankingList,
    RankingListId, Request, RequestId, RequestStatus, ResponseToken, Time,
};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Conditional write lost against a concurrent writer
    #[error("version conflict on need {need_id}: expected {expected}, found {found}")]
    VersionConflict {
        /// Need whose version check failed
        need_id: NeedId,
        /// Version the writer read
        expected: u64,
        /// Version actually stored
        found: u64,
    },

    /// Operation rejected by an integrity rule
    #[error("{0}")]
    Rejected(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Result of an atomic dispatch commit.
///
/// `created` and `skipped` partition the submitted sends: a send is skipped
/// exactly when its musician already held a live request somewhere in the
/// project at commit time.
#[derive(Debug, Clone)]
pub struct DispatchCommit {
    /// Requests (with their tokens) that were persisted
    pub created: Vec<Request>,

    /// Sends rejected by the one-live-request-per-musician rule
    pub skipped: Vec<SkippedConflict>,

    /// The need's version after the commit
    pub version: u64,
}

/// A send that lost the per-musician reservation race.
#[derive(Debug, Clone)]
pub struct SkippedConflict {
    /// Musician that was already reserved
    pub musician_id: MusicianId,

    /// Need holding the reservation
    pub held_by_need_id: NeedId,

    /// Status of the holding request
    pub held_status: RequestStatus,
}

/// Storage abstraction for tutti data.
///
/// Methods take `&self`; backends serialize internally so one handle can be
/// shared by the dispatch engine, the response handler and the sweeper. The
/// conditional operations (`save_need_versioned`, `commit_dispatch`,
/// `transition_request`, `mark_token_used`) must each be atomic.
#[async_trait]
pub trait Storage: Send + Sync {
    // === Project operations ===

    /// Save a project (create or update).
    async fn save_project(&self, project: &Project) -> Result<()>;

    /// Load a project by ID.
    async fn load_project(&self, id: ProjectId) -> Result<Option<Project>>;

    // === Musician operations ===

    /// Save a musician (create or update).
    async fn save_musician(&self, musician: &Musician) -> Result<()>;

    /// Load a musician by ID.
    async fn load_musician(&self, id: MusicianId) -> Result<Option<Musician>>;

    /// Load several musicians at once; missing IDs are simply absent.
    async fn load_musicians(&self, ids: &[MusicianId]) -> Result<HashMap<MusicianId, Musician>>;

    // === Ranking list operations ===

    /// Save a ranking list (create or update).
    async fn save_ranking_list(&self, list: &RankingList) -> Result<()>;

    /// Load a ranking list by ID.
    async fn load_ranking_list(&self, id: RankingListId) -> Result<Option<RankingList>>;

    /// Find the project-scoped custom list for a position, if one exists.
    async fn find_custom_list(
        &self,
        project_id: ProjectId,
        position: &str,
    ) -> Result<Option<RankingList>>;

    // === Need operations ===

    /// Create a need.
    async fn save_need(&self, need: &Need) -> Result<()>;

    /// Update a need only if its stored version equals `expected`.
    ///
    /// The stored version becomes `expected + 1`; the caller's copy is
    /// persisted with that version. Fails with
    /// [`StorageError::VersionConflict`] otherwise.
    async fn save_need_versioned(&self, need: &Need, expected: u64) -> Result<()>;

    /// Load a need by ID.
    async fn load_need(&self, id: NeedId) -> Result<Option<Need>>;

    /// List the needs of a project.
    async fn list_needs(&self, project_id: ProjectId) -> Result<Vec<Need>>;

    /// Delete a need. Rejected if any request was ever sent for it.
    async fn delete_need(&self, id: NeedId) -> Result<()>;

    // === Request operations ===

    /// Atomically commit a batch of sends for one need.
    ///
    /// In a single step: verifies the need's version equals `expected`
    /// (bumping it to `expected + 1`), and for each `(request, token)` pair
    /// either persists both or skips the pair because its musician already
    /// holds a live (pending/accepted) request in the project. Partial
    /// application across the version check never occurs.
    async fn commit_dispatch(
        &self,
        need_id: NeedId,
        expected: u64,
        sends: Vec<(Request, ResponseToken)>,
    ) -> Result<DispatchCommit>;

    /// Load a request by ID.
    async fn load_request(&self, id: RequestId) -> Result<Option<Request>>;

    /// All requests of one need.
    async fn list_requests_for_need(&self, need_id: NeedId) -> Result<Vec<Request>>;

    /// All requests across a project.
    async fn list_requests_for_project(&self, project_id: ProjectId) -> Result<Vec<Request>>;

    /// All pending requests, across all projects (sweeper scan).
    async fn list_pending_requests(&self) -> Result<Vec<Request>>;

    /// Transition a request from `from` to `to`, stamping `responded_at`.
    ///
    /// Returns `false` without writing when the stored status is not `from`
    /// (first writer wins; losing is a no-op, not an error).
    async fn transition_request(
        &self,
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
        responded_at: Time,
    ) -> Result<bool>;

    // === Token operations ===

    /// Look up a token by its opaque string.
    async fn find_token(&self, token: &str) -> Result<Option<ResponseToken>>;

    /// Consume a token: set `used_at` if unset.
    ///
    /// Returns `false` when the token was already used (replay) and `true`
    /// when this caller consumed it.
    async fn mark_token_used(&self, token: &str, used_at: Time) -> Result<bool>;

    // === Conflict audit operations ===

    /// Retain a skipped-conflict audit entry.
    async fn save_conflict_audit(&self, audit: &ConflictAudit) -> Result<()>;

    /// List retained audit entries for a project.
    async fn list_conflict_audits(&self, project_id: ProjectId) -> Result<Vec<ConflictAudit>>;
}
