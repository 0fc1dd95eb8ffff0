//! Request model - one outbound contact to one musician for one need.

use crate::id::{MusicianId, NeedId, ProjectId, RequestId};
use crate::Time;
use serde::{Deserialize, Serialize};

/// One outbound offer to one musician for one need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique identifier
    pub id: RequestId,

    /// Need this request staffs
    pub need_id: NeedId,

    /// Project scope (denormalized for conflict lookups)
    pub project_id: ProjectId,

    /// Contacted musician
    pub musician_id: MusicianId,

    /// Current status
    pub status: RequestStatus,

    /// Musician's rank in the ranking at send time
    pub rank: u32,

    /// When the request went out
    pub sent_at: Time,

    /// When the terminal response arrived, if any
    pub responded_at: Option<Time>,
}

impl Request {
    /// Create a pending request.
    pub fn new(
        need_id: NeedId,
        project_id: ProjectId,
        musician_id: MusicianId,
        rank: u32,
        sent_at: Time,
    ) -> Self {
        Self {
            id: RequestId::new(),
            need_id,
            project_id,
            musician_id,
            status: RequestStatus::Pending,
            rank,
            sent_at,
            responded_at: None,
        }
    }
}

/// Status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Sent, awaiting response
    Pending,
    /// Musician accepted
    Accepted,
    /// Musician declined
    Declined,
    /// Response window elapsed
    TimedOut,
    /// Withdrawn because the need filled (first-come only)
    Cancelled,
}

impl RequestStatus {
    /// Whether the request has reached a final state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether this status holds the musician's project-wide reservation.
    ///
    /// Declined, timed-out and cancelled requests free the musician for
    /// other needs of the same project.
    pub fn holds_reservation(&self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Why a candidate was excluded from contact.
///
/// These reasons are shared verbatim between live dispatch and preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Musician is inactive or archived
    Inactive,
    /// Need requires local residence and the musician has none
    NoLocalResidence,
    /// Musician holds a pending request in this project
    HasPending,
    /// Musician holds an accepted request in this project
    HasAccepted,
    /// Musician already declined a request of this need
    HasDeclined,
    /// Musician already let a request of this need time out
    TimedOut,
    /// Musician is claimed by another need earlier in the same batch
    WillReceiveRequest,
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Inactive => "inactive",
            Self::NoLocalResidence => "no_local_residence",
            Self::HasPending => "has_pending",
            Self::HasAccepted => "has_accepted",
            Self::HasDeclined => "has_declined",
            Self::TimedOut => "timed_out",
            Self::WillReceiveRequest => "will_receive_request",
        };
        f.write_str(s)
    }
}
