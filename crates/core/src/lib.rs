//! tutti core data models.
//!
//! This crate defines the entities of the request-dispatch engine: staffing
//! needs, outbound requests, response tokens, musicians and ranking lists,
//! plus the clock abstraction the time-dependent components are built on.

#![warn(missing_docs)]

// Core identities
mod id;

// Projects and musicians
mod musician;
mod project;
mod ranking;

// Dispatch entities
mod need;
mod request;
mod token;

// Time
mod clock;

// Re-exports
pub use id::*;

pub use musician::{Musician, MusicianStatus};
pub use project::{ConflictAudit, ConflictStrategy, Project};
pub use ranking::{RankingEntry, RankingList, RankingScope};

pub use need::{Need, NeedLifecycle, Strategy, ValidationError};
pub use request::{ExclusionReason, Request, RequestStatus};
pub use token::ResponseToken;

pub use clock::{Clock, ManualClock, SystemClock};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
