//! Musician model - the people a need reaches out to.

use crate::id::MusicianId;
use serde::{Deserialize, Serialize};

/// A musician that can be contacted for substitute work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Musician {
    /// Unique identifier
    pub id: MusicianId,

    /// Display name
    pub name: String,

    /// Contact email
    pub email: String,

    /// Account status
    pub status: MusicianStatus,

    /// Whether the musician lives in the orchestra's region
    pub local_residence: bool,
}

impl Musician {
    /// Create an active musician.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: MusicianId::new(),
            name: name.into(),
            email: email.into(),
            status: MusicianStatus::Active,
            local_residence: false,
        }
    }

    /// Set local residence.
    pub fn with_local_residence(mut self, local: bool) -> Self {
        self.local_residence = local;
        self
    }

    /// Whether the musician may receive new requests at all.
    pub fn is_contactable(&self) -> bool {
        matches!(self.status, MusicianStatus::Active)
    }
}

/// Account status of a musician.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MusicianStatus {
    /// Active and contactable
    Active,
    /// Temporarily inactive (keeps data, receives nothing)
    Inactive,
    /// Archived (left the pool)
    Archived,
}
