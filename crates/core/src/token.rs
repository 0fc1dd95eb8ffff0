//! Response tokens - single-use capabilities bound to one request.

use crate::id::RequestId;
use crate::Time;
use serde::{Deserialize, Serialize};

/// A single-use, time-bound capability to answer one request.
///
/// The token string is opaque and unguessable; no internal identifiers are
/// encoded in it. `expires_at` is fixed at issuance and never extended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseToken {
    /// Opaque token string handed to the musician
    pub token: String,

    /// Request this token answers
    pub request_id: RequestId,

    /// Hard expiry (issuance + the need's response window)
    pub expires_at: Time,

    /// When the token was consumed, if ever
    pub used_at: Option<Time>,
}

impl ResponseToken {
    /// Whether the token is expired at `now`.
    pub fn is_expired(&self, now: Time) -> bool {
        self.expires_at <= now
    }

    /// Whether the token has already been consumed.
    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }
}
