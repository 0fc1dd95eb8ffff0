//! Response handling - applies a musician's accept or decline.

use serde::{Deserialize, Serialize};
use tracing::info;
use tutti_core::{RequestId, RequestStatus};
use tutti_notify::DispatchEvent;

use crate::dispatch::DispatchEngine;
use crate::error::{EngineError, Result};

/// A musician's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseChoice {
    /// Take the engagement
    Accept,
    /// Turn it down
    Decline,
}

/// Result of applying a response token.
///
/// Token problems are outcomes, not errors; nothing here throws past the
/// caller of [`ResponseHandler::respond`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ResponseOutcome {
    /// The response was applied.
    Responded {
        /// The answered request
        request_id: RequestId,
        /// What the musician chose
        choice: ResponseChoice,
        /// Whether this response completed the need
        need_completed: bool,
    },
    /// The token was already consumed, or the request already resolved
    /// (e.g. the sweeper timed it out first).
    AlreadyResponded,
    /// The token's response window has passed.
    Expired,
    /// No such token.
    InvalidToken,
}

/// Applies incoming responses and triggers the engine's follow-up logic.
#[derive(Clone)]
pub struct ResponseHandler {
    engine: DispatchEngine,
}

impl ResponseHandler {
    /// Create a handler over an engine.
    pub fn new(engine: DispatchEngine) -> Self {
        Self { engine }
    }

    /// Apply a response. The token is consumed regardless of the choice, so
    /// a replayed link can never flip or duplicate a response.
    pub async fn respond(&self, token: &str, choice: ResponseChoice) -> Result<ResponseOutcome> {
        let storage = self.engine.storage();

        let Some(stored) = storage.find_token(token).await? else {
            return Ok(ResponseOutcome::InvalidToken);
        };

        // A consumed token is a replay no matter how old it is; report that
        // rather than the less specific expiry.
        if stored.is_used() {
            return Ok(ResponseOutcome::AlreadyResponded);
        }

        let now = self.engine.clock().now();
        if stored.is_expired(now) {
            return Ok(ResponseOutcome::Expired);
        }

        // Single-use: whoever consumes the token first owns the response.
        if !storage.mark_token_used(token, now).await? {
            return Ok(ResponseOutcome::AlreadyResponded);
        }

        let request = storage
            .load_request(stored.request_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("request {}", stored.request_id)))?;

        let to = match choice {
            ResponseChoice::Accept => RequestStatus::Accepted,
            ResponseChoice::Decline => RequestStatus::Declined,
        };
        let won = storage
            .transition_request(request.id, RequestStatus::Pending, to, now)
            .await?;
        if !won {
            // A concurrent sweep or cancellation resolved the request first.
            return Ok(ResponseOutcome::AlreadyResponded);
        }

        info!(
            request = %request.id,
            need = %request.need_id,
            musician = %request.musician_id,
            choice = ?choice,
            "response applied"
        );

        let need = self.engine.load_need(request.need_id).await?;
        let need_completed = match choice {
            ResponseChoice::Accept => {
                self.engine
                    .notifier()
                    .notify(DispatchEvent::RequestAccepted {
                        request_id: request.id,
                        need_id: need.id,
                        musician_id: request.musician_id,
                    })
                    .await;
                self.engine.maybe_complete(need.id).await?
            }
            ResponseChoice::Decline => {
                self.engine
                    .notifier()
                    .notify(DispatchEvent::RequestDeclined {
                        request_id: request.id,
                        need_id: need.id,
                        musician_id: request.musician_id,
                    })
                    .await;
                self.engine.follow_up(&need).await?;
                false
            }
        };

        Ok(ResponseOutcome::Responded {
            request_id: request.id,
            choice,
            need_completed,
        })
    }
}
