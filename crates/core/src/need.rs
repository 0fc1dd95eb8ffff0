//! Need model - a staffing requirement for one position in one project.

use crate::id::{NeedId, ProjectId, RankingListId};
use crate::Time;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A staffing requirement: "we need `quantity` musicians for this position".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Need {
    /// Unique identifier
    pub id: NeedId,

    /// Owning project
    pub project_id: ProjectId,

    /// Position to staff (matched against ranking lists)
    pub position: String,

    /// How many accepted musicians complete this need
    pub quantity: u32,

    /// Dispatch strategy
    pub strategy: Strategy,

    /// First-come only: upper bound on simultaneously contacted musicians
    pub max_recipients: Option<u32>,

    /// How long a contacted musician has to respond
    pub response_window: Duration,

    /// Only contact musicians with local residence
    pub require_local_residence: bool,

    /// Ranking list used to order candidates
    pub ranking_list_id: RankingListId,

    /// Lifecycle status
    pub lifecycle: NeedLifecycle,

    /// Optimistic-concurrency counter, bumped on every engine write
    pub version: u64,

    /// Creation timestamp
    pub created_at: Time,

    /// Last update timestamp
    pub updated_at: Time,
}

impl Need {
    /// Create an active need. Call [`Need::validate`] before persisting.
    pub fn new(
        project_id: ProjectId,
        position: impl Into<String>,
        quantity: u32,
        strategy: Strategy,
        ranking_list_id: RankingListId,
        response_window: Duration,
        created_at: Time,
    ) -> Self {
        Self {
            id: NeedId::new(),
            project_id,
            position: position.into(),
            quantity,
            strategy,
            max_recipients: None,
            response_window,
            require_local_residence: false,
            ranking_list_id,
            lifecycle: NeedLifecycle::Active,
            version: 0,
            created_at,
            updated_at: created_at,
        }
    }

    /// Set the first-come recipient cap.
    pub fn with_max_recipients(mut self, max: u32) -> Self {
        self.max_recipients = Some(max);
        self
    }

    /// Require local residence for all candidates.
    pub fn with_local_residence_required(mut self) -> Self {
        self.require_local_residence = true;
        self
    }

    /// Check the strategy/quantity invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.quantity == 0 {
            return Err(ValidationError::ZeroQuantity);
        }

        match self.strategy {
            Strategy::Sequential => {
                if self.quantity != 1 {
                    return Err(ValidationError::SequentialQuantity {
                        quantity: self.quantity,
                    });
                }
            }
            Strategy::Parallel => {
                if self.quantity < 2 {
                    return Err(ValidationError::ParallelQuantity {
                        quantity: self.quantity,
                    });
                }
            }
            Strategy::FirstCome => {
                if let Some(max) = self.max_recipients {
                    if max < self.quantity {
                        return Err(ValidationError::MaxRecipientsBelowQuantity {
                            max_recipients: max,
                            quantity: self.quantity,
                        });
                    }
                }
            }
        }

        if self.max_recipients.is_some() && self.strategy != Strategy::FirstCome {
            return Err(ValidationError::MaxRecipientsNotFirstCome);
        }

        Ok(())
    }

    /// Whether new requests may be created for this need right now.
    pub fn accepts_new_sends(&self) -> bool {
        self.lifecycle == NeedLifecycle::Active
    }

    /// Whether dispatch calls are no-ops for this need.
    pub fn is_closed(&self) -> bool {
        matches!(
            self.lifecycle,
            NeedLifecycle::Completed | NeedLifecycle::Archived
        )
    }
}

/// Dispatch strategy for a need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One live request at a time, advancing down the ranking on decline/timeout
    Sequential,
    /// Keep `quantity` live requests topped up until `quantity` accepts
    Parallel,
    /// Contact a whole batch at once; the first `quantity` accepts win,
    /// the rest are cancelled
    FirstCome,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::FirstCome => "first_come",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeedLifecycle {
    /// Accepting dispatches and responses
    Active,
    /// No new outreach; existing pending requests still resolve
    Paused,
    /// Quantity reached; never unset automatically
    Completed,
    /// Deleted after requests existed; terminal
    Archived,
}

/// Rejected need configuration, raised before any state mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Quantity must be positive
    #[error("quantity must be positive")]
    ZeroQuantity,

    /// Sequential needs always have quantity 1
    #[error("sequential needs require quantity = 1, got {quantity}")]
    SequentialQuantity {
        /// Offending quantity
        quantity: u32,
    },

    /// Parallel needs have quantity >= 2
    #[error("parallel needs require quantity >= 2, got {quantity}")]
    ParallelQuantity {
        /// Offending quantity
        quantity: u32,
    },

    /// max_recipients must cover the quantity
    #[error("max_recipients ({max_recipients}) must be >= quantity ({quantity})")]
    MaxRecipientsBelowQuantity {
        /// Offending cap
        max_recipients: u32,
        /// Required quantity
        quantity: u32,
    },

    /// max_recipients only applies to first-come needs
    #[error("max_recipients is only valid for first_come needs")]
    MaxRecipientsNotFirstCome,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn need(strategy: Strategy, quantity: u32) -> Need {
        Need::new(
            ProjectId::new(),
            "Violin I",
            quantity,
            strategy,
            RankingListId::new(),
            Duration::from_secs(48 * 3600),
            chrono::Utc::now(),
        )
    }

    #[test]
    fn sequential_requires_quantity_one() {
        assert!(need(Strategy::Sequential, 1).validate().is_ok());
        assert_eq!(
            need(Strategy::Sequential, 2).validate(),
            Err(ValidationError::SequentialQuantity { quantity: 2 })
        );
    }

    #[test]
    fn parallel_requires_quantity_two_or_more() {
        assert!(need(Strategy::Parallel, 2).validate().is_ok());
        assert_eq!(
            need(Strategy::Parallel, 1).validate(),
            Err(ValidationError::ParallelQuantity { quantity: 1 })
        );
    }

    #[test]
    fn first_come_max_recipients_covers_quantity() {
        let ok = need(Strategy::FirstCome, 2).with_max_recipients(4);
        assert!(ok.validate().is_ok());

        let short = need(Strategy::FirstCome, 3).with_max_recipients(2);
        assert_eq!(
            short.validate(),
            Err(ValidationError::MaxRecipientsBelowQuantity {
                max_recipients: 2,
                quantity: 3
            })
        );
    }

    #[test]
    fn max_recipients_rejected_outside_first_come() {
        let bad = need(Strategy::Parallel, 2).with_max_recipients(4);
        assert_eq!(bad.validate(), Err(ValidationError::MaxRecipientsNotFirstCome));
    }
}
