//! Timeout sweeper - expires overdue pending requests.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};
use tutti_core::{Need, NeedId, RequestStatus};
use tutti_notify::DispatchEvent;

use crate::dispatch::DispatchEngine;
use crate::error::Result;

/// Configuration for the sweep loop.
///
/// The interval trades timeout precision against load; response windows are
/// soft deadlines accurate to one sweep interval.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Time between sweeps when driven by [`TimeoutSweeper::run`]
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    /// Requests transitioned to timed_out by this sweep
    pub expired: usize,
}

/// Periodic scan that times out overdue requests and feeds them back into
/// the engine as if declined.
#[derive(Clone)]
pub struct TimeoutSweeper {
    engine: DispatchEngine,
    config: SweepConfig,
}

impl TimeoutSweeper {
    /// Create a sweeper over an engine.
    pub fn new(engine: DispatchEngine) -> Self {
        Self {
            engine,
            config: SweepConfig::default(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: SweepConfig) -> Self {
        self.config = config;
        self
    }

    /// Expire every pending request whose response window has passed.
    ///
    /// Idempotent and safe at any frequency: the pending→timed_out
    /// transition is a compare-and-set, so a request racing a live response
    /// (or a second sweep) is expired exactly once; the loser's write is a
    /// no-op.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let storage = self.engine.storage();
        let now = self.engine.clock().now();

        let pending = storage.list_pending_requests().await?;
        let mut needs: HashMap<NeedId, Need> = HashMap::new();
        let mut expired = 0usize;

        for request in pending {
            let need = match needs.get(&request.need_id) {
                Some(need) => need.clone(),
                None => match storage.load_need(request.need_id).await? {
                    Some(need) => {
                        needs.insert(request.need_id, need.clone());
                        need
                    }
                    None => {
                        warn!(request = %request.id, need = %request.need_id, "pending request without need, skipping");
                        continue;
                    }
                },
            };

            let window = chrono::Duration::from_std(need.response_window)
                .unwrap_or_else(|_| chrono::Duration::max_value());
            if request.sent_at + window > now {
                continue;
            }

            let won = storage
                .transition_request(
                    request.id,
                    RequestStatus::Pending,
                    RequestStatus::TimedOut,
                    now,
                )
                .await?;
            if !won {
                // A live response (or another sweep) resolved it first.
                continue;
            }

            expired += 1;
            info!(
                request = %request.id,
                need = %need.id,
                musician = %request.musician_id,
                "request timed out"
            );
            self.engine
                .notifier()
                .notify(DispatchEvent::RequestTimedOut {
                    request_id: request.id,
                    need_id: need.id,
                    musician_id: request.musician_id,
                })
                .await;

            self.engine.follow_up(&need).await?;
        }

        Ok(SweepReport { expired })
    }

    /// Drive [`TimeoutSweeper::sweep`] on the configured interval, forever.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match self.sweep().await {
                Ok(report) if report.expired > 0 => {
                    info!(expired = report.expired, "sweep expired requests");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "sweep failed"),
            }
        }
    }
}
