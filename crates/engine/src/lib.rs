//! tutti dispatch engine.
//!
//! Decides, for each staffing need, which musicians to contact, in what
//! order, how many at once, and how to react to accept/decline/timeout,
//! while guaranteeing that a musician never holds more than one live request
//! within the same project.
//!
//! Entry points:
//! - [`DispatchEngine::dispatch`] / [`DispatchEngine::dispatch_all`] -
//!   create requests for a need (or a whole project).
//! - [`DispatchEngine::preview`] / [`DispatchEngine::preview_all`] -
//!   side-effect-free simulation of exactly what dispatch would do.
//! - [`ResponseHandler::respond`] - apply a musician's accept/decline.
//! - [`TimeoutSweeper::sweep`] - expire overdue pending requests.

mod config;
mod dispatch;
mod error;
mod plan;
mod preview;
mod ranking;
mod registry;
mod respond;
mod sweeper;
mod token;

#[cfg(test)]
mod tests;

pub use config::EngineConfig;
pub use dispatch::{DispatchEngine, DispatchOutcome, RequestSummary};
pub use error::{EngineError, Result};
pub use plan::{DispatchPlan, ExcludedCandidate, PlannedContact};
pub use preview::{ExcludedMusician, MusicianWithRank, NeedPreview};
pub use ranking::RankedCandidate;
pub use registry::Claim;
pub use respond::{ResponseChoice, ResponseHandler, ResponseOutcome};
pub use sweeper::{SweepConfig, SweepReport, TimeoutSweeper};
pub use token::TokenService;
