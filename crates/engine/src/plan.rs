//! Dispatch planning.
//!
//! [`plan`] is the single selection function behind both live dispatch and
//! preview: it is pure, annotates every candidate on the ranking, and
//! computes how many new sends the strategy wants right now. Live dispatch
//! commits the plan; preview returns it as-is. That shared path is what
//! makes preview an exact prediction of dispatch.

use std::collections::HashMap;
use tutti_core::{
    ExclusionReason, Musician, MusicianId, Need, NeedId, NeedLifecycle, Request, RequestStatus,
    Strategy,
};

use crate::ranking::RankedCandidate;
use crate::registry::Claim;

/// A candidate the plan will contact (or queue behind the current slots).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedContact {
    /// The musician
    pub musician_id: MusicianId,

    /// Rank snapshot to store on the request
    pub rank: u32,
}

/// A candidate the plan excludes, with the reason shown in preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExcludedCandidate {
    /// The musician
    pub musician_id: MusicianId,

    /// Rank on the resolved list
    pub rank: u32,

    /// Why they will not be contacted
    pub reason: ExclusionReason,
}

/// The full annotated outcome of planning one need.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    /// Need this plan is for
    pub need_id: NeedId,

    /// Candidates that will receive a request now, rank ascending
    pub to_contact: Vec<PlannedContact>,

    /// Candidates removed by the eligibility filter, rank ascending
    pub excluded: Vec<ExcludedCandidate>,

    /// Eligible candidates beyond the current send slots, rank ascending
    pub next_in_queue: Vec<PlannedContact>,

    /// The need's quantity is already met
    pub already_complete: bool,
}

/// Everything [`plan`] looks at, read from one storage snapshot.
pub struct PlanContext<'a> {
    /// The need being planned
    pub need: &'a Need,

    /// All requests ever sent for this need
    pub own_requests: &'a [Request],

    /// Resolved ranking, rank ascending, de-duplicated
    pub candidates: &'a [RankedCandidate],

    /// Musician rows for every candidate
    pub musicians: &'a HashMap<MusicianId, Musician>,

    /// Live claims held by OTHER needs of the project
    pub claims: &'a HashMap<MusicianId, Claim>,

    /// Musicians promised to a need earlier in the current batch
    pub batch_claims: &'a HashMap<MusicianId, NeedId>,
}

/// Plan one need against a state snapshot. Pure; creates nothing.
pub fn plan(ctx: &PlanContext<'_>) -> DispatchPlan {
    let need = ctx.need;

    let pending = count_status(ctx.own_requests, RequestStatus::Pending);
    let accepted = count_status(ctx.own_requests, RequestStatus::Accepted);
    let already_complete =
        need.lifecycle == NeedLifecycle::Completed || accepted >= need.quantity;

    let mut plan = DispatchPlan {
        need_id: need.id,
        to_contact: Vec::new(),
        excluded: Vec::new(),
        next_in_queue: Vec::new(),
        already_complete,
    };

    // Completed and archived needs accept no dispatch calls at all.
    if need.is_closed() || already_complete {
        return plan;
    }

    let slots = send_slots(need, pending, accepted);

    let own_by_musician: HashMap<MusicianId, RequestStatus> = ctx
        .own_requests
        .iter()
        .map(|r| (r.musician_id, r.status))
        .collect();

    for candidate in ctx.candidates {
        if let Some(reason) = exclusion_reason(ctx, &own_by_musician, candidate.musician_id) {
            plan.excluded.push(ExcludedCandidate {
                musician_id: candidate.musician_id,
                rank: candidate.rank,
                reason,
            });
            continue;
        }

        let contact = PlannedContact {
            musician_id: candidate.musician_id,
            rank: candidate.rank,
        };
        if (plan.to_contact.len() as u32) < slots {
            plan.to_contact.push(contact);
        } else {
            plan.next_in_queue.push(contact);
        }
    }

    plan
}

/// How many new requests the strategy wants right now.
fn send_slots(need: &Need, pending: u32, accepted: u32) -> u32 {
    // Pausing stops new outreach, not the existing conversation.
    if !need.accepts_new_sends() {
        return 0;
    }

    match need.strategy {
        // At most one non-terminal request at any time.
        Strategy::Sequential => {
            if pending + accepted >= 1 {
                0
            } else {
                1
            }
        }
        // Keep pending + accepted topped up to quantity.
        Strategy::Parallel => need.quantity.saturating_sub(pending + accepted),
        // Whole batch at once; re-dispatch only when every recipient of the
        // previous batch has responded.
        Strategy::FirstCome => {
            if pending > 0 {
                0
            } else {
                need.max_recipients.unwrap_or(u32::MAX)
            }
        }
    }
}

fn exclusion_reason(
    ctx: &PlanContext<'_>,
    own_by_musician: &HashMap<MusicianId, RequestStatus>,
    musician_id: MusicianId,
) -> Option<ExclusionReason> {
    // A musician already contacted for this need is never re-contacted.
    if let Some(status) = own_by_musician.get(&musician_id) {
        return Some(match status {
            RequestStatus::Pending => ExclusionReason::HasPending,
            RequestStatus::Accepted => ExclusionReason::HasAccepted,
            RequestStatus::TimedOut => ExclusionReason::TimedOut,
            // Cancelled requests only exist on completed needs, which never
            // reach this point; folded with declined.
            RequestStatus::Declined | RequestStatus::Cancelled => ExclusionReason::HasDeclined,
        });
    }

    let musician = ctx.musicians.get(&musician_id);
    match musician {
        Some(m) if m.is_contactable() => {}
        // Unknown rows are treated as inactive rather than contacted blind.
        _ => return Some(ExclusionReason::Inactive),
    }

    if ctx.need.require_local_residence {
        if let Some(m) = musician {
            if !m.local_residence {
                return Some(ExclusionReason::NoLocalResidence);
            }
        }
    }

    if let Some(claim) = ctx.claims.get(&musician_id) {
        return Some(claim.reason());
    }

    if let Some(claimed_by) = ctx.batch_claims.get(&musician_id) {
        if *claimed_by != ctx.need.id {
            return Some(ExclusionReason::WillReceiveRequest);
        }
    }

    None
}

fn count_status(requests: &[Request], status: RequestStatus) -> u32 {
    requests.iter().filter(|r| r.status == status).count() as u32
}
