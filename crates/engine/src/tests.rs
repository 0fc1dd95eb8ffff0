//! End-to-end scenarios over the in-memory backend.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeZone;
use tutti_core::{
    Clock, ConflictStrategy, ExclusionReason, ManualClock, Musician, MusicianId, Need, NeedId,
    NeedLifecycle, Project, RankingList, RequestStatus, Strategy,
};
use tutti_notify::{DispatchEvent, RecordingNotifier};
use tutti_storage::{MemoryStorage, Storage};

use crate::{DispatchEngine, ResponseChoice, ResponseHandler, ResponseOutcome, TimeoutSweeper};

const WINDOW: Duration = Duration::from_secs(48 * 3600);

struct Harness {
    storage: Arc<MemoryStorage>,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
    engine: DispatchEngine,
    handler: ResponseHandler,
    sweeper: TimeoutSweeper,
    project: Project,
    musicians: Vec<Musician>,
    list: RankingList,
}

/// Project with `pool` active musicians ranked M1..Mpool on one standard
/// "Violin I" list.
async fn harness(conflict: ConflictStrategy, pool: usize) -> Harness {
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::new(
        chrono::Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
    ));
    let notifier = Arc::new(RecordingNotifier::new());

    let project = Project::new("Spring Gala", clock.now()).with_conflict_strategy(conflict);
    storage.save_project(&project).await.unwrap();

    let mut musicians = Vec::new();
    let mut list = RankingList::standard("Violin I");
    for i in 1..=pool {
        let musician = Musician::new(format!("M{i}"), format!("m{i}@example.org"));
        list.push(musician.id);
        storage.save_musician(&musician).await.unwrap();
        musicians.push(musician);
    }
    storage.save_ranking_list(&list).await.unwrap();

    let engine = DispatchEngine::new(storage.clone(), clock.clone(), notifier.clone());
    let handler = ResponseHandler::new(engine.clone());
    let sweeper = TimeoutSweeper::new(engine.clone());

    Harness {
        storage,
        clock,
        notifier,
        engine,
        handler,
        sweeper,
        project,
        musicians,
        list,
    }
}

impl Harness {
    async fn make_need(&self, strategy: Strategy, quantity: u32) -> Need {
        let need = Need::new(
            self.project.id,
            "Violin I",
            quantity,
            strategy,
            self.list.id,
            WINDOW,
            self.clock.now(),
        );
        self.storage.save_need(&need).await.unwrap();
        need
    }

    /// Token string issued for a musician's pending request on a need.
    async fn token_for(&self, need_id: NeedId, musician_id: MusicianId) -> String {
        let request = self
            .storage
            .list_requests_for_need(need_id)
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.musician_id == musician_id)
            .expect("no request for musician");

        self.notifier
            .events()
            .into_iter()
            .find_map(|e| match e {
                DispatchEvent::RequestSent {
                    request_id, token, ..
                } if request_id == request.id => Some(token),
                _ => None,
            })
            .expect("no sent event for request")
    }

    async fn respond(
        &self,
        need_id: NeedId,
        musician_id: MusicianId,
        choice: ResponseChoice,
    ) -> ResponseOutcome {
        let token = self.token_for(need_id, musician_id).await;
        self.handler.respond(&token, choice).await.unwrap()
    }

    async fn statuses(&self, need_id: NeedId) -> Vec<(MusicianId, RequestStatus)> {
        self.storage
            .list_requests_for_need(need_id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.musician_id, r.status))
            .collect()
    }

    async fn pending_count(&self, need_id: NeedId) -> usize {
        self.statuses(need_id)
            .await
            .iter()
            .filter(|(_, s)| *s == RequestStatus::Pending)
            .count()
    }

    async fn lifecycle(&self, need_id: NeedId) -> NeedLifecycle {
        self.storage
            .load_need(need_id)
            .await
            .unwrap()
            .unwrap()
            .lifecycle
    }
}

fn ids(musicians: &[Musician]) -> Vec<MusicianId> {
    musicians.iter().map(|m| m.id).collect()
}

// === Scenario A: sequential ===

#[tokio::test]
async fn sequential_decline_advances_then_completes() {
    let h = harness(ConflictStrategy::Simple, 3).await;
    let m = ids(&h.musicians);
    let need = h.make_need(Strategy::Sequential, 1).await;

    // Dispatch contacts M1 only.
    let outcome = h.engine.dispatch(need.id).await.unwrap();
    assert_eq!(outcome.created.len(), 1);
    assert_eq!(outcome.created[0].musician_id, m[0]);
    assert_eq!(h.pending_count(need.id).await, 1);

    // M1 declines; the engine immediately advances to M2.
    let outcome = h.respond(need.id, m[0], ResponseChoice::Decline).await;
    assert!(matches!(outcome, ResponseOutcome::Responded { need_completed: false, .. }));
    assert_eq!(h.pending_count(need.id).await, 1);
    let statuses = h.statuses(need.id).await;
    assert!(statuses.contains(&(m[0], RequestStatus::Declined)));
    assert!(statuses.contains(&(m[1], RequestStatus::Pending)));

    // M2 accepts; the need completes.
    let outcome = h.respond(need.id, m[1], ResponseChoice::Accept).await;
    assert!(matches!(outcome, ResponseOutcome::Responded { need_completed: true, .. }));
    assert_eq!(h.lifecycle(need.id).await, NeedLifecycle::Completed);

    // A further dispatch call is a no-op.
    let outcome = h.engine.dispatch(need.id).await.unwrap();
    assert!(outcome.created.is_empty());
    assert!(outcome.already_complete);
    assert_eq!(h.statuses(need.id).await.len(), 2);
}

#[tokio::test]
async fn sequential_never_holds_two_pending() {
    let h = harness(ConflictStrategy::Simple, 3).await;
    let need = h.make_need(Strategy::Sequential, 1).await;

    h.engine.dispatch(need.id).await.unwrap();
    // Repeated dispatch calls must not add a second live request.
    h.engine.dispatch(need.id).await.unwrap();
    h.engine.dispatch(need.id).await.unwrap();

    assert_eq!(h.pending_count(need.id).await, 1);
}

// === Scenario B: parallel ===

#[tokio::test]
async fn parallel_tops_up_one_per_decline_and_completes() {
    let h = harness(ConflictStrategy::Simple, 6).await;
    let m = ids(&h.musicians);
    let need = h.make_need(Strategy::Parallel, 3).await;

    let outcome = h.engine.dispatch(need.id).await.unwrap();
    assert_eq!(outcome.created.len(), 3);
    assert_eq!(h.pending_count(need.id).await, 3);

    // One decline triggers exactly one top-up send, to the next rank.
    h.respond(need.id, m[0], ResponseChoice::Decline).await;
    assert_eq!(h.pending_count(need.id).await, 3);
    assert!(h
        .statuses(need.id)
        .await
        .contains(&(m[3], RequestStatus::Pending)));

    // Three accepts complete the need.
    h.respond(need.id, m[1], ResponseChoice::Accept).await;
    h.respond(need.id, m[2], ResponseChoice::Accept).await;
    let outcome = h.respond(need.id, m[3], ResponseChoice::Accept).await;
    assert!(matches!(outcome, ResponseOutcome::Responded { need_completed: true, .. }));
    assert_eq!(h.lifecycle(need.id).await, NeedLifecycle::Completed);
    assert_eq!(h.pending_count(need.id).await, 0);
}

#[tokio::test]
async fn parallel_keeps_pending_plus_accepted_at_quantity() {
    let h = harness(ConflictStrategy::Simple, 6).await;
    let m = ids(&h.musicians);
    let need = h.make_need(Strategy::Parallel, 3).await;

    h.engine.dispatch(need.id).await.unwrap();
    h.respond(need.id, m[0], ResponseChoice::Accept).await;
    h.respond(need.id, m[1], ResponseChoice::Decline).await;

    let statuses = h.statuses(need.id).await;
    let live = statuses
        .iter()
        .filter(|(_, s)| s.holds_reservation())
        .count();
    assert_eq!(live, 3);

    // Redundant dispatch does not overshoot quantity.
    h.engine.dispatch(need.id).await.unwrap();
    let live = h
        .statuses(need.id)
        .await
        .iter()
        .filter(|(_, s)| s.holds_reservation())
        .count();
    assert_eq!(live, 3);
}

// === Scenario C: first-come ===

#[tokio::test]
async fn first_come_cancels_remaining_on_completion() {
    let h = harness(ConflictStrategy::Simple, 6).await;
    let m = ids(&h.musicians);
    let need = h.make_need(Strategy::FirstCome, 2).await.with_max_recipients(4);
    h.storage.save_need(&need).await.unwrap();

    let outcome = h.engine.dispatch(need.id).await.unwrap();
    assert_eq!(outcome.created.len(), 4);

    // Second and third recipients accept; the need fills.
    let outcome = h.respond(need.id, m[1], ResponseChoice::Accept).await;
    assert!(matches!(outcome, ResponseOutcome::Responded { need_completed: false, .. }));
    let outcome = h.respond(need.id, m[2], ResponseChoice::Accept).await;
    assert!(matches!(outcome, ResponseOutcome::Responded { need_completed: true, .. }));

    // The remaining two pending requests are cancelled, nothing stays live.
    let statuses = h.statuses(need.id).await;
    assert!(statuses.contains(&(m[0], RequestStatus::Cancelled)));
    assert!(statuses.contains(&(m[3], RequestStatus::Cancelled)));
    assert_eq!(h.pending_count(need.id).await, 0);
    assert_eq!(h.lifecycle(need.id).await, NeedLifecycle::Completed);

    // Cancellation events come strictly after the completing accept.
    let events = h.notifier.events();
    let completed_at = events
        .iter()
        .position(|e| matches!(e, DispatchEvent::NeedCompleted { .. }))
        .unwrap();
    for (i, event) in events.iter().enumerate() {
        if matches!(event, DispatchEvent::RequestCancelled { .. }) {
            assert!(i > completed_at);
        }
    }
}

#[tokio::test]
async fn first_come_manual_redispatch_extends_batch() {
    let h = harness(ConflictStrategy::Simple, 5).await;
    let m = ids(&h.musicians);
    let need = h.make_need(Strategy::FirstCome, 2).await.with_max_recipients(2);
    h.storage.save_need(&need).await.unwrap();

    h.engine.dispatch(need.id).await.unwrap();

    // While the batch is unresolved, re-dispatch creates nothing.
    let outcome = h.engine.dispatch(need.id).await.unwrap();
    assert!(outcome.created.is_empty());

    h.respond(need.id, m[0], ResponseChoice::Decline).await;
    h.respond(need.id, m[1], ResponseChoice::Decline).await;
    // No auto-extension on decline; the need stays active and waits for a
    // manual re-dispatch.
    assert_eq!(h.pending_count(need.id).await, 0);
    assert_eq!(h.lifecycle(need.id).await, NeedLifecycle::Active);

    let outcome = h.engine.dispatch(need.id).await.unwrap();
    let contacted: HashSet<MusicianId> =
        outcome.created.iter().map(|c| c.musician_id).collect();
    assert_eq!(contacted, HashSet::from([m[2], m[3]]));
}

// === Scenario D: cross-need conflict ===

#[tokio::test]
async fn conflicting_need_skips_reserved_musician() {
    let h = harness(ConflictStrategy::Simple, 3).await;
    let m = ids(&h.musicians);
    let need_a = h.make_need(Strategy::Sequential, 1).await;
    let need_b = h.make_need(Strategy::Sequential, 1).await;

    let outcome = h.engine.dispatch(need_a.id).await.unwrap();
    assert_eq!(outcome.created[0].musician_id, m[0]);

    // Need B skips M1 (reserved by A) and contacts M2.
    let preview = h.engine.preview(need_b.id).await.unwrap();
    let skip = preview
        .excluded
        .iter()
        .find(|e| e.musician_id == m[0])
        .unwrap();
    assert_eq!(skip.reason, ExclusionReason::HasPending);

    let outcome = h.engine.dispatch(need_b.id).await.unwrap();
    assert_eq!(outcome.created.len(), 1);
    assert_eq!(outcome.created[0].musician_id, m[1]);

    // Once A's request is accepted the reason flips to has_accepted.
    h.respond(need_a.id, m[0], ResponseChoice::Accept).await;
    let need_c = h.make_need(Strategy::Sequential, 1).await;
    let preview = h.engine.preview(need_c.id).await.unwrap();
    let skip = preview
        .excluded
        .iter()
        .find(|e| e.musician_id == m[0])
        .unwrap();
    assert_eq!(skip.reason, ExclusionReason::HasAccepted);
}

#[tokio::test]
async fn musician_released_by_decline_is_available_elsewhere() {
    let h = harness(ConflictStrategy::Simple, 2).await;
    let m = ids(&h.musicians);
    let need_a = h.make_need(Strategy::Sequential, 1).await;
    let need_b = h.make_need(Strategy::Sequential, 1).await;

    h.engine.dispatch(need_a.id).await.unwrap();
    h.respond(need_a.id, m[0], ResponseChoice::Decline).await;

    // A's follow-up moved to M2; M1 is free again, so B contacts M1.
    let outcome = h.engine.dispatch(need_b.id).await.unwrap();
    assert_eq!(outcome.created[0].musician_id, m[0]);
}

// === Timeout sweeper ===

#[tokio::test]
async fn sweep_times_out_and_advances_sequential() {
    let h = harness(ConflictStrategy::Simple, 3).await;
    let m = ids(&h.musicians);
    let need = h.make_need(Strategy::Sequential, 1).await;

    h.engine.dispatch(need.id).await.unwrap();
    h.clock.advance(WINDOW + Duration::from_secs(60));

    let report = h.sweeper.sweep().await.unwrap();
    assert_eq!(report.expired, 1);

    let statuses = h.statuses(need.id).await;
    assert!(statuses.contains(&(m[0], RequestStatus::TimedOut)));
    // The follow-up request to M2 is fresh and must not expire.
    assert!(statuses.contains(&(m[1], RequestStatus::Pending)));
}

#[tokio::test]
async fn sweep_is_idempotent() {
    let h = harness(ConflictStrategy::Simple, 2).await;
    let need = h.make_need(Strategy::FirstCome, 2).await;

    h.engine.dispatch(need.id).await.unwrap();
    h.clock.advance(WINDOW + Duration::from_secs(1));

    let first = h.sweeper.sweep().await.unwrap();
    let second = h.sweeper.sweep().await.unwrap();
    assert_eq!(first.expired, 2);
    assert_eq!(second.expired, 0);
}

#[tokio::test]
async fn sweep_does_not_expire_fresh_requests() {
    let h = harness(ConflictStrategy::Simple, 2).await;
    let need = h.make_need(Strategy::Sequential, 1).await;

    h.engine.dispatch(need.id).await.unwrap();
    h.clock.advance(WINDOW / 2);

    let report = h.sweeper.sweep().await.unwrap();
    assert_eq!(report.expired, 0);
    assert_eq!(h.pending_count(need.id).await, 1);
}

#[tokio::test]
async fn response_to_cancelled_request_is_already_responded() {
    let h = harness(ConflictStrategy::Simple, 2).await;
    let m = ids(&h.musicians);
    let need = h.make_need(Strategy::FirstCome, 1).await.with_max_recipients(2);
    h.storage.save_need(&need).await.unwrap();

    h.engine.dispatch(need.id).await.unwrap();
    let token = h.token_for(need.id, m[1]).await;

    // M1's accept fills the need and cancels M2's still-valid request.
    h.respond(need.id, m[0], ResponseChoice::Accept).await;

    let outcome = h.handler.respond(&token, ResponseChoice::Accept).await.unwrap();
    assert_eq!(outcome, ResponseOutcome::AlreadyResponded);
    assert!(h
        .statuses(need.id)
        .await
        .contains(&(m[1], RequestStatus::Cancelled)));
}

// === Tokens ===

#[tokio::test]
async fn token_is_single_use_across_outcomes() {
    let h = harness(ConflictStrategy::Simple, 2).await;
    let m = ids(&h.musicians);
    let need = h.make_need(Strategy::Sequential, 1).await;

    h.engine.dispatch(need.id).await.unwrap();
    let token = h.token_for(need.id, m[0]).await;

    let first = h.handler.respond(&token, ResponseChoice::Accept).await.unwrap();
    assert!(matches!(first, ResponseOutcome::Responded { .. }));

    // Replaying the link, with either choice, changes nothing.
    let replay = h.handler.respond(&token, ResponseChoice::Decline).await.unwrap();
    assert_eq!(replay, ResponseOutcome::AlreadyResponded);
    assert!(h
        .statuses(need.id)
        .await
        .contains(&(m[0], RequestStatus::Accepted)));
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let h = harness(ConflictStrategy::Simple, 2).await;
    let m = ids(&h.musicians);
    let need = h.make_need(Strategy::Sequential, 1).await;

    h.engine.dispatch(need.id).await.unwrap();
    let token = h.token_for(need.id, m[0]).await;
    h.clock.advance(WINDOW + Duration::from_secs(1));

    let outcome = h.handler.respond(&token, ResponseChoice::Accept).await.unwrap();
    assert_eq!(outcome, ResponseOutcome::Expired);
}

#[tokio::test]
async fn replay_after_expiry_reports_already_responded() {
    let h = harness(ConflictStrategy::Simple, 2).await;
    let m = ids(&h.musicians);
    let need = h.make_need(Strategy::Sequential, 1).await;

    h.engine.dispatch(need.id).await.unwrap();
    let token = h.token_for(need.id, m[0]).await;

    let first = h.handler.respond(&token, ResponseChoice::Accept).await.unwrap();
    assert!(matches!(first, ResponseOutcome::Responded { .. }));

    // Replaying the consumed link long after the window is still a replay,
    // not an expiry.
    h.clock.advance(WINDOW + Duration::from_secs(1));
    let replay = h.handler.respond(&token, ResponseChoice::Accept).await.unwrap();
    assert_eq!(replay, ResponseOutcome::AlreadyResponded);
}

#[tokio::test]
async fn unknown_token_is_invalid() {
    let h = harness(ConflictStrategy::Simple, 1).await;
    let outcome = h
        .handler
        .respond("deadbeef", ResponseChoice::Accept)
        .await
        .unwrap();
    assert_eq!(outcome, ResponseOutcome::InvalidToken);
}

// === Paused needs ===

#[tokio::test]
async fn paused_need_processes_responses_but_sends_nothing() {
    let h = harness(ConflictStrategy::Simple, 6).await;
    let m = ids(&h.musicians);
    let need = h.make_need(Strategy::Parallel, 2).await;

    h.engine.dispatch(need.id).await.unwrap();

    let mut paused = h.storage.load_need(need.id).await.unwrap().unwrap();
    paused.lifecycle = NeedLifecycle::Paused;
    h.storage.save_need(&paused).await.unwrap();

    // The decline is processed, but no follow-up send goes out.
    h.respond(need.id, m[0], ResponseChoice::Decline).await;
    let statuses = h.statuses(need.id).await;
    assert!(statuses.contains(&(m[0], RequestStatus::Declined)));
    assert_eq!(h.pending_count(need.id).await, 1);

    // Dispatch while paused is a no-op.
    let outcome = h.engine.dispatch(need.id).await.unwrap();
    assert!(outcome.created.is_empty());

    // Resuming lets the next dispatch top up again.
    let mut resumed = h.storage.load_need(need.id).await.unwrap().unwrap();
    resumed.lifecycle = NeedLifecycle::Active;
    h.storage.save_need(&resumed).await.unwrap();
    let outcome = h.engine.dispatch(need.id).await.unwrap();
    assert_eq!(outcome.created.len(), 1);
}

// === Preview / live equivalence ===

#[tokio::test]
async fn preview_predicts_dispatch_exactly() {
    let h = harness(ConflictStrategy::Simple, 6).await;
    let m = ids(&h.musicians);
    let need_a = h.make_need(Strategy::Sequential, 1).await;
    let need_b = h.make_need(Strategy::Parallel, 3).await;

    // Put some conflict state in place first.
    h.engine.dispatch(need_a.id).await.unwrap();
    h.respond(need_a.id, m[0], ResponseChoice::Accept).await;

    let preview = h.engine.preview(need_b.id).await.unwrap();
    let predicted: Vec<MusicianId> =
        preview.to_contact.iter().map(|c| c.musician_id).collect();

    let outcome = h.engine.dispatch(need_b.id).await.unwrap();
    let actual: Vec<MusicianId> = outcome.created.iter().map(|c| c.musician_id).collect();

    assert_eq!(predicted, actual);
    // And the preview created nothing itself.
    assert_eq!(h.statuses(need_b.id).await.len(), actual.len());
}

#[tokio::test]
async fn preview_is_read_only() {
    let h = harness(ConflictStrategy::Simple, 4).await;
    let need = h.make_need(Strategy::Parallel, 2).await;

    let preview = h.engine.preview(need.id).await.unwrap();
    assert_eq!(preview.to_contact.len(), 2);
    assert_eq!(preview.next_in_queue.len(), 2);

    assert!(h.statuses(need.id).await.is_empty());
    assert_eq!(
        h.storage.load_need(need.id).await.unwrap().unwrap().version,
        0
    );
}

#[tokio::test]
async fn bulk_preview_marks_cross_need_promises() {
    let h = harness(ConflictStrategy::Simple, 2).await;
    let m = ids(&h.musicians);
    let need_a = h.make_need(Strategy::Sequential, 1).await;
    h.clock.advance(Duration::from_secs(1));
    let _need_b = h.make_need(Strategy::Sequential, 1).await;

    let previews = h.engine.preview_all(h.project.id).await.unwrap();
    assert_eq!(previews.len(), 2);

    // Need A (first in the batch) gets M1; need B sees M1 as promised away.
    assert_eq!(previews[0].need_id, need_a.id);
    assert_eq!(previews[0].to_contact[0].musician_id, m[0]);
    let skip = previews[1]
        .excluded
        .iter()
        .find(|e| e.musician_id == m[0])
        .unwrap();
    assert_eq!(skip.reason, ExclusionReason::WillReceiveRequest);
    assert_eq!(previews[1].to_contact[0].musician_id, m[1]);

    // Bulk dispatch contacts exactly the previewed musicians.
    let outcomes = h.engine.dispatch_all(h.project.id).await.unwrap();
    let actual: Vec<MusicianId> = outcomes
        .iter()
        .flat_map(|(_, o)| o.created.iter().map(|c| c.musician_id))
        .collect();
    assert_eq!(actual, vec![m[0], m[1]]);
}

// === Conflict strategies ===

#[tokio::test]
async fn smart_strategy_assigns_musician_to_best_rank() {
    let h = harness(ConflictStrategy::Smart, 0).await;

    // M1 ranks 2nd for the violin need but 1st for the viola need.
    let m1 = Musician::new("M1", "m1@example.org");
    let m2 = Musician::new("M2", "m2@example.org");
    let m3 = Musician::new("M3", "m3@example.org");
    for m in [&m1, &m2, &m3] {
        h.storage.save_musician(m).await.unwrap();
    }

    let mut violins = RankingList::standard("Violin II");
    violins.push(m2.id);
    violins.push(m1.id);
    h.storage.save_ranking_list(&violins).await.unwrap();

    let mut violas = RankingList::standard("Viola");
    violas.push(m1.id);
    violas.push(m3.id);
    h.storage.save_ranking_list(&violas).await.unwrap();

    let violin_need = Need::new(
        h.project.id,
        "Violin II",
        2,
        Strategy::Parallel,
        violins.id,
        WINDOW,
        h.clock.now(),
    );
    h.storage.save_need(&violin_need).await.unwrap();
    let viola_need = Need::new(
        h.project.id,
        "Viola",
        1,
        Strategy::Sequential,
        violas.id,
        WINDOW,
        h.clock.now() + chrono::Duration::seconds(1),
    );
    h.storage.save_need(&viola_need).await.unwrap();

    let outcomes = h.engine.dispatch_all(h.project.id).await.unwrap();

    // The violin need (processed first) must leave M1 to the viola need,
    // where their rank is better.
    let by_need: std::collections::HashMap<NeedId, Vec<MusicianId>> = outcomes
        .into_iter()
        .map(|(id, o)| (id, o.created.iter().map(|c| c.musician_id).collect()))
        .collect();
    assert_eq!(by_need[&violin_need.id], vec![m2.id]);
    assert_eq!(by_need[&viola_need.id], vec![m1.id]);
}

#[tokio::test]
async fn detailed_strategy_retains_conflict_audit() {
    let h = harness(ConflictStrategy::Detailed, 2).await;
    let m = ids(&h.musicians);
    let need_a = h.make_need(Strategy::Sequential, 1).await;
    let need_b = h.make_need(Strategy::Sequential, 1).await;

    h.engine.dispatch(need_a.id).await.unwrap();
    h.engine.dispatch(need_b.id).await.unwrap();

    let audits = h.storage.list_conflict_audits(h.project.id).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].musician_id, m[0]);
    assert_eq!(audits[0].skipped_need_id, need_b.id);
    assert_eq!(audits[0].held_by_need_id, need_a.id);
    assert_eq!(audits[0].reason, ExclusionReason::HasPending);
}

#[tokio::test]
async fn simple_strategy_keeps_no_audit() {
    let h = harness(ConflictStrategy::Simple, 2).await;
    let need_a = h.make_need(Strategy::Sequential, 1).await;
    let need_b = h.make_need(Strategy::Sequential, 1).await;

    h.engine.dispatch(need_a.id).await.unwrap();
    h.engine.dispatch(need_b.id).await.unwrap();

    let audits = h.storage.list_conflict_audits(h.project.id).await.unwrap();
    assert!(audits.is_empty());
}

// === Lost completion write ===

#[tokio::test]
async fn dispatch_repairs_need_left_active_after_quantity_met() {
    let h = harness(ConflictStrategy::Simple, 2).await;
    let m = ids(&h.musicians);
    let need = h.make_need(Strategy::FirstCome, 1).await.with_max_recipients(2);
    h.storage.save_need(&need).await.unwrap();

    h.engine.dispatch(need.id).await.unwrap();

    // The accept landed but the completion write never did, as happens when
    // the versioned save exhausts its retries after the request transition.
    let request = h
        .storage
        .list_requests_for_need(need.id)
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.musician_id == m[0])
        .unwrap();
    assert!(h
        .storage
        .transition_request(
            request.id,
            RequestStatus::Pending,
            RequestStatus::Accepted,
            h.clock.now(),
        )
        .await
        .unwrap());
    assert_eq!(h.lifecycle(need.id).await, NeedLifecycle::Active);

    // A retried dispatch heals the need: marks it completed and cancels the
    // remaining pending sibling.
    let outcome = h.engine.dispatch(need.id).await.unwrap();
    assert!(outcome.created.is_empty());
    assert!(outcome.already_complete);
    assert_eq!(h.lifecycle(need.id).await, NeedLifecycle::Completed);
    assert!(h
        .statuses(need.id)
        .await
        .contains(&(m[1], RequestStatus::Cancelled)));
    assert!(h
        .notifier
        .events()
        .iter()
        .any(|e| matches!(e, DispatchEvent::NeedCompleted { .. })));
}

// === Project-wide invariant ===

#[tokio::test]
async fn one_live_request_per_musician_per_project() {
    let h = harness(ConflictStrategy::Simple, 3).await;
    let need_a = h.make_need(Strategy::Parallel, 3).await;
    let need_b = h.make_need(Strategy::Parallel, 3).await;

    h.engine.dispatch(need_a.id).await.unwrap();
    h.engine.dispatch(need_b.id).await.unwrap();

    let requests = h
        .storage
        .list_requests_for_project(h.project.id)
        .await
        .unwrap();
    let live: Vec<MusicianId> = requests
        .iter()
        .filter(|r| r.status.holds_reservation())
        .map(|r| r.musician_id)
        .collect();
    let distinct: HashSet<MusicianId> = live.iter().copied().collect();
    assert_eq!(distinct.len(), live.len());

    // The whole pool went to need A; B found nobody.
    assert_eq!(h.statuses(need_b.id).await.len(), 0);
}

// === Custom ranking lists ===

#[tokio::test]
async fn custom_list_overrides_standard_ranking() {
    let h = harness(ConflictStrategy::Simple, 3).await;
    let m = ids(&h.musicians);

    // Project-scoped custom list reverses the order for the same position.
    let mut custom = RankingList::custom("Violin I", h.project.id);
    custom.push(m[2]);
    custom.push(m[1]);
    custom.push(m[0]);
    h.storage.save_ranking_list(&custom).await.unwrap();

    let need = h.make_need(Strategy::Sequential, 1).await;
    let outcome = h.engine.dispatch(need.id).await.unwrap();
    assert_eq!(outcome.created[0].musician_id, m[2]);
}

// === Validation ===

#[tokio::test]
async fn invalid_need_is_rejected_before_any_send() {
    let h = harness(ConflictStrategy::Simple, 3).await;
    let mut need = h.make_need(Strategy::Sequential, 1).await;
    need.quantity = 2;
    h.storage.save_need(&need).await.unwrap();

    let result = h.engine.dispatch(need.id).await;
    assert!(matches!(result, Err(crate::EngineError::Validation(_))));
    assert!(h.statuses(need.id).await.is_empty());
}
