//! End-to-end sync scenarios over the in-memory harness: coalescing, drain,
//! idempotent replay, retry exhaustion and recovery, offline behavior, and
//! forced immediate sync.

use lectio::core::{ActionKind, PlanStatus, Timestamp};
use lectio::store::{ItemStatus, MutationKind, MAX_ATTEMPTS};
use lectio::sync::{Connectivity, DrainOutcome, TimerKind};
use lectio::test_harness::{ScriptedFailure, TestWorld};

use serde_json::json;

fn genesis_day(world: &TestWorld) -> (lectio::PlanId, Vec<lectio::ChapterKey>) {
    let plan = TestWorld::plan_id("bible-in-a-year");
    world
        .orchestrator
        .activate_plan(plan.clone(), &json!({"name": "Bible in a Year"}), 1)
        .unwrap();
    let chapters = vec![
        TestWorld::chapter("Genesis", 1),
        TestWorld::chapter("Genesis", 2),
        TestWorld::chapter("Genesis", 3),
    ];
    (plan, chapters)
}

#[test]
fn rapid_toggles_coalesce_into_one_queue_item() {
    let world = TestWorld::new("u-1", 1_000);
    world.connectivity.set_online(false); // keep items queued
    let (plan, chapters) = genesis_day(&world);

    for _ in 0..4 {
        world.check(&plan, 1, &chapters, &chapters[0]);
        world.clock.advance_ms(100);
    }
    world
        .orchestrator
        .toggle_chapter(&plan, 1, &chapters, &chapters[0], ActionKind::Unchecked)
        .unwrap();

    let pending = world.orchestrator.queue().pending_sorted().unwrap();
    let toggles: Vec<_> = pending
        .iter()
        .filter(|i| i.mutation.kind() == MutationKind::ChapterToggle)
        .collect();
    assert_eq!(toggles.len(), 1, "toggles for one day must coalesce");

    // The coalesced item carries the latest full entry: five actions logged.
    let entry = world.orchestrator.progress_store().get(&plan, 1).unwrap().unwrap();
    let chapter = entry
        .chapters_read
        .iter()
        .find(|c| c.key == chapters[0])
        .unwrap();
    assert_eq!(chapter.actions.len(), 5);
    assert!(!chapter.is_checked());
}

#[test]
fn drain_sends_in_priority_then_fifo_order() {
    let world = TestWorld::new("u-1", 1_000);
    world.connectivity.set_online(false);
    let (plan, chapters) = genesis_day(&world);

    world.check(&plan, 1, &chapters, &chapters[0]); // priority 3
    world.clock.advance_ms(10);
    world.orchestrator.complete_day(&plan, 2, &chapters).unwrap(); // priority 2

    let pending = world.orchestrator.queue().pending_sorted().unwrap();
    let kinds: Vec<_> = pending.iter().map(|i| i.mutation.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            MutationKind::PlanStatusChange,
            MutationKind::DayComplete,
            MutationKind::ChapterToggle,
        ]
    );

    world.connectivity.set_online(true);
    let outcome = world.orchestrator.drain().unwrap();
    assert_eq!(
        outcome,
        DrainOutcome::Drained {
            sent: 3,
            already_applied: 0,
            parked_failed: false
        }
    );
    assert_eq!(world.orchestrator.queue().counts().unwrap().pending, 0);
    assert!(world.adapter.plan_row(&world.connectivity.session().unwrap(), &plan).is_some());
}

#[test]
fn lost_ack_is_not_resent_remotely() {
    let world = TestWorld::new("u-1", 1_000);
    let user = world.connectivity.session().unwrap();
    world.connectivity.set_online(false);
    let (plan, chapters) = genesis_day(&world);
    world.orchestrator.drain().ok();

    world.connectivity.set_online(true);
    world.orchestrator.drain().unwrap(); // flush plan activation

    world.connectivity.set_online(false);
    world.check(&plan, 1, &chapters, &chapters[0]);
    world.connectivity.set_online(true);

    // The write lands server-side but the response is lost.
    world.adapter.fail_next(vec![ScriptedFailure::AckLost]);
    let outcome = world.orchestrator.drain().unwrap();
    assert_eq!(
        outcome,
        DrainOutcome::Drained {
            sent: 0,
            already_applied: 0,
            parked_failed: false
        }
    );
    let applied_before = world.adapter.applied_operations();
    assert!(world.adapter.progress_row(&user, &plan, 1).is_some());

    // Retry reuses the same operation_id: the backend dedups, no double apply.
    world.orchestrator.drain().unwrap();
    assert_eq!(world.adapter.applied_operations(), applied_before);
    assert_eq!(world.orchestrator.queue().counts().unwrap().pending, 0);
}

#[test]
fn attempts_exhaust_then_park_and_retry_failed_recovers() {
    let world = TestWorld::new("u-1", 1_000);
    world.connectivity.set_online(false);
    let (plan, chapters) = genesis_day(&world);
    world.orchestrator.complete_day(&plan, 1, &chapters).unwrap();
    world.connectivity.set_online(true);

    // Every call fails until the ceiling.
    world.adapter.fail_next(
        (0..MAX_ATTEMPTS * 4)
            .map(|_| ScriptedFailure::NetworkDown)
            .collect(),
    );
    for _ in 0..MAX_ATTEMPTS {
        world.orchestrator.drain().unwrap();
    }

    let counts = world.orchestrator.queue().counts().unwrap();
    assert!(counts.failed >= 1, "an item must be parked as failed");
    let stats = world.orchestrator.stats().unwrap();
    assert!(stats.last_error.is_some());

    // User-driven recovery: clear the scripted failures, reset, drain.
    world.adapter.fail_next(vec![]);
    let reset = world.orchestrator.retry_failed().unwrap();
    assert!(reset >= 1);
    let counts = world.orchestrator.queue().counts().unwrap();
    assert_eq!(counts.failed, 0);
    assert_eq!(counts.pending, 0);
}

#[test]
fn failed_item_ends_pass_but_later_items_wait_intact() {
    let world = TestWorld::new("u-1", 1_000);
    world.connectivity.set_online(false);
    let (plan, chapters) = genesis_day(&world);

    // Exhaust the plan-activation item first (highest priority).
    world.connectivity.set_online(true);
    world.adapter.fail_next(
        (0..MAX_ATTEMPTS)
            .map(|_| ScriptedFailure::NetworkDown)
            .collect(),
    );
    for _ in 0..MAX_ATTEMPTS {
        world.orchestrator.drain().unwrap();
    }
    world.connectivity.set_online(false);
    world.orchestrator.complete_day(&plan, 1, &chapters).unwrap();
    world.connectivity.set_online(true);

    // The parked item no longer blocks: it is not pending, so the day
    // completion goes through on the next pass (and its confirmed slot is
    // pruned at pass end).
    world.orchestrator.drain().unwrap();
    let counts = world.orchestrator.queue().counts().unwrap();
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.done, 0);
    let user = world.connectivity.session().unwrap();
    assert!(world.adapter.progress_row(&user, &plan, 1).is_some());
}

#[test]
fn offline_drain_is_silent_and_items_wait() {
    let world = TestWorld::new("u-1", 1_000);
    world.connectivity.set_online(false);
    let (plan, chapters) = genesis_day(&world);
    world.check(&plan, 1, &chapters, &chapters[0]);

    assert_eq!(world.orchestrator.drain().unwrap(), DrainOutcome::Offline);
    assert_eq!(world.adapter.calls(), 0);
    assert!(world.orchestrator.queue().counts().unwrap().pending >= 1);

    world.connectivity.set_session(None);
    world.connectivity.set_online(true);
    assert_eq!(world.orchestrator.drain().unwrap(), DrainOutcome::NoSession);
    assert_eq!(world.adapter.calls(), 0);
}

#[test]
fn replayed_operation_marks_done_without_network() {
    let world = TestWorld::new("u-1", 1_000);
    world.connectivity.set_online(false);
    let (plan, chapters) = genesis_day(&world);
    world.orchestrator.complete_day(&plan, 1, &chapters).unwrap();
    world.connectivity.set_online(true);
    world.orchestrator.drain().unwrap();

    assert!(world.orchestrator.queue().pending_sorted().unwrap().is_empty());
    // Nothing failed, so user-driven retry is a no-op.
    assert_eq!(world.orchestrator.retry_failed().unwrap(), 0);

    // Every remote call applied exactly once and is in the ledger's view.
    assert_eq!(world.adapter.applied_operations() as u64, world.adapter.calls());
}

#[test]
fn two_devices_merge_without_losing_actions() {
    let a = TestWorld::new("u-1", 1_000);
    let b = TestWorld::with_backend("u-1", 1_000, a.adapter.clone());
    let plan = TestWorld::plan_id("bible-in-a-year");
    let chapters = vec![
        TestWorld::chapter("Genesis", 1),
        TestWorld::chapter("Genesis", 2),
    ];
    a.orchestrator
        .activate_plan(plan.clone(), &json!({"name": "p"}), 1)
        .unwrap();
    b.orchestrator
        .activate_plan(plan.clone(), &json!({"name": "p"}), 1)
        .unwrap();

    // Device A checks chapter 1, syncs.
    a.check(&plan, 1, &chapters, &chapters[0]);
    a.orchestrator.drain().unwrap();

    // Device B, unaware, checks chapter 2 and syncs; its upsert returns the
    // backend row, which B merges.
    b.clock.set_ms(2_000);
    b.check(&plan, 1, &chapters, &chapters[1]);
    b.orchestrator.drain().unwrap();

    let b_entry = b.orchestrator.progress_store().get(&plan, 1).unwrap().unwrap();
    // B kept its own action; whether it also already sees A's depends on
    // which row the backend held when B pushed. No action of B's is lost.
    let g2 = b_entry
        .chapters_read
        .iter()
        .find(|c| c.key == chapters[1])
        .unwrap();
    assert!(g2.is_checked());
}

#[test]
fn immediate_sync_pushes_everything_and_clears_pending() {
    let world = TestWorld::new("u-1", 1_000);
    let user = world.connectivity.session().unwrap();
    world.connectivity.set_online(false);
    let (plan, chapters) = genesis_day(&world);
    world.check(&plan, 1, &chapters, &chapters[0]);
    world.clock.advance_ms(5);
    world.orchestrator.complete_day(&plan, 2, &chapters).unwrap();
    world.connectivity.set_online(true);

    let outcome = world
        .orchestrator
        .run_immediate_sync(&plan, "user pressed force-sync")
        .unwrap();
    assert_eq!(outcome.entries_pushed, 2);
    assert!(outcome.plan_pushed);
    assert!(outcome.redundant_items_completed >= 1);

    assert_eq!(world.orchestrator.queue().counts().unwrap().pending, 0);
    assert!(world.adapter.progress_row(&user, &plan, 1).is_some());
    assert!(world.adapter.progress_row(&user, &plan, 2).is_some());
    assert!(world.adapter.plan_row(&user, &plan).is_some());
}

#[test]
fn debounce_timer_fires_once_after_quiet_period() {
    let world = TestWorld::new("u-1", 1_000);
    let (plan, chapters) = genesis_day(&world);
    world.orchestrator.drain().unwrap();

    world.connectivity.set_online(false);
    world.check(&plan, 1, &chapters, &chapters[0]);
    world.check(&plan, 1, &chapters, &chapters[1]);
    world.connectivity.set_online(true);

    let events = world.orchestrator.timer_events();
    // Each toggle armed (reset) the debounce; both wakeups eventually arrive,
    // but only the latest one fires a drain.
    let mut drained = 0;
    for _ in 0..2 {
        let kind = events
            .recv_timeout(std::time::Duration::from_secs(30))
            .expect("debounce wakeup");
        assert!(matches!(kind, TimerKind::Debounce(_)));
        if matches!(
            world.orchestrator.handle_timer(kind).unwrap(),
            DrainOutcome::Drained { .. }
        ) {
            drained += 1;
        }
    }
    assert_eq!(drained, 1, "only the final debounce wakeup may fire");
    assert_eq!(world.orchestrator.queue().counts().unwrap().pending, 0);
}

#[test]
fn plan_lifecycle_syncs_and_rejects_bad_transitions() {
    let world = TestWorld::new("u-1", 1_000);
    let user = world.connectivity.session().unwrap();
    let (plan, _) = genesis_day(&world);

    world
        .orchestrator
        .change_plan_status(&plan, PlanStatus::Completed)
        .unwrap();
    let meta = world
        .orchestrator
        .change_plan_status(&plan, PlanStatus::Archived)
        .unwrap();
    assert_eq!(meta.status, PlanStatus::Archived);
    assert!(meta.archived_at.is_some());

    // Archived is terminal.
    assert!(world
        .orchestrator
        .change_plan_status(&plan, PlanStatus::Active)
        .is_err());

    let remote = world.adapter.plan_row(&user, &plan).unwrap();
    assert_eq!(remote.status, PlanStatus::Archived);
}

#[test]
fn catch_up_adjustment_round_trips_opaquely() {
    let world = TestWorld::new("u-1", 1_000);
    let user = world.connectivity.session().unwrap();
    let (plan, _) = genesis_day(&world);

    let payload = json!({"strategy": "redistribute", "days": [4, 5, 6]});
    let meta = world
        .orchestrator
        .apply_catch_up(&plan, payload.clone())
        .unwrap();
    assert_eq!(meta.catch_up_adjustment, Some(payload.clone()));

    let remote = world.adapter.plan_row(&user, &plan).unwrap();
    assert_eq!(remote.catch_up_adjustment, Some(payload));
}

#[test]
fn stats_subscription_reflects_queue_and_watermark() {
    let world = TestWorld::new("u-1", 1_000);
    let stats_rx = world.orchestrator.subscribe_stats();
    world.connectivity.set_online(false);
    let (plan, chapters) = genesis_day(&world);
    world.check(&plan, 1, &chapters, &chapters[0]);

    let snapshot = stats_rx.latest().expect("stats after enqueue");
    assert!(snapshot.pending >= 1);
    assert_eq!(snapshot.last_synced_at, None);

    world.connectivity.set_online(true);
    world.clock.set_ms(9_000);
    world.orchestrator.drain().unwrap();

    let snapshot = stats_rx.latest().expect("stats after drain");
    assert_eq!(snapshot.pending, 0);
    assert_eq!(snapshot.last_synced_at, Some(Timestamp(9_000)));
}

#[test]
fn coalesced_toggle_after_lost_ack_reaches_backend() {
    let world = TestWorld::new("u-1", 1_000);
    let user = world.connectivity.session().unwrap();
    let (plan, chapters) = genesis_day(&world);
    world.orchestrator.drain().unwrap(); // flush plan activation

    // First toggle's write lands server-side but the acknowledgment is lost,
    // so the item returns to pending and the local ledger stays empty.
    world.adapter.fail_next(vec![ScriptedFailure::AckLost]);
    world.check(&plan, 1, &chapters, &chapters[0]);
    world.orchestrator.drain().unwrap();

    // A second toggle supersedes the first by coalescing into the same slot.
    world.clock.advance_ms(50);
    world.check(&plan, 1, &chapters, &chapters[1]);
    world.orchestrator.drain().unwrap();

    // The superseding payload must not be deduped away as a replay of the
    // first toggle's operation: the backend row carries the latest intent.
    let row = world.adapter.progress_row(&user, &plan, 1).unwrap();
    let second = row
        .chapters_read
        .iter()
        .find(|c| c.key == chapters[1])
        .expect("superseding toggle missing from backend row");
    assert!(second.is_checked());
    assert_eq!(world.orchestrator.queue().counts().unwrap().pending, 0);
}

#[test]
fn processing_item_from_prior_run_is_resubmitted() {
    use lectio::config::SyncConfig;
    use lectio::core::{ProgressEntry, UserId};
    use lectio::store::{MemoryKv, Mutation, SyncQueue};
    use lectio::sync::SyncOrchestrator;
    use lectio::test_harness::{FakeAdapter, TestClock, TestConnectivity};
    use std::sync::Arc;

    let kv = Arc::new(MemoryKv::new());
    let plan = TestWorld::plan_id("p");
    let chapters = vec![TestWorld::chapter("Genesis", 1)];

    // A previous run died between marking the item processing and finishing
    // the remote call.
    let queue = SyncQueue::new(kv.clone());
    let mut entry = ProgressEntry::new(plan.clone(), 1, &chapters, Timestamp(10));
    entry.append_action(&chapters[0], ActionKind::Checked, Timestamp(10));
    let item = queue
        .enqueue(
            Mutation::DayComplete { entry },
            MutationKind::DayComplete.default_priority(),
            Timestamp(10),
        )
        .unwrap();
    queue.mark_processing(item.id, Timestamp(20)).unwrap();

    // A fresh orchestrator over the same storage picks the item up again.
    let adapter = FakeAdapter::new();
    let user = UserId::new("u-1").unwrap();
    let connectivity = TestConnectivity::online_as(user.clone());
    let orchestrator = SyncOrchestrator::new(
        kv,
        Arc::new(adapter.clone()),
        Arc::new(connectivity),
        Arc::new(TestClock::new(30)),
        SyncConfig::default(),
    );
    let outcome = orchestrator.drain().unwrap();
    assert_eq!(
        outcome,
        DrainOutcome::Drained {
            sent: 1,
            already_applied: 0,
            parked_failed: false
        }
    );
    assert!(adapter.progress_row(&user, &plan, 1).is_some());
    assert_eq!(orchestrator.queue().counts().unwrap().processing, 0);
}

#[test]
fn queue_survives_reopen_on_shared_kv() {
    use lectio::store::{MemoryKv, SyncQueue};
    use std::sync::Arc;

    let kv = Arc::new(MemoryKv::new());
    let queue = SyncQueue::new(kv.clone());
    let entry = {
        let world = TestWorld::new("u-1", 1_000);
        world.connectivity.set_online(false);
        let (plan, chapters) = genesis_day(&world);
        world
            .orchestrator
            .progress_store()
            .set_chapter_action(
                &plan,
                1,
                &chapters,
                &chapters[0],
                ActionKind::Checked,
                Timestamp(1_000),
            )
            .unwrap()
    };
    queue
        .enqueue(
            lectio::store::Mutation::ChapterToggle { entry },
            MutationKind::ChapterToggle.default_priority(),
            Timestamp(1_000),
        )
        .unwrap();

    // A second handle over the same storage sees the durable item.
    let reopened = SyncQueue::new(kv);
    let pending = reopened.pending_sorted().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, ItemStatus::Pending);
    assert_eq!(pending[0].attempts, 0);
}
