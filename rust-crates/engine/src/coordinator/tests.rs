#![allow(non_snake_case)]

use super::*;
use crate::{
    EngineError,
    queue::{
        Bet,
        RetentionPolicy,
        SpinRequest,
        SpinUpdate,
        in_memory_storage::InMemorySpinStorage,
        storage::{
            SpinStorage,
            StorageResult,
        },
    },
    resolver::resolve,
    symbols::ReelStrips,
    test_helpers::{
        CelebrationEvent,
        FlakyLayout,
        RecordingSoundPlayer,
        SoundCue,
        SpinHarness,
        TestCoordinator,
        grid,
        test_config,
        test_strips,
    },
};
use std::sync::OnceLock;

const FRAME: Duration = Duration::from_millis(16);
const ABC: &str = "ABCABCABCABCABC";

fn offsets_for(outcome: &str) -> Vec<usize> {
    let strips = ReelStrips::from_strings(&test_strips()).unwrap();
    resolve(&grid(outcome), &strips, &BlankSet::default())
        .offsets
        .to_vec()
}

fn run_frames(coordinator: &TestCoordinator, frames: usize) {
    for _ in 0..frames {
        coordinator.tick(FRAME);
    }
}

fn mark_ready(queue: &SpinQueue, id: SpinId, outcome: &str, winnings: u64) {
    queue.update_status(id, SpinStatus::ReadyToClaim, Some(grid(outcome)), Some(winnings));
}

#[tokio::test(start_paused = true)]
async fn place_bet__binds_display_and_starts_reels() {
    // given
    let harness = SpinHarness::new();
    harness.coordinator.mount().await.unwrap();

    // when
    let id = harness
        .coordinator
        .place_bet(1_000_000, 5, 5_000_000)
        .await
        .unwrap();

    // then
    let binding = harness.coordinator.binding();
    assert_eq!(binding.current_spin_id, Some(id));
    assert!(binding.is_spinning);
    assert!(binding.waiting_for_outcome);
    assert_eq!(harness.coordinator.phase(), DisplayPhase::Spinning);
    assert_eq!(harness.queue.get(id).unwrap().status, SpinStatus::Pending);
    let cues = harness.sounds.cues();
    let stopped = cues
        .iter()
        .position(|cue| matches!(cue, SoundCue::LoopStopped(_)))
        .unwrap();
    let started = cues.iter().position(|cue| *cue == SoundCue::SpinStart).unwrap();
    assert!(stopped < started);
}

#[tokio::test(start_paused = true)]
async fn place_bet__refused_until_layout_retry_succeeds() {
    // given
    let layout = FlakyLayout::unavailable(test_strips());
    let harness = SpinHarness::builder().layout(layout.clone()).build();
    let mounted = harness.coordinator.mount().await;

    // when
    let refused = harness.coordinator.place_bet(1_000_000, 1, 1_000_000).await;
    let still_refused = harness.coordinator.place_bet(1_000_000, 1, 1_000_000).await;
    layout.set_available(true);
    harness.coordinator.retry_layout().await.unwrap();
    let accepted = harness.coordinator.place_bet(1_000_000, 1, 1_000_000).await;

    // then
    assert!(matches!(mounted, Err(EngineError::LayoutUnavailable { .. })));
    assert!(matches!(refused, Err(EngineError::LayoutUnavailable { .. })));
    assert!(matches!(still_refused, Err(EngineError::LayoutUnavailable { .. })));
    assert_eq!(accepted.unwrap(), SpinId(1));
    assert_eq!(harness.queue.snapshot().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn on_queue_change__applies_outcome_exactly_once() {
    // given
    let harness = SpinHarness::new();
    let coordinator = &harness.coordinator;
    coordinator.mount().await.unwrap();
    let id = coordinator.place_bet(1_000_000, 5, 5_000_000).await.unwrap();
    run_frames(coordinator, 30);
    mark_ready(&harness.queue, id, ABC, 0);

    // when
    let first = coordinator.on_queue_change().await;
    let second = coordinator.on_queue_change().await;
    run_frames(coordinator, 400);

    // then
    assert_eq!(first, QueueReaction::Applied(id));
    assert_eq!(second, QueueReaction::AlreadyApplied);
    assert_eq!(harness.queue.get(id).unwrap().status, SpinStatus::Completed);
    assert_eq!(coordinator.visible_offsets(), offsets_for(ABC));
    assert_eq!(harness.sounds.count(&SoundCue::ReelStop), 5);
    assert_eq!(harness.celebrations.losses(), vec![id]);
    assert!(harness.celebrations.wins().is_empty());
    assert!(!coordinator.binding().is_spinning);
}

#[tokio::test(start_paused = true)]
async fn on_queue_change__ignores_result_of_spin_that_lost_the_display() {
    // given
    let harness = SpinHarness::new();
    let coordinator = &harness.coordinator;
    coordinator.mount().await.unwrap();
    let x = coordinator.place_bet(1_000_000, 1, 1_000_000).await.unwrap();
    let y = coordinator.place_bet(1_000_000, 1, 1_000_000).await.unwrap();
    run_frames(coordinator, 30);

    // when
    mark_ready(&harness.queue, x, "DDDDDDDDDDDDDDD", 250_000_000);
    let reaction = coordinator.on_queue_change().await;
    run_frames(coordinator, 200);

    // then
    assert_eq!(reaction, QueueReaction::Ignored);
    assert_eq!(coordinator.binding().current_spin_id, Some(y));
    assert_eq!(coordinator.phase(), DisplayPhase::Spinning);
    assert_eq!(harness.queue.get(x).unwrap().status, SpinStatus::Completed);
    assert!(harness.celebrations.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn prune__drops_claimed_spin_that_lost_the_display() {
    // given
    let harness = SpinHarness::new();
    let coordinator = &harness.coordinator;
    coordinator.mount().await.unwrap();
    let x = coordinator.place_bet(1_000_000, 1, 1_000_000).await.unwrap();
    let y = coordinator.place_bet(1_000_000, 1, 1_000_000).await.unwrap();
    mark_ready(&harness.queue, x, ABC, 0);
    coordinator.on_queue_change().await;
    harness.queue.update(x, SpinUpdate::claimed());

    // when
    let removed = harness.queue.prune(
        &RetentionPolicy {
            retain_history: 0,
            max_age_secs: 0,
        },
        Utc::now() + TimeDelta::days(365),
    );

    // then
    assert_eq!(removed, 1);
    assert!(harness.queue.get(x).is_none());
    assert!(harness.queue.get(y).is_some());
    assert_eq!(coordinator.binding().current_spin_id, Some(y));
}

#[tokio::test(start_paused = true)]
async fn on_queue_change__finalizes_unwatched_results_while_idle() {
    // given
    let harness = SpinHarness::new();
    let coordinator = &harness.coordinator;
    coordinator.mount().await.unwrap();
    let id = coordinator.place_bet(1_000_000, 1, 1_000_000).await.unwrap();
    coordinator.stop_spin().await;
    mark_ready(&harness.queue, id, "DDDDDDDDDDDDDDD", 250_000_000);

    // when
    let first = coordinator.on_queue_change().await;
    let second = coordinator.on_queue_change().await;

    // then
    assert_eq!(first, QueueReaction::Idle);
    assert_eq!(second, QueueReaction::Idle);
    let request = harness.queue.get(id).unwrap();
    assert_eq!(request.status, SpinStatus::Completed);
    assert_eq!(request.winnings, Some(250_000_000));
    assert!(harness.celebrations.events().is_empty());
}

/// Records whether the display lock was free each time a completion was persisted.
#[derive(Clone, Default)]
struct LockWatchingStorage {
    inner: InMemorySpinStorage,
    display: Arc<OnceLock<Arc<Mutex<Inner>>>>,
    lock_free_on_completion: Arc<Mutex<Vec<bool>>>,
}

impl SpinStorage for LockWatchingStorage {
    fn load_all(&self) -> StorageResult<Vec<SpinRequest>> {
        self.inner.load_all()
    }

    fn upsert(&mut self, request: &SpinRequest) -> StorageResult<()> {
        if request.status == SpinStatus::Completed
            && let Some(display) = self.display.get()
        {
            let free = display.try_lock().is_ok();
            self.lock_free_on_completion.lock().unwrap().push(free);
        }
        self.inner.upsert(request)
    }

    fn remove(&mut self, id: SpinId) -> StorageResult<()> {
        self.inner.remove(id)
    }
}

#[tokio::test(start_paused = true)]
async fn on_queue_change__persists_completion_outside_display_lock() {
    // given
    let storage = LockWatchingStorage::default();
    let harness = SpinHarness::builder()
        .queue(SpinQueue::new(storage.clone()).unwrap())
        .build();
    let coordinator = &harness.coordinator;
    storage.display.set(coordinator.inner.clone()).ok().unwrap();
    coordinator.mount().await.unwrap();
    let x = coordinator.place_bet(1_000_000, 1, 1_000_000).await.unwrap();
    let y = coordinator.place_bet(1_000_000, 1, 1_000_000).await.unwrap();

    // when
    mark_ready(&harness.queue, x, ABC, 0);
    mark_ready(&harness.queue, y, ABC, 0);
    let reaction = coordinator.on_queue_change().await;

    // then
    assert_eq!(reaction, QueueReaction::Applied(y));
    assert_eq!(harness.queue.get(x).unwrap().status, SpinStatus::Completed);
    assert_eq!(harness.queue.get(y).unwrap().status, SpinStatus::Completed);
    let observed = storage.lock_free_on_completion.lock().unwrap().clone();
    assert_eq!(observed, vec![true, true]);
}

#[tokio::test(start_paused = true)]
async fn on_queue_change__failed_spin_resets_display_without_celebration() {
    // given
    let harness = SpinHarness::new();
    let coordinator = &harness.coordinator;
    coordinator.mount().await.unwrap();
    let id = coordinator.place_bet(1_000_000, 1, 1_000_000).await.unwrap();
    run_frames(coordinator, 30);

    // when
    harness.queue.update(
        id,
        crate::queue::SpinUpdate::status(SpinStatus::Expired).with_failure("deadline"),
    );
    let reaction = coordinator.on_queue_change().await;
    run_frames(coordinator, 10);

    // then
    assert_eq!(reaction, QueueReaction::Reset(id));
    assert_eq!(coordinator.binding(), DisplayBinding::default());
    assert_eq!(coordinator.phase(), DisplayPhase::Idle);
    assert!(coordinator.snapshot().reels.iter().all(|r| r.velocity == 0.0));
    assert!(harness.celebrations.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_spin__turns_late_outcome_into_noop() {
    // given
    let harness = SpinHarness::new();
    let coordinator = &harness.coordinator;
    coordinator.mount().await.unwrap();
    let id = coordinator.place_bet(1_000_000, 1, 1_000_000).await.unwrap();
    run_frames(coordinator, 30);

    // when
    coordinator.stop_spin().await;
    let frames_after_stop = {
        run_frames(coordinator, 1);
        harness.frames.len()
    };
    mark_ready(&harness.queue, id, ABC, 0);
    let reaction = coordinator.on_queue_change().await;
    run_frames(coordinator, 50);

    // then
    assert_eq!(reaction, QueueReaction::Idle);
    assert_eq!(harness.frames.len(), frames_after_stop);
    assert_eq!(harness.queue.get(id).unwrap().status, SpinStatus::Completed);
    assert!(harness.celebrations.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn place_bet__during_deceleration_drops_previous_celebration() {
    // given
    let harness = SpinHarness::new();
    let coordinator = &harness.coordinator;
    coordinator.mount().await.unwrap();
    let x = coordinator.place_bet(1_000_000, 1, 1_000_000).await.unwrap();
    run_frames(coordinator, 30);
    mark_ready(&harness.queue, x, ABC, 30_000_000);
    assert_eq!(coordinator.on_queue_change().await, QueueReaction::Applied(x));

    // when
    let y = coordinator.place_bet(1_000_000, 1, 1_000_000).await.unwrap();
    run_frames(coordinator, 400);

    // then
    assert_eq!(coordinator.binding().current_spin_id, Some(y));
    assert_eq!(coordinator.phase(), DisplayPhase::Spinning);
    assert!(harness.celebrations.wins().is_empty());
    assert_eq!(harness.queue.get(x).unwrap().status, SpinStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn mount__shows_previous_session_result_without_celebrating() {
    // given
    let now = Utc::now();
    let previous = SpinRequest {
        id: SpinId(7),
        bet: Bet::new(1_000_000, 5).unwrap(),
        status: SpinStatus::Completed,
        outcome: Some(grid(ABC)),
        winnings: Some(60_000_000),
        created_at: now,
        updated_at: now,
        transaction: None,
        claimed: true,
        failure: None,
    };
    let queue =
        SpinQueue::new(InMemorySpinStorage::new_with_requests([previous])).unwrap();
    let mut harness = SpinHarness::builder().queue(queue).build();

    // when
    harness.start().await.unwrap();
    harness.settle(Duration::from_secs(5)).await;

    // then
    assert_eq!(harness.coordinator.visible_offsets(), offsets_for(ABC));
    assert!(harness.celebrations.events().is_empty());
    assert_eq!(harness.coordinator.binding().current_spin_id, None);
}

#[tokio::test(start_paused = true)]
async fn tick__result_older_than_staleness_window_is_not_celebrated() {
    // given
    let mut config = test_config();
    config.display.staleness_window_secs = 0;
    let harness = SpinHarness::builder().config(config).build();
    let coordinator = &harness.coordinator;
    coordinator.mount().await.unwrap();
    let id = coordinator.place_bet(1_000_000, 1, 1_000_000).await.unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    mark_ready(&harness.queue, id, ABC, 60_000_000);

    // when
    coordinator.on_queue_change().await;
    run_frames(coordinator, 400);

    // then
    assert_eq!(coordinator.visible_offsets(), offsets_for(ABC));
    assert_eq!(harness.queue.get(id).unwrap().status, SpinStatus::Completed);
    assert!(harness.celebrations.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn celebration__dismissed_after_configured_duration() {
    // given
    let mut harness = SpinHarness::new();
    harness.start_display().await.unwrap();
    let id = harness
        .coordinator
        .place_bet(1_000_000, 5, 5_000_000)
        .await
        .unwrap();
    mark_ready(&harness.queue, id, ABC, 60_000_000);

    // when
    harness
        .wait_until("win celebration", |h| !h.celebrations.wins().is_empty())
        .await;
    harness.settle(Duration::from_secs(1)).await;

    // then
    let events = harness.celebrations.events();
    assert!(matches!(events.as_slice(), [CelebrationEvent::Win(win), CelebrationEvent::Dismissed]
        if win.amount == 60_000_000 && win.tier == WinTier::Large && !win.replay));
    assert_eq!(harness.coordinator.phase(), DisplayPhase::Idle);
    assert_eq!(
        harness.coordinator.snapshot().last_celebration.map(|c| c.spin_id),
        Some(id)
    );
}

#[tokio::test(start_paused = true)]
async fn effects__failing_sound_player_does_not_disturb_the_spin() {
    // given
    let mut harness = SpinHarness::builder()
        .sounds(RecordingSoundPlayer::failing())
        .build();
    harness.start_display().await.unwrap();

    // when
    let id = harness
        .coordinator
        .place_bet(1_000_000, 5, 5_000_000)
        .await
        .unwrap();
    mark_ready(&harness.queue, id, ABC, 0);
    harness
        .wait_until("loss shown", |h| h.celebrations.losses() == vec![id])
        .await;

    // then
    assert_eq!(harness.queue.get(id).unwrap().status, SpinStatus::Completed);
    assert!(harness.sounds.count(&SoundCue::Loss) == 1);
}
