#![allow(non_snake_case)]

use reel_engine::{
    EngineError,
    coordinator::DisplayPhase,
    effects::WinTier,
    queue::{
        RetentionPolicy,
        SpinId,
        SpinStatus,
    },
    resolver::resolve,
    symbols::{
        BlankSet,
        ReelStrips,
    },
    test_helpers::{
        FlakyLayout,
        SpinHarness,
        grid,
        test_strips,
    },
};
use chrono::{
    TimeDelta,
    Utc,
};
use std::time::Duration;

const ABC: &str = "ABCABCABCABCABC";

fn offsets_for(outcome: &str) -> Vec<usize> {
    let strips = ReelStrips::from_strings(&test_strips()).unwrap();
    resolve(&grid(outcome), &strips, &BlankSet::default())
        .offsets
        .to_vec()
}

async fn wait_for_poll(harness: &SpinHarness, id: SpinId) {
    harness
        .wait_until("spin to reach the settlement authority", |h| {
            h.queue
                .get(id)
                .is_some_and(|r| matches!(r.status, SpinStatus::Waiting | SpinStatus::Processing))
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn spin__losing_outcome_lands_exactly_and_shows_loss() {
    // given
    let mut harness = SpinHarness::new();
    harness.start().await.unwrap();
    let id = harness
        .coordinator
        .place_bet(1_000_000, 5, 5_000_000)
        .await
        .unwrap();
    wait_for_poll(&harness, id).await;

    // when
    harness.settlement.resolve(id, grid(ABC), 0);
    harness
        .wait_until("loss to be shown", |h| !h.celebrations.losses().is_empty())
        .await;

    // then
    let request = harness.queue.get(id).unwrap();
    assert_eq!(request.bet.total_bet, 5_000_000);
    assert_eq!(request.status, SpinStatus::Completed);
    assert_eq!(harness.coordinator.visible_offsets(), offsets_for(ABC));
    assert_eq!(harness.celebrations.losses(), vec![id]);
    assert!(harness.celebrations.wins().is_empty());
}

#[tokio::test(start_paused = true)]
async fn spin__large_win_is_celebrated_once() {
    // given
    let mut harness = SpinHarness::new();
    harness.start().await.unwrap();
    let id = harness
        .coordinator
        .place_bet(1_000_000, 5, 5_000_000)
        .await
        .unwrap();
    wait_for_poll(&harness, id).await;

    // when
    harness.settlement.resolve(id, grid(ABC), 60_000_000);
    harness
        .wait_until("win to be celebrated", |h| !h.celebrations.wins().is_empty())
        .await;
    harness.settle(Duration::from_secs(3)).await;

    // then
    let wins = harness.celebrations.wins();
    assert_eq!(wins.len(), 1);
    assert_eq!(wins[0].spin_id, id);
    assert_eq!(wins[0].amount, 60_000_000);
    assert_eq!(wins[0].tier, WinTier::Large);
    assert!(!wins[0].replay);
    assert_eq!(harness.coordinator.phase(), DisplayPhase::Idle);
    assert!(harness.queue.get(id).unwrap().claimed);
}

#[tokio::test(start_paused = true)]
async fn spin__silent_settlement_expires_and_next_spin_starts_clean() {
    // given
    let mut harness = SpinHarness::new();
    harness.start().await.unwrap();
    harness.settlement.hang_polls();
    let first = harness
        .coordinator
        .place_bet(1_000_000, 1, 1_000_000)
        .await
        .unwrap();

    // when
    harness
        .wait_until("spin to expire", |h| {
            h.queue
                .get(first)
                .is_some_and(|r| r.status == SpinStatus::Expired)
        })
        .await;
    harness.settle(Duration::from_millis(100)).await;
    let idle_after_expiry = harness.coordinator.phase();
    let binding_after_expiry = harness.coordinator.binding();
    let second = harness
        .coordinator
        .place_bet(1_000_000, 1, 1_000_000)
        .await
        .unwrap();

    // then
    assert_eq!(idle_after_expiry, DisplayPhase::Idle);
    assert_eq!(binding_after_expiry.current_spin_id, None);
    assert_eq!(harness.queue.get(first).unwrap().outcome, None);
    assert_eq!(second, SpinId(first.0 + 1));
    assert_eq!(harness.coordinator.binding().current_spin_id, Some(second));
    assert_eq!(harness.coordinator.phase(), DisplayPhase::Spinning);
    assert!(harness.celebrations.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn spin__late_result_of_replaced_spin_is_ignored() {
    // given
    let mut harness = SpinHarness::new();
    harness.start().await.unwrap();
    let x = harness
        .coordinator
        .place_bet(1_000_000, 1, 1_000_000)
        .await
        .unwrap();
    let y = harness
        .coordinator
        .place_bet(1_000_000, 1, 1_000_000)
        .await
        .unwrap();
    wait_for_poll(&harness, x).await;

    // when
    harness.settlement.resolve(x, grid("DDDDDDDDDDDDDDD"), 250_000_000);
    harness
        .wait_until("replaced spin to be settled", |h| {
            h.queue.get(x).is_some_and(|r| r.claimed)
        })
        .await;
    harness.settle(Duration::from_secs(2)).await;

    // then
    assert_eq!(harness.coordinator.binding().current_spin_id, Some(y));
    assert_eq!(harness.coordinator.phase(), DisplayPhase::Spinning);
    assert_eq!(harness.queue.get(x).unwrap().status, SpinStatus::Completed);
    assert!(harness.celebrations.events().is_empty());

    // and the current spin still lands normally
    harness.settlement.resolve(y, grid(ABC), 0);
    harness
        .wait_until("current spin to be shown", |h| h.celebrations.losses() == vec![y])
        .await;
    assert_eq!(harness.coordinator.visible_offsets(), offsets_for(ABC));

    // and both settle out of history
    let removed = harness.queue.prune(
        &RetentionPolicy {
            retain_history: 0,
            max_age_secs: 0,
        },
        Utc::now() + TimeDelta::days(365),
    );
    assert_eq!(removed, 2);
    assert!(harness.queue.snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn spin__refused_until_layout_is_retried() {
    // given
    let layout = FlakyLayout::unavailable(test_strips());
    let mut harness = SpinHarness::builder().layout(layout.clone()).build();
    let mounted = harness.start().await;

    // when
    let mut refusals = Vec::new();
    for per_line in [1_000_000, 2_000_000, 5_000_000] {
        refusals.push(harness.coordinator.place_bet(per_line, 1, per_line).await);
    }
    harness.settle(Duration::from_secs(2)).await;
    let still_disabled = harness.coordinator.retry_layout().await;
    layout.set_available(true);
    let retried = harness.coordinator.retry_layout().await;
    let accepted = harness.coordinator.place_bet(1_000_000, 1, 1_000_000).await;

    // then
    assert!(matches!(mounted, Err(EngineError::LayoutUnavailable { .. })));
    assert!(
        refusals
            .iter()
            .all(|r| matches!(r, Err(EngineError::LayoutUnavailable { .. })))
    );
    assert!(still_disabled.is_err());
    assert!(harness.settlement.submissions().is_empty());
    assert!(retried.is_ok());
    assert_eq!(accepted.unwrap(), SpinId(1));
}
