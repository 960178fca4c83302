#![allow(non_snake_case)]

use super::*;
use crate::{
    queue::{
        Bet,
        in_memory_storage::InMemorySpinStorage,
    },
    test_helpers::{
        ScriptedSettlement,
        grid,
        test_config,
    },
};
use chrono::Utc;

const ABC: &str = "ABCABCABCABCABC";

fn processor(queue: &SpinQueue, settlement: &ScriptedSettlement) -> QueueProcessor<ScriptedSettlement> {
    QueueProcessor::new(queue.clone(), settlement.clone(), test_config().processor)
}

async fn wait_for(queue: &SpinQueue, id: SpinId, what: &str, condition: impl Fn(&SpinRequest) -> bool) {
    for _ in 0..6_000 {
        if queue.get(id).is_some_and(|request| condition(&request)) {
            return;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(start_paused = true)]
async fn start__second_call_does_not_spawn_another_loop() {
    // given
    let queue = SpinQueue::in_memory();
    let settlement = ScriptedSettlement::new();
    let processor = processor(&queue, &settlement);

    // when
    let first = processor.start();
    let second = processor.start();
    let id = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
    wait_for(&queue, id, "submission", |r| r.status == SpinStatus::Waiting).await;
    time::sleep(Duration::from_secs(1)).await;

    // then
    assert!(first);
    assert!(!second);
    assert!(processor.is_running());
    assert_eq!(settlement.submissions(), vec![id]);
}

#[tokio::test(start_paused = true)]
async fn process__walks_request_to_ready_to_claim_and_claims_it() {
    // given
    let queue = SpinQueue::in_memory();
    let settlement = ScriptedSettlement::new();
    let processor = processor(&queue, &settlement);
    processor.start();
    let id = queue.enqueue(1_000_000, 5, 5_000_000).unwrap();
    wait_for(&queue, id, "confirmation", |r| r.status == SpinStatus::Processing).await;

    // when
    settlement.resolve(id, grid(ABC), 60_000_000);
    wait_for(&queue, id, "claim", |r| r.claimed).await;

    // then
    let request = queue.get(id).unwrap();
    assert_eq!(request.status, SpinStatus::ReadyToClaim);
    assert_eq!(request.outcome, Some(grid(ABC)));
    assert_eq!(request.winnings, Some(60_000_000));
    assert_eq!(
        request.transaction,
        Some(ScriptedSettlement::transaction_for(id))
    );
    assert_eq!(settlement.claims().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn process__rejected_submission_fails_without_outcome() {
    // given
    let queue = SpinQueue::in_memory();
    let settlement = ScriptedSettlement::new();
    settlement.reject_submissions();
    let processor = processor(&queue, &settlement);
    processor.start();

    // when
    let id = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
    wait_for(&queue, id, "failure", |r| r.status.is_terminal()).await;

    // then
    let request = queue.get(id).unwrap();
    assert_eq!(request.status, SpinStatus::Failed);
    assert_eq!(request.outcome, None);
    assert!(request.failure.unwrap().contains("insufficient balance"));
}

#[tokio::test(start_paused = true)]
async fn process__transient_failures_are_retried() {
    // given
    let queue = SpinQueue::in_memory();
    let settlement = ScriptedSettlement::new();
    settlement.fail_next_submissions(2);
    settlement.fail_next_polls(3);
    let processor = processor(&queue, &settlement);
    processor.start();
    let id = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
    settlement.resolve(id, grid(ABC), 0);

    // when
    wait_for(&queue, id, "result", |r| r.status == SpinStatus::ReadyToClaim).await;

    // then
    assert_eq!(settlement.submissions(), vec![id, id, id]);
    assert_eq!(queue.get(id).unwrap().winnings, Some(0));
}

#[tokio::test(start_paused = true)]
async fn process__unanswered_polls_expire_at_deadline() {
    // given
    let queue = SpinQueue::in_memory();
    let settlement = ScriptedSettlement::new();
    settlement.hang_polls();
    let processor = processor(&queue, &settlement);
    processor.start();
    let started = Instant::now();

    // when
    let id = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
    wait_for(&queue, id, "expiry", |r| r.status.is_terminal()).await;

    // then
    let request = queue.get(id).unwrap();
    assert_eq!(request.status, SpinStatus::Expired);
    assert_eq!(request.outcome, None);
    let timeout = Duration::from_millis(test_config().processor.result_timeout_ms);
    assert!(started.elapsed() >= timeout);
}

#[tokio::test(start_paused = true)]
async fn process__later_spin_may_settle_first() {
    // given
    let queue = SpinQueue::in_memory();
    let settlement = ScriptedSettlement::new();
    let processor = processor(&queue, &settlement);
    processor.start();
    let first = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
    let second = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();

    // when
    settlement.resolve(second, grid(ABC), 0);
    wait_for(&queue, second, "second result", |r| r.outcome.is_some()).await;
    let first_meanwhile = queue.get(first).unwrap();
    settlement.resolve(first, grid("DDDDDDDDDDDDDDD"), 250_000_000);
    wait_for(&queue, first, "first result", |r| r.outcome.is_some()).await;

    // then
    assert_eq!(first_meanwhile.outcome, None);
    assert_eq!(queue.get(first).unwrap().winnings, Some(250_000_000));
    assert_eq!(queue.get(second).unwrap().winnings, Some(0));
}

#[tokio::test(start_paused = true)]
async fn start__resubmits_requests_interrupted_mid_submission() {
    // given
    let now = Utc::now();
    let interrupted = SpinRequest {
        id: SpinId(3),
        bet: Bet::new(2_000_000, 10).unwrap(),
        status: SpinStatus::Submitting,
        outcome: None,
        winnings: None,
        created_at: now,
        updated_at: now,
        transaction: None,
        claimed: false,
        failure: None,
    };
    let queue = SpinQueue::new(InMemorySpinStorage::new_with_requests([interrupted])).unwrap();
    let settlement = ScriptedSettlement::new();
    let processor = processor(&queue, &settlement);

    // when
    processor.start();
    wait_for(&queue, SpinId(3), "resubmission", |r| r.status == SpinStatus::Waiting).await;

    // then
    assert_eq!(settlement.submissions(), vec![SpinId(3)]);
}

#[tokio::test(start_paused = true)]
async fn shutdown__stops_the_worker_and_allows_restart() {
    // given
    let queue = SpinQueue::in_memory();
    let settlement = ScriptedSettlement::new();
    let processor = processor(&queue, &settlement);
    processor.start();

    // when
    processor.shutdown();
    for _ in 0..100 {
        if !processor.is_running() {
            break;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    let stopped = !processor.is_running();
    let restarted = processor.start();

    // then
    assert!(stopped);
    assert!(restarted);
}

#[tokio::test(start_paused = true)]
async fn process__claim_is_skipped_when_auto_claim_disabled() {
    // given
    let queue = SpinQueue::in_memory();
    let settlement = ScriptedSettlement::new();
    let mut config = test_config().processor;
    config.auto_claim = false;
    let processor = QueueProcessor::new(queue.clone(), settlement.clone(), config);
    processor.start();
    let id = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
    settlement.resolve(id, grid(ABC), 10_000_000);

    // when
    wait_for(&queue, id, "result", |r| r.status == SpinStatus::ReadyToClaim).await;
    time::sleep(Duration::from_secs(2)).await;

    // then
    assert!(!queue.get(id).unwrap().claimed);
    assert!(settlement.claims().is_empty());
}
