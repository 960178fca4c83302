//! Background worker that walks queued spins through the settlement authority.
//!
//! Each pass reads a queue snapshot and advances every request that is due: submit,
//! then poll until a result shows up, then claim. Failures either end the request
//! (`FAILED`, `EXPIRED`) or back off and try again on a later pass. Passes run on a timer,
//! on [`QueueProcessor::poll_now`] and whenever the queue changes.

use crate::{
    queue::{
        SpinId,
        SpinQueue,
        SpinRequest,
        SpinStatus,
        SpinUpdate,
    },
    settlement::{
        PollStatus,
        SettlementAuthority,
        SettlementError,
        SpinSubmission,
    },
};
use futures::future::join_all;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
    time::Duration,
};
use tokio::{
    sync::mpsc,
    time::{
        self,
        Instant,
        MissedTickBehavior,
    },
};
use tracing::{
    debug,
    info,
    warn,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub poll_interval_ms: u64,
    /// Upper bound for a single call to the settlement authority.
    pub request_timeout_ms: u64,
    /// Time a spin may spend being submitted before it expires.
    pub submit_timeout_ms: u64,
    /// Time a submitted spin may wait for its result before it expires.
    pub result_timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub auto_claim: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            request_timeout_ms: 10_000,
            submit_timeout_ms: 30_000,
            result_timeout_ms: 120_000,
            initial_backoff_ms: 250,
            max_backoff_ms: 4_000,
            auto_claim: true,
        }
    }
}

impl ProcessorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms))
    }
}

#[derive(Debug)]
pub enum ProcessorCommand {
    PollNow,
    Shutdown,
}

pub struct QueueProcessor<A> {
    queue: SpinQueue,
    authority: Arc<A>,
    config: ProcessorConfig,
    running: Arc<AtomicBool>,
    commands: Mutex<Option<mpsc::UnboundedSender<ProcessorCommand>>>,
}

impl<A> QueueProcessor<A>
where
    A: SettlementAuthority + Send + Sync + 'static,
{
    pub fn new(queue: SpinQueue, authority: A, config: ProcessorConfig) -> Self {
        Self {
            queue,
            authority: Arc::new(authority),
            config,
            running: Arc::new(AtomicBool::new(false)),
            commands: Mutex::new(None),
        }
    }

    pub fn authority(&self) -> &A {
        &self.authority
    }

    pub fn queue(&self) -> &SpinQueue {
        &self.queue
    }

    /// Spawns the worker. Returns `false` if one is already running.
    pub fn start(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("queue processor already running");
            return false;
        }
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        *self
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cmd_tx);
        tokio::spawn(processor_worker(
            self.queue.clone(),
            self.authority.clone(),
            self.config.clone(),
            cmd_rx,
            self.running.clone(),
        ));
        info!("queue processor started");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests an immediate pass instead of waiting for the next tick.
    pub fn poll_now(&self) {
        self.send(ProcessorCommand::PollNow);
    }

    pub fn shutdown(&self) {
        self.send(ProcessorCommand::Shutdown);
    }

    fn send(&self, cmd: ProcessorCommand) {
        let commands = self
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = commands.as_ref()
            && tx.send(cmd).is_err()
        {
            debug!("queue processor already stopped");
        }
    }
}

impl<A> Drop for QueueProcessor<A> {
    fn drop(&mut self) {
        let commands = self
            .commands
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = commands.take() {
            let _ = tx.send(ProcessorCommand::Shutdown);
        }
    }
}

async fn processor_worker<A>(
    queue: SpinQueue,
    authority: Arc<A>,
    config: ProcessorConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<ProcessorCommand>,
    running: Arc<AtomicBool>,
) where
    A: SettlementAuthority + Send + Sync,
{
    let mut ticker = time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut changes = queue.subscribe();
    let mut tracker = HashMap::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ProcessorCommand::PollNow) => {}
                    Some(ProcessorCommand::Shutdown) | None => break,
                }
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        let _ = changes.borrow_and_update();
        process_due(&queue, authority.as_ref(), &config, &mut tracker).await;
    }

    running.store(false, Ordering::SeqCst);
    info!("queue processor stopped");
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Submit,
    Poll,
    Claim,
}

impl Stage {
    fn of(request: &SpinRequest) -> Self {
        match request.status {
            SpinStatus::Waiting | SpinStatus::Processing if request.transaction.is_some() => {
                Stage::Poll
            }
            SpinStatus::ReadyToClaim | SpinStatus::Completed => Stage::Claim,
            _ => Stage::Submit,
        }
    }
}

/// Per-request retry bookkeeping. Lives only as long as the worker.
#[derive(Debug)]
struct Tracked {
    stage: Option<Stage>,
    deadline: Option<Instant>,
    next_attempt: Instant,
    backoff: Duration,
    abandoned: bool,
}

impl Tracked {
    fn new(now: Instant, config: &ProcessorConfig) -> Self {
        Self {
            stage: None,
            deadline: None,
            next_attempt: now,
            backoff: config.initial_backoff(),
            abandoned: false,
        }
    }

    fn enter(&mut self, stage: Stage, now: Instant, config: &ProcessorConfig) {
        self.stage = Some(stage);
        self.deadline = match stage {
            Stage::Submit => Some(now + Duration::from_millis(config.submit_timeout_ms)),
            Stage::Poll => Some(now + Duration::from_millis(config.result_timeout_ms)),
            Stage::Claim => None,
        };
        self.backoff = config.initial_backoff();
    }

    fn is_due(&self, now: Instant) -> bool {
        let overdue = self.deadline.is_some_and(|deadline| now >= deadline);
        !self.abandoned && (overdue || now >= self.next_attempt)
    }

    fn succeeded(&mut self, delay: Duration, config: &ProcessorConfig) {
        self.backoff = config.initial_backoff();
        self.next_attempt = Instant::now() + delay;
    }

    fn back_off(&mut self, config: &ProcessorConfig) {
        self.next_attempt = Instant::now() + self.backoff;
        self.backoff = (self.backoff * 2).min(config.max_backoff());
    }
}

fn needs_work(request: &SpinRequest, config: &ProcessorConfig) -> bool {
    match request.status {
        SpinStatus::Pending
        | SpinStatus::Submitting
        | SpinStatus::Waiting
        | SpinStatus::Processing => true,
        SpinStatus::ReadyToClaim | SpinStatus::Completed => {
            config.auto_claim && !request.claimed && request.transaction.is_some()
        }
        SpinStatus::Failed | SpinStatus::Expired => false,
    }
}

async fn process_due<A>(
    queue: &SpinQueue,
    authority: &A,
    config: &ProcessorConfig,
    tracker: &mut HashMap<SpinId, Tracked>,
) where
    A: SettlementAuthority,
{
    let now = Instant::now();
    let work: HashMap<SpinId, SpinRequest> = queue
        .snapshot()
        .into_iter()
        .filter(|request| needs_work(request, config))
        .map(|request| (request.id, request))
        .collect();
    tracker.retain(|id, _| work.contains_key(id));
    for id in work.keys() {
        tracker
            .entry(*id)
            .or_insert_with(|| Tracked::new(now, config));
    }

    let steps: Vec<_> = tracker
        .iter_mut()
        .filter_map(|(id, tracked)| {
            let request = work.get(id)?;
            tracked
                .is_due(now)
                .then(|| advance(queue, authority, config, request, tracked, now))
        })
        .collect();
    join_all(steps).await;
}

async fn advance<A>(
    queue: &SpinQueue,
    authority: &A,
    config: &ProcessorConfig,
    request: &SpinRequest,
    tracked: &mut Tracked,
    now: Instant,
) where
    A: SettlementAuthority,
{
    let stage = Stage::of(request);
    if tracked.stage != Some(stage) {
        tracked.enter(stage, now, config);
    }
    if let Some(deadline) = tracked.deadline
        && now >= deadline
    {
        warn!(spin_id = %request.id, status = ?request.status, "settlement deadline exceeded");
        queue.update(
            request.id,
            SpinUpdate::status(SpinStatus::Expired)
                .with_failure("settlement deadline exceeded"),
        );
        return;
    }
    match stage {
        Stage::Submit => submit(queue, authority, config, request, tracked).await,
        Stage::Poll => poll(queue, authority, config, request, tracked).await,
        Stage::Claim => claim(queue, authority, config, request, tracked).await,
    }
}

async fn with_timeout<T>(
    config: &ProcessorConfig,
    call: impl Future<Output = Result<T, SettlementError>>,
) -> Result<T, SettlementError> {
    match time::timeout(config.request_timeout(), call).await {
        Ok(result) => result,
        Err(_) => Err(SettlementError::Transient(
            "settlement authority timed out".to_string(),
        )),
    }
}

async fn submit<A>(
    queue: &SpinQueue,
    authority: &A,
    config: &ProcessorConfig,
    request: &SpinRequest,
    tracked: &mut Tracked,
) where
    A: SettlementAuthority,
{
    if request.status == SpinStatus::Pending {
        queue.update(request.id, SpinUpdate::status(SpinStatus::Submitting));
    }
    let submission = SpinSubmission {
        spin_id: request.id,
        bet: request.bet,
    };
    match with_timeout(config, authority.submit_spin(&submission)).await {
        Ok(transaction) => {
            info!(spin_id = %request.id, %transaction, "spin submitted");
            queue.update(
                request.id,
                SpinUpdate::status(SpinStatus::Waiting).with_transaction(transaction),
            );
            tracked.succeeded(config.poll_interval(), config);
        }
        Err(err) if !err.is_retryable() => {
            warn!(spin_id = %request.id, %err, "spin rejected");
            queue.update(
                request.id,
                SpinUpdate::status(SpinStatus::Failed).with_failure(err.to_string()),
            );
        }
        Err(err) => {
            warn!(spin_id = %request.id, %err, "spin submission failed, retrying");
            tracked.back_off(config);
        }
    }
}

async fn poll<A>(
    queue: &SpinQueue,
    authority: &A,
    config: &ProcessorConfig,
    request: &SpinRequest,
    tracked: &mut Tracked,
) where
    A: SettlementAuthority,
{
    let Some(transaction) = request.transaction.as_ref() else {
        return;
    };
    match with_timeout(config, authority.poll_outcome(transaction)).await {
        Ok(PollStatus::Pending) => tracked.succeeded(config.poll_interval(), config),
        Ok(PollStatus::Confirmed) => {
            if request.status == SpinStatus::Waiting {
                debug!(spin_id = %request.id, "spin confirmed");
                queue.update(request.id, SpinUpdate::status(SpinStatus::Processing));
            }
            tracked.succeeded(config.poll_interval(), config);
        }
        Ok(PollStatus::ResultAvailable { outcome, winnings }) => {
            info!(spin_id = %request.id, %outcome, winnings, "spin result available");
            queue.update(
                request.id,
                SpinUpdate::status(SpinStatus::ReadyToClaim).with_result(outcome, winnings),
            );
            tracked.succeeded(Duration::ZERO, config);
        }
        Err(err) if !err.is_retryable() => {
            warn!(spin_id = %request.id, %err, "spin rejected while settling");
            queue.update(
                request.id,
                SpinUpdate::status(SpinStatus::Failed).with_failure(err.to_string()),
            );
        }
        Err(err) => {
            warn!(spin_id = %request.id, %err, "polling failed, retrying");
            tracked.back_off(config);
        }
    }
}

async fn claim<A>(
    queue: &SpinQueue,
    authority: &A,
    config: &ProcessorConfig,
    request: &SpinRequest,
    tracked: &mut Tracked,
) where
    A: SettlementAuthority,
{
    let Some(transaction) = request.transaction.as_ref() else {
        return;
    };
    match with_timeout(config, authority.claim_spin(transaction)).await {
        Ok(payout) => {
            if request.winnings.is_some_and(|winnings| winnings != payout) {
                warn!(spin_id = %request.id, payout, winnings = ?request.winnings, "claimed payout differs from reported winnings");
            }
            info!(spin_id = %request.id, payout, "spin claimed");
            queue.update(request.id, SpinUpdate::claimed());
        }
        Err(err) if !err.is_retryable() => {
            warn!(spin_id = %request.id, %err, "claim refused, giving up");
            tracked.abandoned = true;
        }
        Err(err) => {
            debug!(spin_id = %request.id, %err, "claim failed, retrying");
            tracked.back_off(config);
        }
    }
}

#[cfg(test)]
mod tests;
