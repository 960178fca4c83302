use crate::{
    EngineError,
    Result,
    settlement::TransactionRef,
    symbols::OutcomeGrid,
};
use chrono::{
    DateTime,
    TimeDelta,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};
use tokio::sync::watch;
use tracing::{
    debug,
    info,
    warn,
};

pub mod in_memory_storage;
pub mod sled_storage;
pub mod storage;

use storage::SpinStorage;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SpinId(pub u64);

impl fmt::Display for SpinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpinStatus {
    Pending,
    Submitting,
    Waiting,
    Processing,
    ReadyToClaim,
    Completed,
    Failed,
    Expired,
}

impl SpinStatus {
    /// No further status transition is accepted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SpinStatus::Completed | SpinStatus::Failed | SpinStatus::Expired
        )
    }

    /// The spin did not happen; nothing will ever be shown for it.
    pub fn is_failure(self) -> bool {
        matches!(self, SpinStatus::Failed | SpinStatus::Expired)
    }

    pub fn has_result(self) -> bool {
        matches!(self, SpinStatus::ReadyToClaim | SpinStatus::Completed)
    }

    pub fn label(self) -> &'static str {
        match self {
            SpinStatus::Pending => "PENDING",
            SpinStatus::Submitting => "SUBMITTING",
            SpinStatus::Waiting => "WAITING",
            SpinStatus::Processing => "PROCESSING",
            SpinStatus::ReadyToClaim => "READY_TO_CLAIM",
            SpinStatus::Completed => "COMPLETED",
            SpinStatus::Failed => "FAILED",
            SpinStatus::Expired => "EXPIRED",
        }
    }
}

/// A validated bet. Amounts are in the smallest currency unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bet {
    pub bet_per_line: u64,
    pub selected_paylines: u32,
    pub total_bet: u64,
}

impl Bet {
    pub fn new(bet_per_line: u64, selected_paylines: u32) -> Result<Self> {
        let total_bet = bet_per_line
            .checked_mul(u64::from(selected_paylines))
            .ok_or_else(|| EngineError::InvalidBet("total bet overflows".to_string()))?;
        Self::validated(bet_per_line, selected_paylines, total_bet)
    }

    pub fn validated(bet_per_line: u64, selected_paylines: u32, total_bet: u64) -> Result<Self> {
        if bet_per_line == 0 || selected_paylines == 0 {
            return Err(EngineError::InvalidBet(
                "bet per line and paylines must be positive".to_string(),
            ));
        }
        if bet_per_line.checked_mul(u64::from(selected_paylines)) != Some(total_bet) {
            return Err(EngineError::InvalidBet(format!(
                "total bet {total_bet} != {bet_per_line} x {selected_paylines}"
            )));
        }
        Ok(Self {
            bet_per_line,
            selected_paylines,
            total_bet,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpinRequest {
    pub id: SpinId,
    pub bet: Bet,
    pub status: SpinStatus,
    pub outcome: Option<OutcomeGrid>,
    pub winnings: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub transaction: Option<TransactionRef>,
    #[serde(default)]
    pub claimed: bool,
    #[serde(default)]
    pub failure: Option<String>,
}

/// A change requested through [`SpinQueue::update`]. Only fields that are `Some` are applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpinUpdate {
    pub status: Option<SpinStatus>,
    pub outcome: Option<OutcomeGrid>,
    pub winnings: Option<u64>,
    pub transaction: Option<TransactionRef>,
    pub claimed: bool,
    pub failure: Option<String>,
}

impl SpinUpdate {
    pub fn status(status: SpinStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn claimed() -> Self {
        Self {
            claimed: true,
            ..Self::default()
        }
    }

    pub fn with_result(mut self, outcome: OutcomeGrid, winnings: u64) -> Self {
        self.outcome = Some(outcome);
        self.winnings = Some(winnings);
        self
    }

    pub fn with_transaction(mut self, transaction: TransactionRef) -> Self {
        self.transaction = Some(transaction);
        self
    }

    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Settled requests kept for history and replay.
    pub retain_history: usize,
    pub max_age_secs: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retain_history: 50,
            max_age_secs: 7 * 24 * 60 * 60,
        }
    }
}

struct QueueState {
    requests: BTreeMap<SpinId, SpinRequest>,
    next_id: u64,
    storage: Box<dyn SpinStorage + Send>,
}

impl QueueState {
    fn persist(&mut self, id: SpinId) {
        let Some(request) = self.requests.get(&id) else {
            return;
        };
        if let Err(err) = self.storage.upsert(request) {
            warn!(?err, spin_id = %id, "failed to persist spin request");
        }
    }
}

/// Ordered, persisted collection of spin requests. Cloning yields another handle to the
/// same queue.
///
/// Every mutation bumps a version number observed through [`SpinQueue::subscribe`].
/// Notifications coalesce, so observers re-read [`SpinQueue::snapshot`] instead of
/// expecting one notification per change.
#[derive(Clone)]
pub struct SpinQueue {
    state: Arc<Mutex<QueueState>>,
    changes: Arc<watch::Sender<u64>>,
}

impl SpinQueue {
    pub fn new(storage: impl SpinStorage + Send + 'static) -> Result<Self> {
        let requests = storage.load_all().map_err(EngineError::Storage)?;
        let requests: BTreeMap<_, _> = requests.into_iter().map(|r| (r.id, r)).collect();
        let next_id = requests.keys().next_back().map_or(1, |id| id.0 + 1);
        info!(loaded = requests.len(), next_id, "spin queue opened");
        let (changes, _) = watch::channel(0);
        Ok(Self {
            state: Arc::new(Mutex::new(QueueState {
                requests,
                next_id,
                storage: Box::new(storage),
            })),
            changes: Arc::new(changes),
        })
    }

    pub fn in_memory() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(QueueState {
                requests: BTreeMap::new(),
                next_id: 1,
                storage: Box::new(in_memory_storage::InMemorySpinStorage::new()),
            })),
            changes: Arc::new(changes),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }

    /// Creates a `PENDING` request and returns its id without any network round trip.
    pub fn enqueue(
        &self,
        bet_per_line: u64,
        selected_paylines: u32,
        total_bet: u64,
    ) -> Result<SpinId> {
        let bet = Bet::validated(bet_per_line, selected_paylines, total_bet)?;
        let id = {
            let mut state = self.lock();
            let id = SpinId(state.next_id);
            state.next_id += 1;
            let now = Utc::now();
            state.requests.insert(
                id,
                SpinRequest {
                    id,
                    bet,
                    status: SpinStatus::Pending,
                    outcome: None,
                    winnings: None,
                    created_at: now,
                    updated_at: now,
                    transaction: None,
                    claimed: false,
                    failure: None,
                },
            );
            state.persist(id);
            id
        };
        info!(spin_id = %id, total_bet, "spin enqueued");
        self.notify();
        Ok(id)
    }

    /// Applies `update` to request `id`. Returns `false` for unknown (already pruned) ids.
    ///
    /// Terminal statuses are final and a recorded outcome or winnings amount never changes;
    /// conflicting values are dropped with a warning.
    pub fn update(&self, id: SpinId, update: SpinUpdate) -> bool {
        let changed = {
            let mut state = self.lock();
            let Some(request) = state.requests.get_mut(&id) else {
                debug!(spin_id = %id, "update for unknown spin ignored");
                return false;
            };
            let mut changed = false;
            if let Some(status) = update.status
                && status != request.status
            {
                if request.status.is_terminal() {
                    debug!(spin_id = %id, from = ?request.status, to = ?status, "terminal status kept");
                } else {
                    request.status = status;
                    changed = true;
                }
            }
            if let Some(outcome) = update.outcome {
                match request.outcome {
                    None => {
                        request.outcome = Some(outcome);
                        changed = true;
                    }
                    Some(existing) if existing != outcome => {
                        warn!(spin_id = %id, %existing, %outcome, "conflicting outcome ignored");
                    }
                    Some(_) => {}
                }
            }
            if let Some(winnings) = update.winnings {
                match request.winnings {
                    None => {
                        request.winnings = Some(winnings);
                        changed = true;
                    }
                    Some(existing) if existing != winnings => {
                        warn!(spin_id = %id, existing, winnings, "conflicting winnings ignored");
                    }
                    Some(_) => {}
                }
            }
            if let Some(transaction) = update.transaction
                && request.transaction.as_ref() != Some(&transaction)
            {
                request.transaction = Some(transaction);
                changed = true;
            }
            if update.claimed && !request.claimed {
                request.claimed = true;
                changed = true;
            }
            if let Some(failure) = update.failure
                && request.failure.as_ref() != Some(&failure)
            {
                request.failure = Some(failure);
                changed = true;
            }
            if changed {
                request.updated_at = Utc::now();
                state.persist(id);
            }
            changed
        };
        if changed {
            self.notify();
        }
        true
    }

    pub fn update_status(
        &self,
        id: SpinId,
        status: SpinStatus,
        outcome: Option<OutcomeGrid>,
        winnings: Option<u64>,
    ) -> bool {
        self.update(
            id,
            SpinUpdate {
                status: Some(status),
                outcome,
                winnings,
                ..SpinUpdate::default()
            },
        )
    }

    pub fn get(&self, id: SpinId) -> Option<SpinRequest> {
        self.lock().requests.get(&id).cloned()
    }

    /// All requests in id order.
    pub fn snapshot(&self) -> Vec<SpinRequest> {
        self.lock().requests.values().cloned().collect()
    }

    /// Settled spins with a known outcome, newest first.
    pub fn history(&self) -> Vec<SpinRequest> {
        self.lock()
            .requests
            .values()
            .rev()
            .filter(|r| r.status.has_result() && r.outcome.is_some())
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn version(&self) -> u64 {
        *self.changes.borrow()
    }

    /// Drops settled requests that fall outside the retention policy. Unclaimed winnings
    /// and in-flight requests are always kept.
    pub fn prune(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> usize {
        let removed = {
            let mut state = self.lock();
            let max_age = i64::try_from(policy.max_age_secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(TimeDelta::MAX);
            let prunable: Vec<SpinId> = state
                .requests
                .values()
                .rev()
                .filter(|r| is_prunable(r))
                .enumerate()
                .filter(|(rank, r)| *rank >= policy.retain_history || now - r.created_at > max_age)
                .map(|(_, r)| r.id)
                .collect();
            for id in &prunable {
                state.requests.remove(id);
                if let Err(err) = state.storage.remove(*id) {
                    warn!(?err, spin_id = %id, "failed to remove pruned spin request");
                }
            }
            prunable.len()
        };
        if removed > 0 {
            debug!(removed, "pruned spin requests");
            self.notify();
        }
        removed
    }
}

fn is_prunable(request: &SpinRequest) -> bool {
    match request.status {
        SpinStatus::Failed | SpinStatus::Expired => true,
        SpinStatus::Completed => request.claimed || request.winnings == Some(0),
        _ => false,
    }
}
