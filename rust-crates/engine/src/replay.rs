//! Re-animates a settled spin from its stored outcome.
//!
//! A replay takes the display over from whatever it shows, clears it, spins with the
//! landing offsets already known, holds briefly, reveals the historical outcome and
//! celebrates it. A spin id is replayed at most once at a time; the registry entry is
//! released on every exit path, including cancellation.

use crate::{
    EngineError,
    Result,
    coordinator::SpinDisplayCoordinator,
    effects::{
        CelebrationSink,
        SoundPlayer,
    },
    layout::ReelLayoutSource,
    queue::SpinId,
    symbols::OutcomeGrid,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Duration,
};
use tokio::time::{
    self,
    Instant,
};
use tracing::{
    debug,
    info,
    warn,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayTimings {
    pub cleanup_ms: u64,
    pub hold_ms: u64,
    /// Longest wait for the reels to land before the celebration starts anyway.
    pub reveal_timeout_ms: u64,
    pub celebration_ms: u64,
    /// Replays allowed to run at once.
    pub max_concurrent: usize,
}

impl Default for ReplayTimings {
    fn default() -> Self {
        Self {
            cleanup_ms: 100,
            hold_ms: 1_500,
            reveal_timeout_ms: 10_000,
            celebration_ms: 2_000,
            max_concurrent: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayPhase {
    Stopping,
    Cleanup,
    Spinning,
    Revealing,
    Celebrating,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayOutcome {
    Completed,
    /// The same spin was already being replayed.
    Ignored,
    /// Something else took the display over during the given phase.
    Cancelled(ReplayPhase),
}

#[derive(Debug)]
pub enum Admission {
    Admitted(ReplayGuard),
    AlreadyActive,
    Busy { active: SpinId },
}

/// Spin ids with a replay in flight.
#[derive(Clone, Debug)]
pub struct ReplayRegistry {
    active: Arc<Mutex<BTreeSet<SpinId>>>,
    capacity: usize,
}

impl ReplayRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            active: Arc::new(Mutex::new(BTreeSet::new())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<SpinId>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn try_admit(&self, id: SpinId) -> Admission {
        let mut active = self.lock();
        if active.contains(&id) {
            return Admission::AlreadyActive;
        }
        if active.len() >= self.capacity {
            let busy = active.iter().next().copied().unwrap_or(id);
            return Admission::Busy { active: busy };
        }
        active.insert(id);
        Admission::Admitted(ReplayGuard {
            registry: self.clone(),
            id,
        })
    }

    pub fn contains(&self, id: SpinId) -> bool {
        self.lock().contains(&id)
    }

    pub fn active(&self) -> Vec<SpinId> {
        self.lock().iter().copied().collect()
    }
}

/// Registry entry that is removed when dropped.
#[derive(Debug)]
pub struct ReplayGuard {
    registry: ReplayRegistry,
    id: SpinId,
}

impl Drop for ReplayGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

pub struct ReplayController<L, S, C> {
    coordinator: SpinDisplayCoordinator<L, S, C>,
    registry: ReplayRegistry,
    timings: ReplayTimings,
    phase: Arc<Mutex<Option<(SpinId, ReplayPhase)>>>,
}

impl<L, S, C> Clone for ReplayController<L, S, C> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            registry: self.registry.clone(),
            timings: self.timings.clone(),
            phase: self.phase.clone(),
        }
    }
}

impl<L, S, C> ReplayController<L, S, C>
where
    L: ReelLayoutSource + Send + Sync + 'static,
    S: SoundPlayer + Send + Sync + 'static,
    C: CelebrationSink + Send + Sync + 'static,
{
    pub fn new(coordinator: SpinDisplayCoordinator<L, S, C>, timings: ReplayTimings) -> Self {
        Self {
            coordinator,
            registry: ReplayRegistry::new(timings.max_concurrent),
            timings,
            phase: Arc::new(Mutex::new(None)),
        }
    }

    pub fn registry(&self) -> &ReplayRegistry {
        &self.registry
    }

    /// The replay in flight and how far it got.
    pub fn phase(&self) -> Option<(SpinId, ReplayPhase)> {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: Option<(SpinId, ReplayPhase)>) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// Replays `spin_id` with its stored result.
    ///
    /// A second request for the spin being replayed is ignored; a request for another spin
    /// while the registry is full fails with [`EngineError::ReplayInProgress`].
    pub async fn replay(
        &self,
        spin_id: SpinId,
        outcome: OutcomeGrid,
        winnings: u64,
        bet_amount: u64,
    ) -> Result<ReplayOutcome> {
        let _guard = match self.registry.try_admit(spin_id) {
            Admission::Admitted(guard) => guard,
            Admission::AlreadyActive => {
                debug!(spin_id = %spin_id, "replay already running");
                return Ok(ReplayOutcome::Ignored);
            }
            Admission::Busy { active } => {
                return Err(EngineError::ReplayInProgress { active });
            }
        };
        self.coordinator.layout().strips()?;

        info!(spin_id = %spin_id, "replay started");
        let outcome = self.run(spin_id, outcome, winnings, bet_amount).await;
        match outcome {
            ReplayOutcome::Cancelled(phase) => {
                info!(spin_id = %spin_id, ?phase, "replay cancelled")
            }
            _ => info!(spin_id = %spin_id, "replay finished"),
        }
        self.set_phase(None);
        Ok(outcome)
    }

    async fn run(
        &self,
        spin_id: SpinId,
        outcome: OutcomeGrid,
        winnings: u64,
        bet_amount: u64,
    ) -> ReplayOutcome {
        let coordinator = &self.coordinator;

        self.set_phase(Some((spin_id, ReplayPhase::Stopping)));
        let token = coordinator.take_over_for_replay(spin_id).await;

        self.set_phase(Some((spin_id, ReplayPhase::Cleanup)));
        time::sleep(Duration::from_millis(self.timings.cleanup_ms)).await;

        self.set_phase(Some((spin_id, ReplayPhase::Spinning)));
        if !coordinator.replay_spin(token, &outcome) {
            return ReplayOutcome::Cancelled(ReplayPhase::Cleanup);
        }
        time::sleep(Duration::from_millis(self.timings.hold_ms)).await;

        self.set_phase(Some((spin_id, ReplayPhase::Revealing)));
        if !coordinator.replay_reveal(token, spin_id, &outcome, winnings, bet_amount) {
            return ReplayOutcome::Cancelled(ReplayPhase::Spinning);
        }
        let deadline = Instant::now() + Duration::from_millis(self.timings.reveal_timeout_ms);
        while !coordinator.replay_settled(token) {
            if !coordinator.holds(token) {
                return ReplayOutcome::Cancelled(ReplayPhase::Revealing);
            }
            if Instant::now() >= deadline {
                warn!(spin_id = %spin_id, "reels did not settle in time, continuing replay");
                break;
            }
            time::sleep(coordinator.config().frame_interval()).await;
        }

        self.set_phase(Some((spin_id, ReplayPhase::Celebrating)));
        time::sleep(Duration::from_millis(self.timings.celebration_ms)).await;
        if !coordinator.holds(token) {
            return ReplayOutcome::Cancelled(ReplayPhase::Celebrating);
        }

        self.set_phase(Some((spin_id, ReplayPhase::Done)));
        coordinator.finish_replay(token);
        ReplayOutcome::Completed
    }
}
