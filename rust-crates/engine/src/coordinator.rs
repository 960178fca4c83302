//! Owns what the player currently sees.
//!
//! The coordinator binds at most one queued spin to the visible reels at a time and only
//! ever steers the reels with the outcome of that spin. All state lives behind one mutex
//! that is never held across an `.await`; every asynchronous step captures the display
//! generation first and re-checks it afterwards, so a bet placed, a forced stop or a replay
//! taking over in between turns the older step into a no-op.

use crate::{
    Result,
    config::EngineConfig,
    effects::{
        CelebrationSink,
        Effects,
        SoundPlayer,
        WinCelebration,
        WinTier,
        WinTierThresholds,
    },
    layout::{
        LayoutCache,
        LayoutState,
        ReelLayoutSource,
    },
    physics::{
        FrameSink,
        PhysicsEngine,
        PhysicsEvent,
        ReelAnimationState,
    },
    queue::{
        SpinId,
        SpinQueue,
        SpinStatus,
    },
    resolver::resolve,
    symbols::{
        BlankSet,
        OutcomeGrid,
        ReelStrips,
    },
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
    MissedTickBehavior,
};
use tracing::{
    debug,
    info,
    warn,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub frame_interval_ms: u64,
    /// Results older than this are never celebrated.
    pub staleness_window_secs: u64,
    pub celebration_ms: u64,
    pub blank_symbols: Vec<char>,
    pub win_tiers: WinTierThresholds,
    pub spin_loop_sound: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
            staleness_window_secs: 300,
            celebration_ms: 2_000,
            blank_symbols: vec!['_'],
            win_tiers: WinTierThresholds::default(),
            spin_loop_sound: "reel-spin".to_string(),
        }
    }
}

impl DisplayConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub fn celebration_duration(&self) -> Duration {
        Duration::from_millis(self.celebration_ms)
    }

    pub fn blanks(&self) -> BlankSet {
        BlankSet::new(self.blank_symbols.iter().copied())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayPhase {
    Idle,
    Spinning,
    Decelerating,
    Celebrating,
}

/// The association between the visible animation and the queue entry it shows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplayBinding {
    pub current_spin_id: Option<SpinId>,
    pub is_spinning: bool,
    pub waiting_for_outcome: bool,
    pub replaying: Option<SpinId>,
}

/// Proof of ownership of the display, invalidated by any later takeover.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayToken(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueReaction {
    /// No spin is bound to the display.
    Idle,
    /// Nothing for the current spin yet, or the newest result belongs to another spin.
    Ignored,
    AlreadyApplied,
    Applied(SpinId),
    /// The display changed hands while the outcome was being applied.
    Superseded(SpinId),
    /// The current spin failed or expired and the display went back to idle.
    Reset(SpinId),
}

#[derive(Clone, Debug)]
pub struct DisplaySnapshot {
    pub phase: DisplayPhase,
    pub binding: DisplayBinding,
    pub reels: Vec<ReelAnimationState>,
    pub strips: Option<Arc<ReelStrips>>,
    pub layout: LayoutState,
    pub last_celebration: Option<WinCelebration>,
}

#[derive(Clone, Copy, Debug)]
struct PendingCelebration {
    spin_id: SpinId,
    winnings: u64,
    bet_amount: u64,
    replay: bool,
    celebrate: bool,
}

enum Finish {
    Win(WinCelebration),
    Loss { spin_id: SpinId, replay: bool },
}

struct Inner {
    physics: PhysicsEngine,
    sink: Box<dyn FrameSink + Send>,
    binding: DisplayBinding,
    phase: DisplayPhase,
    generation: u64,
    last_processed_outcome: Option<SpinId>,
    strips: Option<Arc<ReelStrips>>,
    pending_celebration: Option<PendingCelebration>,
    celebration_deadline: Option<Instant>,
    last_celebration: Option<WinCelebration>,
    user_acted: bool,
}

impl Inner {
    fn release_display(&mut self) {
        self.generation += 1;
        self.physics.stop_all_reels();
        self.binding = DisplayBinding::default();
        self.pending_celebration = None;
        self.celebration_deadline = None;
        self.phase = DisplayPhase::Idle;
    }
}

pub struct SpinDisplayCoordinator<L, S, C> {
    inner: Arc<Mutex<Inner>>,
    queue: SpinQueue,
    layout: Arc<LayoutCache<L>>,
    effects: Arc<Effects<S, C>>,
    config: Arc<DisplayConfig>,
    blanks: Arc<BlankSet>,
}

impl<L, S, C> Clone for SpinDisplayCoordinator<L, S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            queue: self.queue.clone(),
            layout: self.layout.clone(),
            effects: self.effects.clone(),
            config: self.config.clone(),
            blanks: self.blanks.clone(),
        }
    }
}

impl<L, S, C> SpinDisplayCoordinator<L, S, C>
where
    L: ReelLayoutSource + Send + Sync + 'static,
    S: SoundPlayer + Send + Sync + 'static,
    C: CelebrationSink + Send + Sync + 'static,
{
    pub fn new(
        queue: SpinQueue,
        layout: L,
        sound: S,
        celebration: C,
        config: &EngineConfig,
        sink: impl FrameSink + Send + 'static,
    ) -> Self {
        let display = config.display.clone();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                physics: PhysicsEngine::new(config.physics.clone()),
                sink: Box::new(sink),
                binding: DisplayBinding::default(),
                phase: DisplayPhase::Idle,
                generation: 0,
                last_processed_outcome: None,
                strips: None,
                pending_celebration: None,
                celebration_deadline: None,
                last_celebration: None,
                user_acted: false,
            })),
            queue,
            layout: Arc::new(LayoutCache::new(layout)),
            effects: Arc::new(Effects::new(
                sound,
                celebration,
                display.spin_loop_sound.clone(),
            )),
            blanks: Arc::new(display.blanks()),
            config: Arc::new(display),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn queue(&self) -> &SpinQueue {
        &self.queue
    }

    pub fn layout(&self) -> &LayoutCache<L> {
        &self.layout
    }

    pub fn effects(&self) -> &Effects<S, C> {
        &self.effects
    }

    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    /// Loads the reel layout and shows the latest settled result without celebrating it.
    pub async fn mount(&self) -> Result<()> {
        let strips = self.layout.load().await?;
        self.install_layout(strips);
        Ok(())
    }

    /// Fetches the layout again after it was unavailable.
    pub async fn retry_layout(&self) -> Result<()> {
        let strips = self.layout.retry().await?;
        self.install_layout(strips);
        Ok(())
    }

    fn install_layout(&self, strips: Arc<ReelStrips>) {
        let latest = self.queue.history().into_iter().next();
        let mut inner = self.lock();
        if inner.binding.is_spinning {
            inner.strips = Some(strips);
            return;
        }
        inner.physics.initialize_reels(&strips.lengths());
        if let Some(request) = latest
            && let Some(outcome) = request.outcome
        {
            let resolution = resolve(&outcome, &strips, &self.blanks);
            inner.physics.snap_to(&resolution.offsets);
            inner.last_processed_outcome = Some(request.id);
            debug!(spin_id = %request.id, "showing last settled result");
        }
        inner.strips = Some(strips);
    }

    /// Enqueues a bet and immediately binds the display to it and starts the reels.
    ///
    /// Refused while the reel layout is unavailable.
    pub async fn place_bet(
        &self,
        bet_per_line: u64,
        selected_paylines: u32,
        total_bet: u64,
    ) -> Result<SpinId> {
        let strips = self.layout.strips()?;
        let id = self
            .queue
            .enqueue(bet_per_line, selected_paylines, total_bet)?;
        let (generation, was_celebrating) = {
            let mut inner = self.lock();
            if let Some(previous) = inner.binding.current_spin_id {
                debug!(from = %previous, to = %id, "handing display over");
            }
            if inner.physics.reel_count() == 0 {
                inner.physics.initialize_reels(&strips.lengths());
                inner.strips = Some(strips);
            }
            let was_celebrating = inner.phase == DisplayPhase::Celebrating;
            inner.release_display();
            inner.user_acted = true;
            inner.binding = DisplayBinding {
                current_spin_id: Some(id),
                is_spinning: true,
                waiting_for_outcome: true,
                replaying: None,
            };
            let provisional = inner.physics.visible_offsets();
            inner.physics.start_spin(&provisional);
            inner.phase = DisplayPhase::Spinning;
            (inner.generation, was_celebrating)
        };
        if was_celebrating {
            self.effects.dismiss();
        }
        self.effects.spin_loop_stopped().await;
        if self.holds(DisplayToken(generation)) {
            self.effects.spin_started();
        }
        info!(spin_id = %id, "spin started");
        Ok(id)
    }

    /// Reconciles the display with the current queue contents.
    pub async fn on_queue_change(&self) -> QueueReaction {
        enum Step {
            Done(QueueReaction),
            Reset(SpinId),
            Apply { id: SpinId, generation: u64 },
        }

        let snapshot = self.queue.snapshot();
        let (step, orphans) = {
            let mut inner = self.lock();
            let current = inner.binding.current_spin_id;
            let orphans: Vec<SpinId> = snapshot
                .iter()
                .filter(|r| r.status == SpinStatus::ReadyToClaim && Some(r.id) != current)
                .map(|r| r.id)
                .collect();
            let step = match current {
                None => Step::Done(QueueReaction::Idle),
                Some(current) => {
                    let failed = snapshot
                        .iter()
                        .find(|r| r.id == current)
                        .filter(|r| r.status.is_failure());
                    if let Some(request) = failed {
                        warn!(spin_id = %current, status = ?request.status, "spin did not settle, resetting display");
                        inner.release_display();
                        Step::Reset(current)
                    } else {
                        let latest = snapshot
                            .iter()
                            .rev()
                            .find(|r| r.status.has_result() && r.outcome.is_some());
                        match latest {
                            None => Step::Done(QueueReaction::Ignored),
                            Some(request) if request.id != current => {
                                debug!(spin_id = %request.id, current = %current, "result for another spin ignored");
                                Step::Done(QueueReaction::Ignored)
                            }
                            Some(_) if inner.last_processed_outcome == Some(current) => {
                                Step::Done(QueueReaction::AlreadyApplied)
                            }
                            Some(request) => match (request.outcome, inner.strips.clone()) {
                                (Some(outcome), Some(strips)) => {
                                    inner.last_processed_outcome = Some(current);
                                    let resolution = resolve(&outcome, &strips, &self.blanks);
                                    inner.physics.decelerate_to(&resolution.offsets);
                                    inner.pending_celebration = Some(PendingCelebration {
                                        spin_id: current,
                                        winnings: request.winnings.unwrap_or(0),
                                        bet_amount: request.bet.total_bet,
                                        replay: false,
                                        celebrate: self
                                            .celebration_allowed(&inner, request.created_at),
                                    });
                                    inner.binding.waiting_for_outcome = false;
                                    inner.phase = DisplayPhase::Decelerating;
                                    info!(spin_id = %current, %outcome, "outcome applied");
                                    Step::Apply {
                                        id: current,
                                        generation: inner.generation,
                                    }
                                }
                                _ => Step::Done(QueueReaction::Ignored),
                            },
                        }
                    }
                }
            };
            (step, orphans)
        };

        // results nobody is watching settle without animation
        for id in orphans {
            debug!(spin_id = %id, "spin finalized without display");
            self.queue.update_status(id, SpinStatus::Completed, None, None);
        }

        match step {
            Step::Done(reaction) => reaction,
            Step::Reset(id) => {
                self.effects.spin_loop_stopped().await;
                QueueReaction::Reset(id)
            }
            Step::Apply { id, generation } => {
                // let the deceleration begin before completing
                tokio::task::yield_now().await;
                {
                    let mut inner = self.lock();
                    if inner.generation != generation {
                        debug!(spin_id = %id, "display changed hands, completion dropped");
                        return QueueReaction::Superseded(id);
                    }
                    inner.binding.is_spinning = false;
                }
                self.queue
                    .update_status(id, SpinStatus::Completed, None, None);
                self.effects.spin_loop_stopped().await;
                QueueReaction::Applied(id)
            }
        }
    }

    fn celebration_allowed(&self, inner: &Inner, created_at: DateTime<Utc>) -> bool {
        let window = i64::try_from(self.config.staleness_window_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        inner.user_acted && Utc::now() - created_at <= window
    }

    /// Advances the reels by one frame and fires the effects the frame produced.
    pub fn tick(&self, dt: Duration) {
        let (events, finish, dismiss) = {
            let mut inner = self.lock();
            let inner = &mut *inner;
            let events = inner.physics.tick(dt, inner.sink.as_mut());
            let mut finish = None;
            if events.contains(&PhysicsEvent::AllSettled) {
                inner.binding.is_spinning = false;
                match inner.pending_celebration.take() {
                    Some(pending) if pending.celebrate => {
                        let tier = self.config.win_tiers.classify(pending.winnings);
                        finish = Some(if tier == WinTier::Loss {
                            Finish::Loss {
                                spin_id: pending.spin_id,
                                replay: pending.replay,
                            }
                        } else {
                            let celebration = WinCelebration {
                                spin_id: pending.spin_id,
                                amount: pending.winnings,
                                tier,
                                bet_amount: pending.bet_amount,
                                replay: pending.replay,
                            };
                            inner.last_celebration = Some(celebration.clone());
                            Finish::Win(celebration)
                        });
                        inner.phase = DisplayPhase::Celebrating;
                        inner.celebration_deadline =
                            Some(Instant::now() + self.config.celebration_duration());
                    }
                    _ => inner.phase = DisplayPhase::Idle,
                }
            }
            let dismiss = match inner.celebration_deadline {
                Some(deadline) if Instant::now() >= deadline && finish.is_none() => {
                    inner.celebration_deadline = None;
                    inner.phase = DisplayPhase::Idle;
                    true
                }
                _ => false,
            };
            (events, finish, dismiss)
        };

        for event in &events {
            if let PhysicsEvent::ReelStopped(_) = event {
                self.effects.reel_stopped();
            }
        }
        match finish {
            Some(Finish::Win(celebration)) => {
                info!(spin_id = %celebration.spin_id, amount = celebration.amount, tier = ?celebration.tier, "celebrating win");
                self.effects.win(&celebration);
            }
            Some(Finish::Loss { spin_id, replay }) => self.effects.loss(spin_id, replay),
            None => {}
        }
        if dismiss {
            self.effects.dismiss();
        }
    }

    /// Drives [`Self::tick`] at the configured frame rate until the task is dropped.
    pub async fn run_frames(self) {
        let mut ticker = time::interval(self.config.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = Instant::now();
        loop {
            ticker.tick().await;
            let now = Instant::now();
            self.tick(now - last);
            last = now;
        }
    }

    /// Re-reads the queue after every change notification until the queue goes away.
    pub async fn watch_queue(self) {
        let mut changes = self.queue.subscribe();
        loop {
            let _ = changes.borrow_and_update();
            let reaction = self.on_queue_change().await;
            debug!(?reaction, "queue change handled");
            if changes.changed().await.is_err() {
                break;
            }
        }
    }

    /// Forced reset: halts the reels and unbinds the current spin. Its outcome, if it arrives
    /// later, is not applied.
    pub async fn stop_spin(&self) {
        let stopped = {
            let mut inner = self.lock();
            let stopped = inner.binding.current_spin_id.or(inner.binding.replaying);
            inner.release_display();
            stopped
        };
        self.effects.spin_loop_stopped().await;
        if let Some(id) = stopped {
            info!(spin_id = %id, "spin stopped");
        }
    }

    pub fn holds(&self, token: DisplayToken) -> bool {
        self.lock().generation == token.0
    }

    /// Clears the display for a replay of `spin_id` and hands out ownership of it.
    pub async fn take_over_for_replay(&self, spin_id: SpinId) -> DisplayToken {
        let token = {
            let mut inner = self.lock();
            inner.release_display();
            inner.binding.replaying = Some(spin_id);
            DisplayToken(inner.generation)
        };
        self.effects.spin_loop_stopped().await;
        token
    }

    /// Spins the reels for a replay. The landing offsets are already known and passed on as
    /// the spin's targets.
    pub fn replay_spin(&self, token: DisplayToken, outcome: &OutcomeGrid) -> bool {
        {
            let mut inner = self.lock();
            if inner.generation != token.0 {
                return false;
            }
            let Some(strips) = inner.strips.clone() else {
                return false;
            };
            let resolution = resolve(outcome, &strips, &self.blanks);
            inner.physics.start_spin(&resolution.offsets);
            inner.binding.is_spinning = true;
            inner.phase = DisplayPhase::Spinning;
        }
        self.effects.spin_started();
        true
    }

    /// Starts landing a replay on its historical outcome.
    pub fn replay_reveal(
        &self,
        token: DisplayToken,
        spin_id: SpinId,
        outcome: &OutcomeGrid,
        winnings: u64,
        bet_amount: u64,
    ) -> bool {
        let mut inner = self.lock();
        if inner.generation != token.0 {
            return false;
        }
        let Some(strips) = inner.strips.clone() else {
            return false;
        };
        let resolution = resolve(outcome, &strips, &self.blanks);
        inner.physics.decelerate_to(&resolution.offsets);
        inner.pending_celebration = Some(PendingCelebration {
            spin_id,
            winnings,
            bet_amount,
            replay: true,
            celebrate: true,
        });
        inner.phase = DisplayPhase::Decelerating;
        true
    }

    /// True once the reels stopped and the replay's celebration fired.
    pub fn replay_settled(&self, token: DisplayToken) -> bool {
        let inner = self.lock();
        inner.generation == token.0
            && inner.pending_celebration.is_none()
            && !inner.physics.is_moving()
    }

    pub fn finish_replay(&self, token: DisplayToken) {
        let mut inner = self.lock();
        if inner.generation == token.0 {
            inner.binding.replaying = None;
            inner.binding.is_spinning = false;
        }
    }

    pub fn binding(&self) -> DisplayBinding {
        self.lock().binding.clone()
    }

    pub fn phase(&self) -> DisplayPhase {
        self.lock().phase
    }

    pub fn visible_offsets(&self) -> Vec<usize> {
        self.lock().physics.visible_offsets()
    }

    pub fn snapshot(&self) -> DisplaySnapshot {
        let layout = self.layout.state();
        let inner = self.lock();
        DisplaySnapshot {
            phase: inner.phase,
            binding: inner.binding.clone(),
            reels: inner.physics.states(),
            strips: inner.strips.clone(),
            layout,
            last_celebration: inner.last_celebration.clone(),
        }
    }
}

#[cfg(test)]
mod tests;
