//! Per-reel motion simulation.
//!
//! Positions are measured in symbol heights along an extended strip made of several copies
//! of the physical strip. A reel idles inside the first full copy at or above the lower
//! buffer (`base`), spins by advancing and silently wrapping by one strip length, and lands
//! on `base + offset + k * len` so the visible window matches the strip offset exactly.
//! The engine owns no rendering state; each frame is handed to a [`FrameSink`].

use serde::{
    Deserialize,
    Serialize,
};
use std::time::Duration;

use crate::symbols::WINDOW;

/// Cruise speed multipliers cycled across reels so neighbouring reels do not move in lockstep.
const SPIN_PATTERN: [f64; 5] = [1.0, 0.92, 0.97, 0.9, 0.95];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Upper bound on reel speed, in symbols per second.
    pub max_velocity: f64,
    /// Spin-up rate, in symbols per second squared.
    pub acceleration: f64,
    /// Empty symbols kept below the lowest and above the highest reachable position.
    pub buffer_symbols: f64,
    /// Minimum travel between the start of a deceleration and the landing point.
    pub min_stop_distance: f64,
    pub start_stagger_ms: u64,
    pub stop_stagger_ms: u64,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            max_velocity: 40.0,
            acceleration: 90.0,
            buffer_symbols: 3.0,
            min_stop_distance: 12.0,
            start_stagger_ms: 90,
            stop_stagger_ms: 220,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EasingPhase {
    Idle,
    Acceleration,
    Constant,
    OutcomeDeceleration,
    Settled,
}

impl EasingPhase {
    pub fn is_moving(self) -> bool {
        matches!(
            self,
            EasingPhase::Acceleration | EasingPhase::Constant | EasingPhase::OutcomeDeceleration
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReelAnimationState {
    pub position: f64,
    pub velocity: f64,
    pub phase: EasingPhase,
}

/// Receives the per-reel state once per animation frame.
pub trait FrameSink {
    fn on_frame(&mut self, reels: &[ReelAnimationState]);
}

impl<F> FrameSink for F
where
    F: FnMut(&[ReelAnimationState]),
{
    fn on_frame(&mut self, reels: &[ReelAnimationState]) {
        self(reels)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhysicsEvent {
    ReelStopped(usize),
    AllSettled,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct ReelGeometry {
    len: f64,
    base: f64,
    max_allowed: f64,
    extended_len: f64,
}

impl ReelGeometry {
    fn new(strip_len: usize, config: &PhysicsConfig) -> Self {
        let len = strip_len.max(1) as f64;
        let buffer = config.buffer_symbols.max(0.0);
        let base = (buffer / len).ceil().max(1.0) * len;
        let stop_loops = (config.min_stop_distance.max(0.0) / len).ceil();
        let max_allowed = base + len * (3.0 + stop_loops);
        Self {
            len,
            base,
            max_allowed,
            extended_len: max_allowed + WINDOW as f64 + buffer,
        }
    }

    fn clamp(&self, position: f64) -> f64 {
        position.clamp(self.base, self.max_allowed)
    }

    /// Equivalent position inside the first copy of the strip.
    fn normalize(&self, position: f64) -> f64 {
        self.clamp(self.base + (position - self.base).rem_euclid(self.len))
    }

    fn rest_position(&self, offset: usize) -> f64 {
        self.base + (offset as f64).rem_euclid(self.len)
    }

    /// First landing point for `offset` at least `min_distance` ahead of `position`.
    fn landing(&self, position: f64, offset: usize, min_distance: f64) -> f64 {
        let mut target = self.rest_position(offset);
        while target - position < min_distance && target < self.max_allowed {
            target += self.len;
        }
        self.clamp(target)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Deceleration {
    from: f64,
    distance: f64,
    initial_velocity: f64,
    duration: f64,
    elapsed: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct PendingStop {
    offset: usize,
    delay: f64,
}

#[derive(Clone, Debug)]
struct ReelSim {
    geometry: ReelGeometry,
    state: ReelAnimationState,
    cruise_velocity: f64,
    start_delay: f64,
    pending_stop: Option<PendingStop>,
    deceleration: Option<Deceleration>,
    provisional_target: Option<usize>,
}

impl ReelSim {
    fn new(strip_len: usize, config: &PhysicsConfig) -> Self {
        let geometry = ReelGeometry::new(strip_len, config);
        Self {
            state: ReelAnimationState {
                position: geometry.base,
                velocity: 0.0,
                phase: EasingPhase::Idle,
            },
            geometry,
            cruise_velocity: 0.0,
            start_delay: 0.0,
            pending_stop: None,
            deceleration: None,
            provisional_target: None,
        }
    }

    fn advance(&mut self, distance: f64) {
        let g = self.geometry;
        let mut position = self.state.position + distance;
        while position >= g.base + g.len {
            position -= g.len;
        }
        self.state.position = g.clamp(position);
    }

    fn begin_deceleration(&mut self, offset: usize, config: &PhysicsConfig) {
        let g = self.geometry;
        let from = g.clamp(self.state.position);
        let target = g.landing(from, offset, config.min_stop_distance);
        let distance = target - from;
        if distance <= f64::EPSILON {
            self.deceleration = Some(Deceleration {
                from,
                distance: 0.0,
                initial_velocity: 0.0,
                duration: 0.0,
                elapsed: 0.0,
            });
        } else {
            let initial_velocity = self
                .state
                .velocity
                .max(self.cruise_velocity * 0.5)
                .max(config.max_velocity * 0.25)
                .min(config.max_velocity);
            self.deceleration = Some(Deceleration {
                from,
                distance,
                initial_velocity,
                duration: 2.0 * distance / initial_velocity,
                elapsed: 0.0,
            });
        }
        self.state.phase = EasingPhase::OutcomeDeceleration;
    }

    /// Advances one frame; returns true when the reel settled during this step.
    fn step(&mut self, dt: f64, config: &PhysicsConfig) -> bool {
        if let Some(mut stop) = self.pending_stop {
            stop.delay -= dt;
            if stop.delay <= 0.0 {
                self.pending_stop = None;
                self.begin_deceleration(stop.offset, config);
            } else {
                self.pending_stop = Some(stop);
            }
        }

        match self.state.phase {
            EasingPhase::Idle | EasingPhase::Settled => false,
            EasingPhase::Acceleration => {
                if self.start_delay > 0.0 {
                    self.start_delay -= dt;
                    return false;
                }
                let velocity = (self.state.velocity + config.acceleration * dt)
                    .min(self.cruise_velocity);
                self.state.velocity = velocity;
                self.advance(velocity * dt);
                if velocity >= self.cruise_velocity {
                    self.state.phase = EasingPhase::Constant;
                }
                false
            }
            EasingPhase::Constant => {
                self.advance(self.state.velocity * dt);
                false
            }
            EasingPhase::OutcomeDeceleration => {
                let Some(mut decel) = self.deceleration else {
                    self.state.phase = EasingPhase::Settled;
                    self.state.velocity = 0.0;
                    return true;
                };
                decel.elapsed += dt;
                if decel.elapsed >= decel.duration {
                    self.state.position = self.geometry.clamp(decel.from + decel.distance);
                    self.state.velocity = 0.0;
                    self.state.phase = EasingPhase::Settled;
                    self.deceleration = None;
                    return true;
                }
                let progress = decel.elapsed / decel.duration;
                let eased = 1.0 - (1.0 - progress) * (1.0 - progress);
                self.state.position = self.geometry.clamp(decel.from + decel.distance * eased);
                self.state.velocity = decel.initial_velocity * (1.0 - progress);
                self.deceleration = Some(decel);
                false
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct PhysicsEngine {
    config: PhysicsConfig,
    reels: Vec<ReelSim>,
    report_pending: bool,
    settle_pending: bool,
}

impl PhysicsEngine {
    pub fn new(config: PhysicsConfig) -> Self {
        Self {
            config,
            reels: Vec::new(),
            report_pending: false,
            settle_pending: false,
        }
    }

    /// Resets every reel to idle at offset zero of a strip of the given length.
    pub fn initialize_reels(&mut self, strip_lengths: &[usize]) {
        self.reels = strip_lengths
            .iter()
            .map(|len| ReelSim::new(*len, &self.config))
            .collect();
        self.report_pending = true;
        self.settle_pending = false;
    }

    pub fn reel_count(&self) -> usize {
        self.reels.len()
    }

    /// Inclusive range every reported position of `reel` stays within, `None` for an unknown reel.
    pub fn bounds(&self, reel: usize) -> Option<(f64, f64)> {
        self.reels
            .get(reel)
            .map(|r| (r.geometry.base, r.geometry.max_allowed))
    }

    pub fn extended_len(&self, reel: usize) -> Option<f64> {
        self.reels.get(reel).map(|r| r.geometry.extended_len)
    }

    /// Starts every reel spinning. The targets are remembered but not steered towards;
    /// the real landing point arrives later through [`PhysicsEngine::decelerate_to`].
    pub fn start_spin(&mut self, target_positions: &[usize]) {
        let start_stagger = self.config.start_stagger_ms as f64 / 1000.0;
        let max_velocity = self.config.max_velocity;
        for (i, reel) in self.reels.iter_mut().enumerate() {
            reel.state.position = reel.geometry.normalize(reel.state.position);
            reel.state.phase = EasingPhase::Acceleration;
            reel.cruise_velocity = max_velocity * SPIN_PATTERN[i % SPIN_PATTERN.len()];
            reel.start_delay = start_stagger * i as f64;
            reel.pending_stop = None;
            reel.deceleration = None;
            reel.provisional_target = target_positions.get(i).copied();
        }
        self.report_pending = true;
        self.settle_pending = false;
    }

    /// Schedules each reel to ease onto the given strip offset, one reel after another.
    pub fn decelerate_to(&mut self, offsets: &[usize]) {
        let stop_stagger = self.config.stop_stagger_ms as f64 / 1000.0;
        for (i, reel) in self.reels.iter_mut().enumerate() {
            let offset = offsets.get(i).copied().unwrap_or(0);
            reel.provisional_target = Some(offset);
            reel.pending_stop = Some(PendingStop {
                offset,
                delay: stop_stagger * i as f64,
            });
            if reel.state.phase == EasingPhase::Idle || reel.state.phase == EasingPhase::Settled {
                reel.state.phase = EasingPhase::Constant;
            }
        }
        self.report_pending = true;
        self.settle_pending = true;
    }

    /// Places every reel on its offset without animation.
    pub fn snap_to(&mut self, offsets: &[usize]) {
        for (i, reel) in self.reels.iter_mut().enumerate() {
            let offset = offsets.get(i).copied().unwrap_or(0);
            reel.state = ReelAnimationState {
                position: reel.geometry.rest_position(offset),
                velocity: 0.0,
                phase: EasingPhase::Settled,
            };
            reel.pending_stop = None;
            reel.deceleration = None;
            reel.provisional_target = Some(offset);
        }
        self.report_pending = true;
        self.settle_pending = false;
    }

    /// Halts every reel where it is. One final idle frame is reported, then nothing until
    /// the next spin.
    pub fn stop_all_reels(&mut self) {
        for reel in &mut self.reels {
            reel.state.position = reel.geometry.normalize(reel.state.position);
            reel.state.velocity = 0.0;
            reel.state.phase = EasingPhase::Idle;
            reel.pending_stop = None;
            reel.deceleration = None;
        }
        self.report_pending = true;
        self.settle_pending = false;
    }

    pub fn tick(&mut self, dt: Duration, sink: &mut dyn FrameSink) -> Vec<PhysicsEvent> {
        let dt = dt.as_secs_f64();
        let mut events = Vec::new();
        let was_moving = self.is_moving();
        for (i, reel) in self.reels.iter_mut().enumerate() {
            if reel.step(dt, &self.config) {
                events.push(PhysicsEvent::ReelStopped(i));
            }
        }
        if was_moving || self.report_pending || self.is_moving() {
            sink.on_frame(&self.states());
            self.report_pending = false;
        }
        if self.settle_pending && self.is_settled() {
            self.settle_pending = false;
            events.push(PhysicsEvent::AllSettled);
        }
        events
    }

    pub fn states(&self) -> Vec<ReelAnimationState> {
        self.reels.iter().map(|reel| reel.state).collect()
    }

    pub fn is_moving(&self) -> bool {
        self.reels.iter().any(|reel| {
            reel.state.phase.is_moving() || reel.pending_stop.is_some()
        })
    }

    pub fn is_settled(&self) -> bool {
        !self.reels.is_empty()
            && self
                .reels
                .iter()
                .all(|reel| reel.state.phase == EasingPhase::Settled)
    }

    /// Strip offset of the symbol currently at the top of each reel's window.
    pub fn visible_offsets(&self) -> Vec<usize> {
        self.reels
            .iter()
            .map(|reel| {
                let g = reel.geometry;
                let relative = (reel.state.position - g.base).floor().rem_euclid(g.len);
                relative as usize
            })
            .collect()
    }

    pub fn provisional_targets(&self) -> Vec<Option<usize>> {
        self.reels.iter().map(|reel| reel.provisional_target).collect()
    }
}
