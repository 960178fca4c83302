use crate::{
    error::EffectError,
    queue::SpinId,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinTier {
    Loss,
    Small,
    Medium,
    Large,
    Jackpot,
}

/// Lower bounds (inclusive, base currency units) of the celebration tiers above `Small`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WinTierThresholds {
    pub medium: u64,
    pub large: u64,
    pub jackpot: u64,
}

impl Default for WinTierThresholds {
    fn default() -> Self {
        Self {
            medium: 10_000_000,
            large: 50_000_000,
            jackpot: 1_000_000_000,
        }
    }
}

impl WinTierThresholds {
    pub fn classify(&self, winnings: u64) -> WinTier {
        match winnings {
            0 => WinTier::Loss,
            w if w >= self.jackpot => WinTier::Jackpot,
            w if w >= self.large => WinTier::Large,
            w if w >= self.medium => WinTier::Medium,
            _ => WinTier::Small,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoopOptions {
    pub volume: f32,
    pub fade_ms: u64,
}

/// Sound playback. Everything except stopping a loop is fire-and-forget.
pub trait SoundPlayer {
    fn play_spin_start(&self) -> Result<(), EffectError>;
    fn play_reel_stop(&self) -> Result<(), EffectError>;
    fn play_win_sound(&self, tier: WinTier) -> Result<(), EffectError>;
    fn play_loss(&self) -> Result<(), EffectError>;
    fn play_looping_sound(&self, name: &str, opts: &LoopOptions) -> Result<(), EffectError>;
    /// Resolves once the loop has fully stopped.
    fn stop_looping_sound(
        &self,
        name: &str,
        opts: &LoopOptions,
    ) -> impl Future<Output = Result<(), EffectError>> + Send;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WinCelebration {
    pub spin_id: SpinId,
    pub amount: u64,
    pub tier: WinTier,
    pub bet_amount: u64,
    pub replay: bool,
}

/// Visual win/loss presentation.
pub trait CelebrationSink {
    fn celebrate_win(&self, celebration: &WinCelebration) -> Result<(), EffectError>;
    fn show_loss(&self, spin_id: SpinId, replay: bool) -> Result<(), EffectError>;
    fn dismiss(&self) -> Result<(), EffectError>;
}

/// Wraps the collaborators so their failures are logged and dropped.
pub struct Effects<S, C> {
    sound: S,
    celebration: C,
    spin_loop: String,
    loop_options: LoopOptions,
}

impl<S, C> Effects<S, C>
where
    S: SoundPlayer,
    C: CelebrationSink,
{
    pub fn new(sound: S, celebration: C, spin_loop: impl Into<String>) -> Self {
        Self {
            sound,
            celebration,
            spin_loop: spin_loop.into(),
            loop_options: LoopOptions {
                volume: 0.6,
                fade_ms: 120,
            },
        }
    }

    pub fn sound(&self) -> &S {
        &self.sound
    }

    pub fn celebration(&self) -> &C {
        &self.celebration
    }

    pub fn spin_started(&self) {
        swallow("spin start sound", self.sound.play_spin_start());
        swallow(
            "spin loop",
            self.sound
                .play_looping_sound(&self.spin_loop, &self.loop_options),
        );
    }

    /// Waits for the spin loop to fall silent.
    pub async fn spin_loop_stopped(&self) {
        let result = self
            .sound
            .stop_looping_sound(&self.spin_loop, &self.loop_options)
            .await;
        swallow("stop spin loop", result);
    }

    pub fn reel_stopped(&self) {
        swallow("reel stop sound", self.sound.play_reel_stop());
    }

    pub fn win(&self, celebration: &WinCelebration) {
        swallow("win sound", self.sound.play_win_sound(celebration.tier));
        swallow("win celebration", self.celebration.celebrate_win(celebration));
    }

    pub fn loss(&self, spin_id: SpinId, replay: bool) {
        swallow("loss sound", self.sound.play_loss());
        swallow("loss display", self.celebration.show_loss(spin_id, replay));
    }

    pub fn dismiss(&self) {
        swallow("dismiss celebration", self.celebration.dismiss());
    }
}

fn swallow(what: &str, result: Result<(), EffectError>) {
    if let Err(err) = result {
        debug!(%err, "{what} failed");
    }
}
