//! Terminal renditions of the engine's sound and celebration collaborators, plus the
//! frame sink the renderer reads from.

use chrono::{
    DateTime,
    Local,
};
use reel_engine::{
    effects::{
        CelebrationSink,
        LoopOptions,
        SoundPlayer,
        WinCelebration,
        WinTier,
    },
    error::EffectError,
    physics::{
        FrameSink,
        ReelAnimationState,
    },
    queue::SpinId,
};
use std::{
    collections::VecDeque,
    io::Write,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};

const STATUS_LINES: usize = 6;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusEntry {
    pub at: DateTime<Local>,
    pub text: String,
}

/// Rolling log of recent messages shown in the status panel.
#[derive(Clone, Default)]
pub struct StatusLine {
    entries: Arc<Mutex<VecDeque<StatusEntry>>>,
}

impl StatusLine {
    fn lock(&self) -> MutexGuard<'_, VecDeque<StatusEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, text: impl Into<String>) {
        let mut entries = self.lock();
        entries.push_back(StatusEntry {
            at: Local::now(),
            text: text.into(),
        });
        while entries.len() > STATUS_LINES {
            entries.pop_front();
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|entry| format!("{} {}", entry.at.format("%H:%M:%S"), entry.text))
            .collect()
    }

    pub fn latest(&self) -> Option<String> {
        self.lock().back().map(|entry| entry.text.clone())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Celebration {
    pub spin_id: Option<SpinId>,
    pub amount: u64,
    pub tier: Option<WinTier>,
    pub replay: bool,
}

/// Shared view of the banner currently on screen.
#[derive(Clone, Default)]
pub struct Banner {
    current: Arc<Mutex<Option<Celebration>>>,
}

impl Banner {
    fn set(&self, banner: Option<Celebration>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = banner;
    }

    pub fn current(&self) -> Option<Celebration> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Sound player for a terminal: cues become status lines, stops and wins may ring the bell.
#[derive(Clone)]
pub struct TerminalSound {
    status: StatusLine,
    bell: bool,
}

impl TerminalSound {
    pub fn new(status: StatusLine, bell: bool) -> Self {
        Self { status, bell }
    }

    fn ring(&self) -> Result<(), EffectError> {
        if !self.bell {
            return Ok(());
        }
        let mut out = std::io::stdout();
        out.write_all(b"\x07")
            .and_then(|_| out.flush())
            .map_err(|err| EffectError(err.to_string()))
    }
}

impl SoundPlayer for TerminalSound {
    fn play_spin_start(&self) -> Result<(), EffectError> {
        Ok(())
    }

    fn play_reel_stop(&self) -> Result<(), EffectError> {
        self.ring()
    }

    fn play_win_sound(&self, tier: WinTier) -> Result<(), EffectError> {
        if tier >= WinTier::Large {
            self.status.push(format!("♪ {tier:?} win fanfare"));
        }
        self.ring()
    }

    fn play_loss(&self) -> Result<(), EffectError> {
        Ok(())
    }

    fn play_looping_sound(&self, _name: &str, _opts: &LoopOptions) -> Result<(), EffectError> {
        Ok(())
    }

    async fn stop_looping_sound(
        &self,
        _name: &str,
        _opts: &LoopOptions,
    ) -> Result<(), EffectError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct TerminalCelebration {
    status: StatusLine,
    banner: Banner,
}

impl TerminalCelebration {
    pub fn new(status: StatusLine, banner: Banner) -> Self {
        Self { status, banner }
    }
}

impl CelebrationSink for TerminalCelebration {
    fn celebrate_win(&self, celebration: &WinCelebration) -> Result<(), EffectError> {
        let prefix = if celebration.replay { "Replay: " } else { "" };
        self.status.push(format!(
            "{prefix}spin {} won {} ({:?})",
            celebration.spin_id,
            format_amount(celebration.amount),
            celebration.tier
        ));
        self.banner.set(Some(Celebration {
            spin_id: Some(celebration.spin_id),
            amount: celebration.amount,
            tier: Some(celebration.tier),
            replay: celebration.replay,
        }));
        Ok(())
    }

    fn show_loss(&self, spin_id: SpinId, replay: bool) -> Result<(), EffectError> {
        let prefix = if replay { "Replay: " } else { "" };
        self.status.push(format!("{prefix}spin {spin_id} - no win"));
        Ok(())
    }

    fn dismiss(&self) -> Result<(), EffectError> {
        self.banner.set(None);
        Ok(())
    }
}

/// Latest reel states, written by the frame loop and read by the renderer.
#[derive(Clone, Default)]
pub struct LatestFrame {
    reels: Arc<Mutex<Vec<ReelAnimationState>>>,
}

impl LatestFrame {
    pub fn sink(&self) -> impl FrameSink + Send + 'static {
        let reels = self.reels.clone();
        move |frame: &[ReelAnimationState]| {
            let mut reels = reels.lock().unwrap_or_else(PoisonError::into_inner);
            reels.clear();
            reels.extend_from_slice(frame);
        }
    }

    pub fn get(&self) -> Vec<ReelAnimationState> {
        self.reels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Formats base units (six decimals) as a whole-unit amount.
pub fn format_amount(amount: u64) -> String {
    const ONE_UNIT: u64 = 1_000_000;
    let whole = amount / ONE_UNIT;
    let fractional = amount % ONE_UNIT;
    if fractional == 0 {
        format!("{}", whole)
    } else {
        format!(
            "{}.{}",
            whole,
            format!("{:06}", fractional).trim_end_matches('0')
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use reel_engine::physics::EasingPhase;

    #[test]
    fn status_line__keeps_only_recent_entries() {
        // given
        let status = StatusLine::default();

        // when
        for i in 0..10 {
            status.push(format!("message {i}"));
        }

        // then
        let lines = status.lines();
        assert_eq!(lines.len(), STATUS_LINES);
        assert!(lines[0].ends_with("message 4"));
        assert_eq!(status.latest().as_deref(), Some("message 9"));
    }

    #[test]
    fn celebration__win_sets_banner_until_dismissed() {
        // given
        let status = StatusLine::default();
        let banner = Banner::default();
        let sink = TerminalCelebration::new(status.clone(), banner.clone());
        let win = WinCelebration {
            spin_id: SpinId(3),
            amount: 60_000_000,
            tier: WinTier::Large,
            bet_amount: 5_000_000,
            replay: false,
        };

        // when
        sink.celebrate_win(&win).unwrap();
        let shown = banner.current();
        sink.dismiss().unwrap();

        // then
        assert_eq!(shown.unwrap().amount, 60_000_000);
        assert_eq!(banner.current(), None);
        assert_eq!(status.latest().as_deref(), Some("spin #3 won 60 (Large)"));
    }

    #[test]
    fn latest_frame__sink_replaces_previous_frame() {
        // given
        let latest = LatestFrame::default();
        let mut sink = latest.sink();
        let reel = ReelAnimationState {
            position: 4.5,
            velocity: 12.0,
            phase: EasingPhase::Constant,
        };

        // when
        sink.on_frame(&[reel; 5]);
        sink.on_frame(&[reel; 3]);

        // then
        assert_eq!(latest.get().len(), 3);
    }

    #[test]
    fn format_amount__trims_trailing_zeros() {
        assert_eq!(format_amount(5_000_000), "5");
        assert_eq!(format_amount(1_500_000), "1.5");
        assert_eq!(format_amount(250), "0.00025");
    }
}
