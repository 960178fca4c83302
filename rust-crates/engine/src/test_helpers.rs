//! Scripted collaborators for exercising the engine without a settlement backend,
//! speakers or a screen.

use crate::{
    Result,
    config::EngineConfig,
    coordinator::SpinDisplayCoordinator,
    effects::{
        CelebrationSink,
        LoopOptions,
        SoundPlayer,
        WinCelebration,
        WinTier,
    },
    error::{
        EffectError,
        LayoutError,
    },
    layout::ReelLayoutSource,
    physics::{
        FrameSink,
        ReelAnimationState,
    },
    processor::QueueProcessor,
    queue::{
        SpinId,
        SpinQueue,
    },
    settlement::{
        PollStatus,
        SettlementAuthority,
        SettlementError,
        SpinSubmission,
        TransactionRef,
    },
    symbols::OutcomeGrid,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        atomic::{
            AtomicBool,
            AtomicUsize,
            Ordering,
        },
    },
    time::Duration,
};
use tokio::task::JoinHandle;

/// Five rotations of one 20-symbol strip. Every reel contains the window `ABC`.
pub fn test_strips() -> Vec<String> {
    let base = "ABCD_BCDA_CDAB_DABC_";
    (0..5)
        .map(|i| {
            let (head, tail) = base.split_at(i * 3);
            format!("{tail}{head}")
        })
        .collect()
}

pub fn grid(raw: &str) -> OutcomeGrid {
    OutcomeGrid::parse(raw).unwrap()
}

/// Engine config with short timeouts so tests run through whole lifecycles quickly.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.processor.poll_interval_ms = 100;
    config.processor.request_timeout_ms = 1_000;
    config.processor.submit_timeout_ms = 2_000;
    config.processor.result_timeout_ms = 5_000;
    config.processor.initial_backoff_ms = 50;
    config.processor.max_backoff_ms = 400;
    config.replay.cleanup_ms = 50;
    config.replay.hold_ms = 300;
    config.replay.celebration_ms = 500;
    config.display.celebration_ms = 500;
    config
}

#[derive(Clone)]
pub struct FlakyLayout {
    strips: Vec<String>,
    available: Arc<AtomicBool>,
    fetches: Arc<AtomicUsize>,
}

impl FlakyLayout {
    pub fn available(strips: Vec<String>) -> Self {
        Self {
            strips,
            available: Arc::new(AtomicBool::new(true)),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unavailable(strips: Vec<String>) -> Self {
        let layout = Self::available(strips);
        layout.set_available(false);
        layout
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl ReelLayoutSource for FlakyLayout {
    async fn reel_strips(&self) -> Result<Vec<String>, LayoutError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.available.load(Ordering::SeqCst) {
            Ok(self.strips.clone())
        } else {
            Err(LayoutError::Fetch("layout service offline".to_string()))
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SoundCue {
    SpinStart,
    ReelStop,
    Win(WinTier),
    Loss,
    LoopStarted(String),
    LoopStopped(String),
}

#[derive(Clone, Default)]
pub struct RecordingSoundPlayer {
    cues: Arc<Mutex<Vec<SoundCue>>>,
    failing: bool,
}

impl RecordingSoundPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every cue but reports each one as failed.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn cues(&self) -> Vec<SoundCue> {
        self.cues.lock().unwrap().clone()
    }

    pub fn count(&self, cue: &SoundCue) -> usize {
        self.cues().iter().filter(|c| *c == cue).count()
    }

    fn record(&self, cue: SoundCue) -> Result<(), EffectError> {
        self.cues.lock().unwrap().push(cue);
        if self.failing {
            Err(EffectError("no audio device".to_string()))
        } else {
            Ok(())
        }
    }
}

impl SoundPlayer for RecordingSoundPlayer {
    fn play_spin_start(&self) -> Result<(), EffectError> {
        self.record(SoundCue::SpinStart)
    }

    fn play_reel_stop(&self) -> Result<(), EffectError> {
        self.record(SoundCue::ReelStop)
    }

    fn play_win_sound(&self, tier: WinTier) -> Result<(), EffectError> {
        self.record(SoundCue::Win(tier))
    }

    fn play_loss(&self) -> Result<(), EffectError> {
        self.record(SoundCue::Loss)
    }

    fn play_looping_sound(&self, name: &str, _opts: &LoopOptions) -> Result<(), EffectError> {
        self.record(SoundCue::LoopStarted(name.to_string()))
    }

    async fn stop_looping_sound(&self, name: &str, _opts: &LoopOptions) -> Result<(), EffectError> {
        tokio::task::yield_now().await;
        self.record(SoundCue::LoopStopped(name.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CelebrationEvent {
    Win(WinCelebration),
    Loss { spin_id: SpinId, replay: bool },
    Dismissed,
}

#[derive(Clone, Default)]
pub struct RecordingCelebrations {
    events: Arc<Mutex<Vec<CelebrationEvent>>>,
}

impl RecordingCelebrations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CelebrationEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn wins(&self) -> Vec<WinCelebration> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                CelebrationEvent::Win(win) => Some(win),
                _ => None,
            })
            .collect()
    }

    pub fn losses(&self) -> Vec<SpinId> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                CelebrationEvent::Loss { spin_id, .. } => Some(spin_id),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: CelebrationEvent) -> Result<(), EffectError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

impl CelebrationSink for RecordingCelebrations {
    fn celebrate_win(&self, celebration: &WinCelebration) -> Result<(), EffectError> {
        self.push(CelebrationEvent::Win(celebration.clone()))
    }

    fn show_loss(&self, spin_id: SpinId, replay: bool) -> Result<(), EffectError> {
        self.push(CelebrationEvent::Loss { spin_id, replay })
    }

    fn dismiss(&self) -> Result<(), EffectError> {
        self.push(CelebrationEvent::Dismissed)
    }
}

#[derive(Clone, Default)]
pub struct FrameRecorder {
    frames: Arc<Mutex<Vec<Vec<ReelAnimationState>>>>,
}

impl FrameRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Vec<ReelAnimationState>> {
        self.frames.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameSink for FrameRecorder {
    fn on_frame(&mut self, reels: &[ReelAnimationState]) {
        self.frames.lock().unwrap().push(reels.to_vec());
    }
}

#[derive(Clone, Debug, Default)]
struct ScriptedSpin {
    result: Option<(OutcomeGrid, u64)>,
    rejection: Option<String>,
    confirmed: bool,
}

#[derive(Debug, Default)]
struct ScriptState {
    spins: HashMap<SpinId, ScriptedSpin>,
    reject_submissions: bool,
    failing_submissions: u32,
    failing_polls: u32,
    hang_polls: bool,
    submissions: Vec<SpinId>,
    polls: usize,
    claims: Vec<TransactionRef>,
}

/// Settlement authority whose answers are set by the test. Results stay hidden until
/// [`ScriptedSettlement::resolve`] is called for a spin.
#[derive(Clone, Default)]
pub struct ScriptedSettlement {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedSettlement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction_for(id: SpinId) -> TransactionRef {
        TransactionRef::new(format!("tx-{}", id.0))
    }

    fn spin_of(transaction: &TransactionRef) -> Option<SpinId> {
        transaction
            .as_str()
            .strip_prefix("tx-")
            .and_then(|raw| raw.parse().ok())
            .map(SpinId)
    }

    pub fn resolve(&self, id: SpinId, outcome: OutcomeGrid, winnings: u64) {
        let mut state = self.state.lock().unwrap();
        state.spins.entry(id).or_default().result = Some((outcome, winnings));
    }

    pub fn reject(&self, id: SpinId, reason: &str) {
        let mut state = self.state.lock().unwrap();
        state.spins.entry(id).or_default().rejection = Some(reason.to_string());
    }

    pub fn reject_submissions(&self) {
        self.state.lock().unwrap().reject_submissions = true;
    }

    pub fn fail_next_submissions(&self, count: u32) {
        self.state.lock().unwrap().failing_submissions = count;
    }

    pub fn fail_next_polls(&self, count: u32) {
        self.state.lock().unwrap().failing_polls = count;
    }

    /// Polls never answer.
    pub fn hang_polls(&self) {
        self.state.lock().unwrap().hang_polls = true;
    }

    pub fn submissions(&self) -> Vec<SpinId> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn polls(&self) -> usize {
        self.state.lock().unwrap().polls
    }

    pub fn claims(&self) -> Vec<TransactionRef> {
        self.state.lock().unwrap().claims.clone()
    }
}

impl SettlementAuthority for ScriptedSettlement {
    async fn submit_spin(
        &self,
        submission: &SpinSubmission,
    ) -> Result<TransactionRef, SettlementError> {
        let mut state = self.state.lock().unwrap();
        state.submissions.push(submission.spin_id);
        if state.failing_submissions > 0 {
            state.failing_submissions -= 1;
            return Err(SettlementError::Transient("connection reset".to_string()));
        }
        if state.reject_submissions {
            return Err(SettlementError::Rejected("insufficient balance".to_string()));
        }
        if let Some(reason) = state
            .spins
            .get(&submission.spin_id)
            .and_then(|spin| spin.rejection.clone())
        {
            return Err(SettlementError::Rejected(reason));
        }
        state.spins.entry(submission.spin_id).or_default();
        Ok(Self::transaction_for(submission.spin_id))
    }

    async fn poll_outcome(
        &self,
        transaction: &TransactionRef,
    ) -> Result<PollStatus, SettlementError> {
        let hang = self.state.lock().unwrap().hang_polls;
        if hang {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        state.polls += 1;
        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(SettlementError::Transient("gateway timeout".to_string()));
        }
        let spin = Self::spin_of(transaction).and_then(|id| state.spins.get_mut(&id));
        let Some(spin) = spin else {
            return Err(SettlementError::UnknownTransaction(transaction.clone()));
        };
        if let Some(reason) = &spin.rejection {
            return Err(SettlementError::Rejected(reason.clone()));
        }
        if let Some((outcome, winnings)) = spin.result {
            return Ok(PollStatus::ResultAvailable { outcome, winnings });
        }
        if spin.confirmed {
            Ok(PollStatus::Confirmed)
        } else {
            spin.confirmed = true;
            Ok(PollStatus::Pending)
        }
    }

    async fn claim_spin(&self, transaction: &TransactionRef) -> Result<u64, SettlementError> {
        let mut state = self.state.lock().unwrap();
        let winnings = Self::spin_of(transaction)
            .and_then(|id| state.spins.get(&id))
            .and_then(|spin| spin.result)
            .map(|(_, winnings)| winnings);
        match winnings {
            Some(winnings) => {
                state.claims.push(transaction.clone());
                Ok(winnings)
            }
            None => Err(SettlementError::Transient("spin not settled yet".to_string())),
        }
    }
}

pub type TestCoordinator =
    SpinDisplayCoordinator<FlakyLayout, RecordingSoundPlayer, RecordingCelebrations>;

/// A fully wired engine backed by scripted collaborators.
pub struct SpinHarness {
    pub queue: SpinQueue,
    pub settlement: ScriptedSettlement,
    pub layout: FlakyLayout,
    pub sounds: RecordingSoundPlayer,
    pub celebrations: RecordingCelebrations,
    pub frames: FrameRecorder,
    pub coordinator: TestCoordinator,
    pub processor: QueueProcessor<ScriptedSettlement>,
    pub config: EngineConfig,
    tasks: Vec<JoinHandle<()>>,
}

pub struct SpinHarnessBuilder {
    queue: SpinQueue,
    layout: FlakyLayout,
    sounds: RecordingSoundPlayer,
    config: EngineConfig,
}

impl SpinHarnessBuilder {
    pub fn queue(mut self, queue: SpinQueue) -> Self {
        self.queue = queue;
        self
    }

    pub fn layout(mut self, layout: FlakyLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn sounds(mut self, sounds: RecordingSoundPlayer) -> Self {
        self.sounds = sounds;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> SpinHarness {
        let settlement = ScriptedSettlement::new();
        let celebrations = RecordingCelebrations::new();
        let frames = FrameRecorder::new();
        let coordinator = SpinDisplayCoordinator::new(
            self.queue.clone(),
            self.layout.clone(),
            self.sounds.clone(),
            celebrations.clone(),
            &self.config,
            frames.clone(),
        );
        let processor = QueueProcessor::new(
            self.queue.clone(),
            settlement.clone(),
            self.config.processor.clone(),
        );
        SpinHarness {
            queue: self.queue,
            settlement,
            layout: self.layout,
            sounds: self.sounds,
            celebrations,
            frames,
            coordinator,
            processor,
            config: self.config,
            tasks: Vec::new(),
        }
    }
}

impl SpinHarness {
    pub fn builder() -> SpinHarnessBuilder {
        SpinHarnessBuilder {
            queue: SpinQueue::in_memory(),
            layout: FlakyLayout::available(test_strips()),
            sounds: RecordingSoundPlayer::new(),
            config: test_config(),
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Mounts the display and starts the processor plus the frame and queue loops.
    pub async fn start(&mut self) -> Result<()> {
        let mounted = self.coordinator.mount().await;
        self.processor.start();
        self.tasks
            .push(tokio::spawn(self.coordinator.clone().run_frames()));
        self.tasks
            .push(tokio::spawn(self.coordinator.clone().watch_queue()));
        mounted
    }

    /// Starts only the frame and queue loops; settlement is driven by hand.
    pub async fn start_display(&mut self) -> Result<()> {
        let mounted = self.coordinator.mount().await;
        self.tasks
            .push(tokio::spawn(self.coordinator.clone().run_frames()));
        self.tasks
            .push(tokio::spawn(self.coordinator.clone().watch_queue()));
        mounted
    }

    /// Lets time pass in steps until `condition` holds. Panics after a minute of test time.
    pub async fn wait_until(&self, what: &str, condition: impl Fn(&Self) -> bool) {
        for _ in 0..6_000 {
            if condition(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    /// Lets the given amount of test time pass.
    pub async fn settle(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

impl Default for SpinHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SpinHarness {
    fn drop(&mut self) {
        self.processor.shutdown();
        for task in &self.tasks {
            task.abort();
        }
    }
}
