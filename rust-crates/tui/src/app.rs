use crate::{
    effects::{
        Banner,
        Celebration,
        LatestFrame,
        StatusLine,
        TerminalCelebration,
        TerminalSound,
        format_amount,
    },
    gateway::Gateway,
    ui,
};
use chrono::Utc;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use reel_engine::{
    config::EngineConfig,
    coordinator::{
        DisplayBinding,
        DisplayPhase,
        SpinDisplayCoordinator,
    },
    layout::LayoutState,
    physics::ReelAnimationState,
    processor::QueueProcessor,
    queue::{
        RetentionPolicy,
        SpinId,
        SpinQueue,
        SpinRequest,
        sled_storage::SledSpinStorage,
    },
    replay::{
        ReplayController,
        ReplayOutcome,
        ReplayPhase,
    },
    symbols::{
        ReelStrips,
        Symbol,
        WINDOW,
    },
};
use slot_settlement::{
    http_client::HttpSettlementClient,
    machine::{
        MAX_BET,
        Machine,
        PAYLINE_COUNT,
    },
    simulated::{
        SimulatedSettlement,
        SimulationConfig,
    },
};
use std::{
    path::PathBuf,
    time::Duration,
};
use tokio::task::JoinHandle;

/// Bet per line choices, in base units.
pub const BET_STEPS: [u64; 7] = [
    1_000_000,
    2_000_000,
    5_000_000,
    10_000_000,
    25_000_000,
    50_000_000,
    100_000_000,
];

const QUEUE_PANEL_ROWS: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayChoice {
    Offline,
    Remote(String),
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub gateway: GatewayChoice,
    pub engine: EngineConfig,
    /// Where spins are persisted; in memory when absent.
    pub data_dir: Option<PathBuf>,
    pub bell: bool,
}

type Coordinator = SpinDisplayCoordinator<Gateway, TerminalSound, TerminalCelebration>;
type Replays = ReplayController<Gateway, TerminalSound, TerminalCelebration>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReelView {
    pub symbols: [Symbol; WINDOW],
    pub velocity: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutView {
    Loading,
    Ready,
    Unavailable(String),
}

#[derive(Clone, Debug)]
pub struct AppSnapshot {
    pub gateway: String,
    pub layout: LayoutView,
    pub reels: Vec<ReelView>,
    pub phase: DisplayPhase,
    pub binding: DisplayBinding,
    pub bet_per_line: u64,
    pub paylines: u32,
    pub total_bet: u64,
    pub requests: Vec<SpinRequest>,
    pub history: Vec<SpinRequest>,
    pub selected: usize,
    pub banner: Option<Celebration>,
    pub replay: Option<(SpinId, ReplayPhase)>,
    pub status: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct AppController {
    coordinator: Coordinator,
    processor: QueueProcessor<Gateway>,
    replays: Replays,
    queue: SpinQueue,
    retention: RetentionPolicy,
    frames: LatestFrame,
    status: StatusLine,
    banner: Banner,
    gateway_label: String,
    bet_step: usize,
    paylines: u32,
    selected: usize,
    tasks: Vec<JoinHandle<()>>,
}

fn open_queue(data_dir: Option<&PathBuf>) -> Result<SpinQueue> {
    let Some(dir) = data_dir else {
        return Ok(SpinQueue::in_memory());
    };
    std::fs::create_dir_all(dir)
        .wrap_err_with(|| format!("creating data directory {}", dir.display()))?;
    let storage = SledSpinStorage::open(dir.join("spins"))
        .map_err(|err| eyre!("opening spin storage: {err:#}"))?;
    SpinQueue::new(storage).wrap_err("loading persisted spins")
}

fn connect(choice: &GatewayChoice) -> Result<Gateway> {
    match choice {
        GatewayChoice::Offline => {
            let machine = Machine::standard().wrap_err("loading default reel layout")?;
            Ok(Gateway::Simulated(SimulatedSettlement::new(
                machine,
                SimulationConfig::default(),
            )))
        }
        GatewayChoice::Remote(url) => HttpSettlementClient::new(url.clone())
            .map(Gateway::Http)
            .map_err(|err| eyre!("{err:#}")),
    }
}

impl AppController {
    pub fn new(config: AppConfig) -> Result<Self> {
        let gateway = connect(&config.gateway)?;
        let queue = open_queue(config.data_dir.as_ref())?;
        Ok(Self::with_parts(gateway, queue, config.engine, config.bell))
    }

    pub fn with_parts(gateway: Gateway, queue: SpinQueue, engine: EngineConfig, bell: bool) -> Self {
        let status = StatusLine::default();
        let banner = Banner::default();
        let frames = LatestFrame::default();
        let gateway_label = gateway.label();
        let coordinator = SpinDisplayCoordinator::new(
            queue.clone(),
            gateway.clone(),
            TerminalSound::new(status.clone(), bell),
            TerminalCelebration::new(status.clone(), banner.clone()),
            &engine,
            frames.sink(),
        );
        let processor = QueueProcessor::new(queue.clone(), gateway, engine.processor.clone());
        let replays = ReplayController::new(coordinator.clone(), engine.replay.clone());
        Self {
            coordinator,
            processor,
            replays,
            queue,
            retention: engine.queue,
            frames,
            status,
            banner,
            gateway_label,
            bet_step: 0,
            paylines: PAYLINE_COUNT as u32,
            selected: 0,
            tasks: Vec::new(),
        }
    }

    /// Loads the layout and starts the settlement and display loops.
    pub async fn start(&mut self) {
        let pruned = self.queue.prune(&self.retention, Utc::now());
        if pruned > 0 {
            tracing::info!(pruned, "pruned old spins");
        }
        match self.coordinator.mount().await {
            Ok(()) => self.status.push(format!("Connected: {}", self.gateway_label)),
            Err(err) => self
                .status
                .push(format!("{err}. Press l to retry.")),
        }
        self.processor.start();
        self.tasks
            .push(tokio::spawn(self.coordinator.clone().run_frames()));
        self.tasks
            .push(tokio::spawn(self.coordinator.clone().watch_queue()));
    }

    pub fn shutdown(&mut self) {
        self.processor.shutdown();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    pub fn bet_per_line(&self) -> u64 {
        BET_STEPS[self.bet_step]
    }

    pub fn total_bet(&self) -> u64 {
        self.bet_per_line() * u64::from(self.paylines)
    }

    pub fn status(&self) -> &StatusLine {
        &self.status
    }

    pub fn queue(&self) -> &SpinQueue {
        &self.queue
    }

    pub async fn handle(&mut self, event: ui::UserEvent) -> Flow {
        use ui::UserEvent;
        match event {
            UserEvent::Quit => return Flow::Quit,
            UserEvent::Redraw => {}
            UserEvent::Spin => self.spin().await,
            UserEvent::BetUp => {
                let next = (self.bet_step + 1).min(BET_STEPS.len() - 1);
                if BET_STEPS[next] * u64::from(self.paylines) <= MAX_BET {
                    self.bet_step = next;
                }
            }
            UserEvent::BetDown => self.bet_step = self.bet_step.saturating_sub(1),
            UserEvent::LinesUp => {
                let next = (self.paylines + 1).min(PAYLINE_COUNT as u32);
                if self.bet_per_line() * u64::from(next) <= MAX_BET {
                    self.paylines = next;
                }
            }
            UserEvent::LinesDown => self.paylines = self.paylines.saturating_sub(1).max(1),
            UserEvent::SelectPrev => self.selected = self.selected.saturating_sub(1),
            UserEvent::SelectNext => {
                let len = self.queue.history().len();
                self.selected = (self.selected + 1).min(len.saturating_sub(1));
            }
            UserEvent::Replay => self.replay_selected(),
            UserEvent::ForceStop => {
                self.coordinator.stop_spin().await;
                self.status.push("Stopped");
            }
            UserEvent::RetryLayout => match self.coordinator.retry_layout().await {
                Ok(()) => self.status.push("Reel layout loaded"),
                Err(err) => self.status.push(format!("{err}. Press l to retry.")),
            },
        }
        Flow::Continue
    }

    async fn spin(&mut self) {
        let per_line = self.bet_per_line();
        let total = self.total_bet();
        match self
            .coordinator
            .place_bet(per_line, self.paylines, total)
            .await
        {
            Ok(id) => {
                self.selected = 0;
                self.status.push(format!(
                    "Spin {id} queued: {} x {} = {}",
                    format_amount(per_line),
                    self.paylines,
                    format_amount(total)
                ));
            }
            Err(err) => self.status.push(format!("Spin refused: {err}")),
        }
    }

    fn replay_selected(&mut self) {
        let Some(request) = self.queue.history().into_iter().nth(self.selected) else {
            self.status.push("Nothing to replay");
            return;
        };
        let Some(outcome) = request.outcome else {
            return;
        };
        let replays = self.replays.clone();
        let status = self.status.clone();
        let winnings = request.winnings.unwrap_or(0);
        let bet = request.bet.total_bet;
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(tokio::spawn(async move {
            match replays.replay(request.id, outcome, winnings, bet).await {
                Ok(ReplayOutcome::Cancelled(phase)) => {
                    status.push(format!("Replay of spin {} cancelled ({phase:?})", request.id))
                }
                Ok(_) => {}
                Err(err) => status.push(format!("Replay refused: {err}")),
            }
        }));
    }

    pub fn build_snapshot(&self) -> AppSnapshot {
        let display = self.coordinator.snapshot();
        let layout = match &display.layout {
            LayoutState::Unloaded => LayoutView::Loading,
            LayoutState::Ready(_) => LayoutView::Ready,
            LayoutState::Unavailable { reason } => LayoutView::Unavailable(reason.clone()),
        };
        // frames stream while the reels move; at rest the physics state is authoritative
        let frame = self.frames.get();
        let moving = matches!(
            display.phase,
            DisplayPhase::Spinning | DisplayPhase::Decelerating
        );
        let states = if moving && frame.len() == display.reels.len() {
            frame
        } else {
            display.reels.clone()
        };
        let reels = display
            .strips
            .as_deref()
            .map(|strips| reel_views(strips, &states))
            .unwrap_or_default();
        let mut requests = self.queue.snapshot();
        requests.reverse();
        requests.truncate(QUEUE_PANEL_ROWS);
        let history = self.queue.history();
        AppSnapshot {
            gateway: self.gateway_label.clone(),
            layout,
            reels,
            phase: display.phase,
            binding: display.binding,
            bet_per_line: self.bet_per_line(),
            paylines: self.paylines,
            total_bet: self.total_bet(),
            requests,
            selected: self.selected.min(history.len().saturating_sub(1)),
            history,
            banner: self.banner.current(),
            replay: self.replays.phase(),
            status: self.status.lines(),
        }
    }
}

impl Drop for AppController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Symbols visible on each reel for the given animation states.
pub fn reel_views(strips: &ReelStrips, states: &[ReelAnimationState]) -> Vec<ReelView> {
    strips
        .iter()
        .zip(states)
        .map(|(strip, state)| {
            let len = strip.len().max(1) as f64;
            let top = state.position.floor().rem_euclid(len) as usize;
            ReelView {
                symbols: strip.window(top),
                velocity: state.velocity,
            }
        })
        .collect()
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let frame_interval = config.engine.display.frame_interval().max(Duration::from_millis(16));
    let mut controller = AppController::new(config)?;
    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    tracing::info!("Starting UI");
    ui::terminal_enter(&mut ui_state)?;
    controller.start().await;
    tracing::info!("UI ready");
    let res = run_loop(&mut controller, &mut ui_state, &mut input_events, frame_interval).await;
    controller.shutdown();
    ui::terminal_exit()?;
    res
}

async fn run_loop(
    controller: &mut AppController,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEvents,
    frame_interval: Duration,
) -> Result<()> {
    tracing::info!("Running app loop");
    let mut redraw = tokio::time::interval(frame_interval * 2);
    redraw.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = redraw.tick() => {
                let snapshot = controller.build_snapshot();
                ui::draw(ui_state, &snapshot).wrap_err("draw failed")?;
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
            raw_ev = ui::next_raw_event(input_events) => {
                let Some(event) = ui::interpret_event(raw_ev?) else {
                    continue;
                };
                if controller.handle(event).await == Flow::Quit {
                    break;
                }
                let snapshot = controller.build_snapshot();
                ui::draw(ui_state, &snapshot).wrap_err("draw after input failed")?;
            }
        }
    }
    tracing::info!("Leaving app loop");
    Ok(())
}
