//! In-process stand-in for the on-chain slot machine. Rounds tick on the tokio clock so
//! tests with a paused clock drive settlement deterministically.

use crate::machine::{
    BetKey,
    MIN_BANK,
    Machine,
    PlayerId,
    Seed,
    lockup,
    payout,
    validate_bet,
};
use reel_engine::{
    error::LayoutError,
    layout::ReelLayoutSource,
    queue::Bet,
    settlement::{
        PollStatus,
        SettlementAuthority,
        SettlementError,
        SpinSubmission,
        TransactionRef,
    },
    symbols::OutcomeGrid,
};
use sha2::{
    Digest,
    Sha256,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::{
    debug,
    info,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Faults {
    /// Every submission is refused as if the player could not pay.
    pub reject_all: bool,
    /// Accepted bets stay pending forever.
    pub never_confirm: bool,
    /// The next this many polls fail as if the node were unreachable.
    pub transient_polls: u32,
    pub layout_unavailable: bool,
}

#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub round_duration: Duration,
    /// Time between a submission and its inclusion in a round.
    pub confirmation_delay: Duration,
    pub chain_seed: Seed,
    pub player: PlayerId,
    pub bank: u64,
    pub faults: Faults,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_millis(2_800),
            confirmation_delay: Duration::from_millis(500),
            chain_seed: rand::random(),
            player: PlayerId::from_name("player"),
            bank: MIN_BANK * 10,
            faults: Faults::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BankBalances {
    pub available: u64,
    pub locked: u64,
    pub total: u64,
}

#[derive(Clone, Debug)]
struct BetRecord {
    bet: Bet,
    claim_round: u64,
    placed_at: Instant,
    payout: Option<u64>,
}

struct ChainState {
    bets: HashMap<BetKey, BetRecord>,
    balances: BankBalances,
    faults: Faults,
}

#[derive(Clone)]
pub struct SimulatedSettlement {
    machine: Arc<Machine>,
    config: Arc<SimulationConfig>,
    genesis: Instant,
    state: Arc<Mutex<ChainState>>,
}

impl SimulatedSettlement {
    pub fn new(machine: Machine, config: SimulationConfig) -> Self {
        let state = ChainState {
            bets: HashMap::new(),
            balances: BankBalances {
                available: config.bank,
                locked: 0,
                total: config.bank,
            },
            faults: config.faults.clone(),
        };
        Self {
            machine: Arc::new(machine),
            config: Arc::new(config),
            genesis: Instant::now(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn player(&self) -> PlayerId {
        self.config.player
    }

    pub fn current_round(&self) -> u64 {
        let round_ms = self.config.round_duration.as_millis().max(1);
        let elapsed = self.genesis.elapsed().as_millis() / round_ms;
        1 + elapsed as u64
    }

    pub fn round_seed(&self, round: u64) -> Seed {
        let mut hasher = Sha256::new();
        hasher.update(self.config.chain_seed);
        hasher.update(round.to_be_bytes());
        hasher.finalize().into()
    }

    pub fn balances(&self) -> BankBalances {
        self.lock().balances
    }

    pub fn update_faults(&self, update: impl FnOnce(&mut Faults)) {
        update(&mut self.lock().faults);
    }

    /// Records a bet, or returns the existing key when the same bet was placed before.
    pub fn place(&self, bet: &Bet, index: u64) -> Result<BetKey, SettlementError> {
        let key = BetKey::for_bet(&self.config.player, bet, index);
        let claim_round = self.current_round() + 1;
        let mut state = self.lock();
        if state.faults.reject_all {
            return Err(SettlementError::Rejected("payment insufficient".to_string()));
        }
        if state.bets.contains_key(&key) {
            debug!(key = %key.to_hex(), "bet already exists, returning its key");
            return Ok(key);
        }
        validate_bet(bet).map_err(|err| SettlementError::Rejected(err.to_string()))?;
        if state.balances.total < MIN_BANK {
            return Err(SettlementError::Rejected(
                "balance total must be greater than min bank amount".to_string(),
            ));
        }
        let locked = lockup(bet.bet_per_line);
        let available = state.balances.available.saturating_add(bet.total_bet);
        if available < locked {
            return Err(SettlementError::Rejected(
                "bank cannot cover the maximum payout".to_string(),
            ));
        }
        state.balances.total = state.balances.total.saturating_add(bet.total_bet);
        state.balances.available = available - locked;
        state.balances.locked = state.balances.locked.saturating_add(locked);
        state.bets.insert(
            key,
            BetRecord {
                bet: *bet,
                claim_round,
                placed_at: Instant::now(),
                payout: None,
            },
        );
        info!(index, claim_round, total = bet.total_bet, "bet placed");
        Ok(key)
    }

    pub fn status(&self, key: &BetKey) -> Result<PollStatus, SettlementError> {
        let round = self.current_round();
        let mut state = self.lock();
        if state.faults.transient_polls > 0 {
            state.faults.transient_polls -= 1;
            return Err(SettlementError::Transient("node unreachable".to_string()));
        }
        let record = state
            .bets
            .get(key)
            .cloned()
            .ok_or_else(|| SettlementError::UnknownTransaction(transaction(key)))?;
        let never_confirm = state.faults.never_confirm;
        drop(state);
        if never_confirm || record.placed_at.elapsed() < self.config.confirmation_delay {
            return Ok(PollStatus::Pending);
        }
        if round < record.claim_round {
            return Ok(PollStatus::Confirmed);
        }
        let (outcome, winnings) = self.settle(key, &record);
        Ok(PollStatus::ResultAvailable { outcome, winnings })
    }

    /// Pays out a settled bet once. Later claims return the same payout.
    pub fn claim(&self, key: &BetKey) -> Result<u64, SettlementError> {
        let round = self.current_round();
        let record = self
            .lock()
            .bets
            .get(key)
            .cloned()
            .ok_or_else(|| SettlementError::UnknownTransaction(transaction(key)))?;
        if let Some(paid) = record.payout {
            return Ok(paid);
        }
        if round < record.claim_round {
            return Err(SettlementError::Transient(format!(
                "bet settles in round {}, current round is {round}",
                record.claim_round
            )));
        }
        let (_, winnings) = self.settle(key, &record);
        let mut state = self.lock();
        let Some(stored) = state.bets.get_mut(key) else {
            return Err(SettlementError::UnknownTransaction(transaction(key)));
        };
        if let Some(paid) = stored.payout {
            return Ok(paid);
        }
        stored.payout = Some(winnings);
        let released = lockup(record.bet.bet_per_line);
        let balances = &mut state.balances;
        balances.locked = balances.locked.saturating_sub(released);
        balances.available = balances
            .available
            .saturating_add(released)
            .saturating_sub(winnings);
        balances.total = balances.total.saturating_sub(winnings);
        info!(index = key.index(), winnings, "bet claimed");
        Ok(winnings)
    }

    fn settle(&self, key: &BetKey, record: &BetRecord) -> (OutcomeGrid, u64) {
        let seed = self.round_seed(record.claim_round);
        let outcome = self.machine.bet_grid(&seed, key);
        let winnings = payout(
            &outcome,
            record.bet.bet_per_line,
            record.bet.selected_paylines as usize,
        );
        (outcome, winnings)
    }
}

fn transaction(key: &BetKey) -> TransactionRef {
    TransactionRef::new(key.to_hex())
}

fn parse_transaction(transaction: &TransactionRef) -> Result<BetKey, SettlementError> {
    BetKey::from_hex(transaction.as_str())
        .ok_or_else(|| SettlementError::UnknownTransaction(transaction.clone()))
}

impl SettlementAuthority for SimulatedSettlement {
    async fn submit_spin(
        &self,
        submission: &SpinSubmission,
    ) -> Result<TransactionRef, SettlementError> {
        self.place(&submission.bet, submission.spin_id.0)
            .map(|key| transaction(&key))
    }

    async fn poll_outcome(
        &self,
        transaction: &TransactionRef,
    ) -> Result<PollStatus, SettlementError> {
        self.status(&parse_transaction(transaction)?)
    }

    async fn claim_spin(&self, transaction: &TransactionRef) -> Result<u64, SettlementError> {
        self.claim(&parse_transaction(transaction)?)
    }
}

impl ReelLayoutSource for SimulatedSettlement {
    async fn reel_strips(&self) -> Result<Vec<String>, LayoutError> {
        if self.lock().faults.layout_unavailable {
            return Err(LayoutError::Fetch("reel boxes not readable".to_string()));
        }
        Ok(self.machine.strips().to_strings())
    }
}
