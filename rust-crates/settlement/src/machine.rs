//! Rules of the reel machine the settlement authority enforces: reel layout, how a seed
//! picks the visible grid, paylines and the payout table.

use reel_engine::{
    error::LayoutError,
    queue::Bet,
    symbols::{
        OutcomeGrid,
        REEL_COUNT,
        ReelStrips,
        Symbol,
        WINDOW,
    },
};
use sha2::{
    Digest,
    Sha256,
};
use std::fmt;
use thiserror::Error;

pub const PAYLINE_COUNT: usize = 20;

/// Smallest accepted total bet, in base units.
pub const MIN_BET: u64 = 1_000_000;

/// Largest accepted total bet, in base units.
pub const MAX_BET: u64 = 2_000_000_000;

/// Highest multiplier a single line can pay. The bank locks `bet_per_line` times this
/// for every open bet.
pub const MAX_PAYOUT_MULTIPLIER: u64 = 10_000;

/// The bank refuses spins while its total balance is below this.
pub const MIN_BANK: u64 = 100_000_000_000;

pub const DEFAULT_REELS: [&str; REEL_COUNT] = [
    "_CCC__BD___D_____D_____D__DBDDCC_D_C_D__AD_D_CB_C_A_B___B_______DD___D_C_A_____B__C__D______D_______",
    "C_A_____C__DC_____B__B_CD_B___CD__DAD__C__C______CDD_______C_DA________DDD____CDDD___DB____BD__B____",
    "___D_D_B_________CD__D__C_C____B__A___CDB__BC_D__D__CD_C_________D___A_DC__B______B_DDDDD_____C_CDA_",
    "C___C_CDDDDC__D__CCB____D_B__B______D______BD_____A____D_D__AD__D__B___B__C____A____C_D_D___C__CDD__",
    "_________________CC___DC___DDB_BDADDC______B____C__D___D__CA_______CD__D_D_C_______BD_C_DBA_BDD__CD_",
];

/// Row (0 = top) crossed on each reel, in payout order.
pub const PAYLINES: [[usize; REEL_COUNT]; PAYLINE_COUNT] = [
    [1, 1, 1, 1, 1],
    [0, 0, 0, 0, 0],
    [2, 2, 2, 2, 2],
    [0, 1, 2, 1, 0],
    [2, 1, 0, 1, 2],
    [0, 1, 1, 2, 2],
    [2, 1, 1, 0, 0],
    [0, 0, 1, 0, 0],
    [2, 2, 1, 2, 2],
    [0, 1, 2, 2, 1],
    [2, 1, 0, 0, 1],
    [1, 0, 0, 0, 1],
    [1, 2, 2, 2, 1],
    [0, 2, 0, 2, 0],
    [2, 0, 2, 0, 2],
    [0, 2, 1, 2, 0],
    [2, 0, 1, 0, 2],
    [0, 0, 1, 2, 2],
    [2, 2, 1, 0, 0],
    [1, 0, 1, 2, 1],
];

const PAYING_SYMBOLS: [char; 4] = ['A', 'B', 'C', 'D'];

pub type Seed = [u8; 32];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PlayerId(pub [u8; 32]);

impl PlayerId {
    pub fn from_name(name: &str) -> Self {
        Self(Sha256::digest(name.as_bytes()).into())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Identifies a bet: player, bet per line, highest payline index and the client's index,
/// each fixed width. The same inputs always give the same key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BetKey([u8; 56]);

impl BetKey {
    pub fn new(player: &PlayerId, bet_per_line: u64, max_payline_index: u64, index: u64) -> Self {
        let mut key = [0u8; 56];
        key[..32].copy_from_slice(&player.0);
        key[32..40].copy_from_slice(&bet_per_line.to_be_bytes());
        key[40..48].copy_from_slice(&max_payline_index.to_be_bytes());
        key[48..].copy_from_slice(&index.to_be_bytes());
        Self(key)
    }

    pub fn for_bet(player: &PlayerId, bet: &Bet, index: u64) -> Self {
        let max_payline_index = u64::from(bet.selected_paylines.saturating_sub(1));
        Self::new(player, bet.bet_per_line, max_payline_index, index)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(raw: &str) -> Option<Self> {
        let bytes = hex::decode(raw).ok()?;
        let key: [u8; 56] = bytes.try_into().ok()?;
        Some(Self(key))
    }

    pub fn bet_per_line(&self) -> u64 {
        self.read_u64(32)
    }

    pub fn paylines(&self) -> u64 {
        self.read_u64(40).saturating_add(1)
    }

    pub fn index(&self) -> u64 {
        self.read_u64(48)
    }

    fn read_u64(&self, start: usize) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.0[start..start + 8]);
        u64::from_be_bytes(raw)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BetError {
    #[error("bet amount too small: {total} < {MIN_BET}")]
    TooSmall { total: u64 },
    #[error("bet amount too large: {total} > {MAX_BET}")]
    TooLarge { total: u64 },
    #[error("payline count must be between 1 and {PAYLINE_COUNT}, got {0}")]
    Paylines(u32),
    #[error("total bet {total} does not match {per_line} x {lines}")]
    Mismatch { total: u64, per_line: u64, lines: u32 },
}

pub fn validate_bet(bet: &Bet) -> Result<(), BetError> {
    let lines = bet.selected_paylines;
    if lines == 0 || lines as usize > PAYLINE_COUNT {
        return Err(BetError::Paylines(lines));
    }
    if bet.bet_per_line.checked_mul(u64::from(lines)) != Some(bet.total_bet) {
        return Err(BetError::Mismatch {
            total: bet.total_bet,
            per_line: bet.bet_per_line,
            lines,
        });
    }
    match bet.total_bet {
        total if total < MIN_BET => Err(BetError::TooSmall { total }),
        total if total > MAX_BET => Err(BetError::TooLarge { total }),
        _ => Ok(()),
    }
}

/// Best paying symbol on one payline and how often it appears there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaylineMatch {
    pub symbol: Symbol,
    pub count: usize,
}

impl PaylineMatch {
    pub fn none() -> Self {
        Self {
            symbol: Symbol('_'),
            count: 0,
        }
    }

    pub fn multiplier(&self) -> u64 {
        multiplier(self.symbol, self.count)
    }
}

pub fn multiplier(symbol: Symbol, count: usize) -> u64 {
    match (symbol.0, count) {
        ('A', 5) => 10_000,
        ('A', 4) => 1_000,
        ('A', 3) => 200,
        ('B', 5) => 1_000,
        ('B', 4) => 200,
        ('B', 3) => 60,
        ('C', 5) => 500,
        ('C', 4) => 100,
        ('C', 3) => 30,
        ('D', 5) => 250,
        ('D', 4) => 55,
        ('D', 3) => 10,
        _ => 0,
    }
}

pub fn payline_symbols(grid: &OutcomeGrid, payline: usize) -> [Symbol; REEL_COUNT] {
    let rows = PAYLINES[payline];
    std::array::from_fn(|reel| grid.at(reel, rows[reel]))
}

/// Counts every paying symbol on the line, wherever it sits. Ties keep the symbol that
/// comes first in `A B C D` order.
pub fn match_payline(grid: &OutcomeGrid, payline: usize) -> PaylineMatch {
    let symbols = payline_symbols(grid, payline);
    let mut best = PaylineMatch::none();
    let mut best_multiplier = 0;
    for code in PAYING_SYMBOLS {
        let symbol = Symbol(code);
        let count = symbols.iter().filter(|s| **s == symbol).count();
        let m = multiplier(symbol, count);
        if m > best_multiplier {
            best = PaylineMatch { symbol, count };
            best_multiplier = m;
        }
    }
    best
}

/// Total payout over the first `paylines` lines.
pub fn payout(grid: &OutcomeGrid, bet_per_line: u64, paylines: usize) -> u64 {
    (0..paylines.min(PAYLINE_COUNT))
        .map(|line| match_payline(grid, line).multiplier())
        .fold(0u64, |total, m| total.saturating_add(bet_per_line.saturating_mul(m)))
}

pub fn lockup(bet_per_line: u64) -> u64 {
    bet_per_line.saturating_mul(MAX_PAYOUT_MULTIPLIER)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Machine {
    strips: ReelStrips,
}

impl Machine {
    pub fn new(strips: ReelStrips) -> Self {
        Self { strips }
    }

    pub fn standard() -> Result<Self, LayoutError> {
        ReelStrips::from_strings(&DEFAULT_REELS).map(Self::new)
    }

    pub fn strips(&self) -> &ReelStrips {
        &self.strips
    }

    /// Top offset of each reel for `seed`. Tops stay clear of the last `WINDOW + 1`
    /// positions of every strip.
    pub fn reel_tops(&self, seed: &[u8]) -> [usize; REEL_COUNT] {
        std::array::from_fn(|reel| {
            let mut hasher = Sha256::new();
            hasher.update(seed);
            hasher.update((reel + 1).to_string().as_bytes());
            let digest = hasher.finalize();
            let mut tail = [0u8; 8];
            tail.copy_from_slice(&digest[24..32]);
            let span = self
                .strips
                .reel(reel)
                .len()
                .saturating_sub(WINDOW + 1)
                .max(1) as u64;
            (u64::from_be_bytes(tail) % span) as usize
        })
    }

    pub fn grid(&self, seed: &[u8]) -> OutcomeGrid {
        self.strips.grid_at(&self.reel_tops(seed))
    }

    /// Grid for a bet settled in the round with `round_seed`.
    pub fn bet_grid(&self, round_seed: &Seed, key: &BetKey) -> OutcomeGrid {
        let mut hasher = Sha256::new();
        hasher.update(round_seed);
        hasher.update(key.as_bytes());
        let seed: Seed = hasher.finalize().into();
        self.grid(&seed)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use proptest::prelude::*;

    fn grid(raw: &str) -> OutcomeGrid {
        OutcomeGrid::parse(raw).unwrap()
    }

    #[test]
    fn standard__has_five_reels_of_one_hundred() {
        // when
        let machine = Machine::standard().unwrap();

        // then
        assert_eq!(machine.strips().lengths(), vec![100; REEL_COUNT]);
    }

    #[test]
    fn grid__matches_known_vector_for_zero_seed() {
        // given
        let machine = Machine::standard().unwrap();

        // when
        let tops = machine.reel_tops(&[0u8; 32]);
        let grid = machine.grid(&[0u8; 32]);

        // then
        assert_eq!(tops, [27, 10, 14, 78, 77]);
        assert_eq!(grid.to_string(), "BDD_DC____A____");
        assert_eq!(payout(&grid, 1, PAYLINE_COUNT), 0);
    }

    #[test]
    fn bet_grid__mixes_round_seed_with_bet_key() {
        // given
        let machine = Machine::standard().unwrap();
        let key = BetKey::new(&PlayerId([0u8; 32]), 1_000_000, 19, 1);

        // when
        let grid = machine.bet_grid(&[0x11; 32], &key);

        // then
        assert_eq!(grid.to_string(), "________D__B_D_");
        assert_ne!(grid, machine.grid(&[0x11; 32]));
    }

    #[test]
    fn payout__middle_line_of_five_b() {
        // given
        let grid = grid("_B__B__B__B__B_");

        // when
        let one_line = payout(&grid, 1, 1);
        let all_lines = payout(&grid, 1, PAYLINE_COUNT);

        // then
        assert_eq!(one_line, 1_000);
        // line 20 (wave) also crosses three of the Bs
        assert_eq!(all_lines, 1_060);
    }

    #[test]
    fn match_payline__counts_symbols_that_are_not_adjacent() {
        // given
        let grid = grid("_C__D__C__D__C_");

        // when
        let matched = match_payline(&grid, 0);

        // then
        assert_eq!(matched, PaylineMatch { symbol: Symbol('C'), count: 3 });
        assert_eq!(matched.multiplier(), 30);
    }

    #[test]
    fn match_payline__higher_multiplier_wins_the_line() {
        // given
        let grid = grid("_A__A__A__D__D_");

        // when
        let matched = match_payline(&grid, 0);

        // then
        assert_eq!(matched.symbol, Symbol('A'));
        assert_eq!(matched.multiplier(), 200);
    }

    #[test]
    fn validate_bet__enforces_bounds_and_paylines() {
        // given
        let too_small = Bet::new(100, 1).unwrap();
        let too_large = Bet::new(200_000_000, 20).unwrap();
        let too_many_lines = Bet::new(1_000_000, 21).unwrap();
        let fine = Bet::new(1_000_000, 20).unwrap();

        // then
        assert_eq!(validate_bet(&too_small), Err(BetError::TooSmall { total: 100 }));
        assert!(matches!(validate_bet(&too_large), Err(BetError::TooLarge { .. })));
        assert_eq!(validate_bet(&too_many_lines), Err(BetError::Paylines(21)));
        assert_eq!(validate_bet(&fine), Ok(()));
    }

    #[test]
    fn bet_key__hex_round_trip_keeps_fields() {
        // given
        let player = PlayerId::from_name("alice");
        let key = BetKey::new(&player, 2_000_000, 9, 42);

        // when
        let parsed = BetKey::from_hex(&key.to_hex()).unwrap();

        // then
        assert_eq!(parsed, key);
        assert_eq!(parsed.bet_per_line(), 2_000_000);
        assert_eq!(parsed.paylines(), 10);
        assert_eq!(parsed.index(), 42);
        assert_eq!(BetKey::from_hex("abcd"), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn payout__never_exceeds_lockup_per_line(seed in any::<[u8; 32]>(), lines in 1usize..=PAYLINE_COUNT) {
            let machine = Machine::standard().unwrap();
            let tops = machine.reel_tops(&seed);
            let grid = machine.grid(&seed);
            prop_assert!(tops.iter().all(|top| *top < 96));
            prop_assert!(payout(&grid, 1, lines) <= MAX_PAYOUT_MULTIPLIER * lines as u64);
        }
    }
}
