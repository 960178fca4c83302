use crate::error::LayoutError;
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

/// Number of physical reels on the machine.
pub const REEL_COUNT: usize = 5;

/// Number of symbols visible per reel.
pub const WINDOW: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(pub char);

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Symbol codes that render identically as filler and therefore match each other.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlankSet {
    codes: Vec<Symbol>,
}

impl BlankSet {
    pub fn new(codes: impl IntoIterator<Item = char>) -> Self {
        Self {
            codes: codes.into_iter().map(Symbol).collect(),
        }
    }

    pub fn is_blank(&self, symbol: Symbol) -> bool {
        self.codes.contains(&symbol)
    }

    pub fn equivalent(&self, a: Symbol, b: Symbol) -> bool {
        a == b || (self.is_blank(a) && self.is_blank(b))
    }
}

impl Default for BlankSet {
    fn default() -> Self {
        Self::new(['_'])
    }
}

/// The fixed, ordered sequence of symbols one reel can land on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReelStrip {
    symbols: Vec<Symbol>,
}

impl ReelStrip {
    pub fn parse(raw: &str) -> Result<Self, LayoutError> {
        let symbols: Vec<Symbol> = raw.chars().map(Symbol).collect();
        if symbols.len() < WINDOW {
            return Err(LayoutError::Invalid(format!(
                "reel strip has {} symbols, at least {WINDOW} required",
                symbols.len()
            )));
        }
        if let Some(bad) = symbols.iter().find(|s| s.0.is_whitespace() || s.0.is_control()) {
            return Err(LayoutError::Invalid(format!(
                "reel strip contains unprintable symbol {:?}",
                bad.0
            )));
        }
        Ok(Self { symbols })
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Symbol at `index`, wrapping around the strip.
    pub fn symbol_at(&self, index: usize) -> Symbol {
        self.symbols[index % self.symbols.len()]
    }

    /// The visible window whose top symbol sits at `top`, wrapping around the strip.
    pub fn window(&self, top: usize) -> [Symbol; WINDOW] {
        std::array::from_fn(|row| self.symbol_at(top + row))
    }
}

impl fmt::Display for ReelStrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for symbol in &self.symbols {
            write!(f, "{symbol}")?;
        }
        Ok(())
    }
}

/// One strip per physical reel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReelStrips {
    reels: Vec<ReelStrip>,
}

impl ReelStrips {
    pub fn from_strings<S: AsRef<str>>(raw: &[S]) -> Result<Self, LayoutError> {
        if raw.len() != REEL_COUNT {
            return Err(LayoutError::Invalid(format!(
                "expected {REEL_COUNT} reel strips, got {}",
                raw.len()
            )));
        }
        let reels = raw
            .iter()
            .enumerate()
            .map(|(i, strip)| {
                ReelStrip::parse(strip.as_ref()).map_err(|err| match err {
                    LayoutError::Invalid(msg) => LayoutError::Invalid(format!("reel {i}: {msg}")),
                    other => other,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { reels })
    }

    pub fn reel(&self, index: usize) -> &ReelStrip {
        &self.reels[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReelStrip> {
        self.reels.iter()
    }

    pub fn lengths(&self) -> Vec<usize> {
        self.reels.iter().map(ReelStrip::len).collect()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.reels.iter().map(ToString::to_string).collect()
    }

    /// Outcome visible when each reel's top symbol sits at the given offset.
    pub fn grid_at(&self, tops: &[usize; REEL_COUNT]) -> OutcomeGrid {
        OutcomeGrid::new(std::array::from_fn(|reel| self.reels[reel].window(tops[reel])))
    }
}

/// Authoritative 5x3 outcome, stored reel-major (reel 0 rows top to bottom, then reel 1, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OutcomeGrid {
    reels: [[Symbol; WINDOW]; REEL_COUNT],
}

impl OutcomeGrid {
    pub fn new(reels: [[Symbol; WINDOW]; REEL_COUNT]) -> Self {
        Self { reels }
    }

    /// Parses the 15 character reel-major encoding, e.g. `"ABC_D_..."`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let chars: Vec<char> = raw.chars().collect();
        if chars.len() != REEL_COUNT * WINDOW {
            return Err(format!(
                "outcome grid must have {} symbols, got {}",
                REEL_COUNT * WINDOW,
                chars.len()
            ));
        }
        Ok(Self {
            reels: std::array::from_fn(|reel| {
                std::array::from_fn(|row| Symbol(chars[reel * WINDOW + row]))
            }),
        })
    }

    pub fn reel(&self, index: usize) -> [Symbol; WINDOW] {
        self.reels[index]
    }

    pub fn reels(&self) -> &[[Symbol; WINDOW]; REEL_COUNT] {
        &self.reels
    }

    /// Symbol shown on `row` (0 = top) of `reel`.
    pub fn at(&self, reel: usize, row: usize) -> Symbol {
        self.reels[reel][row]
    }
}

impl fmt::Display for OutcomeGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for symbol in self.reels.iter().flatten() {
            write!(f, "{symbol}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for OutcomeGrid {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OutcomeGrid> for String {
    fn from(grid: OutcomeGrid) -> Self {
        grid.to_string()
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn window__wraps_past_end_of_strip() {
        // given
        let strip = ReelStrip::parse("ABCDE").unwrap();

        // when
        let window = strip.window(4);

        // then
        assert_eq!(window, [Symbol('E'), Symbol('A'), Symbol('B')]);
    }

    #[test]
    fn from_strings__rejects_wrong_reel_count() {
        // given
        let raw = vec!["ABC".to_string(); 4];

        // when
        let result = ReelStrips::from_strings(&raw);

        // then
        assert!(matches!(result, Err(LayoutError::Invalid(_))));
    }

    #[test]
    fn from_strings__rejects_strip_shorter_than_window() {
        // given
        let raw = ["ABC", "ABC", "AB", "ABC", "ABC"];

        // when
        let result = ReelStrips::from_strings(&raw);

        // then
        let Err(LayoutError::Invalid(msg)) = result else {
            panic!("expected invalid layout, got {result:?}");
        };
        assert!(msg.starts_with("reel 2"), "unexpected message {msg}");
    }

    #[test]
    fn parse__outcome_grid_is_reel_major() {
        // given
        let raw = "ABCDDD___AAABBB";

        // when
        let grid = OutcomeGrid::parse(raw).unwrap();

        // then
        assert_eq!(grid.reel(0), [Symbol('A'), Symbol('B'), Symbol('C')]);
        assert_eq!(grid.at(2, 1), Symbol('_'));
        assert_eq!(grid.to_string(), raw);
    }

    #[test]
    fn outcome_grid__serializes_as_compact_string() {
        // given
        let grid = OutcomeGrid::parse("ABCABCABCABCABC").unwrap();

        // when
        let json = serde_json::to_string(&grid).unwrap();

        // then
        assert_eq!(json, "\"ABCABCABCABCABC\"");
        let back: OutcomeGrid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, grid);
    }

    #[test]
    fn equivalent__treats_distinct_blank_codes_as_equal() {
        // given
        let blanks = BlankSet::new(['_', '.']);

        // then
        assert!(blanks.equivalent(Symbol('_'), Symbol('.')));
        assert!(!blanks.equivalent(Symbol('_'), Symbol('A')));
        assert!(blanks.equivalent(Symbol('A'), Symbol('A')));
    }
}
