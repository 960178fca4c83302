use crate::symbols::{
    BlankSet,
    OutcomeGrid,
    REEL_COUNT,
    ReelStrip,
    ReelStrips,
    Symbol,
    WINDOW,
};
use tracing::warn;

/// Landing offsets for one outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub offsets: [usize; REEL_COUNT],
    /// Reels whose target window was not found on the strip and fell back to offset 0.
    pub misses: Vec<usize>,
}

impl Resolution {
    pub fn is_exact(&self) -> bool {
        self.misses.is_empty()
    }
}

/// First strip offset whose window shows `target`, scanning windows that fit without wrap.
pub fn find_offset(
    strip: &ReelStrip,
    target: &[Symbol; WINDOW],
    blanks: &BlankSet,
) -> Option<usize> {
    strip.symbols().windows(WINDOW).position(|window| {
        window
            .iter()
            .zip(target)
            .all(|(on_strip, wanted)| blanks.equivalent(*on_strip, *wanted))
    })
}

/// Computes the landing offset of every reel for `outcome`.
///
/// An outcome that cannot be found on a strip lands that reel on offset 0 and is reported
/// in [`Resolution::misses`] instead of failing the spin.
pub fn resolve(outcome: &OutcomeGrid, strips: &ReelStrips, blanks: &BlankSet) -> Resolution {
    let mut offsets = [0usize; REEL_COUNT];
    let mut misses = Vec::new();
    for (reel, strip) in strips.iter().enumerate().take(REEL_COUNT) {
        let target = outcome.reel(reel);
        match find_offset(strip, &target, blanks) {
            Some(offset) => offsets[reel] = offset,
            None => {
                let wanted: String = target.iter().map(|s| s.0).collect();
                warn!(reel, %wanted, "outcome window not present on reel strip, landing on offset 0");
                misses.push(reel);
            }
        }
    }
    Resolution { offsets, misses }
}
