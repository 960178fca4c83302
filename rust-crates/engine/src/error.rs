use crate::queue::SpinId;
use thiserror::Error;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The reel strips could not be loaded; no spin may start until a retry succeeds.
    #[error("reel layout unavailable: {reason}")]
    LayoutUnavailable { reason: String },
    #[error("invalid bet: {0}")]
    InvalidBet(String),
    #[error("replay of spin {active} is already in progress")]
    ReplayInProgress { active: SpinId },
    #[error("spin storage failure: {0:#}")]
    Storage(anyhow::Error),
    #[error("invalid engine configuration: {0}")]
    Config(String),
}

/// Failure reported by a reel layout source.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("failed to fetch reel strips: {0}")]
    Fetch(String),
    #[error("malformed reel strips: {0}")]
    Invalid(String),
}

/// Failure reported by a sound or celebration collaborator. Never reaches the spin pipeline.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("effect failed: {0}")]
pub struct EffectError(pub String);
