use crate::{
    queue::{
        Bet,
        SpinId,
    },
    symbols::OutcomeGrid,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;
use thiserror::Error;

/// Opaque handle returned by the settlement authority for an accepted spin.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionRef(String);

impl TransactionRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A bet on its way to the settlement authority. `spin_id` doubles as the idempotency key:
/// submitting the same id twice must yield the same transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpinSubmission {
    pub spin_id: SpinId,
    pub bet: Bet,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollStatus {
    /// Accepted but not yet on the ledger.
    Pending,
    /// On the ledger, result not yet determined.
    Confirmed,
    ResultAvailable { outcome: OutcomeGrid, winnings: u64 },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SettlementError {
    /// Permanent refusal; the spin will never settle.
    #[error("rejected by settlement authority: {0}")]
    Rejected(String),
    #[error("settlement authority unreachable: {0}")]
    Transient(String),
    #[error("settlement authority does not know transaction {0}")]
    UnknownTransaction(TransactionRef),
}

impl SettlementError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SettlementError::Rejected(_))
    }
}

/// External system of record that decides spin outcomes. It is polled, never pushes.
pub trait SettlementAuthority {
    fn submit_spin(
        &self,
        submission: &SpinSubmission,
    ) -> impl Future<Output = Result<TransactionRef, SettlementError>> + Send;

    fn poll_outcome(
        &self,
        transaction: &TransactionRef,
    ) -> impl Future<Output = Result<PollStatus, SettlementError>> + Send;

    /// Finalizes a settled spin and returns its payout. Claiming twice returns the same payout.
    fn claim_spin(
        &self,
        transaction: &TransactionRef,
    ) -> impl Future<Output = Result<u64, SettlementError>> + Send;
}
