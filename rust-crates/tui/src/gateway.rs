use reel_engine::{
    error::LayoutError,
    layout::ReelLayoutSource,
    settlement::{
        PollStatus,
        SettlementAuthority,
        SettlementError,
        SpinSubmission,
        TransactionRef,
    },
};
use slot_settlement::{
    http_client::HttpSettlementClient,
    simulated::SimulatedSettlement,
};

/// Where spins are settled: an in-process simulated chain or a remote gateway.
#[derive(Clone)]
pub enum Gateway {
    Simulated(SimulatedSettlement),
    Http(HttpSettlementClient),
}

impl Gateway {
    pub fn label(&self) -> String {
        match self {
            Gateway::Simulated(_) => "offline (simulated chain)".to_string(),
            Gateway::Http(client) => format!("gateway {}", client.base_url()),
        }
    }
}

impl SettlementAuthority for Gateway {
    async fn submit_spin(
        &self,
        submission: &SpinSubmission,
    ) -> Result<TransactionRef, SettlementError> {
        match self {
            Gateway::Simulated(chain) => chain.submit_spin(submission).await,
            Gateway::Http(client) => client.submit_spin(submission).await,
        }
    }

    async fn poll_outcome(
        &self,
        transaction: &TransactionRef,
    ) -> Result<PollStatus, SettlementError> {
        match self {
            Gateway::Simulated(chain) => chain.poll_outcome(transaction).await,
            Gateway::Http(client) => client.poll_outcome(transaction).await,
        }
    }

    async fn claim_spin(&self, transaction: &TransactionRef) -> Result<u64, SettlementError> {
        match self {
            Gateway::Simulated(chain) => chain.claim_spin(transaction).await,
            Gateway::Http(client) => client.claim_spin(transaction).await,
        }
    }
}

impl ReelLayoutSource for Gateway {
    async fn reel_strips(&self) -> Result<Vec<String>, LayoutError> {
        match self {
            Gateway::Simulated(chain) => chain.reel_strips().await,
            Gateway::Http(client) => client.reel_strips().await,
        }
    }
}
