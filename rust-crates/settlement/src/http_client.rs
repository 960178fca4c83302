use crate::api::{
    ClaimDto,
    ErrorDto,
    PollDto,
    ReelsDto,
    SpinRequestDto,
    SubmittedDto,
};
use anyhow::Context;
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
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

/// Talks to a settlement gateway. Implements both engine seams so the front end can run
/// against a remote authority.
#[derive(Clone)]
pub struct HttpSettlementClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpSettlementClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client for settlement gateway")?;
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn spin_url(&self, transaction: &TransactionRef) -> String {
        format!("{}/spins/{}", self.base_url, transaction)
    }
}

async fn read_json<T: DeserializeOwned>(
    response: reqwest::Result<reqwest::Response>,
    transaction: Option<&TransactionRef>,
) -> Result<T, SettlementError> {
    let response = response
        .map_err(|err| SettlementError::Transient(format!("gateway request failed: {err}")))?;
    let status = response.status();
    let bytes = response.bytes().await.map_err(|err| {
        SettlementError::Transient(format!("failed to read gateway response body: {err}"))
    })?;
    if status.is_success() {
        return serde_json::from_slice(&bytes).map_err(|err| {
            SettlementError::Transient(format!("invalid gateway payload: {err}"))
        });
    }
    let body = serde_json::from_slice::<ErrorDto>(&bytes)
        .map(|dto| dto.error)
        .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
    match (status, transaction) {
        (StatusCode::NOT_FOUND, Some(transaction)) => {
            Err(SettlementError::UnknownTransaction(transaction.clone()))
        }
        (status, _) if status.is_client_error() => Err(SettlementError::Rejected(body)),
        (status, _) => Err(SettlementError::Transient(format!(
            "gateway responded with {status}: {body}"
        ))),
    }
}

impl SettlementAuthority for HttpSettlementClient {
    async fn submit_spin(
        &self,
        submission: &SpinSubmission,
    ) -> Result<TransactionRef, SettlementError> {
        let response = self
            .http
            .post(format!("{}/spins", self.base_url))
            .json(&SpinRequestDto::from(submission))
            .send()
            .await;
        let dto: SubmittedDto = read_json(response, None).await?;
        Ok(TransactionRef::new(dto.transaction))
    }

    async fn poll_outcome(
        &self,
        transaction: &TransactionRef,
    ) -> Result<PollStatus, SettlementError> {
        let response = self.http.get(self.spin_url(transaction)).send().await;
        let dto: PollDto = read_json(response, Some(transaction)).await?;
        Ok(dto.into())
    }

    async fn claim_spin(&self, transaction: &TransactionRef) -> Result<u64, SettlementError> {
        let response = self
            .http
            .post(format!("{}/claim", self.spin_url(transaction)))
            .send()
            .await;
        let dto: ClaimDto = read_json(response, Some(transaction)).await?;
        Ok(dto.payout)
    }
}

impl ReelLayoutSource for HttpSettlementClient {
    async fn reel_strips(&self) -> Result<Vec<String>, LayoutError> {
        let response = self
            .http
            .get(format!("{}/reels", self.base_url))
            .send()
            .await;
        read_json::<ReelsDto>(response, None)
            .await
            .map(|dto| dto.reels)
            .map_err(|err| LayoutError::Fetch(err.to_string()))
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gateway::SettlementGateway,
        machine::{
            Machine,
            PlayerId,
        },
        simulated::{
            Faults,
            SimulatedSettlement,
            SimulationConfig,
        },
    };
    use reel_engine::queue::{
        Bet,
        SpinId,
    };
    use std::time::Duration;

    fn serve(faults: Faults) -> (SettlementGateway, HttpSettlementClient) {
        let settlement = SimulatedSettlement::new(
            Machine::standard().unwrap(),
            SimulationConfig {
                round_duration: Duration::from_millis(50),
                confirmation_delay: Duration::ZERO,
                chain_seed: [9; 32],
                player: PlayerId::from_name("client"),
                faults,
                ..SimulationConfig::default()
            },
        );
        let gateway = SettlementGateway::new(settlement, None).unwrap();
        let client = HttpSettlementClient::new(format!("{}/", gateway.base_url())).unwrap();
        (gateway, client)
    }

    fn submission(id: u64, per_line: u64) -> SpinSubmission {
        SpinSubmission {
            spin_id: SpinId(id),
            bet: Bet::new(per_line, 1).unwrap(),
        }
    }

    #[tokio::test]
    async fn submit_spin__resubmission_is_idempotent() {
        // given
        let (_gateway, client) = serve(Faults::default());

        // when
        let first = client.submit_spin(&submission(1, 1_000_000)).await.unwrap();
        let second = client.submit_spin(&submission(1, 1_000_000)).await.unwrap();

        // then
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn submit_spin__validation_failure_maps_to_rejected() {
        // given
        let (_gateway, client) = serve(Faults::default());

        // when
        let result = client.submit_spin(&submission(1, 5)).await;

        // then
        assert!(matches!(result, Err(SettlementError::Rejected(reason)) if reason.contains("too small")));
    }

    #[tokio::test]
    async fn poll_outcome__settles_and_unknown_maps_to_unknown_transaction() {
        // given
        let (_gateway, client) = serve(Faults::default());
        let transaction = client.submit_spin(&submission(2, 1_000_000)).await.unwrap();
        let stranger = TransactionRef::new("ff".repeat(56));

        // when
        tokio::time::sleep(Duration::from_millis(150)).await;
        let settled = client.poll_outcome(&transaction).await.unwrap();
        let unknown = client.poll_outcome(&stranger).await;

        // then
        assert!(matches!(settled, PollStatus::ResultAvailable { .. }));
        assert_eq!(unknown, Err(SettlementError::UnknownTransaction(stranger)));
    }

    #[tokio::test]
    async fn poll_outcome__unreachable_node_is_transient() {
        // given
        let (_gateway, client) = serve(Faults {
            transient_polls: 1,
            ..Faults::default()
        });
        let transaction = client.submit_spin(&submission(3, 1_000_000)).await.unwrap();

        // when
        let result = client.poll_outcome(&transaction).await;

        // then
        assert!(matches!(result, Err(SettlementError::Transient(_))));
    }

    #[tokio::test]
    async fn reel_strips__unavailable_layout_is_a_fetch_error() {
        // given
        let (_gateway, client) = serve(Faults {
            layout_unavailable: true,
            ..Faults::default()
        });

        // when
        let result = client.reel_strips().await;

        // then
        assert!(matches!(result, Err(LayoutError::Fetch(_))));
    }

    #[tokio::test]
    async fn submit_spin__gateway_down_is_transient() {
        // given
        let (gateway, client) = serve(Faults::default());
        drop(gateway);

        // when
        let result = client.submit_spin(&submission(1, 1_000_000)).await;

        // then
        assert!(matches!(result, Err(SettlementError::Transient(_))));
    }
}
