use reel_engine::{
    queue::{
        Bet,
        SpinId,
    },
    settlement::{
        PollStatus,
        SpinSubmission,
    },
    symbols::OutcomeGrid,
};
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReelsDto {
    pub reels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpinRequestDto {
    pub spin_id: u64,
    pub bet_per_line: u64,
    pub paylines: u32,
    pub total_bet: u64,
}

impl From<&SpinSubmission> for SpinRequestDto {
    fn from(submission: &SpinSubmission) -> Self {
        Self {
            spin_id: submission.spin_id.0,
            bet_per_line: submission.bet.bet_per_line,
            paylines: submission.bet.selected_paylines,
            total_bet: submission.bet.total_bet,
        }
    }
}

impl SpinRequestDto {
    pub fn into_submission(self) -> Result<SpinSubmission, String> {
        let bet = Bet::validated(self.bet_per_line, self.paylines, self.total_bet)
            .map_err(|err| err.to_string())?;
        Ok(SpinSubmission {
            spin_id: SpinId(self.spin_id),
            bet,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmittedDto {
    pub transaction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollDto {
    Pending,
    Confirmed,
    Settled { outcome: OutcomeGrid, winnings: u64 },
}

impl From<PollStatus> for PollDto {
    fn from(status: PollStatus) -> Self {
        match status {
            PollStatus::Pending => PollDto::Pending,
            PollStatus::Confirmed => PollDto::Confirmed,
            PollStatus::ResultAvailable { outcome, winnings } => {
                PollDto::Settled { outcome, winnings }
            }
        }
    }
}

impl From<PollDto> for PollStatus {
    fn from(dto: PollDto) -> Self {
        match dto {
            PollDto::Pending => PollStatus::Pending,
            PollDto::Confirmed => PollStatus::Confirmed,
            PollDto::Settled { outcome, winnings } => {
                PollStatus::ResultAvailable { outcome, winnings }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimDto {
    pub payout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDto {
    pub error: String,
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_dto__settled_is_tagged_with_plain_grid() {
        // given
        let dto = PollDto::Settled {
            outcome: OutcomeGrid::parse("ABCABCABCABCABC").unwrap(),
            winnings: 30,
        };

        // when
        let json = serde_json::to_value(&dto).unwrap();

        // then
        assert_eq!(
            json,
            serde_json::json!({
                "status": "settled",
                "outcome": "ABCABCABCABCABC",
                "winnings": 30,
            })
        );
    }

    #[test]
    fn spin_request_dto__inconsistent_total_is_refused() {
        // given
        let dto = SpinRequestDto {
            spin_id: 1,
            bet_per_line: 1_000_000,
            paylines: 2,
            total_bet: 3_000_000,
        };

        // when
        let result = dto.into_submission();

        // then
        assert!(result.unwrap_err().contains("total bet"));
    }
}
