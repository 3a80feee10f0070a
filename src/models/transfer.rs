use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of a trade an account sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeRole {
    Proposer,
    Recipient,
}

impl TradeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeRole::Proposer => "proposer",
            TradeRole::Recipient => "recipient",
        }
    }
}

impl std::fmt::Display for TradeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ledger record of one settled proposal. At most one row exists per
/// proposal; the before/after balances are captured for audit.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TimeTransfer {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub proposer_id: Uuid,
    pub recipient_id: Uuid,
    pub minutes: i64,
    pub proposer_balance_before: i64,
    pub proposer_balance_after: i64,
    pub recipient_balance_before: i64,
    pub recipient_balance_after: i64,
    pub created_at: NaiveDateTime,
}

impl TimeTransfer {
    /// Build the ledger record for a transfer about to be committed.
    pub fn new(
        proposal_id: Uuid,
        proposer_id: Uuid,
        recipient_id: Uuid,
        minutes: i64,
        proposer_balance_before: i64,
        recipient_balance_before: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            proposal_id,
            proposer_id,
            recipient_id,
            minutes,
            proposer_balance_before,
            proposer_balance_after: proposer_balance_before - minutes,
            recipient_balance_before,
            recipient_balance_after: recipient_balance_before + minutes,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// Minutes moved net to zero across the two parties.
    pub fn conserves_minutes(&self) -> bool {
        let debited = self.proposer_balance_before - self.proposer_balance_after;
        let credited = self.recipient_balance_after - self.recipient_balance_before;
        debited == self.minutes && credited == self.minutes
    }
}
