use chrono::NaiveDateTime;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Base session length offered by the clients (one hour).
pub const DEFAULT_SESSION_MINUTES: i64 = 60;

/// Proposal status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Declined,
    Completed,
}

impl ProposalStatus {
    /// Convert from database string
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ProposalStatus::Pending),
            "accepted" => Ok(ProposalStatus::Accepted),
            "declined" => Ok(ProposalStatus::Declined),
            "completed" => Ok(ProposalStatus::Completed),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }

    /// Convert to database string
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Accepted => "accepted",
            ProposalStatus::Declined => "declined",
            ProposalStatus::Completed => "completed",
        }
    }

    /// Whether the status admits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalStatus::Declined | ProposalStatus::Completed)
    }

    /// Legal one-way transitions: pending may be accepted or declined,
    /// accepted may be completed. Everything else is rejected.
    pub fn can_transition_to(&self, next: ProposalStatus) -> bool {
        matches!(
            (self, next),
            (ProposalStatus::Pending, ProposalStatus::Accepted)
                | (ProposalStatus::Pending, ProposalStatus::Declined)
                | (ProposalStatus::Accepted, ProposalStatus::Completed)
        )
    }
}

impl From<String> for ProposalStatus {
    fn from(s: String) -> Self {
        Self::from_str(&s).unwrap_or(ProposalStatus::Pending)
    }
}

impl From<ProposalStatus> for String {
    fn from(status: ProposalStatus) -> Self {
        status.as_str().to_string()
    }
}

/// A trade proposal: the proposer asks the recipient to teach a skill,
/// paying `cost_in_minutes` of time currency on completion. The cost is
/// fixed at creation and never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Proposal {
    pub id: Uuid,
    pub proposer_id: Uuid,
    pub recipient_id: Uuid,
    pub skill_name: String,
    pub duration_minutes: i64,
    pub cost_in_minutes: i64,
    pub status: String, // Stored as TEXT, use ProposalStatus enum for type safety
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Proposal {
    /// Create a new pending Proposal with a pre-derived cost
    pub fn new(
        proposer_id: Uuid,
        recipient_id: Uuid,
        skill_name: String,
        duration_minutes: i64,
        cost_in_minutes: i64,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: Uuid::new_v4(),
            proposer_id,
            recipient_id,
            skill_name,
            duration_minutes,
            cost_in_minutes,
            status: ProposalStatus::Pending.as_str().to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Get status as an enum
    pub fn status_enum(&self) -> ProposalStatus {
        ProposalStatus::from_str(&self.status).unwrap_or(ProposalStatus::Pending)
    }

    /// Check if the proposal has been completed
    pub fn is_completed(&self) -> bool {
        self.status_enum() == ProposalStatus::Completed
    }

    /// Which side of the trade an account is on, if any
    pub fn participant_role(&self, account_id: Uuid) -> Option<crate::models::TradeRole> {
        if account_id == self.proposer_id {
            Some(crate::models::TradeRole::Proposer)
        } else if account_id == self.recipient_id {
            Some(crate::models::TradeRole::Recipient)
        } else {
            None
        }
    }
}

/// Derive the cost of a session: the base duration scaled by the
/// recipient's rate multiplier for the skill, rounded to whole minutes.
/// Returns None when the inputs or the rounded result are non-positive.
pub fn derive_cost_minutes(duration_minutes: i64, multiplier: Decimal) -> Option<i64> {
    if duration_minutes <= 0 || multiplier <= Decimal::ZERO {
        return None;
    }

    // Half rounds up (away from zero), not to even
    let cost = (Decimal::from(duration_minutes) * multiplier)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    match cost.to_i64() {
        Some(minutes) if minutes >= 1 => Some(minutes),
        _ => None,
    }
}

/// Change-feed row: before/after images of one proposal update, written in
/// the same transaction as the update itself and consumed by the watcher.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProposalEvent {
    pub id: i64,
    pub proposal_id: Uuid,
    pub before_image: serde_json::Value,
    pub after_image: serde_json::Value,
    pub created_at: NaiveDateTime,
    pub processed_at: Option<NaiveDateTime>,
}

impl ProposalEvent {
    /// Deserialize the stored images back into a typed update
    pub fn to_update(&self) -> Result<ProposalUpdated, serde_json::Error> {
        Ok(ProposalUpdated {
            before: serde_json::from_value(self.before_image.clone())?,
            after: serde_json::from_value(self.after_image.clone())?,
        })
    }
}

/// Before/after images of one proposal update, as delivered by the
/// change feed. This is the input the settlement handler is keyed on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalUpdated {
    pub before: Proposal,
    pub after: Proposal,
}

impl ProposalUpdated {
    pub fn new(before: Proposal, after: Proposal) -> Self {
        Self { before, after }
    }

    /// Identifier of the proposal both images belong to
    pub fn proposal_id(&self) -> Uuid {
        self.after.id
    }

    /// The settlement precondition: this update is the transition into
    /// `completed`. Re-deliveries of an already-completed image fail this.
    pub fn is_completion(&self) -> bool {
        self.before.status_enum() != ProposalStatus::Completed && self.after.is_completed()
    }
}
