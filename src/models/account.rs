use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Time balance granted to every account at registration (one hour).
pub const STARTING_TIME_BALANCE_MINUTES: i64 = 60;

/// A skill an account offers to teach, priced as a rate multiplier
/// over the base session duration (1.0 = base rate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaughtSkill {
    pub skill_name: String,
    pub multiplier: Decimal,
}

/// User account holding the time-currency balance.
///
/// `revision` is the document version used for optimistic concurrency:
/// every balance write bumps it, and a transfer commit only applies if
/// the revisions it read are still current.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserAccount {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub time_balance: i64,
    pub skills_to_teach: Value, // JSONB array of TaughtSkill
    pub skills_to_learn: Value, // JSONB array of skill names
    pub member_since: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub revision: i64,
}

impl UserAccount {
    /// Create a new account with the starting time balance.
    pub fn new(email: String, display_name: String, skills_to_teach: &[TaughtSkill]) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: Uuid::new_v4(),
            email,
            display_name,
            time_balance: STARTING_TIME_BALANCE_MINUTES,
            skills_to_teach: serde_json::to_value(skills_to_teach).unwrap_or(Value::Array(vec![])),
            skills_to_learn: Value::Array(vec![]),
            member_since: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Get taught skills as typed entries, skipping malformed ones
    pub fn taught_skills(&self) -> Vec<TaughtSkill> {
        match &self.skills_to_teach {
            Value::Array(arr) => arr
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect(),
            _ => vec![],
        }
    }

    /// Get skills the account wants to learn
    pub fn learning_skills(&self) -> Vec<String> {
        match &self.skills_to_learn {
            Value::Array(arr) => arr
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            _ => vec![],
        }
    }

    /// Look up the rate multiplier for a skill this account teaches
    pub fn multiplier_for(&self, skill_name: &str) -> Option<Decimal> {
        self.taught_skills()
            .into_iter()
            .find(|s| s.skill_name == skill_name)
            .map(|s| s.multiplier)
    }
}
