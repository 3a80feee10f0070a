//! Repository for user account operations
//!
//! Every balance write goes through [`AccountStore::commit_transfer`] and is
//! conditional on the revision observed at read time, so two settlements
//! racing over the same account cannot both apply.

use crate::error::RepositoryError;
use crate::models::{TaughtSkill, UserAccount, STARTING_TIME_BALANCE_MINUTES};
use crate::store::{AccountStore, CommitError, StoreError, TransferWrites};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

const ACCOUNT_COLUMNS: &str = "id, email, display_name, time_balance, skills_to_teach, \
     skills_to_learn, member_since, updated_at, revision";

pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create an account seeded with the starting time balance
    pub async fn create(
        &self,
        email: &str,
        display_name: &str,
        skills_to_teach: &serde_json::Value,
        skills_to_learn: &serde_json::Value,
    ) -> Result<UserAccount, RepositoryError> {
        if email.trim().is_empty() {
            return Err(RepositoryError::InvalidInput(
                "Email cannot be empty".to_string(),
            ));
        }
        if display_name.trim().is_empty() {
            return Err(RepositoryError::InvalidInput(
                "Display name cannot be empty".to_string(),
            ));
        }
        validate_taught_skills(skills_to_teach)?;
        validate_learning_skills(skills_to_learn)?;

        let account = sqlx::query_as::<_, UserAccount>(&format!(
            r#"
            INSERT INTO user_accounts (email, display_name, time_balance, skills_to_teach, skills_to_learn)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(email)
        .bind(display_name)
        .bind(STARTING_TIME_BALANCE_MINUTES)
        .bind(skills_to_teach)
        .bind(skills_to_learn)
        .fetch_one(&self.pool)
        .await?;

        Ok(account)
    }

    /// Find an account by UUID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<UserAccount>, RepositoryError> {
        let account = sqlx::query_as::<_, UserAccount>(&format!(
            r#"
            SELECT {}
            FROM user_accounts
            WHERE id = $1
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    /// Find an account by email
    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserAccount>, RepositoryError> {
        let account = sqlx::query_as::<_, UserAccount>(&format!(
            r#"
            SELECT {}
            FROM user_accounts
            WHERE email = $1
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    /// Replace the skill lists on an account. Bumps the revision so any
    /// settlement that read the old snapshot re-reads before committing.
    pub async fn update_skills(
        &self,
        id: Uuid,
        skills_to_teach: &serde_json::Value,
        skills_to_learn: &serde_json::Value,
    ) -> Result<UserAccount, RepositoryError> {
        validate_taught_skills(skills_to_teach)?;
        validate_learning_skills(skills_to_learn)?;

        let account = sqlx::query_as::<_, UserAccount>(&format!(
            r#"
            UPDATE user_accounts
            SET skills_to_teach = $2, skills_to_learn = $3, revision = revision + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .bind(skills_to_teach)
        .bind(skills_to_learn)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("Account {} not found", id)))?;

        Ok(account)
    }

    /// Delete an account. Proposals referencing it are left in place and
    /// settle against a missing account if they later complete.
    pub async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM user_accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// skills_to_teach must be an array of `{skill_name, multiplier}` entries
/// with positive multipliers.
fn validate_taught_skills(value: &serde_json::Value) -> Result<(), RepositoryError> {
    let entries = value.as_array().ok_or_else(|| {
        RepositoryError::InvalidInput("skills_to_teach must be an array".to_string())
    })?;

    for entry in entries {
        let skill: TaughtSkill = serde_json::from_value(entry.clone()).map_err(|e| {
            RepositoryError::InvalidInput(format!("Invalid taught skill entry: {}", e))
        })?;
        if skill.skill_name.trim().is_empty() {
            return Err(RepositoryError::InvalidInput(
                "Skill name cannot be empty".to_string(),
            ));
        }
        if skill.multiplier <= Decimal::ZERO {
            return Err(RepositoryError::InvalidInput(format!(
                "Multiplier for '{}' must be positive, got {}",
                skill.skill_name, skill.multiplier
            )));
        }
    }

    Ok(())
}

/// skills_to_learn must be an array of skill names.
fn validate_learning_skills(value: &serde_json::Value) -> Result<(), RepositoryError> {
    let entries = value.as_array().ok_or_else(|| {
        RepositoryError::InvalidInput("skills_to_learn must be an array".to_string())
    })?;

    for entry in entries {
        if !entry.is_string() {
            return Err(RepositoryError::InvalidInput(
                "skills_to_learn entries must be strings".to_string(),
            ));
        }
    }

    Ok(())
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl AccountStore for AccountRepository {
    async fn read_account(&self, account_id: Uuid) -> Result<Option<UserAccount>, StoreError> {
        self.find_by_id(account_id)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn transfer_exists(&self, proposal_id: Uuid) -> Result<bool, StoreError> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM time_transfers WHERE proposal_id = $1)")
            .bind(proposal_id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)
    }

    async fn commit_transfer(&self, writes: TransferWrites) -> Result<(), CommitError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        // The ledger row is the at-most-once guard: a second settlement of
        // the same proposal hits the unique index and inserts nothing.
        let record = &writes.record;
        let inserted = sqlx::query(
            r#"
            INSERT INTO time_transfers
            (id, proposal_id, proposer_id, recipient_id, minutes,
             proposer_balance_before, proposer_balance_after,
             recipient_balance_before, recipient_balance_after, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (proposal_id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.proposal_id)
        .bind(record.proposer_id)
        .bind(record.recipient_id)
        .bind(record.minutes)
        .bind(record.proposer_balance_before)
        .bind(record.proposer_balance_after)
        .bind(record.recipient_balance_before)
        .bind(record.recipient_balance_after)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if inserted.rows_affected() == 0 {
            return Err(CommitError::AlreadySettled(record.proposal_id));
        }

        for write in [&writes.debit, &writes.credit] {
            let updated = sqlx::query(
                r#"
                UPDATE user_accounts
                SET time_balance = $2, revision = revision + 1, updated_at = NOW()
                WHERE id = $1 AND revision = $3
                "#,
            )
            .bind(write.account_id)
            .bind(write.new_balance)
            .bind(write.expected_revision)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

            if updated.rows_affected() == 0 {
                // Distinguish a deleted account from a lost revision race
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM user_accounts WHERE id = $1)")
                        .bind(write.account_id)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(backend)?;

                return Err(if exists {
                    CommitError::Conflict(write.account_id)
                } else {
                    CommitError::MissingAccount(write.account_id)
                });
            }
        }

        tx.commit().await.map_err(backend)?;

        Ok(())
    }
}
