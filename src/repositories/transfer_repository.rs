//! Read access to the transfer ledger

use crate::error::RepositoryError;
use crate::models::TimeTransfer;
use sqlx::PgPool;
use uuid::Uuid;

const TRANSFER_COLUMNS: &str = "id, proposal_id, proposer_id, recipient_id, minutes, \
     proposer_balance_before, proposer_balance_after, \
     recipient_balance_before, recipient_balance_after, created_at";

pub struct TransferRepository {
    pool: PgPool,
}

impl TransferRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The ledger record for a proposal, if it has been settled
    pub async fn find_by_proposal(
        &self,
        proposal_id: Uuid,
    ) -> Result<Option<TimeTransfer>, RepositoryError> {
        let transfer = sqlx::query_as::<_, TimeTransfer>(&format!(
            r#"
            SELECT {}
            FROM time_transfers
            WHERE proposal_id = $1
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(proposal_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transfer)
    }

    /// Transfer history for an account on either side, newest first
    pub async fn list_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TimeTransfer>, RepositoryError> {
        let transfers = sqlx::query_as::<_, TimeTransfer>(&format!(
            r#"
            SELECT {}
            FROM time_transfers
            WHERE proposer_id = $1 OR recipient_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(transfers)
    }
}
