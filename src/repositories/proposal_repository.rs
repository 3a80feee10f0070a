//! Repository for proposal operations and the proposal change feed
//!
//! Status changes are compare-and-swap updates: the write succeeds only if
//! the row still holds the status the caller saw. Each successful change
//! also appends a before/after event row in the same transaction, which is
//! what the watcher consumes.

use crate::error::RepositoryError;
use crate::models::{Proposal, ProposalEvent, ProposalStatus};
use sqlx::PgPool;
use uuid::Uuid;

const PROPOSAL_COLUMNS: &str = "id, proposer_id, recipient_id, skill_name, duration_minutes, \
     cost_in_minutes, status, created_at, updated_at";

pub struct ProposalRepository {
    pool: PgPool,
}

impl ProposalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Proposal CRUD
    // =========================================================================

    /// Create a new pending proposal with a pre-derived cost
    pub async fn create(
        &self,
        proposer_id: Uuid,
        recipient_id: Uuid,
        skill_name: &str,
        duration_minutes: i64,
        cost_in_minutes: i64,
    ) -> Result<Proposal, RepositoryError> {
        let proposal = sqlx::query_as::<_, Proposal>(&format!(
            r#"
            INSERT INTO proposals (proposer_id, recipient_id, skill_name, duration_minutes, cost_in_minutes, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING {}
            "#,
            PROPOSAL_COLUMNS
        ))
        .bind(proposer_id)
        .bind(recipient_id)
        .bind(skill_name)
        .bind(duration_minutes)
        .bind(cost_in_minutes)
        .fetch_one(&self.pool)
        .await?;

        Ok(proposal)
    }

    /// Find a proposal by UUID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Proposal>, RepositoryError> {
        let proposal = sqlx::query_as::<_, Proposal>(&format!(
            r#"
            SELECT {}
            FROM proposals
            WHERE id = $1
            "#,
            PROPOSAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(proposal)
    }

    /// Proposals an account has sent, newest first
    pub async fn list_sent(&self, proposer_id: Uuid) -> Result<Vec<Proposal>, RepositoryError> {
        let proposals = sqlx::query_as::<_, Proposal>(&format!(
            r#"
            SELECT {}
            FROM proposals
            WHERE proposer_id = $1
            ORDER BY created_at DESC
            "#,
            PROPOSAL_COLUMNS
        ))
        .bind(proposer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(proposals)
    }

    /// Proposals an account has received, newest first
    pub async fn list_received(&self, recipient_id: Uuid) -> Result<Vec<Proposal>, RepositoryError> {
        let proposals = sqlx::query_as::<_, Proposal>(&format!(
            r#"
            SELECT {}
            FROM proposals
            WHERE recipient_id = $1
            ORDER BY created_at DESC
            "#,
            PROPOSAL_COLUMNS
        ))
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(proposals)
    }

    // =========================================================================
    // Status Changes
    // =========================================================================

    /// Move a proposal from `expected` to `next` and append the change feed
    /// row, atomically. Fails with [`RepositoryError::BusinessRule`] when the
    /// row no longer holds `expected`, so concurrent updaters lose cleanly.
    pub async fn update_status(
        &self,
        id: Uuid,
        expected: ProposalStatus,
        next: ProposalStatus,
    ) -> Result<Proposal, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        // Lock the row so the before image and the update line up
        let before = sqlx::query_as::<_, Proposal>(&format!(
            r#"
            SELECT {}
            FROM proposals
            WHERE id = $1
            FOR UPDATE
            "#,
            PROPOSAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("Proposal {} not found", id)))?;

        if before.status_enum() != expected {
            return Err(RepositoryError::BusinessRule(format!(
                "Proposal {} is '{}', expected '{}'",
                id,
                before.status,
                expected.as_str()
            )));
        }

        let after = sqlx::query_as::<_, Proposal>(&format!(
            r#"
            UPDATE proposals
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            PROPOSAL_COLUMNS
        ))
        .bind(id)
        .bind(next.as_str())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO proposal_events (proposal_id, before_image, after_image)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(id)
        .bind(serde_json::to_value(&before)?)
        .bind(serde_json::to_value(&after)?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.map_err(RepositoryError::from)?;

        Ok(after)
    }

    // =========================================================================
    // Change Feed
    // =========================================================================

    /// Oldest change feed rows not yet handed to the settlement handler.
    /// The feed assumes a single consumer per deployment.
    pub async fn fetch_unprocessed_events(
        &self,
        limit: i64,
    ) -> Result<Vec<ProposalEvent>, RepositoryError> {
        let events = sqlx::query_as::<_, ProposalEvent>(
            r#"
            SELECT id, proposal_id, before_image, after_image, created_at, processed_at
            FROM proposal_events
            WHERE processed_at IS NULL
            ORDER BY id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Mark a change feed row as delivered
    pub async fn mark_event_processed(&self, event_id: i64) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE proposal_events
            SET processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Completed proposals with no ledger row, oldest update first. These are
    /// the ones a crashed or failed settlement left behind.
    pub async fn find_unsettled_completed(
        &self,
        limit: i64,
    ) -> Result<Vec<Proposal>, RepositoryError> {
        let proposals = sqlx::query_as::<_, Proposal>(
            r#"
            SELECT p.id, p.proposer_id, p.recipient_id, p.skill_name, p.duration_minutes,
                   p.cost_in_minutes, p.status, p.created_at, p.updated_at
            FROM proposals p
            LEFT JOIN time_transfers t ON t.proposal_id = p.id
            WHERE p.status = 'completed' AND t.id IS NULL
            ORDER BY p.updated_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(proposals)
    }
}
