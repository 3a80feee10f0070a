//! Proposal lifecycle: create, accept, decline, complete
//!
//! The cost of a trade is derived once, at creation, from the recipient's
//! rate multiplier for the requested skill. Transitions are one-way and go
//! through the repository's compare-and-swap update, so a concurrent
//! transition loses the race cleanly instead of double-firing the feed.

use crate::error::{AppError, AppResult};
use crate::models::{derive_cost_minutes, Proposal, ProposalStatus, TradeRole};
use crate::repositories::{AccountRepository, ProposalRepository};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// The sent/received split the clients render
#[derive(Debug, Serialize)]
pub struct ProposalInbox {
    pub sent: Vec<Proposal>,
    pub received: Vec<Proposal>,
}

/// Service for managing trade proposals
pub struct ProposalService {
    proposal_repo: Arc<ProposalRepository>,
    account_repo: Arc<AccountRepository>,
}

impl ProposalService {
    pub fn new(proposal_repo: Arc<ProposalRepository>, account_repo: Arc<AccountRepository>) -> Self {
        Self {
            proposal_repo,
            account_repo,
        }
    }

    /// Create a pending proposal. The recipient must teach the requested
    /// skill; its multiplier fixes the cost for the proposal's lifetime.
    pub async fn create(
        &self,
        proposer_id: Uuid,
        recipient_id: Uuid,
        skill_name: &str,
        duration_minutes: i64,
    ) -> AppResult<Proposal> {
        if proposer_id == recipient_id {
            return Err(AppError::Validation(
                "Cannot propose a trade with yourself".to_string(),
            ));
        }
        if duration_minutes < 1 {
            return Err(AppError::Validation(format!(
                "Duration must be positive, got {}",
                duration_minutes
            )));
        }

        // Both accounts must exist up front; settlement still has to cope
        // with accounts deleted later.
        self.account_repo
            .find_by_id(proposer_id)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::NotFound(format!("Account {} not found", proposer_id)))?;

        let recipient = self
            .account_repo
            .find_by_id(recipient_id)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::NotFound(format!("Account {} not found", recipient_id)))?;

        let multiplier = recipient.multiplier_for(skill_name).ok_or_else(|| {
            AppError::Validation(format!(
                "Account {} does not teach '{}'",
                recipient_id, skill_name
            ))
        })?;

        let cost = derive_cost_minutes(duration_minutes, multiplier).ok_or_else(|| {
            AppError::Validation(format!(
                "Cost derivation failed for {} minutes at {}x",
                duration_minutes, multiplier
            ))
        })?;

        let proposal = self
            .proposal_repo
            .create(proposer_id, recipient_id, skill_name, duration_minutes, cost)
            .await
            .map_err(AppError::from)?;

        info!(
            "Proposal {} created: {} minutes of '{}' for {} minutes of balance",
            proposal.id, duration_minutes, skill_name, cost
        );

        Ok(proposal)
    }

    /// Accept a pending proposal. Only the recipient may accept.
    pub async fn accept(&self, proposal_id: Uuid, actor_id: Uuid) -> AppResult<Proposal> {
        self.transition(proposal_id, actor_id, ProposalStatus::Accepted)
            .await
    }

    /// Decline a pending proposal. Only the recipient may decline.
    pub async fn decline(&self, proposal_id: Uuid, actor_id: Uuid) -> AppResult<Proposal> {
        self.transition(proposal_id, actor_id, ProposalStatus::Declined)
            .await
    }

    /// Mark an accepted proposal completed. Either participant may do this;
    /// the transfer itself is picked up from the change feed.
    pub async fn complete(&self, proposal_id: Uuid, actor_id: Uuid) -> AppResult<Proposal> {
        self.transition(proposal_id, actor_id, ProposalStatus::Completed)
            .await
    }

    async fn transition(
        &self,
        proposal_id: Uuid,
        actor_id: Uuid,
        next: ProposalStatus,
    ) -> AppResult<Proposal> {
        let proposal = self
            .proposal_repo
            .find_by_id(proposal_id)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", proposal_id)))?;

        let role = proposal.participant_role(actor_id).ok_or_else(|| {
            AppError::Unauthorized(format!(
                "Account {} is not a participant in proposal {}",
                actor_id, proposal_id
            ))
        })?;

        // Accepting or declining is the recipient's call; completion can
        // come from either side.
        if next != ProposalStatus::Completed && role != TradeRole::Recipient {
            return Err(AppError::Unauthorized(format!(
                "Only the recipient can {} proposal {}",
                next.as_str(),
                proposal_id
            )));
        }

        let current = proposal.status_enum();
        if !current.can_transition_to(next) {
            return Err(AppError::BusinessLogic(format!(
                "Proposal {} cannot move from '{}' to '{}'",
                proposal_id,
                current.as_str(),
                next.as_str()
            )));
        }

        let updated = self
            .proposal_repo
            .update_status(proposal_id, current, next)
            .await
            .map_err(AppError::from)?;

        info!(
            "Proposal {} moved from '{}' to '{}' by {}",
            proposal_id,
            current.as_str(),
            next.as_str(),
            actor_id
        );

        Ok(updated)
    }

    /// Everything an account has sent or received
    pub async fn proposals_for(&self, account_id: Uuid) -> AppResult<ProposalInbox> {
        let sent = self
            .proposal_repo
            .list_sent(account_id)
            .await
            .map_err(AppError::from)?;
        let received = self
            .proposal_repo
            .list_received(account_id)
            .await
            .map_err(AppError::from)?;

        Ok(ProposalInbox { sent, received })
    }
}
