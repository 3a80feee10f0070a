//! Settlement of completed proposals
//!
//! When a proposal transitions into `completed`, the agreed cost moves from
//! the proposer's time balance to the recipient's. The handler is keyed on
//! the before/after images of the update so replays and unrelated changes
//! fall out at the guard, and the store commit is conditional on the account
//! revisions observed at read time. A lost race re-reads and retries up to a
//! bounded number of attempts; everything else fails terminally for this
//! invocation and is left to the reconciler.

use crate::models::{Proposal, ProposalUpdated, TimeTransfer, TradeRole};
use crate::store::{AccountStore, BalanceWrite, CommitError, StoreError, TransferWrites};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// How many commit attempts before a settlement gives up on revision races
pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 5;

/// Why one settlement invocation failed. Every variant names the proposal so
/// log lines stay greppable per trade.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Account {account_id} ({role}) not found for proposal {proposal_id}")]
    MissingAccount {
        proposal_id: Uuid,
        account_id: Uuid,
        role: TradeRole,
    },

    #[error(
        "Insufficient balance for proposal {proposal_id}: available {available}, required {required}"
    )]
    InsufficientBalance {
        proposal_id: Uuid,
        available: i64,
        required: i64,
    },

    #[error("Invalid transfer cost {cost} for proposal {proposal_id}")]
    InvalidCost { proposal_id: Uuid, cost: i64 },

    #[error("Proposal {proposal_id} has the same account on both sides")]
    InvalidParticipants { proposal_id: Uuid },

    #[error("Gave up settling proposal {proposal_id} after {attempts} conflicting commits")]
    TransactionConflict { proposal_id: Uuid, attempts: u32 },

    #[error("Store failure while settling proposal {proposal_id}: {source}")]
    Store {
        proposal_id: Uuid,
        source: StoreError,
    },
}

/// What a settlement invocation did
#[derive(Debug)]
pub enum TransferOutcome {
    /// The transfer committed; the ledger record is returned
    Settled(TimeTransfer),
    /// The update was not a transition into completed; nothing was read
    Skipped,
    /// Another invocation already settled this proposal
    AlreadySettled,
}

/// Settlement service for completed trade proposals
pub struct SettlementService {
    store: Arc<dyn AccountStore>,
    max_commit_attempts: u32,
}

impl SettlementService {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self {
            store,
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
        }
    }

    /// Set how many commit attempts to make before giving up
    pub fn with_max_commit_attempts(mut self, attempts: u32) -> Self {
        self.max_commit_attempts = attempts.max(1);
        self
    }

    /// Entry point for change feed deliveries. Anything that is not the
    /// transition into `completed` is skipped without touching the store.
    pub async fn handle_update(
        &self,
        update: &ProposalUpdated,
    ) -> Result<TransferOutcome, TransferError> {
        if !update.is_completion() {
            return Ok(TransferOutcome::Skipped);
        }

        self.settle_proposal(&update.after).await
    }

    /// Settle one completed proposal: debit the proposer, credit the
    /// recipient, record the ledger row. Safe to call again for the same
    /// proposal; the second call reports [`TransferOutcome::AlreadySettled`].
    pub async fn settle_proposal(
        &self,
        proposal: &Proposal,
    ) -> Result<TransferOutcome, TransferError> {
        let cost = proposal.cost_in_minutes;
        if cost < 1 {
            return Err(TransferError::InvalidCost {
                proposal_id: proposal.id,
                cost,
            });
        }
        if proposal.proposer_id == proposal.recipient_id {
            return Err(TransferError::InvalidParticipants {
                proposal_id: proposal.id,
            });
        }

        info!(
            "Settling proposal {}: {} minutes from {} to {}",
            proposal.id, cost, proposal.proposer_id, proposal.recipient_id
        );

        for attempt in 1..=self.max_commit_attempts {
            let proposer = self
                .read_participant(proposal, proposal.proposer_id, TradeRole::Proposer)
                .await?;
            let recipient = self
                .read_participant(proposal, proposal.recipient_id, TradeRole::Recipient)
                .await?;

            if proposer.time_balance < cost {
                // A duplicate delivery can land after the proposer re-spent
                // these minutes; the ledger row, not the balance, says which
                // case this is.
                let settled = self
                    .store
                    .transfer_exists(proposal.id)
                    .await
                    .map_err(|source| TransferError::Store {
                        proposal_id: proposal.id,
                        source,
                    })?;
                if settled {
                    info!("Proposal {} was already settled, skipping", proposal.id);
                    return Ok(TransferOutcome::AlreadySettled);
                }
                return Err(TransferError::InsufficientBalance {
                    proposal_id: proposal.id,
                    available: proposer.time_balance,
                    required: cost,
                });
            }

            let record = TimeTransfer::new(
                proposal.id,
                proposer.id,
                recipient.id,
                cost,
                proposer.time_balance,
                recipient.time_balance,
            );
            let writes = TransferWrites {
                record: record.clone(),
                debit: BalanceWrite {
                    account_id: proposer.id,
                    expected_revision: proposer.revision,
                    new_balance: proposer.time_balance - cost,
                },
                credit: BalanceWrite {
                    account_id: recipient.id,
                    expected_revision: recipient.revision,
                    new_balance: recipient.time_balance + cost,
                },
            };

            match self.store.commit_transfer(writes).await {
                Ok(()) => {
                    info!(
                        "Proposal {} settled: proposer {} -> {}, recipient {} -> {}",
                        proposal.id,
                        record.proposer_balance_before,
                        record.proposer_balance_after,
                        record.recipient_balance_before,
                        record.recipient_balance_after
                    );
                    return Ok(TransferOutcome::Settled(record));
                }
                Err(CommitError::Conflict(account_id)) => {
                    if attempt == self.max_commit_attempts {
                        return Err(TransferError::TransactionConflict {
                            proposal_id: proposal.id,
                            attempts: attempt,
                        });
                    }
                    warn!(
                        "Commit conflict on account {} for proposal {} (attempt {}/{}), re-reading",
                        account_id, proposal.id, attempt, self.max_commit_attempts
                    );
                }
                Err(CommitError::AlreadySettled(_)) => {
                    info!("Proposal {} was already settled, skipping", proposal.id);
                    return Ok(TransferOutcome::AlreadySettled);
                }
                Err(CommitError::MissingAccount(account_id)) => {
                    let role = if account_id == proposal.proposer_id {
                        TradeRole::Proposer
                    } else {
                        TradeRole::Recipient
                    };
                    return Err(TransferError::MissingAccount {
                        proposal_id: proposal.id,
                        account_id,
                        role,
                    });
                }
                Err(CommitError::Backend(source)) => {
                    return Err(TransferError::Store {
                        proposal_id: proposal.id,
                        source,
                    });
                }
            }
        }

        // Not reachable with max_commit_attempts >= 1: the final attempt
        // either returns an outcome or the conflict error above.
        Err(TransferError::TransactionConflict {
            proposal_id: proposal.id,
            attempts: self.max_commit_attempts,
        })
    }

    async fn read_participant(
        &self,
        proposal: &Proposal,
        account_id: Uuid,
        role: TradeRole,
    ) -> Result<crate::models::UserAccount, TransferError> {
        self.store
            .read_account(account_id)
            .await
            .map_err(|source| TransferError::Store {
                proposal_id: proposal.id,
                source,
            })?
            .ok_or(TransferError::MissingAccount {
                proposal_id: proposal.id,
                account_id,
                role,
            })
    }
}
