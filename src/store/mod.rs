//! Storage seam for account balances and the transfer ledger.
//!
//! Settlement talks to storage through [`AccountStore`] so the same
//! handler runs against Postgres in production and against
//! [`MemoryStore`] in tests. Commits are conditional on the revision
//! observed at read time; a lost race surfaces as [`CommitError::Conflict`]
//! and the caller re-reads and retries.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{TimeTransfer, UserAccount};

pub use memory::MemoryStore;

/// Opaque backend failure (connection loss, constraint violation, ...).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Why a conditional commit was not applied.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("Account {0} was modified since it was read")]
    Conflict(Uuid),

    #[error("Account {0} does not exist")]
    MissingAccount(Uuid),

    #[error("Proposal {0} already has a transfer recorded")]
    AlreadySettled(Uuid),

    #[error(transparent)]
    Backend(#[from] StoreError),
}

/// One conditional balance write: applied only if the account's revision
/// still equals `expected_revision`.
#[derive(Debug, Clone)]
pub struct BalanceWrite {
    pub account_id: Uuid,
    pub expected_revision: i64,
    pub new_balance: i64,
}

/// Everything one settlement commits: the ledger record plus the two
/// balance writes. The store applies all three atomically or none.
#[derive(Debug, Clone)]
pub struct TransferWrites {
    pub record: TimeTransfer,
    pub debit: BalanceWrite,
    pub credit: BalanceWrite,
}

/// Storage operations the settlement handler needs.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fetch one account snapshot, including its current revision.
    async fn read_account(&self, account_id: Uuid) -> Result<Option<UserAccount>, StoreError>;

    /// Whether a transfer row has already been recorded for this proposal.
    async fn transfer_exists(&self, proposal_id: Uuid) -> Result<bool, StoreError>;

    /// Atomically record the transfer and apply both balance writes,
    /// provided no account moved past its expected revision and the
    /// proposal has not been settled before.
    async fn commit_transfer(&self, writes: TransferWrites) -> Result<(), CommitError>;
}
