//! In-memory [`AccountStore`] used by unit and behavior tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{TimeTransfer, UserAccount};
use crate::store::{AccountStore, CommitError, StoreError, TransferWrites};

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, UserAccount>,
    settled: HashMap<Uuid, TimeTransfer>,
    // Next N commits fail with Conflict without applying anything
    forced_conflicts: u64,
}

/// HashMap-backed store with the same commit semantics as the Postgres
/// repository: revision-checked writes, all-or-nothing application, one
/// ledger row per proposal. Tracks read and commit counts so tests can
/// assert how much I/O a code path performed.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    reads: AtomicU64,
    commits: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_account(&self, account: UserAccount) {
        let mut inner = self.inner.write().await;
        inner.accounts.insert(account.id, account);
    }

    pub async fn remove_account(&self, account_id: Uuid) {
        let mut inner = self.inner.write().await;
        inner.accounts.remove(&account_id);
    }

    /// Current snapshot of an account, bypassing the read counter.
    pub async fn account(&self, account_id: Uuid) -> Option<UserAccount> {
        let inner = self.inner.read().await;
        inner.accounts.get(&account_id).cloned()
    }

    /// The ledger record for a proposal, if it has been settled.
    pub async fn transfer_for(&self, proposal_id: Uuid) -> Option<TimeTransfer> {
        let inner = self.inner.read().await;
        inner.settled.get(&proposal_id).cloned()
    }

    pub async fn settled_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.settled.len()
    }

    /// Force the next `n` commits to fail with a revision conflict.
    pub async fn inject_conflicts(&self, n: u64) {
        let mut inner = self.inner.write().await;
        inner.forced_conflicts = n;
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn read_account(&self, account_id: Uuid) -> Result<Option<UserAccount>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.read().await;
        Ok(inner.accounts.get(&account_id).cloned())
    }

    async fn transfer_exists(&self, proposal_id: Uuid) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.settled.contains_key(&proposal_id))
    }

    async fn commit_transfer(&self, writes: TransferWrites) -> Result<(), CommitError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.write().await;

        if inner.forced_conflicts > 0 {
            inner.forced_conflicts -= 1;
            return Err(CommitError::Conflict(writes.debit.account_id));
        }

        if inner.settled.contains_key(&writes.record.proposal_id) {
            return Err(CommitError::AlreadySettled(writes.record.proposal_id));
        }

        // Validate every write before applying any of them
        for write in [&writes.debit, &writes.credit] {
            let account = inner
                .accounts
                .get(&write.account_id)
                .ok_or(CommitError::MissingAccount(write.account_id))?;
            if account.revision != write.expected_revision {
                return Err(CommitError::Conflict(write.account_id));
            }
            if write.new_balance < 0 {
                return Err(StoreError::Backend(format!(
                    "check constraint violated: negative balance for account {}",
                    write.account_id
                ))
                .into());
            }
        }

        let now = chrono::Utc::now().naive_utc();
        for write in [&writes.debit, &writes.credit] {
            // Presence was checked above
            if let Some(account) = inner.accounts.get_mut(&write.account_id) {
                account.time_balance = write.new_balance;
                account.revision += 1;
                account.updated_at = now;
            }
        }
        inner.settled.insert(writes.record.proposal_id, writes.record);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::STARTING_TIME_BALANCE_MINUTES;
    use crate::store::BalanceWrite;

    fn account(balance: i64) -> UserAccount {
        let mut a = UserAccount::new("t@example.com".into(), "Tester".into(), &[]);
        a.time_balance = balance;
        a
    }

    fn writes_for(proposal_id: Uuid, debit: &UserAccount, credit: &UserAccount, minutes: i64) -> TransferWrites {
        TransferWrites {
            record: TimeTransfer::new(
                proposal_id,
                debit.id,
                credit.id,
                minutes,
                debit.time_balance,
                credit.time_balance,
            ),
            debit: BalanceWrite {
                account_id: debit.id,
                expected_revision: debit.revision,
                new_balance: debit.time_balance - minutes,
            },
            credit: BalanceWrite {
                account_id: credit.id,
                expected_revision: credit.revision,
                new_balance: credit.time_balance + minutes,
            },
        }
    }

    #[tokio::test]
    async fn test_commit_applies_writes_and_bumps_revisions() {
        let store = MemoryStore::new();
        let proposer = account(100);
        let recipient = account(STARTING_TIME_BALANCE_MINUTES);
        store.insert_account(proposer.clone()).await;
        store.insert_account(recipient.clone()).await;

        let proposal_id = Uuid::new_v4();
        let writes = writes_for(proposal_id, &proposer, &recipient, 40);
        store.commit_transfer(writes).await.unwrap();

        let p = store.account(proposer.id).await.unwrap();
        let r = store.account(recipient.id).await.unwrap();
        assert_eq!(p.time_balance, 60);
        assert_eq!(p.revision, proposer.revision + 1);
        assert_eq!(r.time_balance, 100);
        assert_eq!(r.revision, recipient.revision + 1);
        assert!(store.transfer_for(proposal_id).await.is_some());
    }

    #[tokio::test]
    async fn test_stale_revision_applies_nothing() {
        let store = MemoryStore::new();
        let proposer = account(100);
        let recipient = account(60);
        store.insert_account(proposer.clone()).await;
        store.insert_account(recipient.clone()).await;

        let mut writes = writes_for(Uuid::new_v4(), &proposer, &recipient, 40);
        writes.credit.expected_revision = recipient.revision + 7;

        let err = store.commit_transfer(writes).await.unwrap_err();
        assert!(matches!(err, CommitError::Conflict(id) if id == recipient.id));

        // Neither account changed even though the debit write was valid
        assert_eq!(store.account(proposer.id).await.unwrap().time_balance, 100);
        assert_eq!(store.account(recipient.id).await.unwrap().time_balance, 60);
        assert_eq!(store.settled_count().await, 0);
    }

    #[tokio::test]
    async fn test_second_commit_for_same_proposal_is_rejected() {
        let store = MemoryStore::new();
        let proposer = account(100);
        let recipient = account(60);
        store.insert_account(proposer.clone()).await;
        store.insert_account(recipient.clone()).await;

        let proposal_id = Uuid::new_v4();
        store
            .commit_transfer(writes_for(proposal_id, &proposer, &recipient, 10))
            .await
            .unwrap();

        // Fresh snapshots so the revisions line up; the ledger still blocks it
        let p = store.account(proposer.id).await.unwrap();
        let r = store.account(recipient.id).await.unwrap();
        let err = store
            .commit_transfer(writes_for(proposal_id, &p, &r, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, CommitError::AlreadySettled(id) if id == proposal_id));
        assert_eq!(store.account(proposer.id).await.unwrap().time_balance, 90);
    }

    #[tokio::test]
    async fn test_missing_account_is_reported() {
        let store = MemoryStore::new();
        let proposer = account(100);
        let ghost = account(60);
        store.insert_account(proposer.clone()).await;

        let err = store
            .commit_transfer(writes_for(Uuid::new_v4(), &proposer, &ghost, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, CommitError::MissingAccount(id) if id == ghost.id));
    }

    #[tokio::test]
    async fn test_transfer_exists_tracks_the_ledger() {
        let store = MemoryStore::new();
        let proposer = account(100);
        let recipient = account(60);
        store.insert_account(proposer.clone()).await;
        store.insert_account(recipient.clone()).await;

        let proposal_id = Uuid::new_v4();
        assert!(!store.transfer_exists(proposal_id).await.unwrap());

        store
            .commit_transfer(writes_for(proposal_id, &proposer, &recipient, 10))
            .await
            .unwrap();
        assert!(store.transfer_exists(proposal_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_conflicts_consume_then_clear() {
        let store = MemoryStore::new();
        let proposer = account(100);
        let recipient = account(60);
        store.insert_account(proposer.clone()).await;
        store.insert_account(recipient.clone()).await;
        store.inject_conflicts(2).await;

        for _ in 0..2 {
            let writes = writes_for(Uuid::new_v4(), &proposer, &recipient, 10);
            assert!(matches!(
                store.commit_transfer(writes).await,
                Err(CommitError::Conflict(_))
            ));
        }
        let writes = writes_for(Uuid::new_v4(), &proposer, &recipient, 10);
        assert!(store.commit_transfer(writes).await.is_ok());
        assert_eq!(store.commits(), 3);
    }
}
