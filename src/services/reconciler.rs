//! Background task that re-settles completed proposals without a transfer
//!
//! A settlement can fail after the status flip already committed (crash,
//! conflict budget exhausted, account briefly missing). Those proposals stay
//! `completed` with no ledger row. This task sweeps for them on a slow
//! interval and runs settlement again; settlement is idempotent, so sweeping
//! is always safe.

use crate::error::AppResult;
use crate::repositories::ProposalRepository;
use crate::services::{SettlementService, TransferError, TransferOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info, warn};

pub struct Reconciler {
    proposal_repo: Arc<ProposalRepository>,
    settlement: Arc<SettlementService>,
    sweep_interval: Duration,
    batch_size: i64,
}

impl Reconciler {
    pub fn new(proposal_repo: Arc<ProposalRepository>, settlement: Arc<SettlementService>) -> Self {
        Self {
            proposal_repo,
            settlement,
            sweep_interval: Duration::from_secs(300),
            batch_size: 16,
        }
    }

    /// Set sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set how many proposals to re-settle per sweep
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Start sweeping
    pub async fn start(self) {
        let mut interval = time::interval(self.sweep_interval);
        info!(
            "Reconciler started, sweeping every {:?}",
            self.sweep_interval
        );

        loop {
            interval.tick().await;

            if let Err(e) = self.run_once().await {
                error!("Error during reconciliation sweep: {}", e);
            }
        }
    }

    /// One sweep. Returns how many proposals were settled by it.
    pub async fn run_once(&self) -> AppResult<usize> {
        let proposals = self
            .proposal_repo
            .find_unsettled_completed(self.batch_size)
            .await?;

        if proposals.is_empty() {
            return Ok(0);
        }

        info!(
            "Reconciling {} completed proposals without a transfer",
            proposals.len()
        );

        let mut settled = 0;
        for proposal in proposals {
            match self.settlement.settle_proposal(&proposal).await {
                Ok(TransferOutcome::Settled(_)) => {
                    info!("Reconciled proposal {}: transfer recorded", proposal.id);
                    settled += 1;
                }
                Ok(TransferOutcome::AlreadySettled) => {
                    // Lost a benign race with the watcher
                    debug!("Proposal {} settled concurrently", proposal.id);
                }
                Ok(TransferOutcome::Skipped) => {
                    debug!("Proposal {} no longer eligible for settlement", proposal.id);
                }
                Err(e @ TransferError::InsufficientBalance { .. }) => {
                    // Stays unsettled; picked up again next sweep
                    warn!("Proposal {} still cannot settle: {}", proposal.id, e);
                }
                Err(e) => {
                    error!("Reconciliation failed for proposal {}: {}", proposal.id, e);
                }
            }
        }

        Ok(settled)
    }
}
