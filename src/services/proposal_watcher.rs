//! Background task that drains the proposal change feed
//!
//! Plays the role of the database trigger: every status change lands in
//! `proposal_events`, and this worker hands each one to the settlement
//! handler. Rows are marked processed whether or not settlement succeeded;
//! a failed transfer is terminal for this delivery and the reconciler owns
//! recovery. One watcher per deployment.

use crate::error::AppResult;
use crate::repositories::ProposalRepository;
use crate::services::{SettlementService, TransferOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info};

pub struct ProposalWatcher {
    proposal_repo: Arc<ProposalRepository>,
    settlement: Arc<SettlementService>,
    poll_interval: Duration,
    batch_size: i64,
}

impl ProposalWatcher {
    pub fn new(proposal_repo: Arc<ProposalRepository>, settlement: Arc<SettlementService>) -> Self {
        Self {
            proposal_repo,
            settlement,
            poll_interval: Duration::from_secs(2),
            batch_size: 32,
        }
    }

    /// Set poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set how many feed rows to take per poll
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Start draining the feed
    pub async fn start(self) {
        let mut interval = time::interval(self.poll_interval);
        info!(
            "Proposal watcher started, polling every {:?}",
            self.poll_interval
        );

        loop {
            interval.tick().await;

            if let Err(e) = self.poll_once().await {
                error!("Error polling proposal feed: {}", e);
            }
        }
    }

    /// Drain one batch of feed rows. Returns how many rows were handled.
    pub async fn poll_once(&self) -> AppResult<usize> {
        let events = self
            .proposal_repo
            .fetch_unprocessed_events(self.batch_size)
            .await?;

        let mut handled = 0;
        for event in events {
            match event.to_update() {
                Ok(update) => {
                    let proposal_id = update.proposal_id();
                    match self.settlement.handle_update(&update).await {
                        Ok(TransferOutcome::Settled(_)) => {
                            info!("Time transfer successful for proposal: {}", proposal_id);
                        }
                        Ok(TransferOutcome::AlreadySettled) => {
                            info!(
                                "Time transfer already recorded for proposal: {}",
                                proposal_id
                            );
                        }
                        Ok(TransferOutcome::Skipped) => {
                            debug!("Ignoring non-completion update for proposal {}", proposal_id);
                        }
                        Err(e) => {
                            error!("Time transfer failed for proposal: {}: {}", proposal_id, e);
                        }
                    }
                }
                Err(e) => {
                    // A poison row must not wedge the feed
                    error!(
                        "Malformed feed images for proposal {}: {}",
                        event.proposal_id, e
                    );
                }
            }

            self.proposal_repo.mark_event_processed(event.id).await?;
            handled += 1;
        }

        Ok(handled)
    }
}
