pub mod proposal_service;
pub mod proposal_watcher;
pub mod reconciler;
pub mod settlement;

pub use proposal_service::{ProposalInbox, ProposalService};
pub use proposal_watcher::ProposalWatcher;
pub use reconciler::Reconciler;
pub use settlement::{
    SettlementService, TransferError, TransferOutcome, DEFAULT_MAX_COMMIT_ATTEMPTS,
};
