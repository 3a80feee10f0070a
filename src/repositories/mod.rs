pub mod account_repository;
pub mod proposal_repository;
pub mod transfer_repository;

// Re-export all repositories for convenient access
pub use account_repository::AccountRepository;
pub use proposal_repository::ProposalRepository;
pub use transfer_repository::TransferRepository;
