//! Domain models for the SkillSwap backend.
//!
//! This module contains all database-backed models representing
//! the core entities of the skill-trading marketplace.

pub mod account;
pub mod proposal;
pub mod transfer;

// Re-export all models for convenient access
pub use account::{TaughtSkill, UserAccount, STARTING_TIME_BALANCE_MINUTES};
pub use proposal::{
    derive_cost_minutes, Proposal, ProposalEvent, ProposalStatus, ProposalUpdated,
    DEFAULT_SESSION_MINUTES,
};
pub use transfer::{TimeTransfer, TradeRole};
