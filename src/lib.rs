//! SkillSwap settlement backend library.
//!
//! Exposes the configuration, storage, and service layers to the binary
//! and to the integration tests.

pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod repositories;
pub mod services;
pub mod store;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

use database::Database;
use repositories::*;
use std::sync::Arc;

/// Shared state: the pool plus the repositories built over it
pub struct AppState {
    pub database: Database,
    pub account_repo: Arc<AccountRepository>,
    pub proposal_repo: Arc<ProposalRepository>,
    pub transfer_repo: Arc<TransferRepository>,
}

impl AppState {
    pub fn new(pool: sqlx::PgPool) -> Self {
        let database = Database::new(pool.clone());

        Self {
            database,
            account_repo: Arc::new(AccountRepository::new(pool.clone())),
            proposal_repo: Arc::new(ProposalRepository::new(pool.clone())),
            transfer_repo: Arc::new(TransferRepository::new(pool)),
        }
    }
}
