//! SkillSwap Backend Service
//!
//! Entry point for the settlement backend. Runs two background workers
//! over a shared Postgres pool:
//! - the proposal change-feed watcher, which settles completed trades
//! - a reconciliation sweep for completed trades whose transfer never landed

mod config;
mod database;
mod error;
mod models;
mod repositories;
mod services;
mod store;

use config::AppConfig;
use database::{create_pool, run_migrations, Database};
use error::{AppError, AppResult};
use repositories::*;
use services::{ProposalService, ProposalWatcher, Reconciler, SettlementService};
use store::AccountStore;
use std::sync::Arc;
use tracing::{error, info};

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

#[tokio::main]
async fn main() -> AppResult<()> {
    // .env first, so AppConfig sees it
    dotenv::dotenv().ok();

    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        AppError::Config(e)
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("skillswap_backend={},sqlx=warn", config.log_level).into()
            }),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           SkillSwap Backend Service Starting              ║");
    info!("╚══════════════════════════════════════════════════════════╝");
    info!("Environment: {}", config.environment);
    info!("Log level: {}", config.log_level);

    // =========================================================================
    // DATABASE
    // =========================================================================
    info!("Connecting to Postgres...");

    let pool = create_pool(&config.database).await.map_err(|e| {
        error!("Failed to create database pool: {}", e);
        AppError::Database(e)
    })?;

    info!(
        "Connection pool ready ({} max connections)",
        config.database.max_connections
    );

    info!("Applying migrations...");
    run_migrations(&pool, None).await.map_err(|e| {
        error!("Migration failed: {}", e);
        AppError::Database(e)
    })?;
    info!("Migrations up to date");

    // =========================================================================
    // SERVICES
    // =========================================================================
    let app_state = Arc::new(AppState::new(pool.clone()));
    info!("✓ Repositories initialized");

    // Settlement runs against the Postgres-backed account store
    let account_store: Arc<dyn AccountStore> = app_state.account_repo.clone();
    let settlement = Arc::new(SettlementService::new(account_store));
    info!("✓ Settlement service initialized");

    // Lifecycle entry points for the client-facing API layer
    let _proposal_service = Arc::new(ProposalService::new(
        app_state.proposal_repo.clone(),
        app_state.account_repo.clone(),
    ));
    info!("✓ Proposal service initialized");

    // =========================================================================
    // BACKGROUND WORKERS
    // =========================================================================

    // The watcher drains the proposal change feed and settles completions
    let watcher = ProposalWatcher::new(app_state.proposal_repo.clone(), settlement.clone())
        .with_poll_interval(config.watcher.poll_interval())
        .with_batch_size(config.watcher.batch_size);

    let watcher_handle = tokio::spawn(async move {
        watcher.start().await;
    });
    info!(
        "✓ Proposal watcher started ({}s interval)",
        config.watcher.poll_interval_secs
    );

    // The reconciler sweeps for completed proposals with no transfer row
    let reconciler_handle = if config.reconciler.enabled {
        let reconciler = Reconciler::new(app_state.proposal_repo.clone(), settlement.clone())
            .with_sweep_interval(config.reconciler.interval())
            .with_batch_size(config.reconciler.batch_size);

        let handle = tokio::spawn(async move {
            reconciler.start().await;
        });
        info!(
            "✓ Reconciler started ({}s interval)",
            config.reconciler.interval_secs
        );
        Some(handle)
    } else {
        info!("Reconciler disabled by configuration");
        None
    };

    // =========================================================================
    // READY
    // =========================================================================
    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           SkillSwap Backend Service Ready!                ║");
    info!("╚══════════════════════════════════════════════════════════╝");
    info!("Press Ctrl+C to shut down");

    // =========================================================================
    // SHUTDOWN
    // =========================================================================
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping workers...");
        }
        _ = watcher_handle => {
            error!("Proposal watcher exited unexpectedly");
        }
        _ = async {
            if let Some(handle) = reconciler_handle {
                handle.await.ok();
            } else {
                // Never completes when the reconciler is not running
                futures::future::pending::<()>().await;
            }
        } => {
            error!("Reconciler exited unexpectedly");
        }
    }

    info!("SkillSwap backend service shutdown complete");
    Ok(())
}
