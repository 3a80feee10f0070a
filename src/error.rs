use crate::database::DatabaseError;
use sqlx::Error as SqlxError;
use thiserror::Error;

/// Errors surfaced at the application layer.
///
/// Repository errors fold into this type at the service boundary. The
/// settlement path deliberately does not: it reports through its own
/// `TransferError`, which carries the proposal id every failure log needs.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("SQL error: {0}")]
    Sqlx(#[from] SqlxError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected input: non-positive duration, unknown skill, self-trade
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A lifecycle action attempted by the wrong participant
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// An illegal status transition, or a transition that lost its race
    #[error("Business logic error: {0}")]
    BusinessLogic(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Errors produced by the data-access layer.
///
/// `Query` wraps anything sqlx reports that the Postgres error-code mapping
/// below does not recognize.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Query error: {0}")]
    Query(SqlxError),

    #[error("Record not found: {0}")]
    NotFound(String),

    /// Unique violation: a second account on an email, a second transfer
    /// row on a proposal
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// The database backstop fired (non-negative balance CHECK, foreign key)
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A compare-and-swap status update found a different current status
    #[error("Business rule violation: {0}")]
    BusinessRule(String),

    /// JSONB payload construction failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Query(e) => AppError::Sqlx(e),
            RepositoryError::NotFound(msg) => AppError::NotFound(msg),
            RepositoryError::Duplicate(msg) => {
                AppError::BusinessLogic(format!("Duplicate: {}", msg))
            }
            RepositoryError::ConstraintViolation(msg) | RepositoryError::InvalidInput(msg) => {
                AppError::Validation(msg)
            }
            RepositoryError::BusinessRule(msg) => AppError::BusinessLogic(msg),
            RepositoryError::Serialization(e) => AppError::Serialization(e),
        }
    }
}

impl From<SqlxError> for RepositoryError {
    fn from(err: SqlxError) -> Self {
        match &err {
            SqlxError::RowNotFound => RepositoryError::NotFound("Record not found".to_string()),
            SqlxError::Database(db_err) => {
                // Owned copy first so the arm below may take `err` by value
                let code = db_err.code().map(|c| c.to_string());
                match code.as_deref() {
                    // unique_violation
                    Some("23505") => RepositoryError::Duplicate(db_err.message().to_string()),
                    // foreign_key_violation, check_violation (the balance
                    // non-negativity backstop surfaces as the latter)
                    Some("23503") | Some("23514") => {
                        RepositoryError::ConstraintViolation(db_err.message().to_string())
                    }
                    _ => RepositoryError::Query(err),
                }
            }
            _ => RepositoryError::Query(err),
        }
    }
}
