use thiserror::Error;

use crate::domain::{Cents, PageError, UserId};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Wallet not found for user {0}")]
    AccountNotFound(UserId),

    #[error("Sender wallet not found for user {0}")]
    SenderNotFound(UserId),

    #[error("Recipient wallet not found for user {0}")]
    RecipientNotFound(UserId),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Insufficient balance for user {user_id}: balance {balance}, required {required}")]
    InsufficientBalance {
        user_id: UserId,
        balance: Cents,
        required: Cents,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("A user with contact {0} already exists")]
    DuplicateContact(String),

    #[error("Ledger store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    Database(anyhow::Error),
}

impl AppError {
    /// Failures that may succeed if the caller issues the same call again.
    /// Nothing is retried on the caller's behalf.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_) | AppError::Timeout(_))
    }
}

impl From<PageError> for AppError {
    fn from(err: PageError) -> Self {
        AppError::InvalidArgument(err.to_string())
    }
}

/// SQLite primary result codes that mean "try again later".
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Storage errors arrive as `anyhow` chains wrapping a `sqlx::Error`.
/// Sort out the ones that mean the store is unreachable or contended from
/// genuine failures.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<sqlx::Error>() {
            Some(sqlx::Error::PoolTimedOut) => AppError::Timeout(format!("{:#}", err)),
            Some(sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed) => {
                AppError::StoreUnavailable(format!("{:#}", err))
            }
            Some(sqlx::Error::Database(db_err)) if is_busy_code(db_err.code().as_deref()) => {
                AppError::StoreUnavailable(format!("{:#}", err))
            }
            _ => AppError::Database(err),
        }
    }
}

fn is_busy_code(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .map(|c| matches!(c & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false)
}

/// True when `err` is the store rejecting a duplicate value for a unique
/// column.
pub(crate) fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<sqlx::Error>(),
        Some(sqlx::Error::Database(db_err)) if db_err.is_unique_violation()
    )
}
