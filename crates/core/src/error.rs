//! Error taxonomy surfaced by the curator. Adapter and database errors are
//! classified here and never handed to callers raw.

use providers::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CuratorError {
    /// The referenced record or remote object does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Another operation raced on the same content; retrying is safe.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Network trouble or a timeout that outlasted the retry budget.
    #[error("transient store failure: {0}")]
    Transient(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A backend refused the request for a reason retrying won't fix.
    #[error("store failure: {0}")]
    Store(String),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T, E = CuratorError> = std::result::Result<T, E>;

impl CuratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CuratorError::Transient(_) | CuratorError::Conflict(_))
    }
}

impl From<ProviderError> for CuratorError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(what) => CuratorError::NotFound(what),
            ProviderError::Conflict(what) => CuratorError::Conflict(what),
            ProviderError::Transient(what) => CuratorError::Transient(what),
            ProviderError::Timeout(what) => CuratorError::Transient(format!("timeout: {what}")),
            ProviderError::InvalidRequest(what) => CuratorError::InvalidInput(what),
            ProviderError::UnknownProvider(what) => CuratorError::Config(what),
            other => CuratorError::Store(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for CuratorError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CuratorError::NotFound("metadata record".into()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                CuratorError::Transient(format!("metadata store: {err}"))
            }
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                CuratorError::Conflict(db.message().to_string())
            }
            sqlx::Error::Database(ref db)
                if db.message().contains("database is locked")
                    || db.message().contains("database is busy") =>
            {
                CuratorError::Transient(db.message().to_string())
            }
            other => CuratorError::Store(format!("metadata store: {other}")),
        }
    }
}
