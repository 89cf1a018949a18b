use sea_orm::{ConnAcquireErr, DbErr, SqlErr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("store timeout: {message}")]
    Timeout { message: String },
    #[error("store unavailable: {message}")]
    Unavailable { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("validation error: {message}")]
    Validation { message: String },
    #[error("conflict: {message}")]
    Conflict { message: String },
    #[error("duplicate membership: {message}")]
    DuplicateMembership { message: String },
    #[error("dimension mismatch: expected {expected}, found {found} ({context})")]
    DimensionMismatch {
        expected: usize,
        found: usize,
        context: String,
    },
}

impl ClusterError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn duplicate_membership(message: impl Into<String>) -> Self {
        Self::DuplicateMembership {
            message: message.into(),
        }
    }

    pub fn dimension_mismatch(expected: usize, found: usize, context: impl Into<String>) -> Self {
        Self::DimensionMismatch {
            expected,
            found,
            context: context.into(),
        }
    }

    /// Errors the orchestrator retries with a smaller batch before giving up.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;

impl From<DbErr> for ClusterError {
    fn from(value: DbErr) -> Self {
        if let Some(SqlErr::UniqueConstraintViolation(message)) = value.sql_err() {
            return ClusterError::duplicate_membership(message);
        }
        match value {
            DbErr::ConnectionAcquire(ConnAcquireErr::Timeout) => {
                ClusterError::timeout("connection acquire timed out")
            }
            DbErr::ConnectionAcquire(err) => ClusterError::unavailable(err.to_string()),
            DbErr::Conn(err) => ClusterError::unavailable(err.to_string()),
            other => ClusterError::storage(other.to_string()),
        }
    }
}
