use thiserror::Error;

use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};

pub type DatabaseResult<T> = Result<T, DatabaseError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Database connection error: {message}")]
    Connection { message: String },

    #[error("Stored value could not be decoded: {message}")]
    Decode { message: String },

    #[error("Database error: {message}")]
    Unknown { message: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        })
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::Decode {
            message: message.into(),
        })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Connection { .. })
    }

    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => DatabaseErrorKind::Connection {
                message: err.to_string(),
            },
            sqlx::Error::Io(ref e) => DatabaseErrorKind::Connection {
                message: e.to_string(),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => DatabaseErrorKind::Decode {
                message: err.to_string(),
            },
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                DatabaseErrorKind::UniqueViolation {
                    constraint: db.constraint().unwrap_or_default().to_string(),
                }
            }
            other => DatabaseErrorKind::Unknown {
                message: other.to_string(),
            },
        };
        Self::new(kind)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let kind = match err.kind {
            DatabaseErrorKind::NotFound { entity, id } => {
                AppErrorKind::Domain(DomainError::NotFound { entity, id })
            }
            DatabaseErrorKind::Connection { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: true,
                })
            }
            DatabaseErrorKind::UniqueViolation { constraint } => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message: format!("unique constraint violated: {}", constraint),
                    is_retryable: false,
                })
            }
            DatabaseErrorKind::Decode { message } | DatabaseErrorKind::Unknown { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: false,
                })
            }
        };
        AppError::new(kind)
    }
}
