use crate::tracker::ValidationErrors;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum OrmError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Entity '{0}' is not registered")]
    UnknownEntity(String),

    #[error("Field '{0}' not found on entity '{1}'")]
    UnknownField(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Relation error: {0}")]
    Relation(String),

    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Data source error: {0}")]
    Source(String),

    #[error("Entity '{0}' has not been persisted")]
    NotPersisted(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OrmError {
    /// Returns `true` for failures the caller can fix and retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Source(_))
    }
}

pub type Result<T> = std::result::Result<T, OrmError>;

impl<T> From<std::sync::PoisonError<T>> for OrmError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
