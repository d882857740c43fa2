use thiserror::Error;

use crate::store::StoreError;

/// Failure of a farm operation. Every variant carries a message meant to be
/// shown to the user as-is.
#[derive(Debug, Error)]
pub enum FarmError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    /// The remote API answered, but reported failure.
    #[error("{0}")]
    Upstream(String),

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Internal(String),
}

impl FarmError {
    pub fn not_found(kind: &str, id: u64) -> Self {
        Self::NotFound(format!("{kind} with ID {id} not found"))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type FarmResult<T> = Result<T, FarmError>;
