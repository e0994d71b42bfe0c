use thiserror::Error;

use crate::store::StoreError;

/// Failures the relay reports back to the connection that caused them.
///
/// A recipient being offline is not represented here; that is an ordinary
/// branch of delivery, not an error.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    #[error("invalid identity {0:?}")]
    InvalidIdentity(String),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("message store unavailable: {0}")]
    Persistence(#[from] StoreError),
}

impl RelayError {
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Authentication(reason.into())
    }

    /// Stable name used in the `error` event.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Authentication(_) => "authentication",
            RelayError::InvalidMessage(_) => "invalid_message",
            RelayError::InvalidIdentity(_) => "invalid_identity",
            RelayError::Forbidden(_) => "forbidden",
            RelayError::Persistence(_) => "persistence",
        }
    }
}
