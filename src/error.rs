//! Error taxonomy for the auth core.
//!
//! Every failure is request-scoped. Store problems are kept apart from security
//! decisions: a timed-out lockout check surfaces as [`StoreError::Timeout`], never
//! as "not locked".

use crate::token::TokenError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store deadline exceeded")]
    Timeout,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Account temporarily locked")]
    AccountLocked { retry_after_seconds: i64 },
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Session is invalid or expired")]
    SessionInvalid,
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Invalid or expired token")]
    InvalidOrExpired,
    #[error("Passwords do not match")]
    Mismatch,
    #[error("Forbidden")]
    Forbidden,
    #[error("{0}")]
    Validation(String),
    #[error("Failed to deliver notification: {0}")]
    Delivery(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Retryable failures that say nothing about the caller's credentials.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Store(StoreError::Timeout))
    }
}

// Callers only ever learn that a token was rejected.
impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Issue(reason) => Self::Internal(reason),
            TokenError::Malformed | TokenError::InvalidSignature => Self::InvalidToken,
        }
    }
}

pub type Result<T, E = AuthError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_failures_collapse_to_invalid_token() {
        assert!(matches!(
            AuthError::from(TokenError::Malformed),
            AuthError::InvalidToken
        ));
        assert!(matches!(
            AuthError::from(TokenError::InvalidSignature),
            AuthError::InvalidToken
        ));
        assert_eq!(
            AuthError::from(TokenError::InvalidSignature).to_string(),
            AuthError::from(TokenError::Malformed).to_string()
        );
    }

    #[test]
    fn only_timeouts_are_transient() {
        assert!(AuthError::Store(StoreError::Timeout).is_transient());
        assert!(!AuthError::InvalidCredentials.is_transient());
        assert!(!AuthError::Store(StoreError::Conflict("user".to_string())).is_transient());
    }
}
