//! Authentication endpoints: account creation, sign-in, token refresh, sign-out
//! and password reset.
//!
//! Handlers only translate HTTP into [`crate::orchestrator::AuthOrchestrator`]
//! calls; every decision lives there.

pub mod login;
pub mod logout;
pub mod password;
pub mod refresh;
pub mod register;
pub mod sessions;
pub mod types;
pub mod utils;

use crate::error::AuthError;

pub(crate) fn missing_payload() -> AuthError {
    AuthError::Validation("Missing payload".to_string())
}
