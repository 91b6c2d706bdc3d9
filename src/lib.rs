//! # Custodia (authentication and authorization core)
//!
//! `custodia` issues and rotates access/refresh tokens, tracks one session per
//! user device, throttles brute-force logins with a temporary lockout, evaluates
//! module-scoped roles and permissions, and runs the one-time password-reset flow.
//!
//! ## Tokens
//!
//! Access and refresh tokens are compact HS256 tokens signed with a shared secret.
//! Refresh tokens are single-use: every refresh rotates the session row, and a
//! stale refresh token is rejected. Only SHA-256 digests of refresh and reset
//! tokens are persisted.
//!
//! ## Lockout
//!
//! Failed logins are appended to a log and counted over a sliding window. Lock
//! state lives in the store next to the log, so every instance sees it as soon
//! as the failing request returns.
//!
//! ## Authorization
//!
//! A user holds one global role plus any number of `(module, role)` bindings.
//! The binding table is the single source of truth; module-scoped checks are
//! evaluated against it on every call so revocation takes effect immediately.
//! Inactive modules and deleted roles never contribute authorities.

pub mod api;
pub mod authz;
pub mod cli;
pub mod clock;
pub mod error;
pub mod guard;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod password;
pub mod reset;
pub mod session;
pub mod store;
pub mod token;
pub mod validate;

pub use error::{AuthError, StoreError};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
