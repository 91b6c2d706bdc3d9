//! One-time password reset tokens: `Issued -> Used`, or `Issued -> Expired` by time.
//!
//! At most one valid token exists per user; issuing a new one invalidates the rest.
//! The raw token only leaves through the returned value. The store keeps its digest.

use crate::{
    clock::{Clock, MAX_LIFETIME_MINUTES},
    error::{AuthError, Result},
    models::{Audit, PasswordResetToken, User},
    password::Credentials,
    session::SessionRegistry,
    store::{bounded, ResetTokenStore, UserStore},
    token::{generate_opaque_token, hash_opaque_token},
    validate::check_password_strength,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResetConfig {
    ttl: Duration,
}

impl ResetConfig {
    /// Tokens live 30 minutes by default.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ttl: Duration::minutes(30),
        }
    }

    #[must_use]
    pub fn with_ttl_minutes(mut self, minutes: i64) -> Self {
        self.ttl = Duration::minutes(minutes.clamp(1, MAX_LIFETIME_MINUTES));
        self
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A freshly issued token, ready for delivery.
#[derive(Clone, Debug)]
pub struct IssuedReset {
    pub token: String,
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

pub struct PasswordResetFlow {
    users: Arc<dyn UserStore>,
    tokens: Arc<dyn ResetTokenStore>,
    sessions: Arc<SessionRegistry>,
    credentials: Credentials,
    clock: Arc<dyn Clock>,
    config: ResetConfig,
    deadline: std::time::Duration,
}

impl PasswordResetFlow {
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStore>,
        tokens: Arc<dyn ResetTokenStore>,
        sessions: Arc<SessionRegistry>,
        credentials: Credentials,
        clock: Arc<dyn Clock>,
        config: ResetConfig,
        deadline: std::time::Duration,
    ) -> Self {
        Self {
            users,
            tokens,
            sessions,
            credentials,
            clock,
            config,
            deadline,
        }
    }

    /// Invalidate the user's outstanding tokens and mint a new one.
    ///
    /// # Errors
    /// [`AuthError::NotFound`] for an unknown email. Callers facing the network
    /// should not reveal this distinction.
    pub async fn request_reset(&self, email: &str) -> Result<IssuedReset> {
        let user = bounded(self.deadline, self.users.find_user_by_email(email))
            .await?
            .ok_or_else(|| AuthError::NotFound("user".to_string()))?;

        let now = self.clock.now();
        let token = generate_opaque_token()?;
        let expires_at = now
            .checked_add_signed(self.config.ttl)
            .ok_or_else(|| AuthError::Internal("reset token lifetime overflows".to_string()))?;
        let record = PasswordResetToken {
            id: Uuid::now_v7(),
            token_hash: hash_opaque_token(&token),
            user_id: user.id,
            expires_at,
            used: false,
            audit: Audit::new(now),
        };
        let invalidated =
            bounded(self.deadline, self.tokens.replace_for_user(record, now)).await?;
        info!(user_id = %user.id, invalidated, "password reset token issued");

        Ok(IssuedReset {
            token,
            user,
            expires_at,
        })
    }

    /// Set a new password with a valid token. The token is burned and every
    /// session of the user is invalidated.
    ///
    /// # Errors
    /// [`AuthError::Mismatch`] when the confirmation differs,
    /// [`AuthError::Validation`] for a weak password and
    /// [`AuthError::InvalidOrExpired`] for an unknown, used or expired token.
    pub async fn consume(
        &self,
        token: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<User> {
        if new_password != confirm_password {
            return Err(AuthError::Mismatch);
        }
        check_password_strength(new_password)?;

        let record = bounded(
            self.deadline,
            self.tokens.find_unused(&hash_opaque_token(token)),
        )
        .await?
        .ok_or(AuthError::InvalidOrExpired)?;
        if !record.is_valid(self.clock.now()) {
            return Err(AuthError::InvalidOrExpired);
        }
        let user = bounded(self.deadline, self.users.find_user_by_id(record.user_id))
            .await?
            .ok_or(AuthError::InvalidOrExpired)?;

        // Hash before burning the token so a hashing failure leaves it usable.
        let password_hash = self.credentials.hash(new_password).await?;

        let now = self.clock.now();
        let consumed = bounded(
            self.deadline,
            self.tokens
                .consume_with_password(record.id, user.id, &password_hash, now),
        )
        .await?;
        if !consumed {
            return Err(AuthError::InvalidOrExpired);
        }
        let revoked = self.sessions.invalidate_all_for_user(user.id).await?;
        info!(user_id = %user.id, revoked, "password reset completed");

        Ok(User {
            password_hash,
            ..user
        })
    }
}
