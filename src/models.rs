//! Persisted types. Common audit columns are carried by an embedded [`Audit`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Audit {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

impl Audit {
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            deleted: false,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    pub fn soft_delete(&mut self, now: DateTime<Utc>) {
        self.deleted = true;
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Global role; `None` means no global authorities.
    pub role_id: Option<Uuid>,
    pub audit: Audit,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub audit: Audit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Permission {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub audit: Audit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Module {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    pub active: bool,
    pub audit: Audit,
}

/// A `(user, module, role)` binding. Unique per triple; revocation removes the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleRole {
    pub id: Uuid,
    pub user_id: Uuid,
    pub module_id: Uuid,
    pub role_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Read model joining a binding with its module and role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleGrant {
    pub binding_id: Uuid,
    pub module_id: Uuid,
    pub module_key: String,
    pub module_active: bool,
    pub role_id: Uuid,
    pub role_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub refresh_token_hash: Vec<u8>,
    pub device_id: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    pub audit: Audit,
}

impl Session {
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.audit.deleted && self.expires_at > now
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub refresh_token_hash: Vec<u8>,
    pub device_id: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Append-only failure log row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginFailureAttempt {
    pub id: Uuid,
    pub username: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

/// Shared lock state for one username.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Lockout {
    pub locked_until: Option<DateTime<Utc>>,
    /// Failures before this instant no longer count toward the threshold.
    pub reset_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordResetToken {
    pub id: Uuid,
    pub token_hash: Vec<u8>,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub audit: Audit,
}

impl PasswordResetToken {
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at && !self.used && !self.audit.deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap_or_default()
    }

    fn session(expires_at: DateTime<Utc>) -> Session {
        Session {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            refresh_token_hash: vec![1, 2, 3],
            device_id: "d1".to_string(),
            ip: None,
            user_agent: None,
            last_activity: at(0),
            expires_at,
            active: true,
            audit: Audit::new(at(0)),
        }
    }

    #[test]
    fn session_usable_only_while_active_live_and_unexpired() {
        let now = at(1_000);
        let mut live = session(now + Duration::seconds(1));
        assert!(live.is_usable(now));

        assert!(!session(now).is_usable(now));

        live.active = false;
        assert!(!live.is_usable(now));

        let mut deleted = session(now + Duration::hours(1));
        deleted.audit.soft_delete(now);
        assert!(!deleted.is_usable(now));
    }

    #[test]
    fn reset_token_validity() {
        let now = at(5_000);
        let mut token = PasswordResetToken {
            id: Uuid::now_v7(),
            token_hash: vec![9],
            user_id: Uuid::now_v7(),
            expires_at: now + Duration::minutes(30),
            used: false,
            audit: Audit::new(now),
        };
        assert!(token.is_valid(now));
        assert!(!token.is_valid(now + Duration::minutes(30)));

        token.used = true;
        assert!(!token.is_valid(now));

        token.used = false;
        token.audit.soft_delete(now);
        assert!(!token.is_valid(now));
    }
}
