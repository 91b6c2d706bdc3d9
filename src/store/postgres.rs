//! PostgreSQL backend.
//!
//! Every statement runs under a `db.query` span. Multi-row invariants lean on the
//! partial unique indexes in `sql/schema.sql`: one usable session per
//! `(user, device)` and one live row per username, email, role, permission and
//! module key.

use super::{
    DirectoryStore, LoginAttemptStore, ResetTokenStore, SessionStore, StoreResult, UserStore,
};
use crate::{
    error::StoreError,
    models::{
        Audit, LoginFailureAttempt, Lockout, Module, ModuleGrant, ModuleRole, NewSession, NewUser,
        PasswordResetToken, Permission, Role, Session, User,
    },
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Row,
};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../sql/schema.sql");

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a small pool to `dsn`.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Apply `sql/schema.sql`. Safe to run on every start.
    ///
    /// # Errors
    /// Returns an error if any DDL statement fails.
    pub async fn migrate(&self) -> Result<()> {
        let span = query_span("DDL", "sql/schema.sql");
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("Failed to apply database schema")?;
        Ok(())
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn query_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

/// SQLSTATE 23505.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}

/// Map a unique violation to [`StoreError::Conflict`] naming `what`.
fn conflict_as(err: sqlx::Error, what: &str) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict(what.to_string())
    } else {
        StoreError::Database(err)
    }
}

fn audit_from_row(row: &PgRow) -> Result<Audit, sqlx::Error> {
    Ok(Audit {
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted: row.try_get("deleted")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        role_id: row.try_get("role_id")?,
        audit: audit_from_row(row)?,
    })
}

fn session_from_row(row: &PgRow) -> Result<Session, sqlx::Error> {
    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        refresh_token_hash: row.try_get("refresh_token_hash")?,
        device_id: row.try_get("device_id")?,
        ip: row.try_get("ip")?,
        user_agent: row.try_get("user_agent")?,
        last_activity: row.try_get("last_activity")?,
        expires_at: row.try_get("expires_at")?,
        active: row.try_get("active")?,
        audit: audit_from_row(row)?,
    })
}

fn reset_token_from_row(row: &PgRow) -> Result<PasswordResetToken, sqlx::Error> {
    Ok(PasswordResetToken {
        id: row.try_get("id")?,
        token_hash: row.try_get("token_hash")?,
        user_id: row.try_get("user_id")?,
        expires_at: row.try_get("expires_at")?,
        used: row.try_get("used")?,
        audit: audit_from_row(row)?,
    })
}

fn role_from_row(row: &PgRow) -> Result<Role, sqlx::Error> {
    Ok(Role {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        audit: audit_from_row(row)?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<Permission, sqlx::Error> {
    Ok(Permission {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        audit: audit_from_row(row)?,
    })
}

fn module_from_row(row: &PgRow) -> Result<Module, sqlx::Error> {
    Ok(Module {
        id: row.try_get("id")?,
        key: row.try_get("module_key")?,
        name: row.try_get("name")?,
        active: row.try_get("active")?,
        audit: audit_from_row(row)?,
    })
}

fn binding_from_row(row: &PgRow) -> Result<ModuleRole, sqlx::Error> {
    Ok(ModuleRole {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        module_id: row.try_get("module_id")?,
        role_id: row.try_get("role_id")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl UserStore for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        let query = "SELECT 1";
        let span = query_span("SELECT", query);
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let query = r"
            SELECT id, username, email, password_hash, first_name, last_name, role_id,
                   created_at, updated_at, deleted
            FROM users
            WHERE id = $1 AND NOT deleted
        ";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let query = r"
            SELECT id, username, email, password_hash, first_name, last_name, role_id,
                   created_at, updated_at, deleted
            FROM users
            WHERE username = $1 AND NOT deleted
        ";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let query = r"
            SELECT id, username, email, password_hash, first_name, last_name, role_id,
                   created_at, updated_at, deleted
            FROM users
            WHERE email = $1 AND NOT deleted
        ";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn insert_user(&self, user: NewUser, now: DateTime<Utc>) -> StoreResult<User> {
        let query = r"
            INSERT INTO users
                (id, username, email, password_hash, first_name, last_name, role_id,
                 created_at, updated_at, deleted)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, FALSE)
            RETURNING id, username, email, password_hash, first_name, last_name, role_id,
                      created_at, updated_at, deleted
        ";
        let span = query_span("INSERT", query);
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.role_id)
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| {
                let field = if violated_constraint(&err).is_some_and(|name| name.contains("email")) {
                    "email"
                } else {
                    "username"
                };
                conflict_as(err, field)
            })?;
        Ok(user_from_row(&row)?)
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn upsert_for_device(
        &self,
        session: NewSession,
        now: DateTime<Utc>,
    ) -> StoreResult<Session> {
        let query = r"
            INSERT INTO sessions
                (id, user_id, refresh_token_hash, device_id, ip, user_agent,
                 last_activity, expires_at, active, created_at, updated_at, deleted)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, $7, $7, FALSE)
            ON CONFLICT (user_id, device_id) WHERE active AND NOT deleted
            DO UPDATE SET
                refresh_token_hash = EXCLUDED.refresh_token_hash,
                ip = EXCLUDED.ip,
                user_agent = EXCLUDED.user_agent,
                expires_at = EXCLUDED.expires_at,
                last_activity = EXCLUDED.last_activity,
                updated_at = EXCLUDED.updated_at
            RETURNING id, user_id, refresh_token_hash, device_id, ip, user_agent,
                      last_activity, expires_at, active, created_at, updated_at, deleted
        ";
        let span = query_span("INSERT", query);
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(session.user_id)
            .bind(&session.refresh_token_hash)
            .bind(&session.device_id)
            .bind(&session.ip)
            .bind(&session.user_agent)
            .bind(now)
            .bind(session.expires_at)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| conflict_as(err, "refresh token"))?;
        Ok(session_from_row(&row)?)
    }

    async fn find_by_refresh_hash(
        &self,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>> {
        let query = r"
            SELECT id, user_id, refresh_token_hash, device_id, ip, user_agent,
                   last_activity, expires_at, active, created_at, updated_at, deleted
            FROM sessions
            WHERE refresh_token_hash = $1 AND active AND NOT deleted AND expires_at > $2
        ";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(session_from_row).transpose()?)
    }

    async fn find_by_user_device(
        &self,
        user_id: Uuid,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>> {
        let query = r"
            SELECT id, user_id, refresh_token_hash, device_id, ip, user_agent,
                   last_activity, expires_at, active, created_at, updated_at, deleted
            FROM sessions
            WHERE user_id = $1 AND device_id = $2 AND active AND NOT deleted AND expires_at > $3
        ";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(device_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(session_from_row).transpose()?)
    }

    async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<Vec<Session>> {
        let query = r"
            SELECT id, user_id, refresh_token_hash, device_id, ip, user_agent,
                   last_activity, expires_at, active, created_at, updated_at, deleted
            FROM sessions
            WHERE user_id = $1 AND active AND NOT deleted AND expires_at > $2
            ORDER BY last_activity DESC
        ";
        let span = query_span("SELECT", query);
        let rows = sqlx::query(query)
            .bind(user_id)
            .bind(now)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;
        Ok(rows
            .iter()
            .map(session_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn rotate(
        &self,
        session_id: Uuid,
        current_hash: &[u8],
        new_hash: Vec<u8>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>> {
        let query = r"
            UPDATE sessions
            SET refresh_token_hash = $3, expires_at = $4, last_activity = $5, updated_at = $5
            WHERE id = $1
              AND refresh_token_hash = $2
              AND active AND NOT deleted AND expires_at > $5
            RETURNING id, user_id, refresh_token_hash, device_id, ip, user_agent,
                      last_activity, expires_at, active, created_at, updated_at, deleted
        ";
        let span = query_span("UPDATE", query);
        let row = sqlx::query(query)
            .bind(session_id)
            .bind(current_hash)
            .bind(&new_hash)
            .bind(expires_at)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| conflict_as(err, "refresh token"))?;
        Ok(row.as_ref().map(session_from_row).transpose()?)
    }

    async fn deactivate_by_refresh_hash(
        &self,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let query = r"
            UPDATE sessions SET active = FALSE, updated_at = $2
            WHERE refresh_token_hash = $1 AND active
        ";
        let span = query_span("UPDATE", query);
        let result = sqlx::query(query)
            .bind(hash)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }

    async fn deactivate_by_user_device(
        &self,
        user_id: Uuid,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let query = r"
            UPDATE sessions SET active = FALSE, updated_at = $3
            WHERE user_id = $1 AND device_id = $2 AND active
        ";
        let span = query_span("UPDATE", query);
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(device_id)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }

    async fn deactivate_by_id(
        &self,
        session_id: Uuid,
        owner: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let query = r"
            UPDATE sessions SET active = FALSE, updated_at = $3
            WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2) AND active
        ";
        let span = query_span("UPDATE", query);
        let result = sqlx::query(query)
            .bind(session_id)
            .bind(owner)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }

    async fn deactivate_all_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        let query = r"
            UPDATE sessions SET active = FALSE, updated_at = $2
            WHERE user_id = $1 AND active
        ";
        let span = query_span("UPDATE", query);
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let query = r"
            UPDATE sessions SET active = FALSE, updated_at = $1
            WHERE active AND expires_at < $1
        ";
        let span = query_span("UPDATE", query);
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LoginAttemptStore for PgStore {
    async fn append_failure(&self, attempt: LoginFailureAttempt) -> StoreResult<()> {
        let query = r"
            INSERT INTO login_failure_attempts
                (id, username, ip, user_agent, device_id, attempted_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        let span = query_span("INSERT", query);
        sqlx::query(query)
            .bind(attempt.id)
            .bind(&attempt.username)
            .bind(&attempt.ip)
            .bind(&attempt.user_agent)
            .bind(&attempt.device_id)
            .bind(attempt.attempted_at)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn count_failures_since(
        &self,
        username: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<u32> {
        let query = r"
            SELECT COUNT(*) AS failures
            FROM login_failure_attempts
            WHERE username = $1 AND attempted_at >= $2
        ";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(username)
            .bind(since)
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;
        let failures: i64 = row.try_get("failures")?;
        Ok(u32::try_from(failures).unwrap_or(u32::MAX))
    }

    async fn lockout(&self, username: &str) -> StoreResult<Option<Lockout>> {
        let query = "SELECT locked_until, reset_at FROM login_lockouts WHERE username = $1";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        let lockout = row
            .map(|row| -> Result<Lockout, sqlx::Error> {
                Ok(Lockout {
                    locked_until: row.try_get("locked_until")?,
                    reset_at: row.try_get("reset_at")?,
                })
            })
            .transpose()?;
        Ok(lockout)
    }

    async fn set_locked_until(
        &self,
        username: &str,
        locked_until: DateTime<Utc>,
    ) -> StoreResult<()> {
        let query = r"
            INSERT INTO login_lockouts (username, locked_until)
            VALUES ($1, $2)
            ON CONFLICT (username) DO UPDATE SET locked_until = EXCLUDED.locked_until
        ";
        let span = query_span("INSERT", query);
        sqlx::query(query)
            .bind(username)
            .bind(locked_until)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn mark_reset(&self, username: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let query = r"
            INSERT INTO login_lockouts (username, locked_until, reset_at)
            VALUES ($1, NULL, $2)
            ON CONFLICT (username) DO UPDATE SET locked_until = NULL, reset_at = EXCLUDED.reset_at
        ";
        let span = query_span("INSERT", query);
        sqlx::query(query)
            .bind(username)
            .bind(at)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn prune_lockouts(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let query = r"
            DELETE FROM login_lockouts
            WHERE (locked_until IS NULL OR (locked_until <= $1 AND locked_until < $2))
              AND (reset_at IS NULL OR reset_at < $2)
        ";
        let span = query_span("DELETE", query);
        let result = sqlx::query(query)
            .bind(now)
            .bind(stale_before)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ResetTokenStore for PgStore {
    async fn replace_for_user(
        &self,
        token: PasswordResetToken,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        let query = r"
            UPDATE password_reset_tokens SET deleted = TRUE, updated_at = $2
            WHERE user_id = $1 AND NOT used AND NOT deleted
        ";
        let span = query_span("UPDATE", query);
        let invalidated = sqlx::query(query)
            .bind(token.user_id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(span)
            .await?
            .rows_affected();

        let query = r"
            INSERT INTO password_reset_tokens
                (id, token_hash, user_id, expires_at, used, created_at, updated_at, deleted)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";
        let span = query_span("INSERT", query);
        sqlx::query(query)
            .bind(token.id)
            .bind(&token.token_hash)
            .bind(token.user_id)
            .bind(token.expires_at)
            .bind(token.used)
            .bind(token.audit.created_at)
            .bind(token.audit.updated_at)
            .bind(token.audit.deleted)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(|err| conflict_as(err, "reset token"))?;

        tx.commit().await?;
        Ok(invalidated)
    }

    async fn find_unused(&self, hash: &[u8]) -> StoreResult<Option<PasswordResetToken>> {
        let query = r"
            SELECT id, token_hash, user_id, expires_at, used, created_at, updated_at, deleted
            FROM password_reset_tokens
            WHERE token_hash = $1 AND NOT used
        ";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(reset_token_from_row).transpose()?)
    }

    async fn consume_with_password(
        &self,
        token_id: Uuid,
        user_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let query = r"
            UPDATE password_reset_tokens SET used = TRUE, updated_at = $3
            WHERE id = $1 AND user_id = $2 AND NOT used AND NOT deleted AND expires_at > $3
        ";
        let span = query_span("UPDATE", query);
        let burned = sqlx::query(query)
            .bind(token_id)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(span)
            .await?
            .rows_affected();
        if burned != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        let query = r"
            UPDATE users
            SET password_hash = $2, updated_at = $3
            WHERE id = $1 AND NOT deleted
        ";
        let span = query_span("UPDATE", query);
        let updated = sqlx::query(query)
            .bind(user_id)
            .bind(password_hash)
            .bind(now)
            .execute(&mut *tx)
            .instrument(span)
            .await?
            .rows_affected();
        if updated != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl DirectoryStore for PgStore {
    async fn insert_role(
        &self,
        name: &str,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Role> {
        let query = r"
            INSERT INTO roles (id, name, description, created_at, updated_at, deleted)
            VALUES ($1, $2, $3, $4, $4, FALSE)
            RETURNING id, name, description, created_at, updated_at, deleted
        ";
        let span = query_span("INSERT", query);
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(name)
            .bind(description)
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| conflict_as(err, "role"))?;
        Ok(role_from_row(&row)?)
    }

    async fn find_role_by_id(&self, id: Uuid) -> StoreResult<Option<Role>> {
        let query = r"
            SELECT id, name, description, created_at, updated_at, deleted
            FROM roles WHERE id = $1 AND NOT deleted
        ";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(role_from_row).transpose()?)
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let query = r"
            SELECT id, name, description, created_at, updated_at, deleted
            FROM roles WHERE name = $1 AND NOT deleted
        ";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(role_from_row).transpose()?)
    }

    async fn soft_delete_role(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        let query = "UPDATE roles SET deleted = TRUE, updated_at = $2 WHERE id = $1 AND NOT deleted";
        let span = query_span("UPDATE", query);
        sqlx::query(query)
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(span)
            .await?;

        let query = "DELETE FROM module_roles WHERE role_id = $1";
        let span = query_span("DELETE", query);
        let removed = sqlx::query(query)
            .bind(id)
            .execute(&mut *tx)
            .instrument(span)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed)
    }

    async fn insert_permission(
        &self,
        name: &str,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Permission> {
        let query = r"
            INSERT INTO permissions (id, name, description, created_at, updated_at, deleted)
            VALUES ($1, $2, $3, $4, $4, FALSE)
            RETURNING id, name, description, created_at, updated_at, deleted
        ";
        let span = query_span("INSERT", query);
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(name)
            .bind(description)
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| conflict_as(err, "permission"))?;
        Ok(permission_from_row(&row)?)
    }

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>> {
        let query = r"
            SELECT id, name, description, created_at, updated_at, deleted
            FROM permissions WHERE name = $1 AND NOT deleted
        ";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(permission_from_row).transpose()?)
    }

    async fn grant_permission(&self, role_id: Uuid, permission_id: Uuid) -> StoreResult<bool> {
        let query = r"
            INSERT INTO role_permissions (role_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
        ";
        let span = query_span("INSERT", query);
        let result = sqlx::query(query)
            .bind(role_id)
            .bind(permission_id)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn role_permissions(&self, role_id: Uuid) -> StoreResult<Vec<Permission>> {
        let query = r"
            SELECT p.id, p.name, p.description, p.created_at, p.updated_at, p.deleted
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id AND NOT p.deleted
            WHERE rp.role_id = $1
            ORDER BY p.name
        ";
        let span = query_span("SELECT", query);
        let rows = sqlx::query(query)
            .bind(role_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;
        Ok(rows
            .iter()
            .map(permission_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn insert_module(
        &self,
        key: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Module> {
        let query = r"
            INSERT INTO modules (id, module_key, name, active, created_at, updated_at, deleted)
            VALUES ($1, $2, $3, TRUE, $4, $4, FALSE)
            RETURNING id, module_key, name, active, created_at, updated_at, deleted
        ";
        let span = query_span("INSERT", query);
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(key)
            .bind(name)
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| conflict_as(err, "module"))?;
        Ok(module_from_row(&row)?)
    }

    async fn find_module_by_id(&self, id: Uuid) -> StoreResult<Option<Module>> {
        let query = r"
            SELECT id, module_key, name, active, created_at, updated_at, deleted
            FROM modules WHERE id = $1 AND NOT deleted
        ";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(module_from_row).transpose()?)
    }

    async fn find_module_by_key(&self, key: &str) -> StoreResult<Option<Module>> {
        let query = r"
            SELECT id, module_key, name, active, created_at, updated_at, deleted
            FROM modules WHERE module_key = $1 AND NOT deleted
        ";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(module_from_row).transpose()?)
    }

    async fn set_module_active(
        &self,
        id: Uuid,
        active: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let query = r"
            UPDATE modules SET active = $2, updated_at = $3
            WHERE id = $1 AND NOT deleted
        ";
        let span = query_span("UPDATE", query);
        let result = sqlx::query(query)
            .bind(id)
            .bind(active)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn soft_delete_module(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        let query =
            "UPDATE modules SET deleted = TRUE, updated_at = $2 WHERE id = $1 AND NOT deleted";
        let span = query_span("UPDATE", query);
        sqlx::query(query)
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(span)
            .await?;

        let query = "DELETE FROM module_roles WHERE module_id = $1";
        let span = query_span("DELETE", query);
        let removed = sqlx::query(query)
            .bind(id)
            .execute(&mut *tx)
            .instrument(span)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed)
    }

    async fn insert_binding(
        &self,
        user_id: Uuid,
        module_id: Uuid,
        role_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<ModuleRole> {
        let query = r"
            INSERT INTO module_roles (id, user_id, module_id, role_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, module_id, role_id, created_at
        ";
        let span = query_span("INSERT", query);
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(user_id)
            .bind(module_id)
            .bind(role_id)
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| conflict_as(err, "module role"))?;
        Ok(binding_from_row(&row)?)
    }

    async fn find_binding(&self, id: Uuid) -> StoreResult<Option<ModuleRole>> {
        let query = "SELECT id, user_id, module_id, role_id, created_at FROM module_roles WHERE id = $1";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(binding_from_row).transpose()?)
    }

    async fn delete_binding(&self, id: Uuid) -> StoreResult<bool> {
        let query = "DELETE FROM module_roles WHERE id = $1";
        let span = query_span("DELETE", query);
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn grants_for_user(&self, user_id: Uuid) -> StoreResult<Vec<ModuleGrant>> {
        let query = r"
            SELECT mr.id AS binding_id, m.id AS module_id, m.module_key, m.active AS module_active,
                   r.id AS role_id, r.name AS role_name
            FROM module_roles mr
            JOIN modules m ON m.id = mr.module_id AND NOT m.deleted
            JOIN roles r ON r.id = mr.role_id AND NOT r.deleted
            WHERE mr.user_id = $1
            ORDER BY m.module_key, r.name
        ";
        let span = query_span("SELECT", query);
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;
        let grants = rows
            .iter()
            .map(|row| -> Result<ModuleGrant, sqlx::Error> {
                Ok(ModuleGrant {
                    binding_id: row.try_get("binding_id")?,
                    module_id: row.try_get("module_id")?,
                    module_key: row.try_get("module_key")?,
                    module_active: row.try_get("module_active")?,
                    role_id: row.try_get("role_id")?,
                    role_name: row.try_get("role_name")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(grants)
    }

    async fn bindings_in_module(&self, module_id: Uuid) -> StoreResult<Vec<ModuleRole>> {
        let query = r"
            SELECT id, user_id, module_id, role_id, created_at
            FROM module_roles WHERE module_id = $1
            ORDER BY created_at
        ";
        let span = query_span("SELECT", query);
        let rows = sqlx::query(query)
            .bind(module_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;
        Ok(rows
            .iter()
            .map(binding_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn has_module_role(
        &self,
        user_id: Uuid,
        module_key: &str,
        role_name: &str,
    ) -> StoreResult<bool> {
        let query = r"
            SELECT EXISTS (
                SELECT 1
                FROM module_roles mr
                JOIN modules m ON m.id = mr.module_id AND m.active AND NOT m.deleted
                JOIN roles r ON r.id = mr.role_id AND NOT r.deleted
                WHERE mr.user_id = $1 AND m.module_key = $2 AND r.name = $3
            ) AS granted
        ";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(module_key)
            .bind(role_name)
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.try_get("granted")?)
    }

    async fn has_module_permission(
        &self,
        user_id: Uuid,
        module_key: &str,
        permission: &str,
    ) -> StoreResult<bool> {
        let query = r"
            SELECT EXISTS (
                SELECT 1
                FROM module_roles mr
                JOIN modules m ON m.id = mr.module_id AND m.active AND NOT m.deleted
                JOIN roles r ON r.id = mr.role_id AND NOT r.deleted
                JOIN role_permissions rp ON rp.role_id = r.id
                JOIN permissions p ON p.id = rp.permission_id AND NOT p.deleted
                WHERE mr.user_id = $1 AND m.module_key = $2 AND p.name = $3
            ) AS granted
        ";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(module_key)
            .bind(permission)
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.try_get("granted")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::{borrow::Cow, error::Error as StdError, fmt};

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
        constraint: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn constraint(&self) -> Option<&str> {
            self.constraint
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    fn db_error(code: &'static str, constraint: Option<&'static str>) -> sqlx::Error {
        sqlx::Error::Database(Box::new(TestDbError {
            code: Some(code),
            constraint,
        }))
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        assert!(is_unique_violation(&db_error("23505", None)));
        assert!(!is_unique_violation(&db_error("99999", None)));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn unique_violations_become_conflicts() {
        let err = conflict_as(db_error("23505", Some("roles_name_live")), "role");
        assert!(matches!(err, StoreError::Conflict(ref what) if what == "role"));

        let err = conflict_as(db_error("40001", None), "role");
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn violated_constraint_reads_the_index_name() {
        let err = db_error("23505", Some("users_email_live"));
        assert_eq!(violated_constraint(&err), Some("users_email_live"));
        assert_eq!(violated_constraint(&sqlx::Error::RowNotFound), None);
    }

    #[test]
    fn schema_declares_the_partial_session_index() {
        assert!(SCHEMA.contains("sessions_user_device_active"));
        assert!(SCHEMA.contains("WHERE active AND NOT deleted"));
    }
}
