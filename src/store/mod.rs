//! Storage seams used by the auth core.
//!
//! Every mutation that must not race (session rotation, reset-token consumption,
//! create-or-rotate per device) is a single store call that the backend performs
//! atomically. Callers wrap each call in [`bounded`] so a slow store yields
//! [`StoreError::Timeout`] instead of hanging the request.

use crate::{
    error::StoreError,
    models::{
        LoginFailureAttempt, Lockout, Module, ModuleGrant, ModuleRole, NewSession, NewUser,
        PasswordResetToken, Permission, Role, Session, User,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{future::Future, time::Duration};
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Run a store call under a deadline.
///
/// # Errors
/// Returns [`StoreError::Timeout`] when the deadline elapses, otherwise the call's own result.
pub async fn bounded<T, F>(deadline: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(deadline, call)
        .await
        .map_err(|_| StoreError::Timeout)?
}

/// Users. Lookups never return soft-deleted rows.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    /// [`StoreError::Conflict`] on a duplicate username or email.
    async fn insert_user(&self, user: NewUser, now: DateTime<Utc>) -> StoreResult<User>;
}

/// Sessions. Lookups only match usable rows (active, not deleted, not expired at `now`).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Overwrite the usable session for `(user, device)` or insert a new one, atomically.
    async fn upsert_for_device(
        &self,
        session: NewSession,
        now: DateTime<Utc>,
    ) -> StoreResult<Session>;
    async fn find_by_refresh_hash(
        &self,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>>;
    async fn find_by_user_device(
        &self,
        user_id: Uuid,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>>;
    async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<Vec<Session>>;
    /// Compare-and-swap on the current refresh hash. `None` when another caller won.
    async fn rotate(
        &self,
        session_id: Uuid,
        current_hash: &[u8],
        new_hash: Vec<u8>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>>;
    async fn deactivate_by_refresh_hash(&self, hash: &[u8], now: DateTime<Utc>)
        -> StoreResult<u64>;
    async fn deactivate_by_user_device(
        &self,
        user_id: Uuid,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
    /// `owner = Some(user)` restricts the update to that user's sessions.
    async fn deactivate_by_id(
        &self,
        session_id: Uuid,
        owner: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
    async fn deactivate_all_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64>;
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// Failure log plus the per-username lock row.
#[async_trait]
pub trait LoginAttemptStore: Send + Sync {
    async fn append_failure(&self, attempt: LoginFailureAttempt) -> StoreResult<()>;
    async fn count_failures_since(
        &self,
        username: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<u32>;
    async fn lockout(&self, username: &str) -> StoreResult<Option<Lockout>>;
    async fn set_locked_until(
        &self,
        username: &str,
        locked_until: DateTime<Utc>,
    ) -> StoreResult<()>;
    /// Clear the lock and move the counting floor to `at`.
    async fn mark_reset(&self, username: &str, at: DateTime<Utc>) -> StoreResult<()>;
    /// Drop lock rows that are unlocked at `now` and untouched since `stale_before`.
    async fn prune_lockouts(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<u64>;
}

#[async_trait]
pub trait ResetTokenStore: Send + Sync {
    /// Invalidate every unused token of the owner, then insert `token`. Returns how many were invalidated.
    async fn replace_for_user(
        &self,
        token: PasswordResetToken,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
    async fn find_unused(&self, hash: &[u8]) -> StoreResult<Option<PasswordResetToken>>;
    /// Flip `used` and set the owner's password hash in one step, if the token is
    /// still valid at `now` and the owner is not deleted. `false` leaves both untouched.
    async fn consume_with_password(
        &self,
        token_id: Uuid,
        user_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
}

/// Roles, permissions, modules and the `(user, module, role)` binding table.
///
/// Lookups skip soft-deleted roles, permissions and modules.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn insert_role(
        &self,
        name: &str,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Role>;
    async fn find_role_by_id(&self, id: Uuid) -> StoreResult<Option<Role>>;
    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;
    /// Soft-delete the role and remove its bindings in one step. Returns removed bindings.
    async fn soft_delete_role(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<u64>;

    async fn insert_permission(
        &self,
        name: &str,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Permission>;
    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>>;
    /// Idempotent; `false` if the pair already existed.
    async fn grant_permission(&self, role_id: Uuid, permission_id: Uuid) -> StoreResult<bool>;
    async fn role_permissions(&self, role_id: Uuid) -> StoreResult<Vec<Permission>>;

    async fn insert_module(&self, key: &str, name: &str, now: DateTime<Utc>)
        -> StoreResult<Module>;
    async fn find_module_by_id(&self, id: Uuid) -> StoreResult<Option<Module>>;
    async fn find_module_by_key(&self, key: &str) -> StoreResult<Option<Module>>;
    async fn set_module_active(
        &self,
        id: Uuid,
        active: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Soft-delete the module and remove its bindings in one step. Returns removed bindings.
    async fn soft_delete_module(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<u64>;

    /// [`StoreError::Conflict`] when the triple already exists.
    async fn insert_binding(
        &self,
        user_id: Uuid,
        module_id: Uuid,
        role_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<ModuleRole>;
    async fn find_binding(&self, id: Uuid) -> StoreResult<Option<ModuleRole>>;
    async fn delete_binding(&self, id: Uuid) -> StoreResult<bool>;
    /// Bindings of a user whose module and role are not deleted. Inactive modules included.
    async fn grants_for_user(&self, user_id: Uuid) -> StoreResult<Vec<ModuleGrant>>;
    async fn bindings_in_module(&self, module_id: Uuid) -> StoreResult<Vec<ModuleRole>>;
    /// Active module with `module_key`, live role named `role_name`.
    async fn has_module_role(
        &self,
        user_id: Uuid,
        module_key: &str,
        role_name: &str,
    ) -> StoreResult<bool>;
    /// Active module with `module_key`, live role holding live permission `permission`.
    async fn has_module_permission(
        &self,
        user_id: Uuid,
        module_key: &str,
        permission: &str,
    ) -> StoreResult<bool>;
}

/// Everything the orchestrator needs from one backend.
pub trait AuthStore:
    UserStore + SessionStore + LoginAttemptStore + ResetTokenStore + DirectoryStore
{
}

impl<T> AuthStore for T where
    T: UserStore + SessionStore + LoginAttemptStore + ResetTokenStore + DirectoryStore
{
}
