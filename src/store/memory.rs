//! Single-process backend. One lock guards every table, so each trait call is atomic.

use super::{
    DirectoryStore, LoginAttemptStore, ResetTokenStore, SessionStore, StoreResult, UserStore,
};
use crate::{
    error::StoreError,
    models::{
        Audit, LoginFailureAttempt, Lockout, Module, ModuleGrant, ModuleRole, NewSession,
        NewUser, PasswordResetToken, Permission, Role, Session, User,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, Session>,
    attempts: Vec<LoginFailureAttempt>,
    lockouts: HashMap<String, Lockout>,
    reset_tokens: HashMap<Uuid, PasswordResetToken>,
    roles: HashMap<Uuid, Role>,
    permissions: HashMap<Uuid, Permission>,
    role_permissions: HashSet<(Uuid, Uuid)>,
    modules: HashMap<Uuid, Module>,
    bindings: HashMap<Uuid, ModuleRole>,
}

impl Tables {
    fn live_module(&self, id: Uuid) -> Option<&Module> {
        self.modules.get(&id).filter(|module| !module.audit.deleted)
    }

    fn live_role(&self, id: Uuid) -> Option<&Role> {
        self.roles.get(&id).filter(|role| !role.audit.deleted)
    }

    fn deactivate<F>(&mut self, now: DateTime<Utc>, mut predicate: F) -> u64
    where
        F: FnMut(&Session) -> bool,
    {
        let mut count = 0;
        for session in self.sessions.values_mut() {
            if session.active && !session.audit.deleted && predicate(session) {
                session.active = false;
                session.audit.touch(now);
                count += 1;
            }
        }
        count
    }

    fn remove_bindings<F>(&mut self, predicate: F) -> u64
    where
        F: Fn(&ModuleRole) -> bool,
    {
        let before = self.bindings.len();
        self.bindings.retain(|_, binding| !predicate(binding));
        (before - self.bindings.len()) as u64
    }

    /// Bindings of `user_id` in the active module `module_key`, with their live role.
    fn scoped_roles<'a>(
        &'a self,
        user_id: Uuid,
        module_key: &'a str,
    ) -> impl Iterator<Item = &'a Role> + 'a {
        self.bindings
            .values()
            .filter(move |binding| binding.user_id == user_id)
            .filter(move |binding| {
                self.live_module(binding.module_id)
                    .is_some_and(|module| module.active && module.key == module_key)
            })
            .filter_map(move |binding| self.live_role(binding.role_id))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .get(&id)
            .filter(|user| !user.audit.deleted)
            .cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|user| !user.audit.deleted && user.username == username)
            .cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|user| !user.audit.deleted && user.email == email)
            .cloned())
    }

    async fn insert_user(&self, user: NewUser, now: DateTime<Utc>) -> StoreResult<User> {
        let mut tables = self.tables.lock().await;
        for existing in tables.users.values().filter(|u| !u.audit.deleted) {
            if existing.username == user.username {
                return Err(StoreError::Conflict("username".to_string()));
            }
            if existing.email == user.email {
                return Err(StoreError::Conflict("email".to_string()));
            }
        }
        let user = User {
            id: Uuid::now_v7(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            role_id: user.role_id,
            audit: Audit::new(now),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn upsert_for_device(
        &self,
        session: NewSession,
        now: DateTime<Utc>,
    ) -> StoreResult<Session> {
        let mut tables = self.tables.lock().await;
        if tables.sessions.values().any(|existing| {
            existing.refresh_token_hash == session.refresh_token_hash
                && !(existing.user_id == session.user_id && existing.device_id == session.device_id)
        }) {
            return Err(StoreError::Conflict("refresh token".to_string()));
        }

        let current = tables.sessions.values_mut().find(|existing| {
            existing.user_id == session.user_id
                && existing.device_id == session.device_id
                && existing.active
                && !existing.audit.deleted
        });
        if let Some(existing) = current {
            existing.refresh_token_hash = session.refresh_token_hash;
            existing.ip = session.ip;
            existing.user_agent = session.user_agent;
            existing.expires_at = session.expires_at;
            existing.last_activity = now;
            existing.audit.touch(now);
            return Ok(existing.clone());
        }

        let created = Session {
            id: Uuid::now_v7(),
            user_id: session.user_id,
            refresh_token_hash: session.refresh_token_hash,
            device_id: session.device_id,
            ip: session.ip,
            user_agent: session.user_agent,
            last_activity: now,
            expires_at: session.expires_at,
            active: true,
            audit: Audit::new(now),
        };
        tables.sessions.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_refresh_hash(
        &self,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .values()
            .find(|session| session.refresh_token_hash == hash && session.is_usable(now))
            .cloned())
    }

    async fn find_by_user_device(
        &self,
        user_id: Uuid,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .values()
            .find(|session| {
                session.user_id == user_id && session.device_id == device_id && session.is_usable(now)
            })
            .cloned())
    }

    async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<Vec<Session>> {
        let tables = self.tables.lock().await;
        let mut sessions: Vec<Session> = tables
            .sessions
            .values()
            .filter(|session| session.user_id == user_id && session.is_usable(now))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(sessions)
    }

    async fn rotate(
        &self,
        session_id: Uuid,
        current_hash: &[u8],
        new_hash: Vec<u8>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>> {
        let mut tables = self.tables.lock().await;
        match tables.sessions.get_mut(&session_id) {
            Some(session) if session.refresh_token_hash == current_hash && session.is_usable(now) => {
                session.refresh_token_hash = new_hash;
                session.expires_at = expires_at;
                session.last_activity = now;
                session.audit.touch(now);
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn deactivate_by_refresh_hash(
        &self,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        Ok(tables.deactivate(now, |session| session.refresh_token_hash == hash))
    }

    async fn deactivate_by_user_device(
        &self,
        user_id: Uuid,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        Ok(tables.deactivate(now, |session| {
            session.user_id == user_id && session.device_id == device_id
        }))
    }

    async fn deactivate_by_id(
        &self,
        session_id: Uuid,
        owner: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        Ok(tables.deactivate(now, |session| {
            session.id == session_id && owner.map_or(true, |user_id| session.user_id == user_id)
        }))
    }

    async fn deactivate_all_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        Ok(tables.deactivate(now, |session| session.user_id == user_id))
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        Ok(tables.deactivate(now, |session| session.expires_at < now))
    }
}

#[async_trait]
impl LoginAttemptStore for MemoryStore {
    async fn append_failure(&self, attempt: LoginFailureAttempt) -> StoreResult<()> {
        self.tables.lock().await.attempts.push(attempt);
        Ok(())
    }

    async fn count_failures_since(
        &self,
        username: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<u32> {
        let tables = self.tables.lock().await;
        let count = tables
            .attempts
            .iter()
            .filter(|attempt| attempt.username == username && attempt.attempted_at >= since)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn lockout(&self, username: &str) -> StoreResult<Option<Lockout>> {
        Ok(self.tables.lock().await.lockouts.get(username).cloned())
    }

    async fn set_locked_until(
        &self,
        username: &str,
        locked_until: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables
            .lockouts
            .entry(username.to_string())
            .or_default()
            .locked_until = Some(locked_until);
        Ok(())
    }

    async fn mark_reset(&self, username: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let entry = tables.lockouts.entry(username.to_string()).or_default();
        entry.locked_until = None;
        entry.reset_at = Some(at);
        Ok(())
    }

    async fn prune_lockouts(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.lockouts.len();
        tables.lockouts.retain(|_, lockout| {
            let locked = lockout.locked_until.is_some_and(|until| until > now);
            let recent = [lockout.locked_until, lockout.reset_at]
                .into_iter()
                .flatten()
                .any(|at| at >= stale_before);
            locked || recent
        });
        Ok((before - tables.lockouts.len()) as u64)
    }
}

#[async_trait]
impl ResetTokenStore for MemoryStore {
    async fn replace_for_user(
        &self,
        token: PasswordResetToken,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        if tables
            .reset_tokens
            .values()
            .any(|existing| existing.token_hash == token.token_hash)
        {
            return Err(StoreError::Conflict("reset token".to_string()));
        }
        let mut invalidated = 0;
        for existing in tables.reset_tokens.values_mut() {
            if existing.user_id == token.user_id && !existing.used && !existing.audit.deleted {
                existing.audit.soft_delete(now);
                invalidated += 1;
            }
        }
        tables.reset_tokens.insert(token.id, token);
        Ok(invalidated)
    }

    async fn find_unused(&self, hash: &[u8]) -> StoreResult<Option<PasswordResetToken>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .reset_tokens
            .values()
            .find(|token| token.token_hash == hash && !token.used)
            .cloned())
    }

    async fn consume_with_password(
        &self,
        token_id: Uuid,
        user_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        let token_ok = tables
            .reset_tokens
            .get(&token_id)
            .is_some_and(|token| token.user_id == user_id && token.is_valid(now));
        let user_ok = tables
            .users
            .get(&user_id)
            .is_some_and(|user| !user.audit.deleted);
        if !(token_ok && user_ok) {
            return Ok(false);
        }

        if let Some(token) = tables.reset_tokens.get_mut(&token_id) {
            token.used = true;
            token.audit.touch(now);
        }
        if let Some(user) = tables.users.get_mut(&user_id) {
            user.password_hash = password_hash.to_string();
            user.audit.touch(now);
        }
        Ok(true)
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn insert_role(
        &self,
        name: &str,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Role> {
        let mut tables = self.tables.lock().await;
        if tables
            .roles
            .values()
            .any(|role| !role.audit.deleted && role.name == name)
        {
            return Err(StoreError::Conflict("role".to_string()));
        }
        let role = Role {
            id: Uuid::now_v7(),
            name: name.to_string(),
            description: description.map(str::to_string),
            audit: Audit::new(now),
        };
        tables.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn find_role_by_id(&self, id: Uuid) -> StoreResult<Option<Role>> {
        Ok(self.tables.lock().await.live_role(id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .roles
            .values()
            .find(|role| !role.audit.deleted && role.name == name)
            .cloned())
    }

    async fn soft_delete_role(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        match tables.roles.get_mut(&id) {
            Some(role) if !role.audit.deleted => role.audit.soft_delete(now),
            _ => return Ok(0),
        }
        Ok(tables.remove_bindings(|binding| binding.role_id == id))
    }

    async fn insert_permission(
        &self,
        name: &str,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Permission> {
        let mut tables = self.tables.lock().await;
        if tables
            .permissions
            .values()
            .any(|permission| !permission.audit.deleted && permission.name == name)
        {
            return Err(StoreError::Conflict("permission".to_string()));
        }
        let permission = Permission {
            id: Uuid::now_v7(),
            name: name.to_string(),
            description: description.map(str::to_string),
            audit: Audit::new(now),
        };
        tables.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .permissions
            .values()
            .find(|permission| !permission.audit.deleted && permission.name == name)
            .cloned())
    }

    async fn grant_permission(&self, role_id: Uuid, permission_id: Uuid) -> StoreResult<bool> {
        Ok(self
            .tables
            .lock()
            .await
            .role_permissions
            .insert((role_id, permission_id)))
    }

    async fn role_permissions(&self, role_id: Uuid) -> StoreResult<Vec<Permission>> {
        let tables = self.tables.lock().await;
        let mut permissions: Vec<Permission> = tables
            .role_permissions
            .iter()
            .filter(|(role, _)| *role == role_id)
            .filter_map(|(_, permission)| tables.permissions.get(permission))
            .filter(|permission| !permission.audit.deleted)
            .cloned()
            .collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }

    async fn insert_module(
        &self,
        key: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Module> {
        let mut tables = self.tables.lock().await;
        if tables
            .modules
            .values()
            .any(|module| !module.audit.deleted && (module.key == key || module.name == name))
        {
            return Err(StoreError::Conflict("module".to_string()));
        }
        let module = Module {
            id: Uuid::now_v7(),
            key: key.to_string(),
            name: name.to_string(),
            active: true,
            audit: Audit::new(now),
        };
        tables.modules.insert(module.id, module.clone());
        Ok(module)
    }

    async fn find_module_by_id(&self, id: Uuid) -> StoreResult<Option<Module>> {
        Ok(self.tables.lock().await.live_module(id).cloned())
    }

    async fn find_module_by_key(&self, key: &str) -> StoreResult<Option<Module>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .modules
            .values()
            .find(|module| !module.audit.deleted && module.key == key)
            .cloned())
    }

    async fn set_module_active(
        &self,
        id: Uuid,
        active: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.modules.get_mut(&id) {
            Some(module) if !module.audit.deleted => {
                module.active = active;
                module.audit.touch(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn soft_delete_module(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        match tables.modules.get_mut(&id) {
            Some(module) if !module.audit.deleted => module.audit.soft_delete(now),
            _ => return Ok(0),
        }
        Ok(tables.remove_bindings(|binding| binding.module_id == id))
    }

    async fn insert_binding(
        &self,
        user_id: Uuid,
        module_id: Uuid,
        role_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<ModuleRole> {
        let mut tables = self.tables.lock().await;
        if tables.bindings.values().any(|binding| {
            binding.user_id == user_id && binding.module_id == module_id && binding.role_id == role_id
        }) {
            return Err(StoreError::Conflict("module role".to_string()));
        }
        let binding = ModuleRole {
            id: Uuid::now_v7(),
            user_id,
            module_id,
            role_id,
            created_at: now,
        };
        tables.bindings.insert(binding.id, binding.clone());
        Ok(binding)
    }

    async fn find_binding(&self, id: Uuid) -> StoreResult<Option<ModuleRole>> {
        Ok(self.tables.lock().await.bindings.get(&id).cloned())
    }

    async fn delete_binding(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.tables.lock().await.bindings.remove(&id).is_some())
    }

    async fn grants_for_user(&self, user_id: Uuid) -> StoreResult<Vec<ModuleGrant>> {
        let tables = self.tables.lock().await;
        let mut grants: Vec<ModuleGrant> = tables
            .bindings
            .values()
            .filter(|binding| binding.user_id == user_id)
            .filter_map(|binding| {
                let module = tables.live_module(binding.module_id)?;
                let role = tables.live_role(binding.role_id)?;
                Some(ModuleGrant {
                    binding_id: binding.id,
                    module_id: module.id,
                    module_key: module.key.clone(),
                    module_active: module.active,
                    role_id: role.id,
                    role_name: role.name.clone(),
                })
            })
            .collect();
        grants.sort_by(|a, b| {
            a.module_key
                .cmp(&b.module_key)
                .then_with(|| a.role_name.cmp(&b.role_name))
        });
        Ok(grants)
    }

    async fn bindings_in_module(&self, module_id: Uuid) -> StoreResult<Vec<ModuleRole>> {
        let tables = self.tables.lock().await;
        let mut bindings: Vec<ModuleRole> = tables
            .bindings
            .values()
            .filter(|binding| binding.module_id == module_id)
            .cloned()
            .collect();
        bindings.sort_by_key(|binding| binding.created_at);
        Ok(bindings)
    }

    async fn has_module_role(
        &self,
        user_id: Uuid,
        module_key: &str,
        role_name: &str,
    ) -> StoreResult<bool> {
        let tables = self.tables.lock().await;
        let found = tables
            .scoped_roles(user_id, module_key)
            .any(|role| role.name == role_name);
        Ok(found)
    }

    async fn has_module_permission(
        &self,
        user_id: Uuid,
        module_key: &str,
        permission: &str,
    ) -> StoreResult<bool> {
        let tables = self.tables.lock().await;
        let found = tables.scoped_roles(user_id, module_key).any(|role| {
            tables.permissions.values().any(|candidate| {
                !candidate.audit.deleted
                    && candidate.name == permission
                    && tables.role_permissions.contains(&(role.id, candidate.id))
            })
        });
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
    }

    fn new_session(user_id: Uuid, device: &str, hash: u8) -> NewSession {
        NewSession {
            user_id,
            refresh_token_hash: vec![hash; 32],
            device_id: device.to_string(),
            ip: Some("10.0.0.1".to_string()),
            user_agent: None,
            expires_at: now() + Duration::days(30),
        }
    }

    #[tokio::test]
    async fn upsert_rotates_the_device_row() -> StoreResult<()> {
        let store = MemoryStore::new();
        let user = Uuid::now_v7();
        let first = store.upsert_for_device(new_session(user, "d1", 1), now()).await?;
        let second = store.upsert_for_device(new_session(user, "d1", 2), now()).await?;
        assert_eq!(first.id, second.id);
        assert_eq!(second.refresh_token_hash, vec![2; 32]);
        assert!(store.find_by_refresh_hash(&[1; 32], now()).await?.is_none());

        let other = store.upsert_for_device(new_session(user, "d2", 3), now()).await?;
        assert_ne!(other.id, first.id);
        assert_eq!(store.list_active(user, now()).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn rotate_is_compare_and_swap() -> StoreResult<()> {
        let store = MemoryStore::new();
        let session = store
            .upsert_for_device(new_session(Uuid::now_v7(), "d1", 1), now())
            .await?;
        let expires = now() + Duration::days(30);

        let won = store
            .rotate(session.id, &[1; 32], vec![2; 32], expires, now())
            .await?;
        assert!(won.is_some());
        let lost = store
            .rotate(session.id, &[1; 32], vec![3; 32], expires, now())
            .await?;
        assert!(lost.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn sweeping_is_idempotent() -> StoreResult<()> {
        let store = MemoryStore::new();
        let mut expiring = new_session(Uuid::now_v7(), "d1", 1);
        expiring.expires_at = now() + Duration::minutes(1);
        store.upsert_for_device(expiring, now()).await?;
        store
            .upsert_for_device(new_session(Uuid::now_v7(), "d1", 2), now())
            .await?;

        let later = now() + Duration::minutes(2);
        assert_eq!(store.deactivate_expired(later).await?, 1);
        assert_eq!(store.deactivate_expired(later).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn deleting_a_module_cascades_to_bindings() -> StoreResult<()> {
        let store = MemoryStore::new();
        let role = store.insert_role("EDITOR", None, now()).await?;
        let module = store.insert_module("billing", "Billing", now()).await?;
        let user = Uuid::now_v7();
        store.insert_binding(user, module.id, role.id, now()).await?;
        assert!(matches!(
            store.insert_binding(user, module.id, role.id, now()).await,
            Err(StoreError::Conflict(_))
        ));

        assert_eq!(store.soft_delete_module(module.id, now()).await?, 1);
        assert!(store.bindings_in_module(module.id).await?.is_empty());
        assert!(store.grants_for_user(user).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn prune_keeps_live_lock_state() -> StoreResult<()> {
        let store = MemoryStore::new();
        store
            .set_locked_until("locked", now() + Duration::minutes(1))
            .await?;
        store
            .set_locked_until("stale", now() - Duration::hours(2))
            .await?;
        store.mark_reset("recent", now() - Duration::minutes(1)).await?;

        let pruned = store
            .prune_lockouts(now(), now() - Duration::minutes(10))
            .await?;
        assert_eq!(pruned, 1);
        assert!(store.lockout("stale").await?.is_none());
        assert!(store.lockout("locked").await?.is_some());
        assert!(store.lockout("recent").await?.is_some());
        Ok(())
    }
}
