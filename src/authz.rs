//! Global and module-scoped authorization.
//!
//! The `(user, module, role)` binding table is the only place associations live.
//! "Roles of a user" and "roles in a module" are queries over it.

use crate::{
    clock::Clock,
    error::{AuthError, Result, StoreError},
    models::{Module, ModuleGrant, ModuleRole, Permission, Role, User},
    store::{bounded, DirectoryStore, UserStore},
};
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tracing::info;
use uuid::Uuid;

pub const ROLE_PREFIX: &str = "ROLE_";
pub const MODULE_PREFIX: &str = "MODULE_";

/// Global role that bypasses module-scoped management checks.
pub const ADMIN_ROLE: &str = "ADMIN";
/// Module whose bindings gate module-role administration.
pub const IAM_MODULE_KEY: &str = "iam";
pub const MANAGE_PERMISSION: &str = "module-role:manage";

#[must_use]
pub fn role_authority(role: &str) -> String {
    format!("{ROLE_PREFIX}{role}")
}

#[must_use]
pub fn module_role_authority(module_key: &str, role: &str) -> String {
    format!("{MODULE_PREFIX}{module_key}_{ROLE_PREFIX}{role}")
}

#[must_use]
pub fn module_permission_authority(module_key: &str, permission: &str) -> String {
    format!("{MODULE_PREFIX}{module_key}_{permission}")
}

pub struct AuthorizationModel {
    directory: Arc<dyn DirectoryStore>,
    users: Arc<dyn UserStore>,
    clock: Arc<dyn Clock>,
    deadline: Duration,
}

impl AuthorizationModel {
    #[must_use]
    pub fn new(
        directory: Arc<dyn DirectoryStore>,
        users: Arc<dyn UserStore>,
        clock: Arc<dyn Clock>,
        deadline: Duration,
    ) -> Self {
        Self {
            directory,
            users,
            clock,
            deadline,
        }
    }

    /// Flattened capability set: the global role and its permissions, then every
    /// binding in an active module as `MODULE_<key>_ROLE_<role>` and
    /// `MODULE_<key>_<permission>`.
    ///
    /// # Errors
    /// Store failures and timeouts.
    pub async fn authorities(&self, user: &User) -> Result<BTreeSet<String>> {
        let mut authorities = BTreeSet::new();

        if let Some(role) = self.global_role(user).await? {
            authorities.insert(role_authority(&role.name));
            for permission in self.permissions_of(role.id).await? {
                authorities.insert(permission.name);
            }
        }

        let grants = bounded(self.deadline, self.directory.grants_for_user(user.id)).await?;
        for grant in grants.into_iter().filter(|grant| grant.module_active) {
            authorities.insert(module_role_authority(&grant.module_key, &grant.role_name));
            for permission in self.permissions_of(grant.role_id).await? {
                authorities.insert(module_permission_authority(
                    &grant.module_key,
                    &permission.name,
                ));
            }
        }

        Ok(authorities)
    }

    /// Global role check by name.
    ///
    /// # Errors
    /// Store failures and timeouts.
    pub async fn has_role(&self, user: &User, role_name: &str) -> Result<bool> {
        Ok(self
            .global_role(user)
            .await?
            .is_some_and(|role| role.name == role_name))
    }

    /// Evaluated against the binding table on every call.
    ///
    /// # Errors
    /// Store failures and timeouts.
    pub async fn has_module_role(
        &self,
        user_id: Uuid,
        module_key: &str,
        role_name: &str,
    ) -> Result<bool> {
        Ok(bounded(
            self.deadline,
            self.directory.has_module_role(user_id, module_key, role_name),
        )
        .await?)
    }

    /// Evaluated against the binding table on every call.
    ///
    /// # Errors
    /// Store failures and timeouts.
    pub async fn has_module_permission(
        &self,
        user_id: Uuid,
        module_key: &str,
        permission: &str,
    ) -> Result<bool> {
        Ok(bounded(
            self.deadline,
            self.directory
                .has_module_permission(user_id, module_key, permission),
        )
        .await?)
    }

    /// # Errors
    /// [`AuthError::Forbidden`] when the permission is not held.
    pub async fn require_module_permission(
        &self,
        user_id: Uuid,
        module_key: &str,
        permission: &str,
    ) -> Result<()> {
        if self
            .has_module_permission(user_id, module_key, permission)
            .await?
        {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }

    /// # Errors
    /// [`AuthError::Forbidden`] when the role is not held.
    pub async fn require_module_role(
        &self,
        user_id: Uuid,
        module_key: &str,
        role_name: &str,
    ) -> Result<()> {
        if self.has_module_role(user_id, module_key, role_name).await? {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }

    /// # Errors
    /// [`AuthError::NotFound`] for a missing user, module or role and
    /// [`AuthError::AlreadyExists`] when the triple is already bound.
    pub async fn assign_role_in_module(
        &self,
        user_id: Uuid,
        module_id: Uuid,
        role_id: Uuid,
    ) -> Result<ModuleRole> {
        bounded(self.deadline, self.users.find_user_by_id(user_id))
            .await?
            .ok_or_else(|| AuthError::NotFound("user".to_string()))?;
        bounded(self.deadline, self.directory.find_module_by_id(module_id))
            .await?
            .ok_or_else(|| AuthError::NotFound("module".to_string()))?;
        bounded(self.deadline, self.directory.find_role_by_id(role_id))
            .await?
            .ok_or_else(|| AuthError::NotFound("role".to_string()))?;

        let now = self.clock.now();
        let binding = bounded(
            self.deadline,
            self.directory.insert_binding(user_id, module_id, role_id, now),
        )
        .await
        .map_err(|err| match err {
            StoreError::Conflict(_) => AuthError::AlreadyExists("module role".to_string()),
            other => AuthError::Store(other),
        })?;
        info!(binding_id = %binding.id, "module role assigned");
        Ok(binding)
    }

    /// # Errors
    /// [`AuthError::NotFound`] if the binding does not exist.
    pub async fn revoke_role_in_module(&self, binding_id: Uuid) -> Result<()> {
        if bounded(self.deadline, self.directory.delete_binding(binding_id)).await? {
            info!(%binding_id, "module role revoked");
            Ok(())
        } else {
            Err(AuthError::NotFound("module role".to_string()))
        }
    }

    /// # Errors
    /// Store failures and timeouts.
    pub async fn find_binding(&self, binding_id: Uuid) -> Result<Option<ModuleRole>> {
        Ok(bounded(self.deadline, self.directory.find_binding(binding_id)).await?)
    }

    /// # Errors
    /// Store failures and timeouts.
    pub async fn module_roles_of_user(&self, user_id: Uuid) -> Result<Vec<ModuleGrant>> {
        Ok(bounded(self.deadline, self.directory.grants_for_user(user_id)).await?)
    }

    /// # Errors
    /// Store failures and timeouts.
    pub async fn bindings_in_module(&self, module_id: Uuid) -> Result<Vec<ModuleRole>> {
        Ok(bounded(self.deadline, self.directory.bindings_in_module(module_id)).await?)
    }

    /// # Errors
    /// [`AuthError::AlreadyExists`] for a duplicate name.
    pub async fn create_role(&self, name: &str, description: Option<&str>) -> Result<Role> {
        let now = self.clock.now();
        bounded(self.deadline, self.directory.insert_role(name, description, now))
            .await
            .map_err(|err| conflict_as(err, "role"))
    }

    /// # Errors
    /// Store failures and timeouts.
    pub async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        Ok(bounded(self.deadline, self.directory.find_role_by_name(name)).await?)
    }

    /// # Errors
    /// [`AuthError::AlreadyExists`] for a duplicate name.
    pub async fn create_permission(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Permission> {
        let now = self.clock.now();
        bounded(
            self.deadline,
            self.directory.insert_permission(name, description, now),
        )
        .await
        .map_err(|err| conflict_as(err, "permission"))
    }

    /// Attach a permission to a role, both by name. Idempotent.
    ///
    /// # Errors
    /// [`AuthError::NotFound`] if either side is missing.
    pub async fn grant_permission(&self, role_name: &str, permission_name: &str) -> Result<()> {
        let role = self
            .find_role_by_name(role_name)
            .await?
            .ok_or_else(|| AuthError::NotFound("role".to_string()))?;
        let permission = bounded(
            self.deadline,
            self.directory.find_permission_by_name(permission_name),
        )
        .await?
        .ok_or_else(|| AuthError::NotFound("permission".to_string()))?;
        bounded(
            self.deadline,
            self.directory.grant_permission(role.id, permission.id),
        )
        .await?;
        Ok(())
    }

    /// New modules start active.
    ///
    /// # Errors
    /// [`AuthError::AlreadyExists`] for a duplicate key or name.
    pub async fn create_module(&self, key: &str, name: &str) -> Result<Module> {
        let now = self.clock.now();
        bounded(self.deadline, self.directory.insert_module(key, name, now))
            .await
            .map_err(|err| conflict_as(err, "module"))
    }

    /// # Errors
    /// Store failures and timeouts.
    pub async fn find_module(&self, module_id: Uuid) -> Result<Option<Module>> {
        Ok(bounded(self.deadline, self.directory.find_module_by_id(module_id)).await?)
    }

    /// # Errors
    /// Store failures and timeouts.
    pub async fn find_module_by_key(&self, key: &str) -> Result<Option<Module>> {
        Ok(bounded(self.deadline, self.directory.find_module_by_key(key)).await?)
    }

    /// Bindings survive deactivation; they simply stop granting anything.
    ///
    /// # Errors
    /// [`AuthError::NotFound`] if the module does not exist.
    pub async fn set_module_active(&self, module_id: Uuid, active: bool) -> Result<()> {
        let now = self.clock.now();
        if bounded(
            self.deadline,
            self.directory.set_module_active(module_id, active, now),
        )
        .await?
        {
            info!(%module_id, active, "module activation changed");
            Ok(())
        } else {
            Err(AuthError::NotFound("module".to_string()))
        }
    }

    /// Soft-delete and revoke every binding in the module.
    ///
    /// # Errors
    /// [`AuthError::NotFound`] if the module does not exist.
    pub async fn delete_module(&self, module_id: Uuid) -> Result<u64> {
        bounded(self.deadline, self.directory.find_module_by_id(module_id))
            .await?
            .ok_or_else(|| AuthError::NotFound("module".to_string()))?;
        let now = self.clock.now();
        let revoked =
            bounded(self.deadline, self.directory.soft_delete_module(module_id, now)).await?;
        info!(%module_id, revoked, "module deleted");
        Ok(revoked)
    }

    /// Soft-delete and revoke every binding using the role.
    ///
    /// # Errors
    /// [`AuthError::NotFound`] if the role does not exist.
    pub async fn delete_role(&self, role_id: Uuid) -> Result<u64> {
        bounded(self.deadline, self.directory.find_role_by_id(role_id))
            .await?
            .ok_or_else(|| AuthError::NotFound("role".to_string()))?;
        let now = self.clock.now();
        let revoked = bounded(self.deadline, self.directory.soft_delete_role(role_id, now)).await?;
        info!(%role_id, revoked, "role deleted");
        Ok(revoked)
    }

    async fn global_role(&self, user: &User) -> Result<Option<Role>> {
        match user.role_id {
            Some(role_id) => Ok(bounded(self.deadline, self.directory.find_role_by_id(role_id)).await?),
            None => Ok(None),
        }
    }

    async fn permissions_of(&self, role_id: Uuid) -> Result<Vec<Permission>> {
        Ok(bounded(self.deadline, self.directory.role_permissions(role_id)).await?)
    }
}

fn conflict_as(err: StoreError, what: &str) -> AuthError {
    match err {
        StoreError::Conflict(_) => AuthError::AlreadyExists(what.to_string()),
        other => AuthError::Store(other),
    }
}
