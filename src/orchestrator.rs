//! Request-facing façade: register, login, refresh, logout, password reset.
//!
//! This is the only component that reads users directly. Everything else is
//! delegated to the guard, the session registry, the authorization model and the
//! reset flow.

use crate::{
    authz::{role_authority, AuthorizationModel, ADMIN_ROLE},
    clock::Clock,
    error::{AuthError, Result, StoreError},
    guard::{AttemptContext, LockoutPolicy, LoginGuard},
    models::{NewUser, Session, User},
    notify::{build_reset_url, Notice, Notifier},
    password::Credentials,
    reset::{PasswordResetFlow, ResetConfig},
    session::{DeviceContext, SessionRegistry},
    store::{bounded, AuthStore, UserStore},
    token::{Claims, TokenCodec, TokenKind},
    validate::{check_password_strength, normalize_email, valid_email, valid_username},
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tracing::{info, warn};
use uuid::Uuid;

pub const TOKEN_TYPE: &str = "Bearer";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    default_role: String,
    frontend_base_url: String,
    store_deadline: Duration,
    lockout: LockoutPolicy,
    reset: ResetConfig,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            default_role: "USER".to_string(),
            frontend_base_url,
            store_deadline: Duration::from_secs(5),
            lockout: LockoutPolicy::new(),
            reset: ResetConfig::new(),
        }
    }

    #[must_use]
    pub fn with_default_role(mut self, role: String) -> Self {
        self.default_role = role;
        self
    }

    #[must_use]
    pub fn with_store_deadline(mut self, deadline: Duration) -> Self {
        self.store_deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_lockout(mut self, lockout: LockoutPolicy) -> Self {
        self.lockout = lockout;
        self
    }

    #[must_use]
    pub fn with_reset(mut self, reset: ResetConfig) -> Self {
        self.reset = reset;
        self
    }

    #[must_use]
    pub fn default_role(&self) -> &str {
        &self.default_role
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub const fn store_deadline(&self) -> Duration {
        self.store_deadline
    }

    #[must_use]
    pub const fn lockout(&self) -> &LockoutPolicy {
        &self.lockout
    }
}

/// Where a request came from. A missing device id gets a fresh random one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub device_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientContext {
    fn device(&self) -> DeviceContext {
        let device_id = self
            .device_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        DeviceContext {
            device_id,
            ip: self.ip.clone(),
            user_agent: self.user_agent.clone(),
        }
    }

    fn attempt(&self) -> AttemptContext {
        AttemptContext {
            ip: self.ip.clone(),
            user_agent: self.user_agent.clone(),
            device_id: self.device_id.clone(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Modules in which the user receives the default role.
    pub module_ids: Vec<Uuid>,
}

/// Tokens plus the session they are bound to.
#[derive(Clone, Debug)]
pub struct AuthOutcome {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub user: User,
    pub authorities: BTreeSet<String>,
    pub device_id: String,
    /// Access token expiry.
    pub expires_at: DateTime<Utc>,
    pub session_id: Uuid,
}

/// Authenticated caller resolved from an access token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
    pub authorities: BTreeSet<String>,
}

impl Principal {
    #[must_use]
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.contains(authority)
    }
}

pub struct AuthOrchestrator {
    users: Arc<dyn UserStore>,
    codec: TokenCodec,
    guard: Arc<LoginGuard>,
    sessions: Arc<SessionRegistry>,
    authz: Arc<AuthorizationModel>,
    resets: PasswordResetFlow,
    notifier: Arc<dyn Notifier>,
    credentials: Credentials,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
}

impl AuthOrchestrator {
    #[must_use]
    pub fn new<S: AuthStore + 'static>(
        store: Arc<S>,
        codec: TokenCodec,
        credentials: Credentials,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        let deadline = config.store_deadline;
        let guard = Arc::new(LoginGuard::new(
            store.clone(),
            clock.clone(),
            config.lockout,
            deadline,
        ));
        let sessions = Arc::new(SessionRegistry::new(store.clone(), clock.clone(), deadline));
        let authz = Arc::new(AuthorizationModel::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            deadline,
        ));
        let resets = PasswordResetFlow::new(
            store.clone(),
            store.clone(),
            sessions.clone(),
            credentials.clone(),
            clock.clone(),
            config.reset,
            deadline,
        );
        Self {
            users: store,
            codec,
            guard,
            sessions,
            authz,
            resets,
            notifier,
            credentials,
            clock,
            config,
        }
    }

    #[must_use]
    pub fn guard(&self) -> Arc<LoginGuard> {
        self.guard.clone()
    }

    #[must_use]
    pub fn sessions(&self) -> Arc<SessionRegistry> {
        self.sessions.clone()
    }

    #[must_use]
    pub fn authz(&self) -> Arc<AuthorizationModel> {
        self.authz.clone()
    }

    #[must_use]
    pub const fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// # Errors
    /// Store failures and timeouts.
    pub async fn ping(&self) -> Result<()> {
        Ok(bounded(self.config.store_deadline, self.users.ping()).await?)
    }

    /// Create the account with the default global role, bind the default role in
    /// each requested module, then sign in.
    ///
    /// # Errors
    /// [`AuthError::Validation`], [`AuthError::AlreadyExists`] for a taken username
    /// or email, [`AuthError::NotFound`] for an unknown module or missing default role.
    pub async fn register(&self, input: RegisterInput, client: &ClientContext) -> Result<AuthOutcome> {
        let username = input.username.trim().to_string();
        let email = normalize_email(&input.email);
        if !valid_username(&username) {
            return Err(AuthError::Validation("Invalid username".to_string()));
        }
        if !valid_email(&email) {
            return Err(AuthError::Validation("Invalid email format".to_string()));
        }
        check_password_strength(&input.password)?;

        let deadline = self.config.store_deadline;
        if bounded(deadline, self.users.find_user_by_username(&username))
            .await?
            .is_some()
        {
            return Err(AuthError::AlreadyExists("username".to_string()));
        }
        if bounded(deadline, self.users.find_user_by_email(&email))
            .await?
            .is_some()
        {
            return Err(AuthError::AlreadyExists("email".to_string()));
        }

        let role = self
            .authz
            .find_role_by_name(&self.config.default_role)
            .await?
            .ok_or_else(|| AuthError::NotFound("default role".to_string()))?;
        for module_id in &input.module_ids {
            self.authz
                .find_module(*module_id)
                .await?
                .ok_or_else(|| AuthError::NotFound("module".to_string()))?;
        }

        let password_hash = self.credentials.hash(&input.password).await?;
        let new_user = NewUser {
            username,
            email,
            password_hash,
            first_name: input.first_name,
            last_name: input.last_name,
            role_id: Some(role.id),
        };
        let user = bounded(deadline, self.users.insert_user(new_user, self.clock.now()))
            .await
            .map_err(|err| match err {
                StoreError::Conflict(what) => AuthError::AlreadyExists(what),
                other => AuthError::Store(other),
            })?;
        info!(user_id = %user.id, "user registered");

        for module_id in input.module_ids {
            self.authz
                .assign_role_in_module(user.id, module_id, role.id)
                .await?;
        }

        self.start_session(user, client).await
    }

    /// Lockout check, credential check, then a fresh token pair bound to the device.
    ///
    /// # Errors
    /// [`AuthError::AccountLocked`] while locked (even with the right password) and
    /// [`AuthError::InvalidCredentials`] for an unknown user or wrong password.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        client: &ClientContext,
    ) -> Result<AuthOutcome> {
        let username = username.trim();
        let retry_after_seconds = self.guard.remaining_lock_seconds(username).await?;
        if retry_after_seconds > 0 {
            return Err(AuthError::AccountLocked {
                retry_after_seconds,
            });
        }

        let user = bounded(
            self.config.store_deadline,
            self.users.find_user_by_username(username),
        )
        .await?;
        let verified = self
            .credentials
            .verify(password, user.as_ref().map(|user| user.password_hash.as_str()))
            .await?;

        let Some(user) = user.filter(|_| verified) else {
            self.guard.record_failure(username, &client.attempt()).await?;
            return Err(AuthError::InvalidCredentials);
        };

        self.guard.reset_on_success(username).await?;
        info!(user_id = %user.id, "login succeeded");
        self.start_session(user, client).await
    }

    /// Exchange a refresh token for a new pair. The presented token is burned.
    ///
    /// # Errors
    /// [`AuthError::InvalidToken`] for a malformed, forged, expired or non-refresh
    /// token and [`AuthError::SessionInvalid`] when no usable session holds it.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthOutcome> {
        let claims = self.codec.verify(refresh_token)?;
        let now = self.clock.now();
        if claims.typ != TokenKind::Refresh || claims.is_expired(now) {
            return Err(AuthError::InvalidToken);
        }

        let session = self
            .sessions
            .find_by_refresh_token(refresh_token)
            .await?
            .ok_or(AuthError::SessionInvalid)?;
        let user = bounded(
            self.config.store_deadline,
            self.users.find_user_by_id(session.user_id),
        )
        .await?
        .filter(|user| user.username == claims.sub)
        .ok_or(AuthError::SessionInvalid)?;

        let (authorities, access, refresh) = self.issue_pair(&user).await?;
        let session = self
            .sessions
            .rotate(&session, refresh_token, &refresh.token, refresh.expires_at)
            .await?;

        Ok(AuthOutcome {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: TOKEN_TYPE,
            user,
            authorities,
            device_id: session.device_id,
            expires_at: access.expires_at,
            session_id: session.id,
        })
    }

    /// With a device id only that device is signed out; without, every device is.
    ///
    /// # Errors
    /// Store failures and timeouts.
    pub async fn logout(&self, user_id: Uuid, device_id: Option<&str>) -> Result<u64> {
        match device_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(device_id) => self.logout_by_device(user_id, device_id).await,
            None => self.logout_all(user_id).await,
        }
    }

    /// Only sessions owned by `user_id` are affected.
    ///
    /// # Errors
    /// Store failures and timeouts.
    pub async fn logout_by_session(&self, user_id: Uuid, session_id: Uuid) -> Result<u64> {
        self.sessions.invalidate_owned(user_id, session_id).await
    }

    /// # Errors
    /// Store failures and timeouts.
    pub async fn logout_by_device(&self, user_id: Uuid, device_id: &str) -> Result<u64> {
        self.sessions
            .invalidate_by_user_and_device(user_id, device_id)
            .await
    }

    /// # Errors
    /// Store failures and timeouts.
    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64> {
        let count = self.sessions.invalidate_all_for_user(user_id).await?;
        info!(%user_id, count, "signed out of all devices");
        Ok(count)
    }

    /// Answers the same whether or not the email is known.
    ///
    /// # Errors
    /// [`AuthError::Delivery`] when the notice for an existing account cannot be sent.
    /// The token stays valid in that case.
    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        let email = normalize_email(email);
        let issued = match self.resets.request_reset(&email).await {
            Ok(issued) => issued,
            Err(AuthError::NotFound(_)) => {
                info!("password reset requested for unknown email");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let notice = Notice::PasswordReset {
            email: issued.user.email.clone(),
            username: issued.user.username.clone(),
            reset_url: build_reset_url(&self.config.frontend_base_url, &issued.token),
            expires_at: issued.expires_at,
        };
        self.notifier.send(&notice).await.map_err(|err| {
            warn!(user_id = %issued.user.id, "failed to send reset notice: {err}");
            AuthError::Delivery(err.to_string())
        })
    }

    /// # Errors
    /// See [`PasswordResetFlow::consume`].
    pub async fn reset_password(
        &self,
        token: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<()> {
        let user = self
            .resets
            .consume(token, password, confirm_password)
            .await?;
        let notice = Notice::PasswordChanged {
            email: user.email.clone(),
            username: user.username.clone(),
        };
        if let Err(err) = self.notifier.send(&notice).await {
            warn!(user_id = %user.id, "failed to send password change notice: {err}");
        }
        Ok(())
    }

    /// Resolve a bearer access token into the caller, with authorities evaluated now.
    ///
    /// # Errors
    /// [`AuthError::InvalidToken`] or [`AuthError::TokenExpired`].
    pub async fn authenticate(&self, access_token: &str) -> Result<Principal> {
        let claims = self.codec.verify(access_token)?;
        if claims.typ != TokenKind::Access {
            return Err(AuthError::InvalidToken);
        }
        if claims.is_expired(self.clock.now()) {
            return Err(AuthError::TokenExpired);
        }
        let user = self
            .user_for_claims(&claims)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        let authorities = self.authz.authorities(&user).await?;
        Ok(Principal {
            user_id: user.id,
            username: user.username,
            authorities,
        })
    }

    /// Global `ROLE_ADMIN`, or `permission` within `module_key`.
    ///
    /// # Errors
    /// [`AuthError::Forbidden`] when neither holds.
    pub async fn require_admin_or_module_permission(
        &self,
        principal: &Principal,
        module_key: &str,
        permission: &str,
    ) -> Result<()> {
        if principal.has_authority(&role_authority(ADMIN_ROLE)) {
            return Ok(());
        }
        self.authz
            .require_module_permission(principal.user_id, module_key, permission)
            .await
    }

    /// # Errors
    /// Store failures and timeouts.
    pub async fn active_sessions(&self, user_id: Uuid) -> Result<Vec<Session>> {
        self.sessions.active_sessions(user_id).await
    }

    async fn user_for_claims(&self, claims: &Claims) -> Result<Option<User>> {
        let deadline = self.config.store_deadline;
        let user = match claims
            .claim("userId")
            .and_then(Value::as_str)
            .and_then(|id| Uuid::parse_str(id).ok())
        {
            Some(user_id) => bounded(deadline, self.users.find_user_by_id(user_id)).await?,
            None => bounded(deadline, self.users.find_user_by_username(&claims.sub)).await?,
        };
        Ok(user.filter(|user| user.username == claims.sub))
    }

    async fn issue_pair(
        &self,
        user: &User,
    ) -> Result<(
        BTreeSet<String>,
        crate::token::IssuedToken,
        crate::token::IssuedToken,
    )> {
        let authorities = self.authz.authorities(user).await?;
        let mut claims = Map::new();
        claims.insert("userId".to_string(), Value::from(user.id.to_string()));
        claims.insert(
            "authorities".to_string(),
            Value::from(authorities.iter().cloned().collect::<Vec<_>>()),
        );
        let now = self.clock.now();
        let access = self
            .codec
            .issue_access_token(&user.username, claims, now)?;
        let refresh = self.codec.issue_refresh_token(&user.username, now)?;
        Ok((authorities, access, refresh))
    }

    async fn start_session(&self, user: User, client: &ClientContext) -> Result<AuthOutcome> {
        let (authorities, access, refresh) = self.issue_pair(&user).await?;
        let device = client.device();
        let session = self
            .sessions
            .create_or_rotate(user.id, &refresh.token, &device, refresh.expires_at)
            .await?;
        Ok(AuthOutcome {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: TOKEN_TYPE,
            user,
            authorities,
            device_id: session.device_id,
            expires_at: access.expires_at,
            session_id: session.id,
        })
    }
}
