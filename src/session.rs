//! Per-device sessions bound to a refresh token.
//!
//! One usable session per `(user, device)`. Refresh tokens are single-use:
//! [`SessionRegistry::rotate`] swaps the stored digest only if it still matches
//! the presented token, so of two concurrent refreshes exactly one wins.

use crate::{
    clock::Clock,
    error::{AuthError, Result},
    guard::LoginGuard,
    models::{NewSession, Session},
    store::{bounded, SessionStore},
    token::hash_opaque_token,
};
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Device metadata captured when a session is created or rotated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceContext {
    pub device_id: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    deadline: Duration,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>, deadline: Duration) -> Self {
        Self {
            store,
            clock,
            deadline,
        }
    }

    /// Overwrite the device's usable session or insert a new one.
    ///
    /// # Errors
    /// Store failures and timeouts.
    pub async fn create_or_rotate(
        &self,
        user_id: Uuid,
        refresh_token: &str,
        device: &DeviceContext,
        expires_at: DateTime<Utc>,
    ) -> Result<Session> {
        let now = self.clock.now();
        let session = NewSession {
            user_id,
            refresh_token_hash: hash_opaque_token(refresh_token),
            device_id: device.device_id.clone(),
            ip: device.ip.clone(),
            user_agent: device.user_agent.clone(),
            expires_at,
        };
        let session = bounded(self.deadline, self.store.upsert_for_device(session, now)).await?;
        debug!(session_id = %session.id, "session created or rotated");
        Ok(session)
    }

    /// # Errors
    /// Store failures and timeouts.
    pub async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>> {
        let hash = hash_opaque_token(refresh_token);
        let now = self.clock.now();
        Ok(bounded(self.deadline, self.store.find_by_refresh_hash(&hash, now)).await?)
    }

    /// # Errors
    /// Store failures and timeouts.
    pub async fn find_by_user_and_device(
        &self,
        user_id: Uuid,
        device_id: &str,
    ) -> Result<Option<Session>> {
        let now = self.clock.now();
        Ok(bounded(
            self.deadline,
            self.store.find_by_user_device(user_id, device_id, now),
        )
        .await?)
    }

    /// Replace the refresh token of `session`, provided `presented` is still current.
    ///
    /// # Errors
    /// [`AuthError::SessionInvalid`] if the token was already rotated or the session is no
    /// longer usable, otherwise store failures.
    pub async fn rotate(
        &self,
        session: &Session,
        presented: &str,
        replacement: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Session> {
        let now = self.clock.now();
        let rotated = bounded(
            self.deadline,
            self.store.rotate(
                session.id,
                &hash_opaque_token(presented),
                hash_opaque_token(replacement),
                expires_at,
                now,
            ),
        )
        .await?;
        rotated.ok_or_else(|| {
            warn!(session_id = %session.id, "stale refresh token presented");
            AuthError::SessionInvalid
        })
    }

    /// # Errors
    /// Store failures and timeouts.
    pub async fn invalidate_by_refresh_token(&self, refresh_token: &str) -> Result<u64> {
        let hash = hash_opaque_token(refresh_token);
        let now = self.clock.now();
        Ok(bounded(self.deadline, self.store.deactivate_by_refresh_hash(&hash, now)).await?)
    }

    /// # Errors
    /// Store failures and timeouts.
    pub async fn invalidate_by_user_and_device(&self, user_id: Uuid, device_id: &str) -> Result<u64> {
        let now = self.clock.now();
        Ok(bounded(
            self.deadline,
            self.store.deactivate_by_user_device(user_id, device_id, now),
        )
        .await?)
    }

    /// # Errors
    /// Store failures and timeouts.
    pub async fn invalidate_by_id(&self, session_id: Uuid) -> Result<u64> {
        let now = self.clock.now();
        Ok(bounded(self.deadline, self.store.deactivate_by_id(session_id, None, now)).await?)
    }

    /// Like [`Self::invalidate_by_id`] but only touches sessions owned by `user_id`.
    ///
    /// # Errors
    /// Store failures and timeouts.
    pub async fn invalidate_owned(&self, user_id: Uuid, session_id: Uuid) -> Result<u64> {
        let now = self.clock.now();
        Ok(bounded(
            self.deadline,
            self.store.deactivate_by_id(session_id, Some(user_id), now),
        )
        .await?)
    }

    /// # Errors
    /// Store failures and timeouts.
    pub async fn invalidate_all_for_user(&self, user_id: Uuid) -> Result<u64> {
        let now = self.clock.now();
        Ok(bounded(self.deadline, self.store.deactivate_all_for_user(user_id, now)).await?)
    }

    /// Usable sessions, most recently active first.
    ///
    /// # Errors
    /// Store failures and timeouts.
    pub async fn active_sessions(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let now = self.clock.now();
        Ok(bounded(self.deadline, self.store.list_active(user_id, now)).await?)
    }

    /// Deactivate every session that expired before `now`. Idempotent.
    ///
    /// # Errors
    /// Store failures and timeouts.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(bounded(self.deadline, self.store.deactivate_expired(now)).await?)
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Recurring cleanup task with an explicit lifecycle.
///
/// Each tick deactivates expired sessions and, when a guard is attached, prunes
/// lock rows that no longer matter.
pub struct SessionSweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SessionSweeper {
    #[must_use]
    pub fn start(
        registry: Arc<SessionRegistry>,
        guard: Option<Arc<LoginGuard>>,
        every: Duration,
    ) -> Self {
        let (shutdown, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => sweep_once(&registry, guard.as_deref()).await,
                    _ = stopped.changed() => break,
                }
            }
            debug!("session sweeper stopped");
        });
        Self { shutdown, handle }
    }

    /// Signal the task and wait for the current sweep to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            error!("session sweeper task failed: {err}");
        }
    }
}

async fn sweep_once(registry: &SessionRegistry, guard: Option<&LoginGuard>) {
    match registry.sweep_expired(registry.now()).await {
        Ok(0) => debug!("no expired sessions"),
        Ok(count) => info!(count, "deactivated expired sessions"),
        Err(err) => error!("session sweep failed: {err}"),
    }
    if let Some(guard) = guard {
        match guard.prune().await {
            Ok(count) => debug!(count, "pruned idle lockout rows"),
            Err(err) => error!("lockout prune failed: {err}"),
        }
    }
}
