//! Brute-force throttling: `Normal -> Locked -> Normal` per username.
//!
//! Failures are appended to a shared log and counted over a sliding window.
//! Lock state is written to the store before [`LoginGuard::record_failure`]
//! returns, so every instance enforces it on the very next request.

use crate::{
    clock::{Clock, MAX_LIFETIME_MINUTES},
    error::{AuthError, Result},
    models::LoginFailureAttempt,
    store::{bounded, LoginAttemptStore},
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutPolicy {
    max_attempts: u32,
    window: Duration,
    lock: Duration,
}

impl LockoutPolicy {
    /// 5 attempts within 10 minutes lock the account for 1 minute.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::minutes(10),
            lock: Duration::minutes(1),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_window_minutes(mut self, minutes: i64) -> Self {
        self.window = Duration::minutes(minutes.clamp(1, MAX_LIFETIME_MINUTES));
        self
    }

    #[must_use]
    pub fn with_lock_minutes(mut self, minutes: i64) -> Self {
        self.lock = Duration::minutes(minutes.clamp(1, MAX_LIFETIME_MINUTES));
        self
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub const fn lock(&self) -> Duration {
        self.lock
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a login attempt came from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttemptContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
}

pub struct LoginGuard {
    store: Arc<dyn LoginAttemptStore>,
    clock: Arc<dyn Clock>,
    policy: LockoutPolicy,
    deadline: std::time::Duration,
}

impl LoginGuard {
    #[must_use]
    pub fn new(
        store: Arc<dyn LoginAttemptStore>,
        clock: Arc<dyn Clock>,
        policy: LockoutPolicy,
        deadline: std::time::Duration,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            deadline,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Append a failure and lock the username once the window holds `max_attempts`.
    ///
    /// Returns `true` when this failure triggered the lock.
    ///
    /// # Errors
    /// Store failures and timeouts.
    pub async fn record_failure(&self, username: &str, context: &AttemptContext) -> Result<bool> {
        let now = self.clock.now();
        let attempt = LoginFailureAttempt {
            id: Uuid::now_v7(),
            username: username.to_string(),
            ip: context.ip.clone(),
            user_agent: context.user_agent.clone(),
            device_id: context.device_id.clone(),
            attempted_at: now,
        };
        bounded(self.deadline, self.store.append_failure(attempt)).await?;

        let since = self.counting_floor(username, now).await?;
        let failures =
            bounded(self.deadline, self.store.count_failures_since(username, since)).await?;
        debug!(failures, max = self.policy.max_attempts, "login failure recorded");

        if failures >= self.policy.max_attempts {
            let locked_until = now
                .checked_add_signed(self.policy.lock)
                .ok_or_else(|| AuthError::Internal("lock period overflows".to_string()))?;
            bounded(
                self.deadline,
                self.store.set_locked_until(username, locked_until),
            )
            .await?;
            warn!(%locked_until, failures, "login locked after repeated failures");
            return Ok(true);
        }
        Ok(false)
    }

    /// Expired locks read as unlocked; nothing has to sweep them.
    ///
    /// # Errors
    /// Store failures and timeouts. Never defaults to "not locked" on error.
    pub async fn is_locked(&self, username: &str) -> Result<bool> {
        Ok(self.remaining_lock_seconds(username).await? > 0)
    }

    /// Seconds until the lock lifts, rounded up. `0` when not locked.
    ///
    /// # Errors
    /// Store failures and timeouts.
    pub async fn remaining_lock_seconds(&self, username: &str) -> Result<i64> {
        let now = self.clock.now();
        let lockout = bounded(self.deadline, self.store.lockout(username)).await?;
        Ok(lockout
            .and_then(|lockout| lockout.locked_until)
            .map_or(0, |until| ceil_seconds(until - now)))
    }

    /// Keep the failure history but stop earlier failures from counting.
    ///
    /// # Errors
    /// Store failures and timeouts.
    pub async fn reset_on_success(&self, username: &str) -> Result<()> {
        let now = self.clock.now();
        bounded(self.deadline, self.store.mark_reset(username, now)).await?;
        Ok(())
    }

    /// Drop lock rows that no longer affect any decision.
    ///
    /// # Errors
    /// Store failures and timeouts.
    pub async fn prune(&self) -> Result<u64> {
        let now = self.clock.now();
        let pruned = bounded(
            self.deadline,
            self.store.prune_lockouts(now, now - self.policy.window),
        )
        .await?;
        Ok(pruned)
    }

    async fn counting_floor(&self, username: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let window_start = now
            .checked_sub_signed(self.policy.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let lockout = bounded(self.deadline, self.store.lockout(username)).await?;
        Ok(lockout
            .and_then(|lockout| lockout.reset_at)
            .map_or(window_start, |reset_at| reset_at.max(window_start)))
    }
}

fn ceil_seconds(remaining: Duration) -> i64 {
    let millis = remaining.num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis + 999) / 1000
    }
}
