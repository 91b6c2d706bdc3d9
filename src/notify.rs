//! Outbound notices for the password-reset flow.
//!
//! Delivery happens after the reset token is persisted. A failed send never
//! rolls the token back.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    PasswordReset {
        email: String,
        username: String,
        reset_url: String,
        expires_at: DateTime<Utc>,
    },
    PasswordChanged {
        email: String,
        username: String,
    },
}

impl Notice {
    #[must_use]
    pub fn recipient(&self) -> &str {
        match self {
            Self::PasswordReset { email, .. } | Self::PasswordChanged { email, .. } => email,
        }
    }

    #[must_use]
    pub const fn template(&self) -> &'static str {
        match self {
            Self::PasswordReset { .. } => "password_reset",
            Self::PasswordChanged { .. } => "password_changed",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notice or return an error describing why it was not sent.
    async fn send(&self, notice: &Notice) -> Result<()>;
}

/// Local dev notifier that logs instead of delivering.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notice: &Notice) -> Result<()> {
        info!(
            to_email = %notice.recipient(),
            template = notice.template(),
            "notification send stub"
        );
        if let Notice::PasswordReset { reset_url, .. } = notice {
            debug!(%reset_url, "password reset link");
        }
        Ok(())
    }
}

/// Build the frontend link included in reset notices.
#[must_use]
pub fn build_reset_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/reset-password#token={token}")
}
