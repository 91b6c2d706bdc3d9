//! Request/response types for auth endpoints. JSON is camelCase.

use crate::{
    models::{Session, User},
    orchestrator::{AuthOutcome, Principal},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Modules in which the new user gets the default role.
    #[serde(default)]
    pub module_ids: Vec<Uuid>,
    pub device_id: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub device_id: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct LogoutSpecificRequest {
    pub session_id: Option<Uuid>,
    pub device_id: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
        }
    }
}

/// Token set returned by register, login and refresh.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub user: UserResponse,
    pub authorities: Vec<String>,
    pub device_id: String,
    /// Access token expiry.
    pub expires_at: DateTime<Utc>,
    pub session_id: Uuid,
}

impl From<AuthOutcome> for AuthResponse {
    fn from(outcome: AuthOutcome) -> Self {
        Self {
            access_token: outcome.access_token,
            refresh_token: outcome.refresh_token,
            token_type: outcome.token_type.to_string(),
            user: outcome.user.into(),
            authorities: outcome.authorities.into_iter().collect(),
            device_id: outcome.device_id,
            expires_at: outcome.expires_at,
            session_id: outcome.session_id,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LogoutResponse {
    pub message: String,
    /// Sessions invalidated by this call.
    pub invalidated: u64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: Uuid,
    pub device_id: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            device_id: session.device_id,
            ip: session.ip,
            user_agent: session.user_agent,
            last_activity: session.last_activity,
            expires_at: session.expires_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalResponse {
    pub user_id: Uuid,
    pub username: String,
    pub authorities: Vec<String>,
}

impl From<Principal> for PrincipalResponse {
    fn from(principal: Principal) -> Self {
        Self {
            user_id: principal.user_id,
            username: principal.username,
            authorities: principal.authorities.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn reset_request_reads_camel_case() -> Result<()> {
        let request: ResetPasswordRequest = serde_json::from_str(
            r#"{"token":"t","password":"Secret1!x","confirmPassword":"Secret1!x"}"#,
        )?;
        assert_eq!(request.confirm_password, "Secret1!x");
        Ok(())
    }

    #[test]
    fn register_request_defaults_modules() -> Result<()> {
        let request: RegisterRequest = serde_json::from_str(
            r#"{"username":"alice","email":"a@example.com","password":"Secret1!x"}"#,
        )?;
        assert!(request.module_ids.is_empty());
        assert!(request.device_id.is_none());
        Ok(())
    }

    #[test]
    fn session_view_writes_camel_case() -> Result<()> {
        let view = SessionView {
            id: Uuid::nil(),
            device_id: "d1".to_string(),
            ip: None,
            user_agent: Some("curl".to_string()),
            last_activity: DateTime::<Utc>::default(),
            expires_at: DateTime::<Utc>::default(),
        };
        let value = serde_json::to_value(&view)?;
        let device = value
            .get("deviceId")
            .and_then(serde_json::Value::as_str)
            .context("missing deviceId")?;
        assert_eq!(device, "d1");
        assert!(value.get("userAgent").is_some());
        Ok(())
    }
}
