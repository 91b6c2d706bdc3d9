//! Single mapping from [`AuthError`] to HTTP.

use crate::error::{AuthError, StoreError};
use axum::{
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
}

#[must_use]
pub const fn status_of(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidCredentials
        | AuthError::InvalidToken
        | AuthError::TokenExpired
        | AuthError::SessionInvalid => StatusCode::UNAUTHORIZED,
        AuthError::AccountLocked { .. } => StatusCode::TOO_MANY_REQUESTS,
        AuthError::AlreadyExists(_) => StatusCode::CONFLICT,
        AuthError::NotFound(_) => StatusCode::NOT_FOUND,
        AuthError::InvalidOrExpired
        | AuthError::Mismatch
        | AuthError::Validation(_)
        | AuthError::Delivery(_) => StatusCode::BAD_REQUEST,
        AuthError::Forbidden => StatusCode::FORBIDDEN,
        AuthError::Store(StoreError::Timeout) => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::Store(_) | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn public_message(err: &AuthError) -> String {
    match err {
        // Token failures all read the same.
        AuthError::InvalidToken | AuthError::TokenExpired => "Invalid token".to_string(),
        AuthError::Delivery(_) => "Failed to send password reset email".to_string(),
        AuthError::Store(StoreError::Timeout) => "Service temporarily unavailable".to_string(),
        AuthError::Store(_) | AuthError::Internal(_) => "Internal server error".to_string(),
        other => other.to_string(),
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = status_of(&self);
        if status.is_server_error() {
            error!("request failed: {self}");
        } else if matches!(self, Self::Delivery(_)) {
            warn!("request failed: {self}");
        }

        let mut headers = HeaderMap::new();
        let retry_after_seconds = match self {
            Self::AccountLocked {
                retry_after_seconds,
            } => {
                headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_seconds));
                Some(retry_after_seconds)
            }
            _ => None,
        };

        let body = ErrorResponse {
            message: public_message(&self),
            retry_after_seconds,
        };
        (status, headers, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::body::to_bytes;

    async fn body_of(response: Response) -> Result<ErrorResponse> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(status_of(&AuthError::InvalidCredentials), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(&AuthError::SessionInvalid), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of(&AuthError::AlreadyExists("email".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(&AuthError::NotFound("module".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_of(&AuthError::Mismatch), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(&AuthError::InvalidOrExpired), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(&AuthError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(&AuthError::Store(StoreError::Timeout)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(&AuthError::Internal("boom".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn locked_accounts_carry_retry_after() -> Result<()> {
        let response = AuthError::AccountLocked {
            retry_after_seconds: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok()),
            Some("42")
        );
        let body = body_of(response).await?;
        assert_eq!(body.message, "Account temporarily locked");
        assert_eq!(body.retry_after_seconds, Some(42));
        Ok(())
    }

    #[tokio::test]
    async fn expired_tokens_read_like_invalid_ones() -> Result<()> {
        let expired = body_of(AuthError::TokenExpired.into_response()).await?;
        let invalid = body_of(AuthError::InvalidToken.into_response()).await?;
        assert_eq!(expired, invalid);
        assert_eq!(expired.retry_after_seconds, None);
        Ok(())
    }

    #[tokio::test]
    async fn server_errors_do_not_leak_details() -> Result<()> {
        let body = body_of(AuthError::Internal("secret detail".to_string()).into_response()).await?;
        assert_eq!(body.message, "Internal server error");
        Ok(())
    }
}
