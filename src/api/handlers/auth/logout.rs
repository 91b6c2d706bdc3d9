use super::{
    types::{LogoutResponse, LogoutSpecificRequest},
    utils::{device_id_header, require_principal},
};
use crate::{api::error::ErrorResponse, error::AuthError, orchestrator::AuthOrchestrator};
use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    post,
    path = "/auth/logout",
    params(
        ("X-Device-Id" = Option<String>, Header, description = "Sign out only this device")
    ),
    responses(
        (status = 200, description = "Signed out", body = LogoutResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn logout(
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_principal(&headers, &orchestrator).await?;
    let device_id = device_id_header(&headers);
    let invalidated = orchestrator
        .logout(principal.user_id, device_id.as_deref())
        .await?;
    Ok(Json(LogoutResponse {
        message: "Logged out successfully".to_string(),
        invalidated,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/logout-specific",
    request_body = LogoutSpecificRequest,
    responses(
        (status = 200, description = "Session or device signed out", body = LogoutResponse),
        (status = 400, description = "Neither sessionId nor deviceId supplied", body = ErrorResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn logout_specific(
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    headers: HeaderMap,
    payload: Option<Json<LogoutSpecificRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_principal(&headers, &orchestrator).await?;
    let request = payload.map(|Json(request)| request).unwrap_or_default();

    let device_id = request
        .device_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());
    let invalidated = match (request.session_id, device_id) {
        (Some(session_id), _) => {
            orchestrator
                .logout_by_session(principal.user_id, session_id)
                .await?
        }
        (None, Some(device_id)) => {
            orchestrator
                .logout_by_device(principal.user_id, device_id)
                .await?
        }
        (None, None) => {
            return Err(AuthError::Validation(
                "Either sessionId or deviceId must be provided".to_string(),
            ))
        }
    };
    Ok(Json(LogoutResponse {
        message: "Session logged out successfully".to_string(),
        invalidated,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/logout-all-devices",
    responses(
        (status = 200, description = "Every session of the caller signed out", body = LogoutResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn logout_all_devices(
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_principal(&headers, &orchestrator).await?;
    let invalidated = orchestrator.logout_all(principal.user_id).await?;
    Ok(Json(LogoutResponse {
        message: "Logged out from all devices".to_string(),
        invalidated,
    }))
}
