use super::{
    missing_payload,
    types::{ForgotPasswordRequest, MessageResponse, ResetPasswordRequest},
};
use crate::{api::error::ErrorResponse, error::AuthError, orchestrator::AuthOrchestrator};
use axum::{
    extract::Extension,
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Same answer whether or not the email is registered", body = MessageResponse),
        (status = 400, description = "The reset email could not be sent", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn forgot_password(
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(missing_payload());
    };
    orchestrator.forgot_password(&request.email).await?;
    Ok(Json(MessageResponse::new(
        "If the email is registered, a password reset link has been sent",
    )))
}

#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed; every session signed out", body = MessageResponse),
        (status = 400, description = "Invalid or expired token, or passwords do not match", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn reset_password(
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(missing_payload());
    };
    orchestrator
        .reset_password(
            request.token.trim(),
            &request.password,
            &request.confirm_password,
        )
        .await?;
    Ok(Json(MessageResponse::new("Password reset successfully")))
}
