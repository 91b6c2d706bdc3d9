use super::{
    missing_payload,
    types::{AuthResponse, RefreshTokenRequest},
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
    path = "/auth/refresh-token",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "New token set; the presented refresh token is spent", body = AuthResponse),
        (status = 401, description = "Invalid token or session", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn refresh_token(
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    payload: Option<Json<RefreshTokenRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(missing_payload());
    };
    let outcome = orchestrator.refresh(request.refresh_token.trim()).await?;
    Ok(Json(AuthResponse::from(outcome)))
}
