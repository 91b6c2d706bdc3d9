use super::{
    missing_payload,
    types::{AuthResponse, LoginRequest},
    utils::client_context,
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
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 429, description = "Account temporarily locked", body = ErrorResponse,
            headers(("Retry-After" = i64, description = "Seconds until the lock expires")))
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    headers: HeaderMap,
    payload: Option<Json<LoginRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(missing_payload());
    };

    let client = client_context(&headers, request.device_id);
    let outcome = orchestrator
        .login(&request.username, &request.password, &client)
        .await?;
    Ok(Json(AuthResponse::from(outcome)))
}
