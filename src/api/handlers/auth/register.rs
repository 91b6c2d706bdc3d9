use super::{
    missing_payload,
    types::{AuthResponse, RegisterRequest},
    utils::client_context,
};
use crate::{
    api::error::ErrorResponse,
    error::AuthError,
    orchestrator::{AuthOrchestrator, RegisterInput},
};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created and signed in", body = AuthResponse),
        (status = 400, description = "Invalid username, email or password", body = ErrorResponse),
        (status = 404, description = "Unknown module or default role", body = ErrorResponse),
        (status = 409, description = "Username or email already taken", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn register(
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    headers: HeaderMap,
    payload: Option<Json<RegisterRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(missing_payload());
    };

    let client = client_context(&headers, request.device_id);
    let input = RegisterInput {
        username: request.username,
        email: request.email,
        password: request.password,
        first_name: request.first_name,
        last_name: request.last_name,
        module_ids: request.module_ids,
    };
    let outcome = orchestrator.register(input, &client).await?;
    Ok((StatusCode::CREATED, Json(AuthResponse::from(outcome))))
}
