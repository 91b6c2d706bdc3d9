use super::{
    types::{PrincipalResponse, SessionView},
    utils::require_principal,
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
    get,
    path = "/auth/sessions",
    responses(
        (status = 200, description = "Active sessions of the caller, most recent first", body = [SessionView]),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn sessions(
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_principal(&headers, &orchestrator).await?;
    let sessions: Vec<SessionView> = orchestrator
        .active_sessions(principal.user_id)
        .await?
        .into_iter()
        .map(SessionView::from)
        .collect();
    Ok(Json(sessions))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Caller and current authorities", body = PrincipalResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn me(
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_principal(&headers, &orchestrator).await?;
    Ok(Json(PrincipalResponse::from(principal)))
}
