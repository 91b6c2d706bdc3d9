//! Module-role administration. Callers need global `ROLE_ADMIN` or the
//! `module-role:manage` permission in the `iam` module.

use super::auth::{missing_payload, types::MessageResponse, utils::require_principal};
use crate::{
    api::error::ErrorResponse,
    authz::{IAM_MODULE_KEY, MANAGE_PERMISSION},
    error::AuthError,
    models::ModuleRole,
    orchestrator::AuthOrchestrator,
};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AssignModuleRoleRequest {
    pub user_id: Uuid,
    pub module_id: Uuid,
    pub role_id: Uuid,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRoleResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub module_id: Uuid,
    pub role_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<ModuleRole> for ModuleRoleResponse {
    fn from(binding: ModuleRole) -> Self {
        Self {
            id: binding.id,
            user_id: binding.user_id,
            module_id: binding.module_id,
            role_id: binding.role_id,
            created_at: binding.created_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ModuleActiveRequest {
    pub active: bool,
}

async fn require_manager(
    headers: &HeaderMap,
    orchestrator: &AuthOrchestrator,
) -> Result<(), AuthError> {
    let principal = require_principal(headers, orchestrator).await?;
    orchestrator
        .require_admin_or_module_permission(&principal, IAM_MODULE_KEY, MANAGE_PERMISSION)
        .await
}

#[utoipa::path(
    post,
    path = "/module-roles",
    request_body = AssignModuleRoleRequest,
    responses(
        (status = 201, description = "Role bound to the user within the module", body = ModuleRoleResponse),
        (status = 403, description = "Caller may not manage module roles", body = ErrorResponse),
        (status = 404, description = "Unknown user, module or role", body = ErrorResponse),
        (status = 409, description = "Binding already exists", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "modules"
)]
#[instrument(skip_all)]
pub async fn assign_module_role(
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    headers: HeaderMap,
    payload: Option<Json<AssignModuleRoleRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    require_manager(&headers, &orchestrator).await?;
    let Some(Json(request)) = payload else {
        return Err(missing_payload());
    };
    let binding = orchestrator
        .authz()
        .assign_role_in_module(request.user_id, request.module_id, request.role_id)
        .await?;
    Ok((StatusCode::CREATED, Json(ModuleRoleResponse::from(binding))))
}

#[utoipa::path(
    delete,
    path = "/module-roles/{id}",
    params(("id" = Uuid, Path, description = "Binding id")),
    responses(
        (status = 204, description = "Binding removed"),
        (status = 403, description = "Caller may not manage module roles", body = ErrorResponse),
        (status = 404, description = "Unknown binding", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "modules"
)]
#[instrument(skip(orchestrator, headers))]
pub async fn revoke_module_role(
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AuthError> {
    require_manager(&headers, &orchestrator).await?;
    orchestrator.authz().revoke_role_in_module(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/modules/{id}/active",
    params(("id" = Uuid, Path, description = "Module id")),
    request_body = ModuleActiveRequest,
    responses(
        (status = 200, description = "Module activation changed", body = MessageResponse),
        (status = 403, description = "Caller may not manage module roles", body = ErrorResponse),
        (status = 404, description = "Unknown module", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "modules"
)]
#[instrument(skip(orchestrator, headers, payload))]
pub async fn set_module_active(
    orchestrator: Extension<Arc<AuthOrchestrator>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    payload: Option<Json<ModuleActiveRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    require_manager(&headers, &orchestrator).await?;
    let Some(Json(request)) = payload else {
        return Err(missing_payload());
    };
    orchestrator.authz().set_module_active(id, request.active).await?;
    let message = if request.active {
        "Module activated"
    } else {
        "Module deactivated"
    };
    Ok(Json(MessageResponse::new(message)))
}
