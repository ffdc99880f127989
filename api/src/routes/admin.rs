//! Admin endpoints for sanctions, subjects and the audit log

use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiQuery};
use crate::middleware::auth::authenticate;
use crate::models::*;
use crate::ApiState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use quotagate_core::store::{AuditQuery, SubjectFilter};
use quotagate_core::{Access, AuditAction, GatewayError, Plan, SanctionTarget};
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;

const MAX_AUDIT_PAGE: usize = 1000;

fn parse_address(raw: &str) -> Result<IpAddr, GatewayError> {
    raw.trim()
        .parse()
        .map_err(|_| GatewayError::Validation(format!("'{}' is not an IP address", raw)))
}

/// Ban a subject
#[utoipa::path(
    post,
    path = "/api/v1/admin/ban-user",
    request_body = SubjectSanctionRequest,
    responses(
        (status = 200, description = "Subject banned", body = SanctionView),
        (status = 400, description = "Invalid reason or duration", body = ErrorResponse),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
        (status = 409, description = "Target is an admin", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn ban_user(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<SubjectSanctionRequest>,
) -> ApiResult<Json<ApiResponse<SanctionView>>> {
    let admin = authenticate(&state, &headers, req.credential.as_deref(), Access::Admin).await?;
    let sanction = state
        .gateway
        .sanctions
        .ban(
            SanctionTarget::Subject(req.subject_id),
            &req.reason,
            req.duration_minutes,
            &admin.subject_id,
        )
        .await?;
    Ok(Json(ApiResponse::success(sanction.into())))
}

/// Lift a subject's ban
#[utoipa::path(
    post,
    path = "/api/v1/admin/unban-user",
    request_body = SubjectRequest,
    responses((status = 200, description = "Ban lifted", body = Ack)),
    tag = "admin"
)]
pub async fn unban_user(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<SubjectRequest>,
) -> ApiResult<Json<ApiResponse<Ack>>> {
    let admin = authenticate(&state, &headers, req.credential.as_deref(), Access::Admin).await?;
    state
        .gateway
        .sanctions
        .unban(SanctionTarget::Subject(req.subject_id), &admin.subject_id)
        .await?;
    Ok(Json(ApiResponse::success(Ack::ok())))
}

/// Record a warning against a subject
#[utoipa::path(
    post,
    path = "/api/v1/admin/warn-user",
    request_body = SubjectSanctionRequest,
    responses((status = 200, description = "Warning recorded", body = SanctionView)),
    tag = "admin"
)]
pub async fn warn_user(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<SubjectSanctionRequest>,
) -> ApiResult<Json<ApiResponse<SanctionView>>> {
    let admin = authenticate(&state, &headers, req.credential.as_deref(), Access::Admin).await?;
    let sanction = state
        .gateway
        .sanctions
        .warn(
            SanctionTarget::Subject(req.subject_id),
            &req.reason,
            req.duration_minutes,
            &admin.subject_id,
        )
        .await?;
    Ok(Json(ApiResponse::success(sanction.into())))
}

/// Ban a client address
#[utoipa::path(
    post,
    path = "/api/v1/admin/ban-address",
    request_body = AddressSanctionRequest,
    responses((status = 200, description = "Address banned", body = SanctionView)),
    tag = "admin"
)]
pub async fn ban_address(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<AddressSanctionRequest>,
) -> ApiResult<Json<ApiResponse<SanctionView>>> {
    let admin = authenticate(&state, &headers, req.credential.as_deref(), Access::Admin).await?;
    let address = parse_address(&req.address)?;
    let sanction = state
        .gateway
        .sanctions
        .ban(
            SanctionTarget::Address(address),
            &req.reason,
            req.duration_minutes,
            &admin.subject_id,
        )
        .await?;
    Ok(Json(ApiResponse::success(sanction.into())))
}

/// Lift an address ban
#[utoipa::path(
    post,
    path = "/api/v1/admin/unban-address",
    request_body = AddressRequest,
    responses((status = 200, description = "Ban lifted", body = Ack)),
    tag = "admin"
)]
pub async fn unban_address(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<AddressRequest>,
) -> ApiResult<Json<ApiResponse<Ack>>> {
    let admin = authenticate(&state, &headers, req.credential.as_deref(), Access::Admin).await?;
    let address = parse_address(&req.address)?;
    state
        .gateway
        .sanctions
        .unban(SanctionTarget::Address(address), &admin.subject_id)
        .await?;
    Ok(Json(ApiResponse::success(Ack::ok())))
}

/// Zero a subject's message counter
#[utoipa::path(
    post,
    path = "/api/v1/admin/reset-usage",
    request_body = SubjectRequest,
    responses((status = 200, description = "Usage reset", body = UsageResponse)),
    tag = "admin"
)]
pub async fn reset_usage(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<SubjectRequest>,
) -> ApiResult<Json<ApiResponse<UsageResponse>>> {
    let admin = authenticate(&state, &headers, req.credential.as_deref(), Access::Admin).await?;
    let usage = state
        .gateway
        .ledger
        .reset(&req.subject_id, &admin.subject_id)
        .await?;
    Ok(Json(ApiResponse::success(usage.into())))
}

/// Move a subject to another plan
#[utoipa::path(
    post,
    path = "/api/v1/admin/set-plan",
    request_body = SetPlanRequest,
    responses((status = 200, description = "Plan changed", body = UsageResponse)),
    tag = "admin"
)]
pub async fn set_plan(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<SetPlanRequest>,
) -> ApiResult<Json<ApiResponse<UsageResponse>>> {
    let admin = authenticate(&state, &headers, req.credential.as_deref(), Access::Admin).await?;
    let plan: Plan = req.plan.parse()?;
    let usage = state
        .gateway
        .subjects
        .set_plan(&req.subject_id, plan, &admin.subject_id)
        .await?;
    Ok(Json(ApiResponse::success(usage.into())))
}

/// Grant or revoke admin
#[utoipa::path(
    post,
    path = "/api/v1/admin/set-admin",
    request_body = SetAdminRequest,
    responses(
        (status = 200, description = "Admin flag changed", body = SubjectView),
        (status = 409, description = "Subject has an active sanction", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn set_admin(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<SetAdminRequest>,
) -> ApiResult<Json<ApiResponse<SubjectView>>> {
    let admin = authenticate(&state, &headers, req.credential.as_deref(), Access::Admin).await?;
    let subject = state
        .gateway
        .subjects
        .set_admin(&req.subject_id, req.is_admin, &admin.subject_id)
        .await?;
    Ok(Json(ApiResponse::success(subject.into())))
}

/// Hard-delete a subject and its identity provider account
#[utoipa::path(
    post,
    path = "/api/v1/admin/delete-user",
    request_body = SubjectRequest,
    responses(
        (status = 200, description = "Subject deleted", body = Ack),
        (status = 404, description = "Unknown subject", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn delete_user(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<SubjectRequest>,
) -> ApiResult<Json<ApiResponse<Ack>>> {
    let admin = authenticate(&state, &headers, req.credential.as_deref(), Access::Admin).await?;
    state
        .gateway
        .subjects
        .delete(&req.subject_id, &admin.subject_id)
        .await?;
    Ok(Json(ApiResponse::success(Ack::ok())))
}

/// Subject list filters
#[derive(Debug, Default, Deserialize)]
pub struct SubjectParams {
    plan: Option<String>,
    banned: Option<bool>,
    admin: Option<bool>,
}

/// List subjects
#[utoipa::path(
    get,
    path = "/api/v1/admin/subjects",
    params(
        ("plan" = Option<String>, Query, description = "Filter by plan"),
        ("banned" = Option<bool>, Query, description = "Filter by live ban"),
        ("admin" = Option<bool>, Query, description = "Filter by admin flag")
    ),
    responses((status = 200, description = "Matching subjects", body = [SubjectView])),
    tag = "admin",
    security(("bearer" = []))
)]
pub async fn list_subjects(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiQuery(params): ApiQuery<SubjectParams>,
) -> ApiResult<Json<ApiResponse<Vec<SubjectView>>>> {
    authenticate(&state, &headers, None, Access::Admin).await?;
    let filter = SubjectFilter {
        plan: params.plan.as_deref().map(str::parse).transpose()?,
        is_banned: params.banned,
        is_admin: params.admin,
    };
    let subjects = state.gateway.subjects.list(&filter).await?;
    Ok(Json(ApiResponse::success(
        subjects.into_iter().map(SubjectView::from).collect(),
    )))
}

/// Audit log filters
#[derive(Debug, Default, Deserialize)]
pub struct AuditParams {
    actor: Option<String>,
    action: Option<String>,
    limit: Option<usize>,
}

/// Recent audit entries, newest first
#[utoipa::path(
    get,
    path = "/api/v1/admin/audit-logs",
    params(
        ("actor" = Option<String>, Query, description = "Filter by actor id"),
        ("action" = Option<String>, Query, description = "Filter by action, e.g. subject.ban"),
        ("limit" = Option<usize>, Query, description = "Maximum entries, default 100")
    ),
    responses((status = 200, description = "Audit entries", body = [AuditEntryView])),
    tag = "admin",
    security(("bearer" = []))
)]
pub async fn audit_logs(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiQuery(params): ApiQuery<AuditParams>,
) -> ApiResult<Json<ApiResponse<Vec<AuditEntryView>>>> {
    authenticate(&state, &headers, None, Access::Admin).await?;

    let action = match params.action.as_deref() {
        Some(raw) => Some(
            AuditAction::parse(raw)
                .ok_or_else(|| GatewayError::Validation(format!("unknown audit action '{}'", raw)))?,
        ),
        None => None,
    };
    let query = AuditQuery {
        actor_id: params.actor,
        action,
        limit: params.limit.unwrap_or(100).clamp(1, MAX_AUDIT_PAGE),
        ..AuditQuery::new()
    };

    let entries = state.gateway.audit.recent(&query).await?;
    Ok(Json(ApiResponse::success(
        entries.into_iter().map(AuditEntryView::from).collect(),
    )))
}
