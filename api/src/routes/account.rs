//! Member endpoints

use crate::error::ApiResult;
use crate::extract::ApiJson;
use crate::middleware::auth::{authenticate, ensure_own_account, identify};
use crate::models::*;
use crate::ApiState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use quotagate_core::Access;
use std::sync::Arc;
use tracing::info;

/// Create the caller's subject on the Free plan
#[utoipa::path(
    post,
    path = "/api/v1/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Subject created", body = SubjectView),
        (status = 200, description = "Subject already existed", body = SubjectView),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse)
    ),
    tag = "account"
)]
pub async fn register(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<SubjectView>>)> {
    let identity = identify(&state, &headers, req.credential.as_deref()).await?;
    let email = req.email.as_deref().or(identity.email.as_deref());
    let (subject, created) = state
        .gateway
        .subjects
        .register(&identity.subject_id, email)
        .await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(ApiResponse::success(subject.into()))))
}

/// Redeem a license key for the caller's own subject
#[utoipa::path(
    post,
    path = "/api/v1/activate-license",
    request_body = ActivateLicenseRequest,
    responses(
        (status = 200, description = "License activated", body = ActivationResponse),
        (status = 400, description = "Invalid, expired or already used key", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse),
        (status = 403, description = "Not the caller's account", body = ErrorResponse)
    ),
    tag = "account"
)]
pub async fn activate_license(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<ActivateLicenseRequest>,
) -> ApiResult<Json<ApiResponse<ActivationResponse>>> {
    let principal = authenticate(&state, &headers, req.credential.as_deref(), Access::Member).await?;
    ensure_own_account(&principal, &req.subject_id)?;

    state
        .gateway
        .licenses
        .redeem(&req.license_key, &principal.subject_id)
        .await?;
    let usage = state.gateway.ledger.usage(&principal.subject_id).await?;

    info!(subject_id = %principal.subject_id, plan = %usage.plan, "license activated");
    Ok(Json(ApiResponse::success(ActivationResponse {
        plan: usage.plan,
        message_limit: usage.messages_limit,
        messages_used: usage.messages_used,
        expires_at: usage.license_expires_at,
    })))
}

/// Apply any pending expiry or daily rollover
#[utoipa::path(
    post,
    path = "/api/v1/daily-reset",
    request_body = DailyResetRequest,
    responses(
        (status = 200, description = "Reconciled usage", body = UsageResponse),
        (status = 403, description = "Not the caller's account", body = ErrorResponse)
    ),
    tag = "account"
)]
pub async fn daily_reset(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<DailyResetRequest>,
) -> ApiResult<Json<ApiResponse<UsageResponse>>> {
    let principal = authenticate(&state, &headers, req.credential.as_deref(), Access::Member).await?;
    ensure_own_account(&principal, &req.subject_id)?;

    let usage = state.gateway.ledger.usage(&principal.subject_id).await?;
    Ok(Json(ApiResponse::success(usage.into())))
}

/// Caller's reconciled usage
#[utoipa::path(
    get,
    path = "/api/v1/usage",
    responses(
        (status = 200, description = "Reconciled usage", body = UsageResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse)
    ),
    tag = "account",
    security(("bearer" = []))
)]
pub async fn usage(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> ApiResult<Json<ApiResponse<UsageResponse>>> {
    let principal = authenticate(&state, &headers, None, Access::Member).await?;
    let usage = state.gateway.ledger.usage(&principal.subject_id).await?;
    Ok(Json(ApiResponse::success(usage.into())))
}

/// Consume message allowance before sending a chat message
#[utoipa::path(
    post,
    path = "/api/v1/messages/authorize",
    request_body = AuthorizeRequest,
    responses(
        (status = 200, description = "Allowance consumed", body = UsageResponse),
        (status = 429, description = "Quota exceeded or rate limited", body = ErrorResponse)
    ),
    tag = "account"
)]
pub async fn authorize_message(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<AuthorizeRequest>,
) -> ApiResult<Json<ApiResponse<UsageResponse>>> {
    let principal = authenticate(&state, &headers, req.credential.as_deref(), Access::Member).await?;
    let usage = state
        .gateway
        .ledger
        .try_consume(&principal.subject_id, req.amount.unwrap_or(1))
        .await?;
    Ok(Json(ApiResponse::success(usage.into())))
}
