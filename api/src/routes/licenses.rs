//! License administration endpoints

use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiQuery};
use crate::middleware::auth::authenticate;
use crate::models::*;
use crate::ApiState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use quotagate_core::store::LicenseFilter;
use quotagate_core::{Access, Plan};
use serde::Deserialize;
use std::sync::Arc;

/// License list filters
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    valid: Option<bool>,
    used: Option<bool>,
    plan: Option<String>,
}

/// Issue a license key
#[utoipa::path(
    post,
    path = "/api/v1/admin/create-license",
    request_body = CreateLicenseRequest,
    responses(
        (status = 200, description = "License created", body = LicenseView),
        (status = 400, description = "Invalid plan or validity", body = ErrorResponse),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse)
    ),
    tag = "licenses"
)]
pub async fn create_license(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<CreateLicenseRequest>,
) -> ApiResult<Json<ApiResponse<LicenseView>>> {
    let admin = authenticate(&state, &headers, req.credential.as_deref(), Access::Admin).await?;
    let plan: Plan = req.plan.parse()?;
    let license = state
        .gateway
        .licenses
        .create(plan, req.validity_days, &admin.subject_id)
        .await?;
    Ok(Json(ApiResponse::success(license.into())))
}

/// Permanently invalidate a license key
#[utoipa::path(
    post,
    path = "/api/v1/admin/invalidate-license",
    request_body = LicenseKeyRequest,
    responses(
        (status = 200, description = "License invalidated", body = LicenseView),
        (status = 404, description = "Unknown key", body = ErrorResponse)
    ),
    tag = "licenses"
)]
pub async fn invalidate_license(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<LicenseKeyRequest>,
) -> ApiResult<Json<ApiResponse<LicenseView>>> {
    let admin = authenticate(&state, &headers, req.credential.as_deref(), Access::Admin).await?;
    let license = state
        .gateway
        .licenses
        .invalidate(&req.license_key, &admin.subject_id)
        .await?;
    Ok(Json(ApiResponse::success(license.into())))
}

/// Delete every invalidated key
#[utoipa::path(
    post,
    path = "/api/v1/admin/purge-licenses",
    request_body = CredentialOnly,
    responses(
        (status = 200, description = "Invalid keys deleted", body = PurgeResponse)
    ),
    tag = "licenses"
)]
pub async fn purge_licenses(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<CredentialOnly>,
) -> ApiResult<Json<ApiResponse<PurgeResponse>>> {
    let admin = authenticate(&state, &headers, req.credential.as_deref(), Access::Admin).await?;
    let deleted = state.gateway.licenses.purge(&admin.subject_id).await?;
    Ok(Json(ApiResponse::success(PurgeResponse { deleted })))
}

/// List license keys
#[utoipa::path(
    get,
    path = "/api/v1/admin/licenses",
    params(
        ("valid" = Option<bool>, Query, description = "Filter by validity"),
        ("used" = Option<bool>, Query, description = "Filter by redemption"),
        ("plan" = Option<String>, Query, description = "Filter by plan")
    ),
    responses(
        (status = 200, description = "Matching licenses", body = [LicenseView])
    ),
    tag = "licenses",
    security(("bearer" = []))
)]
pub async fn list_licenses(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ApiQuery(params): ApiQuery<ListParams>,
) -> ApiResult<Json<ApiResponse<Vec<LicenseView>>>> {
    authenticate(&state, &headers, None, Access::Admin).await?;
    let filter = LicenseFilter {
        valid: params.valid,
        used: params.used,
        plan: params.plan.as_deref().map(str::parse).transpose()?,
    };
    let licenses = state.gateway.licenses.list(&filter).await?;
    Ok(Json(ApiResponse::success(
        licenses.into_iter().map(LicenseView::from).collect(),
    )))
}
