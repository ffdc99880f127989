//! Credential extraction and verification

use crate::error::{ApiError, ApiResult};
use crate::ApiState;
use axum::http::{header, HeaderMap};
use quotagate_core::{Access, Principal, VerifiedIdentity};

/// Token from `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Header token, falling back to the `credential` body field
pub fn credential<'a>(headers: &'a HeaderMap, body: Option<&'a str>) -> &'a str {
    bearer_token(headers).or(body).unwrap_or_default()
}

/// Verified caller with an existing, unsanctioned subject
pub async fn authenticate(
    state: &ApiState,
    headers: &HeaderMap,
    body: Option<&str>,
    access: Access,
) -> ApiResult<Principal> {
    Ok(state
        .gateway
        .validator
        .verify(credential(headers, body), access)
        .await?)
}

/// Verified caller whose subject may not exist yet
pub async fn identify(state: &ApiState, headers: &HeaderMap, body: Option<&str>) -> ApiResult<VerifiedIdentity> {
    Ok(state
        .gateway
        .validator
        .verify_identity(credential(headers, body))
        .await?)
}

/// Member calls may only name the caller's own subject
pub fn ensure_own_account(principal: &Principal, subject_id: &str) -> ApiResult<()> {
    if principal.subject_id == subject_id {
        Ok(())
    } else {
        Err(ApiError::NotOwnAccount)
    }
}
