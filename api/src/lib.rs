//! Quotagate HTTP API
//!
//! JSON surface over the quotagate core: member endpoints for registration,
//! license activation and message authorization, plus admin endpoints for
//! licenses, sanctions, subjects and the audit log.
//!
//! # Request path
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  request                                                                │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  rate_limit_middleware                                           │  │
//! │  │  identity (unverified) │ address sanction │ sliding window       │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐              │
//! │  │   handler    │───►│  Credential  │───►│   Gateway    │              │
//! │  │  (routes/*)  │    │  Validator   │    │  component   │              │
//! │  └──────────────┘    └──────────────┘    └──────────────┘              │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  ApiResponse envelope │ ApiError → status + stable code                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod models;
pub mod routes;

#[cfg(test)]
mod tests;

use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use quotagate_core::Gateway;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

pub use error::{ApiError, ApiResult};
pub use models::*;

/// API state
#[derive(Clone)]
pub struct ApiState {
    /// Wired gateway components
    pub gateway: Gateway,
    /// API version
    pub version: String,
}

impl ApiState {
    /// State reporting this crate's version
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Quotagate API",
        version = "1.0.0",
        description = "Rate limits, message quotas, license keys and sanctions for a metered chat service",
        license(name = "Apache-2.0")
    ),
    paths(
        routes::health::health_check,
        routes::account::register,
        routes::account::activate_license,
        routes::account::daily_reset,
        routes::account::usage,
        routes::account::authorize_message,
        routes::licenses::create_license,
        routes::licenses::invalidate_license,
        routes::licenses::purge_licenses,
        routes::licenses::list_licenses,
        routes::admin::ban_user,
        routes::admin::unban_user,
        routes::admin::warn_user,
        routes::admin::ban_address,
        routes::admin::unban_address,
        routes::admin::reset_usage,
        routes::admin::set_plan,
        routes::admin::set_admin,
        routes::admin::delete_user,
        routes::admin::list_subjects,
        routes::admin::audit_logs,
    ),
    components(
        schemas(
            ErrorResponse, Ack,
            routes::health::HealthResponse,
            RegisterRequest, SubjectView,
            ActivateLicenseRequest, ActivationResponse,
            DailyResetRequest, AuthorizeRequest, UsageResponse,
            SubjectSanctionRequest, AddressSanctionRequest, SubjectRequest, AddressRequest, SanctionView,
            CreateLicenseRequest, LicenseKeyRequest, CredentialOnly, LicenseView, PurgeResponse,
            SetPlanRequest, SetAdminRequest, AuditEntryView
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "account", description = "Member registration, licenses and message allowance"),
        (name = "licenses", description = "License key administration"),
        (name = "admin", description = "Sanctions, subjects and audit log")
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the API router
pub fn build_router(state: ApiState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest("/api/v1", api_routes())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit_middleware,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn api_routes() -> Router<Arc<ApiState>> {
    use routes::{account, admin, health, licenses};

    Router::new()
        .route("/health", get(health::health_check))
        // Member
        .route("/register", post(account::register))
        .route("/activate-license", post(account::activate_license))
        .route("/daily-reset", post(account::daily_reset))
        .route("/usage", get(account::usage))
        .route("/messages/authorize", post(account::authorize_message))
        // Licenses
        .route("/admin/create-license", post(licenses::create_license))
        .route("/admin/invalidate-license", post(licenses::invalidate_license))
        .route("/admin/purge-licenses", post(licenses::purge_licenses))
        .route("/admin/licenses", get(licenses::list_licenses))
        // Sanctions and subjects
        .route("/admin/ban-user", post(admin::ban_user))
        .route("/admin/unban-user", post(admin::unban_user))
        .route("/admin/warn-user", post(admin::warn_user))
        .route("/admin/ban-address", post(admin::ban_address))
        .route("/admin/unban-address", post(admin::unban_address))
        .route("/admin/reset-usage", post(admin::reset_usage))
        .route("/admin/set-plan", post(admin::set_plan))
        .route("/admin/set-admin", post(admin::set_admin))
        .route("/admin/delete-user", post(admin::delete_user))
        .route("/admin/subjects", get(admin::list_subjects))
        .route("/admin/audit-logs", get(admin::audit_logs))
}
