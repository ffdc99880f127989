//! Rate limiting and address-sanction middleware
//!
//! Runs before every handler: resolves a best-effort identity, rejects
//! banned client addresses, then records the request against the sliding
//! window for (identity, matched route).

use crate::error::ApiError;
use crate::middleware::auth::bearer_token;
use crate::ApiState;
use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use quotagate_core::{resolve_identity, GatewayError, RateDecision, RequestOrigin};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::warn;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Bucket identity and client address for `request`
fn origin_of(request: &Request) -> (String, Option<IpAddr>) {
    let headers = request.headers();
    let origin = RequestOrigin {
        forwarded_for: header_str(headers, "x-forwarded-for"),
        real_ip: header_str(headers, "x-real-ip"),
        socket: request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr),
    };
    (resolve_identity(bearer_token(headers), &origin), origin.client_address())
}

fn apply_headers(response: &mut Response, decision: RateDecision, limit: u32) {
    for (name, value) in decision.headers(limit) {
        // from_bytes normalizes case
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
            response.headers_mut().insert(name, value);
        }
    }
}

/// Address-sanction gate and per-route sliding window, ahead of every handler
pub async fn rate_limit_middleware(State(state): State<Arc<ApiState>>, request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let (identity, address) = origin_of(&request);

    if let Some(address) = address {
        match state.gateway.sanctions.is_address_sanctioned(address).await {
            Ok(false) => {}
            Ok(true) => {
                warn!(%address, route = %route, "request from banned address");
                return ApiError::from(GatewayError::Unauthorized("address suspended".into())).into_response();
            }
            Err(e) => return ApiError::from(e).into_response(),
        }
    }

    let (decision, policy) = state.gateway.limiter.check_route(&identity, &route).await;
    let mut response = match decision {
        RateDecision::Deny { retry_after_secs } => {
            ApiError::from(GatewayError::RateLimited { retry_after_secs }).into_response()
        }
        RateDecision::Allow { .. } => next.run(request).await,
    };
    apply_headers(&mut response, decision, policy.max_requests);
    response
}
