//! Gateway configuration

use crate::model::Plan;
use crate::{GateResult, GatewayError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Top-level gateway configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Message allowance per plan
    pub plans: PlanLimits,
    /// Sliding-window policies
    pub rate_limits: RateLimitConfig,
    /// Backing store timeouts and retries
    pub store: StoreConfig,
    /// Daily rollover settings
    pub reconciler: ReconcilerConfig,
    /// Identity provider settings
    pub auth: AuthConfig,
}

/// Message allowance for each plan
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanLimits {
    /// Free plan allowance
    pub free: u32,
    /// Classic plan allowance, per day
    pub classic: u32,
    /// Pro plan allowance, per day
    pub pro: u32,
}

impl PlanLimits {
    /// Allowance granted by `plan`
    pub fn limit_for(&self, plan: Plan) -> u32 {
        match plan {
            Plan::Free => self.free,
            Plan::Classic => self.classic,
            Plan::Pro => self.pro,
        }
    }
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            free: 10,
            classic: 100,
            pro: 1000,
        }
    }
}

/// Shortest accepted window; retry-after is reported in whole seconds
pub const MIN_WINDOW_MS: u64 = 1_000;

/// One sliding-window policy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePolicy {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests allowed inside one window
    pub max_requests: u32,
}

impl RoutePolicy {
    /// Policy allowing `max_requests` per `window_ms`
    pub const fn new(window_ms: u64, max_requests: u32) -> Self {
        Self { window_ms, max_requests }
    }
}

/// Rate limit configuration, keyed by route path
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Policy for routes without an explicit entry
    pub default: RoutePolicy,
    /// Per-route overrides
    pub routes: HashMap<String, RoutePolicy>,
}

impl RateLimitConfig {
    /// Policy that applies to `route`
    pub fn policy_for(&self, route: &str) -> RoutePolicy {
        self.routes.get(route).copied().unwrap_or(self.default)
    }

    /// Reject windows shorter than [`MIN_WINDOW_MS`] and policies that
    /// allow nothing
    pub fn validate(&self) -> GateResult<()> {
        let policies = std::iter::once(("default", &self.default))
            .chain(self.routes.iter().map(|(route, policy)| (route.as_str(), policy)));
        for (route, policy) in policies {
            if policy.window_ms < MIN_WINDOW_MS {
                return Err(GatewayError::Validation(format!(
                    "rate limit window for {} is {}ms, minimum is {}ms",
                    route, policy.window_ms, MIN_WINDOW_MS
                )));
            }
            if policy.max_requests == 0 {
                return Err(GatewayError::Validation(format!(
                    "rate limit for {} allows no requests",
                    route
                )));
            }
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut routes = HashMap::new();
        routes.insert("/api/v1/activate-license".to_string(), RoutePolicy::new(60_000, 5));
        routes.insert("/api/v1/messages/authorize".to_string(), RoutePolicy::new(60_000, 30));
        routes.insert("/api/v1/register".to_string(), RoutePolicy::new(3_600_000, 10));

        Self {
            default: RoutePolicy::new(60_000, 60),
            routes,
        }
    }
}

/// Backing store call policy
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Per-call timeout
    pub timeout_ms: u64,
    /// Optimistic transaction attempts before giving up on contention
    pub max_retries: u32,
    /// Retries of a call that timed out or found the store unavailable
    pub transient_retries: u32,
}

impl StoreConfig {
    /// Per-call timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            max_retries: 8,
            transient_retries: 2,
        }
    }
}

/// Daily rollover settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Fixed UTC offset, in minutes, that defines a calendar day
    pub day_offset_minutes: i32,
}

/// Identity provider settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret
    pub jwt_secret: String,
    /// Required `iss` claim
    pub jwt_issuer: String,
    /// Required `aud` claim
    pub jwt_audience: String,
    /// Clock skew tolerated on `exp`/`nbf`
    pub leeway_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_issuer: "quotagate".to_string(),
            jwt_audience: "quotagate-api".to_string(),
            leeway_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_lookup_falls_back_to_default() {
        let config = RateLimitConfig::default();
        assert_eq!(
            config.policy_for("/api/v1/activate-license"),
            RoutePolicy::new(60_000, 5)
        );
        assert_eq!(config.policy_for("/api/v1/usage"), config.default);
    }

    #[test]
    fn test_sub_second_windows_are_rejected() {
        let mut config = RateLimitConfig::default();
        assert!(config.validate().is_ok());

        config.routes.insert("/api/v1/usage".into(), RoutePolicy::new(500, 10));
        assert!(matches!(config.validate(), Err(GatewayError::Validation(_))));

        config.routes.insert("/api/v1/usage".into(), RoutePolicy::new(MIN_WINDOW_MS, 0));
        assert!(matches!(config.validate(), Err(GatewayError::Validation(_))));
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: GatewayConfig = serde_json::from_str(r#"{"plans": {"free": 25}}"#).unwrap();
        assert_eq!(config.plans.free, 25);
        assert_eq!(config.plans.pro, 1000);
        assert_eq!(config.store.max_retries, 8);
    }
}
