//! Rate Limiting
//!
//! Sliding-window request counter keyed by (identity, route). The limiter
//! only talks to a [`RateLimitStore`]; the in-process [`MemoryWindowStore`]
//! is correct for a single instance, and a shared store with an atomic
//! check-and-record can be dropped in for multi-instance deployments.

mod memory;

pub use memory::MemoryWindowStore;

use crate::clock::Clock;
use crate::config::{RateLimitConfig, RoutePolicy};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Outcome of one rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Request recorded
    Allow {
        /// Requests left in the current window
        remaining: u32,
    },
    /// Request rejected, nothing recorded
    Deny {
        /// Seconds until the oldest request leaves the window
        retry_after_secs: u64,
    },
}

impl RateDecision {
    /// Whether the request may proceed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    /// Response headers for this decision
    pub fn headers(&self, limit: u32) -> Vec<(&'static str, String)> {
        let mut headers = vec![("X-RateLimit-Limit", limit.to_string())];
        match self {
            Self::Allow { remaining } => {
                headers.push(("X-RateLimit-Remaining", remaining.to_string()));
            }
            Self::Deny { retry_after_secs } => {
                headers.push(("X-RateLimit-Remaining", "0".to_string()));
                headers.push(("Retry-After", retry_after_secs.to_string()));
            }
        }
        headers
    }
}

/// Window storage
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically drop aged-out entries for `key`, then either record a hit
    /// at `now_ms` or deny. Concurrent hits on one key must not be lost.
    async fn hit(&self, key: &str, now_ms: i64, window_ms: u64, max_requests: u32) -> RateDecision;

    /// Requests currently inside the window for `key`
    async fn count(&self, key: &str, now_ms: i64, window_ms: u64) -> usize;

    /// Drop keys with no requests left inside their window
    async fn expire(&self, now_ms: i64) -> usize;
}

/// Seconds until the oldest recorded request leaves the window, at least 1
pub(crate) fn retry_after_secs(now_ms: i64, oldest_ms: Option<i64>, window_ms: u64) -> u64 {
    let window = window_ms as i64;
    let wait_ms = match oldest_ms {
        Some(oldest) => window - (now_ms - oldest),
        None => window,
    };
    let secs = (wait_ms.max(0) as u64).div_ceil(1000);
    secs.max(1)
}

/// Rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Limiter over `store` with per-route `config`
    pub fn new(store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>, config: RateLimitConfig) -> Self {
        Self { store, clock, config }
    }

    /// In-process limiter
    pub fn in_memory(clock: Arc<dyn Clock>, config: RateLimitConfig) -> Self {
        Self::new(Arc::new(MemoryWindowStore::new()), clock, config)
    }

    fn key(identity: &str, route: &str) -> String {
        format!("{}|{}", identity, route)
    }

    /// Check and record one request
    pub async fn check(&self, identity: &str, route: &str, window_ms: u64, max_requests: u32) -> RateDecision {
        let key = Self::key(identity, route);
        let decision = self
            .store
            .hit(&key, self.clock.now_ms(), window_ms, max_requests)
            .await;

        if let RateDecision::Deny { retry_after_secs } = decision {
            warn!(identity, route, retry_after_secs, "rate limit exceeded");
        }
        decision
    }

    /// Check using the configured policy for `route`
    pub async fn check_route(&self, identity: &str, route: &str) -> (RateDecision, RoutePolicy) {
        let policy = self.config.policy_for(route);
        let decision = self
            .check(identity, route, policy.window_ms, policy.max_requests)
            .await;
        (decision, policy)
    }

    /// Requests recorded for (identity, route) inside the route's window
    pub async fn current(&self, identity: &str, route: &str) -> usize {
        let policy = self.config.policy_for(route);
        self.store
            .count(&Self::key(identity, route), self.clock.now_ms(), policy.window_ms)
            .await
    }

    /// Drop idle windows
    pub async fn sweep(&self) -> usize {
        self.store.expire(self.clock.now_ms()).await
    }
}
