//! Quotagate Core
//!
//! Access-control and entitlement state machine sitting in front of a metered
//! chat operation: rate limits, message quotas, license keys and sanctions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            QUOTAGATE CORE                               │
//! │                                                                         │
//! │  ┌──────────────┐    ┌──────────────┐                                   │
//! │  │   Identity   │───►│ Rate Limiter │   (unverified, bucketing only)    │
//! │  │   Resolver   │    └──────────────┘                                   │
//! │  └──────────────┘                                                       │
//! │                                                                         │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐              │
//! │  │  Credential  │───►│  Reconciler  │───►│ Quota Ledger │              │
//! │  │  Validator   │    └──────────────┘    └──────────────┘              │
//! │  └──────────────┘                                                       │
//! │                                                                         │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐              │
//! │  │   License    │    │   Sanction   │    │   Subject    │              │
//! │  │   Manager    │    │   Manager    │    │  Directory   │              │
//! │  └──────────────┘    └──────────────┘    └──────────────┘              │
//! │          │                  │                   │                       │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │   Store: subjects | licenses | sanctions | audit_logs           │   │
//! │  │   versioned documents, optimistic transactions, timeouts        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod audit;
pub mod clock;
pub mod config;
pub mod gateway;
pub mod identity;
pub mod ledger;
pub mod licenses;
pub mod model;
pub mod ratelimit;
pub mod reconciler;
pub mod sanctions;
pub mod store;
pub mod subjects;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

use thiserror::Error;

pub use audit::{AuditAction, AuditLog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthConfig, GatewayConfig, PlanLimits, RateLimitConfig, RoutePolicy, StoreConfig};
pub use gateway::Gateway;
pub use identity::{resolve_identity, RequestOrigin};
pub use ledger::{QuotaLedger, QuotaSnapshot};
pub use licenses::LicenseManager;
pub use model::{AuditLogEntry, LicenseKey, LicenseState, Plan, Sanction, SanctionKind, SanctionTarget, Subject};
pub use ratelimit::{RateDecision, RateLimiter};
pub use reconciler::Reconciler;
pub use sanctions::SanctionManager;
pub use store::{InMemoryStore, Store, StoreClient, StoreError};
pub use subjects::SubjectDirectory;
pub use validator::{
    Access, CredentialValidator, IdentityProvider, JwtIdentityProvider, Principal, ProviderError, VerifiedIdentity,
};

/// Gateway error taxonomy.
///
/// Business-rule variants are surfaced to callers with stable codes;
/// `TransientStore` is the only retryable variant and never carries
/// backend detail past the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Credential missing or rejected by the identity provider
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Credential valid but the caller may not perform this call
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Too many requests in the sliding window
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the oldest request in the window ages out
        retry_after_secs: u64,
    },

    /// Message allowance exhausted
    #[error("quota exceeded: {used}/{limit} messages used")]
    QuotaExceeded {
        /// Messages already consumed
        used: u32,
        /// Allowance for the current plan
        limit: u32,
    },

    /// License key unknown or invalidated
    #[error("invalid license key")]
    InvalidLicense,

    /// License key past its redemption window
    #[error("license key expired")]
    LicenseExpired,

    /// License key already redeemed
    #[error("license key already used")]
    LicenseAlreadyUsed,

    /// Referenced record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input
    #[error("validation error: {0}")]
    Validation(String),

    /// Request conflicts with current state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backing store timed out or was unavailable after bounded retries
    #[error("transient store error: {0}")]
    TransientStore(String),
}

impl GatewayError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Self::InvalidLicense => "INVALID_LICENSE",
            Self::LicenseExpired => "LICENSE_EXPIRED",
            Self::LicenseAlreadyUsed => "LICENSE_ALREADY_USED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::TransientStore(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStore(_) | Self::RateLimited { .. })
    }
}

/// Result type for gateway operations
pub type GateResult<T> = Result<T, GatewayError>;
