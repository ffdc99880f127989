//! API Models

use chrono::{DateTime, Utc};
use quotagate_core::{AuditLogEntry, LicenseKey, LicenseState, Plan, QuotaSnapshot, Sanction, SanctionKind, Subject};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Standard API response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the call succeeded
    pub success: bool,
    /// Payload on success
    pub data: Option<T>,
    /// Error details on failure
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    /// Successful envelope around `data`
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failure envelope
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorResponse {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Stable machine-readable code
    pub code: String,
    /// Human-readable description
    pub message: String,
}

// ============ Member ============

/// Registration request
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Fallback when no `Authorization` header is sent
    pub credential: Option<String>,
    /// Contact address to store on first registration
    pub email: Option<String>,
}

/// License activation request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivateLicenseRequest {
    /// Identity token; the `Authorization` header takes precedence
    pub credential: Option<String>,
    /// Subject the call acts on
    pub subject_id: String,
    /// Key to redeem
    pub license_key: String,
}

/// License activation result
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivationResponse {
    /// Plan now in effect
    #[schema(value_type = String, example = "pro")]
    pub plan: Plan,
    /// Allowance of the new plan
    pub message_limit: u32,
    /// Messages consumed in the current period
    pub messages_used: u32,
    /// End of the license period
    pub expires_at: Option<DateTime<Utc>>,
}

/// Daily reset request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DailyResetRequest {
    /// Identity token; the `Authorization` header takes precedence
    pub credential: Option<String>,
    /// Subject the call acts on
    pub subject_id: String,
}

/// Message authorization request
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    /// Identity token; the `Authorization` header takes precedence
    pub credential: Option<String>,
    /// Messages to consume, default 1
    pub amount: Option<u32>,
}

/// Reconciled usage
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageResponse {
    /// Current plan
    #[schema(value_type = String, example = "free")]
    pub plan: Plan,
    /// Messages consumed in the current period
    pub messages_used: u32,
    /// Allowance of the current plan
    pub messages_limit: u32,
    /// Messages left in the current period
    pub remaining: u32,
    /// End of the license period, if licensed
    pub license_expires_at: Option<DateTime<Utc>>,
    /// Last counter reset
    pub last_message_reset: DateTime<Utc>,
}

impl From<QuotaSnapshot> for UsageResponse {
    fn from(snapshot: QuotaSnapshot) -> Self {
        Self {
            plan: snapshot.plan,
            messages_used: snapshot.messages_used,
            messages_limit: snapshot.messages_limit,
            remaining: snapshot.remaining(),
            license_expires_at: snapshot.license_expires_at,
            last_message_reset: snapshot.last_message_reset,
        }
    }
}

/// Subject as shown to callers
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubjectView {
    /// Subject id
    pub id: String,
    /// Contact address
    pub email: Option<String>,
    /// Current plan
    #[schema(value_type = String, example = "free")]
    pub plan: Plan,
    /// Messages consumed in the current period
    pub messages_used: u32,
    /// Allowance of the current plan
    pub messages_limit: u32,
    /// May call admin endpoints
    pub is_admin: bool,
    /// Under a live ban
    pub is_banned: bool,
    /// Warnings recorded so far
    pub warning_count: u32,
    /// End of the license period, if licensed
    pub license_expires_at: Option<DateTime<Utc>>,
    /// First registration
    pub created_at: DateTime<Utc>,
}

impl From<Subject> for SubjectView {
    fn from(s: Subject) -> Self {
        Self {
            id: s.id,
            email: s.email,
            plan: s.plan,
            messages_used: s.messages_used,
            messages_limit: s.messages_limit,
            is_admin: s.is_admin,
            is_banned: s.is_banned,
            warning_count: s.warning_count,
            license_expires_at: s.license_expires_at,
            created_at: s.created_at,
        }
    }
}

// ============ Admin ============

/// Ban or warn a subject
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSanctionRequest {
    /// Identity token; the `Authorization` header takes precedence
    pub credential: Option<String>,
    /// Subject the call acts on
    pub subject_id: String,
    /// Shown to the subject and recorded in the audit log
    pub reason: String,
    /// Omit for a permanent sanction
    pub duration_minutes: Option<u32>,
}

/// Ban an address
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddressSanctionRequest {
    /// Identity token; the `Authorization` header takes precedence
    pub credential: Option<String>,
    /// IPv4 or IPv6 address
    pub address: String,
    /// Shown to the subject and recorded in the audit log
    pub reason: String,
    /// Omit for a permanent sanction
    pub duration_minutes: Option<u32>,
}

/// Request naming a subject
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRequest {
    /// Identity token; the `Authorization` header takes precedence
    pub credential: Option<String>,
    /// Subject whose ban is lifted
    pub subject_id: String,
}

/// Request naming an address
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddressRequest {
    /// Identity token; the `Authorization` header takes precedence
    pub credential: Option<String>,
    /// Address whose ban is lifted
    pub address: String,
}

/// Sanction as shown to admins
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SanctionView {
    /// Sanction id
    pub id: String,
    /// `subject:<id>` or `address:<ip>`
    pub target: String,
    /// `ban` or `warn`
    pub kind: String,
    /// Shown to the subject and recorded in the audit log
    pub reason: String,
    /// Admin who created it
    pub created_by: String,
    /// Start of the sanction
    pub created_at: DateTime<Utc>,
    /// `None` while permanent
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<Sanction> for SanctionView {
    fn from(s: Sanction) -> Self {
        Self {
            id: s.id,
            target: s.target.to_string(),
            kind: match s.kind {
                SanctionKind::Ban => "ban",
                SanctionKind::Warn => "warn",
            }
            .to_string(),
            reason: s.reason,
            created_by: s.created_by,
            created_at: s.created_at,
            expires_at: s.expires_at,
        }
    }
}

/// License creation request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateLicenseRequest {
    /// Identity token; the `Authorization` header takes precedence
    pub credential: Option<String>,
    /// `classic` or `pro`
    pub plan: String,
    /// Days to redeem, and of validity once redeemed
    pub validity_days: u32,
}

/// Request naming a license key
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LicenseKeyRequest {
    /// Identity token; the `Authorization` header takes precedence
    pub credential: Option<String>,
    /// Key to redeem
    pub license_key: String,
}

/// Request carrying only a credential
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialOnly {
    /// Identity token; the `Authorization` header takes precedence
    pub credential: Option<String>,
}

/// License as shown to admins
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LicenseView {
    /// License key string
    pub key: String,
    /// Plan granted on redemption
    #[schema(value_type = String, example = "pro")]
    pub plan: Plan,
    /// Days to redeem, and of validity once redeemed
    pub validity_days: u32,
    /// False once invalidated
    pub valid: bool,
    /// created, redeemed or invalidated
    #[schema(value_type = String, example = "created")]
    pub state: LicenseState,
    /// Admin who created it
    pub created_by: String,
    /// Issue time
    pub created_at: DateTime<Utc>,
    pub used_by: Option<String>,
    pub used_at: Option<DateTime<Utc>>,
}

impl From<LicenseKey> for LicenseView {
    fn from(l: LicenseKey) -> Self {
        Self {
            state: l.state(),
            key: l.key,
            plan: l.plan,
            validity_days: l.validity_days,
            valid: l.valid,
            created_by: l.created_by,
            created_at: l.created_at,
            used_by: l.used_by,
            used_at: l.used_at,
        }
    }
}

/// Purge result
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PurgeResponse {
    /// Keys removed
    pub deleted: usize,
}

/// Plan change request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetPlanRequest {
    /// Identity token; the `Authorization` header takes precedence
    pub credential: Option<String>,
    /// Subject the call acts on
    pub subject_id: String,
    /// `free`, `classic` or `pro`
    pub plan: String,
}

/// Admin flag change request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetAdminRequest {
    /// Identity token; the `Authorization` header takes precedence
    pub credential: Option<String>,
    /// Subject the call acts on
    pub subject_id: String,
    /// Grant or revoke
    pub is_admin: bool,
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntryView {
    /// Entry id
    pub id: Uuid,
    /// Admin who made the change
    pub actor_id: String,
    /// Dotted action name, e.g. `license.redeem`
    pub action: String,
    /// Action-specific details
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
}

impl From<AuditLogEntry> for AuditEntryView {
    fn from(e: AuditLogEntry) -> Self {
        Self {
            id: e.id,
            actor_id: e.actor_id,
            action: e.action.to_string(),
            payload: e.payload,
            timestamp: e.timestamp,
        }
    }
}

/// Acknowledgement for mutations without a richer result
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Ack {
    /// Always true
    pub ok: bool,
}

impl Ack {
    /// Positive acknowledgement
    pub fn ok() -> Self {
        Self { ok: true }
    }
}
