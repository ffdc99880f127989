//! Persisted documents

use crate::GatewayError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque subject identifier assigned by the identity provider
pub type SubjectId = String;

// ============ Subjects ============

/// Service tier controlling quota size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    /// Default tier
    Free,
    /// Mid tier, licensed
    Classic,
    /// Top tier, licensed
    Pro,
}

impl Plan {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Classic => "classic",
            Self::Pro => "pro",
        }
    }

    /// Plans that can only be held through a license or an admin grant
    pub fn is_licensed(&self) -> bool {
        !matches!(self, Self::Free)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "classic" => Ok(Self::Classic),
            "pro" => Ok(Self::Pro),
            other => Err(GatewayError::Validation(format!("unknown plan '{}'", other))),
        }
    }
}

/// End-user account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    /// Identity provider subject
    pub id: SubjectId,
    /// Contact address from the credential
    pub email: Option<String>,
    /// Current plan
    pub plan: Plan,
    /// Messages consumed in the current period
    pub messages_used: u32,
    /// Allowance of the current plan
    pub messages_limit: u32,
    /// May call admin endpoints
    pub is_admin: bool,
    /// Denormalized ban flag; the ban sanction is authoritative
    pub is_banned: bool,
    /// Reason given for the live ban
    pub ban_reason: Option<String>,
    /// When the live ban began
    pub banned_at: Option<DateTime<Utc>>,
    /// Admin who imposed the live ban
    pub banned_by: Option<String>,
    /// Warnings recorded so far
    pub warning_count: u32,
    /// Key that granted the current plan
    pub license_key: Option<String>,
    /// End of the license period
    pub license_expires_at: Option<DateTime<Utc>>,
    /// Last counter reset or plan change
    pub last_message_reset: DateTime<Utc>,
    /// First registration
    pub created_at: DateTime<Utc>,
}

impl Subject {
    /// Fresh Free-plan subject
    pub fn new(id: impl Into<SubjectId>, free_limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            email: None,
            plan: Plan::Free,
            messages_used: 0,
            messages_limit: free_limit,
            is_admin: false,
            is_banned: false,
            ban_reason: None,
            banned_at: None,
            banned_by: None,
            warning_count: 0,
            license_key: None,
            license_expires_at: None,
            last_message_reset: now,
            created_at: now,
        }
    }

    /// Messages left in the current period
    pub fn remaining(&self) -> u32 {
        self.messages_limit.saturating_sub(self.messages_used)
    }

    pub(crate) fn clear_ban(&mut self) {
        self.is_banned = false;
        self.ban_reason = None;
        self.banned_at = None;
        self.banned_by = None;
    }
}

// ============ Licenses ============

/// Single-use redeemable plan upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseKey {
    /// Key string, `PLAN-<stamp>-<suffix>`
    pub key: String,
    /// Plan granted on redemption
    pub plan: Plan,
    /// Days of validity, both to redeem and once redeemed
    pub validity_days: u32,
    /// False once invalidated
    pub valid: bool,
    /// Admin who issued the key
    pub created_by: String,
    /// Issue time; the redemption window starts here
    pub created_at: DateTime<Utc>,
    pub used_by: Option<SubjectId>,
    pub used_at: Option<DateTime<Utc>>,
    /// When the key was revoked
    pub invalidated_at: Option<DateTime<Utc>>,
    /// Admin who revoked the key
    pub invalidated_by: Option<String>,
}

/// Lifecycle position of a license key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseState {
    /// Issued, not yet redeemed
    Created,
    /// Bound to a subject
    Redeemed,
    /// Revoked; eligible for purge
    Invalidated,
}

impl LicenseKey {
    /// Where the key sits in its lifecycle
    pub fn state(&self) -> LicenseState {
        if !self.valid {
            LicenseState::Invalidated
        } else if self.used_by.is_some() {
            LicenseState::Redeemed
        } else {
            LicenseState::Created
        }
    }

    /// Validity window as a duration
    pub fn validity(&self) -> Duration {
        Duration::days(i64::from(self.validity_days))
    }

    /// End of the redemption window for an unused key
    pub fn redeem_by(&self) -> DateTime<Utc> {
        self.created_at + self.validity()
    }

    /// Unredeemed and past its redemption window
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.used_by.is_none() && now >= self.redeem_by()
    }
}

// ============ Sanctions ============

/// Who a sanction applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SanctionTarget {
    /// Registered account
    Subject(SubjectId),
    /// Client network address
    Address(IpAddr),
}

impl fmt::Display for SanctionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subject(id) => write!(f, "subject:{}", id),
            Self::Address(ip) => write!(f, "address:{}", ip),
        }
    }
}

/// Kind of sanction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanctionKind {
    /// Blocks access while active
    Ban,
    /// Notice only, never blocks
    Warn,
}

/// Administrative restriction with optional expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sanction {
    /// Document id; bans share one slot per target
    pub id: String,
    /// Who is restricted
    pub target: SanctionTarget,
    /// Ban or warning
    pub kind: SanctionKind,
    /// Why it was imposed
    pub reason: String,
    /// Admin who imposed it
    pub created_by: String,
    /// Start of the sanction
    pub created_at: DateTime<Utc>,
    /// `None` means permanent
    pub duration_minutes: Option<u32>,
    /// End of the sanction; `None` while permanent
    pub expires_at: Option<DateTime<Utc>>,
}

impl Sanction {
    /// Sanction starting at `now`
    pub fn new(
        target: SanctionTarget,
        kind: SanctionKind,
        reason: impl Into<String>,
        created_by: impl Into<String>,
        duration_minutes: Option<u32>,
        now: DateTime<Utc>,
    ) -> Self {
        // One ban slot per target, so a new ban overwrites the old one.
        let id = match kind {
            SanctionKind::Ban => Self::ban_id(&target),
            SanctionKind::Warn => format!("warn:{}", Uuid::new_v4()),
        };

        Self {
            id,
            target,
            kind,
            reason: reason.into(),
            created_by: created_by.into(),
            created_at: now,
            duration_minutes,
            expires_at: duration_minutes.map(|m| now + Duration::minutes(i64::from(m))),
        }
    }

    /// Document id of the ban slot for `target`
    pub fn ban_id(target: &SanctionTarget) -> String {
        format!("ban:{}", target)
    }

    /// No expiry
    pub fn is_permanent(&self) -> bool {
        self.expires_at.is_none()
    }

    /// Not yet expired
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| e > now).unwrap_or(true)
    }

    /// Active ban
    pub fn blocks(&self, now: DateTime<Utc>) -> bool {
        self.kind == SanctionKind::Ban && self.is_active(now)
    }
}

// ============ Audit ============

/// Append-only record of an administrative mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    /// Entry id
    pub id: Uuid,
    /// Subject that performed the mutation
    pub actor_id: String,
    /// What was done
    pub action: crate::audit::AuditAction,
    /// Action-specific details
    pub payload: serde_json::Value,
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
}
