//! Sanction Manager
//!
//! Bans and warnings against subjects or network addresses. Expiry is lazy:
//! a sanction whose `expires_at` has passed is inactive whether or not it has
//! been physically removed yet.

use crate::audit::{AuditAction, AuditLog};
use crate::clock::Clock;
use crate::model::{Sanction, SanctionKind, SanctionTarget};
use crate::store::{Expect, SanctionFilter, StoreClient, StoreError, Transaction};
use crate::{GateResult, GatewayError};
use serde_json::json;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Longest accepted sanction reason, in characters
pub const MAX_REASON_LEN: usize = 500;

fn validate(reason: &str, duration_minutes: Option<u32>) -> GateResult<()> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(GatewayError::Validation("reason must not be empty".into()));
    }
    if reason.chars().count() > MAX_REASON_LEN {
        return Err(GatewayError::Validation(format!(
            "reason must be at most {} characters",
            MAX_REASON_LEN
        )));
    }
    if duration_minutes == Some(0) {
        return Err(GatewayError::Validation("durationMinutes must be at least 1".into()));
    }
    Ok(())
}

fn action_for(target: &SanctionTarget, kind: SanctionKind) -> AuditAction {
    match (target, kind) {
        (SanctionTarget::Subject(_), SanctionKind::Ban) => AuditAction::SubjectBan,
        (SanctionTarget::Subject(_), SanctionKind::Warn) => AuditAction::SubjectWarn,
        (SanctionTarget::Address(_), SanctionKind::Ban) => AuditAction::AddressBan,
        (SanctionTarget::Address(_), SanctionKind::Warn) => AuditAction::AddressWarn,
    }
}

/// Sanction manager
#[derive(Clone)]
pub struct SanctionManager {
    store: StoreClient,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
}

impl SanctionManager {
    /// Manager over `store`
    pub fn new(store: StoreClient, clock: Arc<dyn Clock>, audit: AuditLog) -> Self {
        Self { store, clock, audit }
    }

    /// Ban `target`, replacing any existing ban. `None` duration is permanent.
    pub async fn ban(
        &self,
        target: SanctionTarget,
        reason: &str,
        duration_minutes: Option<u32>,
        actor_id: &str,
    ) -> GateResult<Sanction> {
        self.impose(target, SanctionKind::Ban, reason, duration_minutes, actor_id)
            .await
    }

    /// Record a warning. Warnings never block access.
    pub async fn warn(
        &self,
        target: SanctionTarget,
        reason: &str,
        duration_minutes: Option<u32>,
        actor_id: &str,
    ) -> GateResult<Sanction> {
        self.impose(target, SanctionKind::Warn, reason, duration_minutes, actor_id)
            .await
    }

    async fn impose(
        &self,
        target: SanctionTarget,
        kind: SanctionKind,
        reason: &str,
        duration_minutes: Option<u32>,
        actor_id: &str,
    ) -> GateResult<Sanction> {
        validate(reason, duration_minutes)?;
        let reason = reason.trim();

        let sanction = match &target {
            SanctionTarget::Address(_) => {
                let now = self.clock.now();
                let sanction = Sanction::new(target.clone(), kind, reason, actor_id, duration_minutes, now);
                self.store
                    .commit(Transaction::new().put_sanction(sanction.clone()))
                    .await?;
                sanction
            }
            SanctionTarget::Subject(subject_id) => {
                self.impose_on_subject(subject_id, &target, kind, reason, duration_minutes, actor_id)
                    .await?
            }
        };

        info!(
            target_id = %sanction.target,
            kind = ?sanction.kind,
            expires_at = ?sanction.expires_at,
            actor_id,
            "sanction imposed"
        );
        self.audit
            .append(
                actor_id,
                action_for(&sanction.target, kind),
                json!({
                    "target": sanction.target.to_string(),
                    "reason": sanction.reason,
                    "durationMinutes": sanction.duration_minutes,
                }),
            );
        Ok(sanction)
    }

    /// Write the sanction together with the subject's denormalized flags.
    /// The subject write is conditioned on the version whose `is_admin` was
    /// checked, so a concurrent admin grant forces a re-check.
    async fn impose_on_subject(
        &self,
        subject_id: &str,
        target: &SanctionTarget,
        kind: SanctionKind,
        reason: &str,
        duration_minutes: Option<u32>,
        actor_id: &str,
    ) -> GateResult<Sanction> {
        for attempt in 1..=self.store.max_attempts() {
            let current = self.store.require_subject(subject_id).await?;
            if current.value.is_admin {
                return Err(GatewayError::Conflict("cannot sanction an admin".into()));
            }

            let now = self.clock.now();
            let sanction = Sanction::new(target.clone(), kind, reason, actor_id, duration_minutes, now);
            let mut subject = current.value.clone();
            match kind {
                SanctionKind::Ban => {
                    subject.is_banned = true;
                    subject.ban_reason = Some(sanction.reason.clone());
                    subject.banned_at = Some(now);
                    subject.banned_by = Some(actor_id.to_string());
                }
                SanctionKind::Warn => subject.warning_count += 1,
            }

            let tx = Transaction::new()
                .put_subject(subject, Expect::Version(current.version))
                .put_sanction(sanction.clone());
            match self.store.commit(tx).await {
                Ok(()) => return Ok(sanction),
                Err(StoreError::VersionConflict(_)) => {
                    debug!(subject_id, attempt, "sanction conflict, re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(GatewayError::TransientStore("write contention".into()))
    }

    /// Lift the ban on `target` immediately
    pub async fn unban(&self, target: SanctionTarget, actor_id: &str) -> GateResult<()> {
        let ban_id = Sanction::ban_id(&target);
        match &target {
            SanctionTarget::Address(_) => {
                self.store
                    .commit(Transaction::new().delete_sanction(ban_id))
                    .await?;
            }
            SanctionTarget::Subject(subject_id) => {
                let mut lifted = false;
                for attempt in 1..=self.store.max_attempts() {
                    let current = self.store.require_subject(subject_id).await?;
                    let mut subject = current.value.clone();
                    subject.clear_ban();

                    let tx = Transaction::new()
                        .put_subject(subject, Expect::Version(current.version))
                        .delete_sanction(ban_id.clone());
                    match self.store.commit(tx).await {
                        Ok(()) => {
                            lifted = true;
                            break;
                        }
                        Err(StoreError::VersionConflict(_)) => {
                            debug!(subject_id = subject_id.as_str(), attempt, "unban conflict, re-reading");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                if !lifted {
                    return Err(GatewayError::TransientStore("write contention".into()));
                }
            }
        }

        info!(target_id = %target, actor_id, "ban lifted");
        let action = match target {
            SanctionTarget::Subject(_) => AuditAction::SubjectUnban,
            SanctionTarget::Address(_) => AuditAction::AddressUnban,
        };
        self.audit
            .append(actor_id, action, json!({ "target": target.to_string() }));
        Ok(())
    }

    /// Live bans and warnings for `target`
    pub async fn active_sanctions(&self, target: &SanctionTarget) -> GateResult<Vec<Sanction>> {
        let now = self.clock.now();
        let sanctions = self
            .store
            .list_sanctions(&SanctionFilter::for_target(target))
            .await?;
        Ok(sanctions.into_iter().filter(|s| s.is_active(now)).collect())
    }

    /// Whether `target` is under a ban that is permanent or not yet expired
    pub async fn is_sanctioned(&self, target: &SanctionTarget) -> GateResult<bool> {
        let now = self.clock.now();
        let filter = SanctionFilter {
            target: Some(target.clone()),
            kind: Some(SanctionKind::Ban),
        };
        let bans = self.store.list_sanctions(&filter).await?;
        Ok(bans.iter().any(|s| s.blocks(now)))
    }

    /// Whether `address` is under a live ban
    pub async fn is_address_sanctioned(&self, address: IpAddr) -> GateResult<bool> {
        self.is_sanctioned(&SanctionTarget::Address(address)).await
    }

    /// Physically delete expired sanctions
    pub async fn sweep_expired(&self) -> GateResult<usize> {
        let removed = self.store.delete_expired_sanctions(self.clock.now()).await?;
        if removed > 0 {
            debug!(removed, "expired sanctions swept");
        }
        Ok(removed)
    }
}
