//! Quota Ledger
//!
//! Message allowance per subject. Every read and consume reconciles first,
//! and the reconciled state plus the increment are committed together with a
//! compare-and-set on the subject's version, so concurrent consumers can
//! never push `messages_used` past `messages_limit`.

use crate::audit::{AuditAction, AuditLog};
use crate::clock::Clock;
use crate::model::{Plan, Subject};
use crate::reconciler::Reconciler;
use crate::store::StoreClient;
use crate::{GateResult, GatewayError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Usage counters after an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSnapshot {
    /// Plan after reconciliation
    pub plan: Plan,
    /// Messages consumed in the current period
    pub messages_used: u32,
    /// Allowance of the current plan
    pub messages_limit: u32,
    /// End of the license period, if licensed
    pub license_expires_at: Option<DateTime<Utc>>,
    /// Last counter reset
    pub last_message_reset: DateTime<Utc>,
}

impl QuotaSnapshot {
    /// Messages left in the current period
    pub fn remaining(&self) -> u32 {
        self.messages_limit.saturating_sub(self.messages_used)
    }
}

impl From<&Subject> for QuotaSnapshot {
    fn from(subject: &Subject) -> Self {
        Self {
            plan: subject.plan,
            messages_used: subject.messages_used,
            messages_limit: subject.messages_limit,
            license_expires_at: subject.license_expires_at,
            last_message_reset: subject.last_message_reset,
        }
    }
}

/// Quota ledger
#[derive(Clone)]
pub struct QuotaLedger {
    store: StoreClient,
    reconciler: Arc<Reconciler>,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
}

impl QuotaLedger {
    /// Ledger over `store`, reconciling with `reconciler` before every read
    pub fn new(store: StoreClient, reconciler: Arc<Reconciler>, clock: Arc<dyn Clock>, audit: AuditLog) -> Self {
        Self {
            store,
            reconciler,
            clock,
            audit,
        }
    }

    /// Consume `amount` messages, failing with `QuotaExceeded` and writing
    /// nothing if that would cross the limit.
    pub async fn try_consume(&self, subject_id: &str, amount: u32) -> GateResult<QuotaSnapshot> {
        if amount == 0 {
            return Err(GatewayError::Validation("amount must be at least 1".into()));
        }

        let now = self.clock.now();
        let subject = self
            .store
            .update_subject(subject_id, |subject| {
                self.reconciler.reconcile(subject, now);
                let used = subject.messages_used;
                let limit = subject.messages_limit;
                match used.checked_add(amount) {
                    Some(total) if total <= limit => {
                        subject.messages_used = total;
                        Ok(true)
                    }
                    _ => Err(GatewayError::QuotaExceeded { used, limit }),
                }
            })
            .await?;

        debug!(
            subject_id,
            used = subject.messages_used,
            limit = subject.messages_limit,
            "quota consumed"
        );
        Ok(QuotaSnapshot::from(&subject))
    }

    /// Reconciled usage. Persists the reconciliation if it changed anything,
    /// so calling this twice in a row leaves the same state as calling it
    /// once.
    pub async fn usage(&self, subject_id: &str) -> GateResult<QuotaSnapshot> {
        let now = self.clock.now();
        let subject = self
            .store
            .update_subject(subject_id, |subject| Ok(self.reconciler.reconcile(subject, now).changed()))
            .await?;
        Ok(QuotaSnapshot::from(&subject))
    }

    /// Zero the counter and stamp the reset time
    pub async fn reset(&self, subject_id: &str, actor_id: &str) -> GateResult<QuotaSnapshot> {
        let now = self.clock.now();
        let subject = self
            .store
            .update_subject(subject_id, |subject| {
                self.reconciler.reconcile(subject, now);
                subject.messages_used = 0;
                subject.last_message_reset = now;
                Ok(true)
            })
            .await?;

        info!(subject_id, actor_id, "message usage reset");
        self.audit
            .append(
                actor_id,
                AuditAction::SubjectResetUsage,
                serde_json::json!({ "subjectId": subject_id }),
            );
        Ok(QuotaSnapshot::from(&subject))
    }
}
