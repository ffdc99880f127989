//! Audit Log
//!
//! Best-effort, append-only record of administrative mutations. Appends run as
//! background tasks and never fail the mutation that triggered them: store
//! errors are reported through tracing and dropped.

use crate::clock::Clock;
use crate::model::AuditLogEntry;
use crate::store::{AuditQuery, StoreClient};
use crate::GateResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Mutation kinds recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    /// Key issued
    #[serde(rename = "license.create")]
    LicenseCreate,
    /// Key bound to a subject
    #[serde(rename = "license.redeem")]
    LicenseRedeem,
    /// Key revoked
    #[serde(rename = "license.invalidate")]
    LicenseInvalidate,
    /// Invalid licenses deleted
    #[serde(rename = "license.purge")]
    LicensePurge,
    /// Account banned
    #[serde(rename = "subject.ban")]
    SubjectBan,
    /// Account ban lifted
    #[serde(rename = "subject.unban")]
    SubjectUnban,
    /// Account warned
    #[serde(rename = "subject.warn")]
    SubjectWarn,
    /// Address banned
    #[serde(rename = "address.ban")]
    AddressBan,
    /// Address ban lifted
    #[serde(rename = "address.unban")]
    AddressUnban,
    /// Address warned
    #[serde(rename = "address.warn")]
    AddressWarn,
    /// Admin zeroed a message counter
    #[serde(rename = "subject.reset_usage")]
    SubjectResetUsage,
    /// Admin changed a plan
    #[serde(rename = "subject.set_plan")]
    SubjectSetPlan,
    /// Admin flag granted or revoked
    #[serde(rename = "subject.set_admin")]
    SubjectSetAdmin,
    /// Subject hard-deleted
    #[serde(rename = "subject.delete")]
    SubjectDelete,
}

impl AuditAction {
    /// Dotted wire name, e.g. `subject.ban`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LicenseCreate => "license.create",
            Self::LicenseRedeem => "license.redeem",
            Self::LicenseInvalidate => "license.invalidate",
            Self::LicensePurge => "license.purge",
            Self::SubjectBan => "subject.ban",
            Self::SubjectUnban => "subject.unban",
            Self::SubjectWarn => "subject.warn",
            Self::AddressBan => "address.ban",
            Self::AddressUnban => "address.unban",
            Self::AddressWarn => "address.warn",
            Self::SubjectResetUsage => "subject.reset_usage",
            Self::SubjectSetPlan => "subject.set_plan",
            Self::SubjectSetAdmin => "subject.set_admin",
            Self::SubjectDelete => "subject.delete",
        }
    }

    /// Inverse of [`as_str`](Self::as_str)
    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::LicenseCreate,
            Self::LicenseRedeem,
            Self::LicenseInvalidate,
            Self::LicensePurge,
            Self::SubjectBan,
            Self::SubjectUnban,
            Self::SubjectWarn,
            Self::AddressBan,
            Self::AddressUnban,
            Self::AddressWarn,
            Self::SubjectResetUsage,
            Self::SubjectSetPlan,
            Self::SubjectSetAdmin,
            Self::SubjectDelete,
        ]
        .into_iter()
        .find(|a| a.as_str() == s)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit logger
#[derive(Clone)]
pub struct AuditLog {
    store: StoreClient,
    clock: Arc<dyn Clock>,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl AuditLog {
    /// Logger writing through `store`
    pub fn new(store: StoreClient, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record a mutation in the background. Never fails and never waits on
    /// the store.
    pub fn append(&self, actor_id: &str, action: AuditAction, payload: serde_json::Value) {
        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            actor_id: actor_id.to_string(),
            action,
            payload,
            timestamp: self.clock.now(),
        };

        info!(
            target: "audit",
            id = %entry.id,
            actor_id = %entry.actor_id,
            action = %entry.action,
            payload = %entry.payload,
            "audit event"
        );

        let store = self.store.clone();
        let handle = tokio::spawn(async move {
            let actor_id = entry.actor_id.clone();
            if let Err(e) = store.append_audit(entry).await {
                warn!(target: "audit", %actor_id, action = %action, error = %e, "audit append dropped");
            }
        });

        let mut pending = self.pending.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for every append issued so far to land or fail
    pub async fn flush(&self) {
        let handles = std::mem::take(&mut *self.pending.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(target: "audit", error = %e, "audit append task aborted");
            }
        }
    }

    /// Query recorded entries, newest first. Appends issued earlier by this
    /// process are visible.
    pub async fn recent(&self, query: &AuditQuery) -> GateResult<Vec<AuditLogEntry>> {
        self.flush().await;
        self.store.query_audit(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::StoreConfig;
    use crate::testing::FlakyStore;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_append_swallows_store_failures() {
        let store = Arc::new(FlakyStore::new());
        store.fail_audit.store(true, Ordering::SeqCst);
        let log = AuditLog::new(StoreClient::new(store.clone(), &StoreConfig::default()), Arc::new(SystemClock));

        // Returns normally even though the store rejected the write
        log.append("root", AuditAction::LicensePurge, serde_json::json!({ "deleted": 3 }));
        log.flush().await;

        store.fail_audit.store(false, Ordering::SeqCst);
        let entries = log.recent(&AuditQuery::new()).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_append_does_not_wait_for_a_slow_store() {
        let store = Arc::new(FlakyStore::new());
        store.stall_audit.store(true, Ordering::SeqCst);
        let config = StoreConfig {
            timeout_ms: 50,
            ..StoreConfig::default()
        };
        let log = AuditLog::new(StoreClient::new(store.clone(), &config), Arc::new(SystemClock));

        let started = std::time::Instant::now();
        log.append("root", AuditAction::SubjectBan, serde_json::json!({ "target": "a" }));
        assert!(started.elapsed() < std::time::Duration::from_millis(50));

        // The background write times out and is dropped
        log.flush().await;
        store.stall_audit.store(false, Ordering::SeqCst);
        assert!(log.recent(&AuditQuery::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_filters_by_action() {
        let store = Arc::new(FlakyStore::new());
        let log = AuditLog::new(StoreClient::new(store, &StoreConfig::default()), Arc::new(SystemClock));

        log.append("root", AuditAction::SubjectBan, serde_json::json!({ "target": "a" }));
        log.append("root", AuditAction::SubjectUnban, serde_json::json!({ "target": "a" }));

        let query = AuditQuery {
            action: Some(AuditAction::SubjectUnban),
            ..AuditQuery::new()
        };
        let entries = log.recent(&query).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::SubjectUnban);
    }

    #[test]
    fn test_action_names_round_trip_through_serde() {
        let json = serde_json::to_string(&AuditAction::SubjectResetUsage).unwrap();
        assert_eq!(json, "\"subject.reset_usage\"");
        assert_eq!(AuditAction::parse("subject.reset_usage"), Some(AuditAction::SubjectResetUsage));
        assert_eq!(AuditAction::parse("nope"), None);
    }
}
