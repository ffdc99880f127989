//! Backing store abstraction
//!
//! Four logical collections (subjects, licenses, sanctions, audit_logs).
//! Subjects and licenses are versioned; every conditional write names the
//! version it was derived from and a [`Transaction`] applies all of its
//! writes or none of them.

mod memory;

pub use memory::InMemoryStore;

use crate::config::StoreConfig;
use crate::model::{AuditLogEntry, LicenseKey, Plan, Sanction, SanctionKind, SanctionTarget, Subject, SubjectId};
use crate::{GateResult, GatewayError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Store result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No document with that key
    #[error("not found: {0}")]
    NotFound(String),

    /// A conditional write saw a different version than expected
    #[error("version conflict: {0}")]
    VersionConflict(String),

    /// Insert collided with an existing key
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Store rejected the call without applying it
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Call exceeded its deadline; outcome unknown for writes
    #[error("store call timed out: {0}")]
    Timeout(&'static str),
}

impl StoreError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => GatewayError::NotFound(what),
            StoreError::DuplicateKey(what) => GatewayError::Conflict(format!("{} already exists", what)),
            StoreError::VersionConflict(_) => GatewayError::TransientStore("write contention".into()),
            StoreError::Unavailable(_) | StoreError::Timeout(_) => {
                GatewayError::TransientStore("backing store unavailable".into())
            }
        }
    }
}

/// Document plus the version it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// Monotonic per document
    pub version: u64,
    /// Document
    pub value: T,
}

/// Precondition on the current version of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Unconditional
    Any,
    /// Document must not exist yet
    Absent,
    /// Document must still be at this version
    Version(u64),
}

/// One write inside a [`Transaction`]
#[derive(Debug, Clone)]
pub enum Write {
    /// Insert or replace a subject
    PutSubject { subject: Subject, expect: Expect },
    /// Delete a subject
    DeleteSubject { id: SubjectId, expect: Expect },
    /// Insert or replace a license
    PutLicense { license: LicenseKey, expect: Expect },
    /// Insert or replace a sanction
    PutSanction(Sanction),
    /// Delete a sanction by id if present
    DeleteSanction(String),
}

/// All-or-nothing batch of conditional writes
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    writes: Vec<Write>,
}

impl Transaction {
    /// Empty transaction
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `subject` if `expect` holds
    pub fn put_subject(mut self, subject: Subject, expect: Expect) -> Self {
        self.writes.push(Write::PutSubject { subject, expect });
        self
    }

    /// Delete subject `id` if `expect` holds
    pub fn delete_subject(mut self, id: impl Into<SubjectId>, expect: Expect) -> Self {
        self.writes.push(Write::DeleteSubject { id: id.into(), expect });
        self
    }

    /// Write `license` if `expect` holds
    pub fn put_license(mut self, license: LicenseKey, expect: Expect) -> Self {
        self.writes.push(Write::PutLicense { license, expect });
        self
    }

    /// Write `sanction` unconditionally
    pub fn put_sanction(mut self, sanction: Sanction) -> Self {
        self.writes.push(Write::PutSanction(sanction));
        self
    }

    /// Delete sanction `id`
    pub fn delete_sanction(mut self, id: impl Into<String>) -> Self {
        self.writes.push(Write::DeleteSanction(id.into()));
        self
    }

    /// Writes in order
    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    /// Whether the transaction writes nothing
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

// ============ Filters ============

/// Indexed scan over subjects
#[derive(Debug, Clone, Default)]
pub struct SubjectFilter {
    /// Only subjects on this plan
    pub plan: Option<Plan>,
    /// Stored ban flag
    pub is_banned: Option<bool>,
    /// Only admins, or only non-admins
    pub is_admin: Option<bool>,
}

impl SubjectFilter {
    /// Whether `subject` passes every set field
    pub fn matches(&self, subject: &Subject) -> bool {
        self.plan.map_or(true, |p| subject.plan == p)
            && self.is_banned.map_or(true, |b| subject.is_banned == b)
            && self.is_admin.map_or(true, |a| subject.is_admin == a)
    }
}

/// Indexed scan over licenses
#[derive(Debug, Clone, Default)]
pub struct LicenseFilter {
    /// Only valid, or only invalidated, keys
    pub valid: Option<bool>,
    pub used: Option<bool>,
    /// Only keys granting this plan
    pub plan: Option<Plan>,
}

impl LicenseFilter {
    /// Whether `license` passes every set field
    pub fn matches(&self, license: &LicenseKey) -> bool {
        self.valid.map_or(true, |v| license.valid == v)
            && self.used.map_or(true, |u| license.used_by.is_some() == u)
            && self.plan.map_or(true, |p| license.plan == p)
    }
}

/// Scan over sanctions
#[derive(Debug, Clone, Default)]
pub struct SanctionFilter {
    /// Only sanctions against this target
    pub target: Option<SanctionTarget>,
    /// Only bans, or only warnings
    pub kind: Option<SanctionKind>,
}

impl SanctionFilter {
    /// Every sanction against `target`
    pub fn for_target(target: &SanctionTarget) -> Self {
        Self {
            target: Some(target.clone()),
            kind: None,
        }
    }

    /// Whether `sanction` passes every set field
    pub fn matches(&self, sanction: &Sanction) -> bool {
        self.target.as_ref().map_or(true, |t| &sanction.target == t)
            && self.kind.map_or(true, |k| sanction.kind == k)
    }
}

/// Audit log range query
#[derive(Debug, Clone)]
pub struct AuditQuery {
    /// Only entries by this actor
    pub actor_id: Option<String>,
    /// Only entries of this action
    pub action: Option<crate::audit::AuditAction>,
    /// Inclusive lower bound
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub to: Option<DateTime<Utc>>,
    /// Maximum entries returned
    pub limit: usize,
}

impl AuditQuery {
    /// Unfiltered query returning up to 100 entries
    pub fn new() -> Self {
        Self {
            actor_id: None,
            action: None,
            from: None,
            to: None,
            limit: 100,
        }
    }

    /// Whether `entry` passes every set field
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.actor_id.as_ref().map_or(true, |a| &entry.actor_id == a)
            && self.action.map_or(true, |a| entry.action == a)
            && self.from.map_or(true, |f| entry.timestamp >= f)
            && self.to.map_or(true, |t| entry.timestamp <= t)
    }
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Store ============

/// Persistence backend
#[async_trait]
pub trait Store: Send + Sync {
    /// Subject with its version
    async fn get_subject(&self, id: &str) -> StoreResult<Option<Versioned<Subject>>>;

    /// Subjects matching `filter`
    async fn list_subjects(&self, filter: &SubjectFilter) -> StoreResult<Vec<Subject>>;

    /// License with its version
    async fn get_license(&self, key: &str) -> StoreResult<Option<Versioned<LicenseKey>>>;

    /// Licenses matching `filter`
    async fn list_licenses(&self, filter: &LicenseFilter) -> StoreResult<Vec<LicenseKey>>;

    /// Delete every license with `valid = false`, returning the count
    async fn delete_invalid_licenses(&self) -> StoreResult<usize>;

    /// Sanctions matching `filter`
    async fn list_sanctions(&self, filter: &SanctionFilter) -> StoreResult<Vec<Sanction>>;

    /// Physically remove sanctions whose expiry is at or before `now`
    async fn delete_expired_sanctions(&self, now: DateTime<Utc>) -> StoreResult<usize>;

    /// Append one audit entry
    async fn append_audit(&self, entry: AuditLogEntry) -> StoreResult<()>;

    /// Matching entries, newest first
    async fn query_audit(&self, query: &AuditQuery) -> StoreResult<Vec<AuditLogEntry>>;

    /// Apply every write in `tx` atomically, or none if any precondition fails
    async fn commit(&self, tx: Transaction) -> StoreResult<()>;
}

/// Store handle that bounds every call with a timeout and retries
/// transient failures a fixed number of times.
#[derive(Clone)]
pub struct StoreClient {
    inner: Arc<dyn Store>,
    timeout: Duration,
    transient_retries: u32,
    max_attempts: u32,
}

impl StoreClient {
    /// Client over `inner` with the call policy from `config`
    pub fn new(inner: Arc<dyn Store>, config: &StoreConfig) -> Self {
        Self {
            inner,
            timeout: config.timeout(),
            transient_retries: config.transient_retries,
            max_attempts: config.max_retries.max(1),
        }
    }

    /// Optimistic transaction attempts before giving up
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run one store call under the timeout. Reads are retried on any
    /// transient failure; writes only when the store reports it did not
    /// apply them, since a timed-out write may have committed.
    async fn guarded<T, F, Fut>(&self, op: &'static str, idempotent: bool, mut call: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut retries = 0;
        loop {
            let err = match tokio::time::timeout(self.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_transient() => e,
                Ok(Err(e)) => return Err(e),
                Err(_) => StoreError::Timeout(op),
            };

            let retryable = match err {
                StoreError::Timeout(_) => idempotent,
                _ => true,
            };
            if !retryable || retries >= self.transient_retries {
                warn!(op, error = %err, retries, "store call failed");
                return Err(err);
            }
            retries += 1;
            debug!(op, error = %err, retries, "retrying store call");
        }
    }

    /// Subject with its version, if present
    pub async fn get_subject(&self, id: &str) -> GateResult<Option<Versioned<Subject>>> {
        Ok(self.guarded("get_subject", true, move || self.inner.get_subject(id)).await?)
    }

    /// Subject or `NotFound`
    pub async fn require_subject(&self, id: &str) -> GateResult<Versioned<Subject>> {
        self.get_subject(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("subject {}", id)))
    }

    /// Subjects matching `filter`
    pub async fn list_subjects(&self, filter: &SubjectFilter) -> GateResult<Vec<Subject>> {
        Ok(self.guarded("list_subjects", true, move || self.inner.list_subjects(filter)).await?)
    }

    /// License with its version, if present
    pub async fn get_license(&self, key: &str) -> GateResult<Option<Versioned<LicenseKey>>> {
        Ok(self.guarded("get_license", true, move || self.inner.get_license(key)).await?)
    }

    /// Licenses matching `filter`
    pub async fn list_licenses(&self, filter: &LicenseFilter) -> GateResult<Vec<LicenseKey>> {
        Ok(self.guarded("list_licenses", true, move || self.inner.list_licenses(filter)).await?)
    }

    /// Delete every invalid license, returning the count
    pub async fn delete_invalid_licenses(&self) -> GateResult<usize> {
        // Deleting already-invalid records twice is harmless.
        Ok(self
            .guarded("delete_invalid_licenses", true, move || self.inner.delete_invalid_licenses())
            .await?)
    }

    /// Sanctions matching `filter`
    pub async fn list_sanctions(&self, filter: &SanctionFilter) -> GateResult<Vec<Sanction>> {
        Ok(self.guarded("list_sanctions", true, move || self.inner.list_sanctions(filter)).await?)
    }

    /// Delete sanctions expired at `now`, returning the count
    pub async fn delete_expired_sanctions(&self, now: DateTime<Utc>) -> GateResult<usize> {
        Ok(self
            .guarded("delete_expired_sanctions", true, move || self.inner.delete_expired_sanctions(now))
            .await?)
    }

    /// Append one audit entry; timeouts are not retried
    pub async fn append_audit(&self, entry: AuditLogEntry) -> StoreResult<()> {
        self.guarded("append_audit", false, move || self.inner.append_audit(entry.clone()))
            .await
    }

    /// Audit entries matching `query`, newest first
    pub async fn query_audit(&self, query: &AuditQuery) -> GateResult<Vec<AuditLogEntry>> {
        Ok(self.guarded("query_audit", true, move || self.inner.query_audit(query)).await?)
    }

    /// Commit `tx`, leaving `VersionConflict` and `DuplicateKey` for the
    /// caller to interpret.
    pub async fn commit(&self, tx: Transaction) -> StoreResult<()> {
        self.guarded("commit", false, move || self.inner.commit(tx.clone())).await
    }

    /// Read-modify-write a single subject with compare-and-set.
    ///
    /// `apply` mutates a copy of the current record and returns whether it
    /// changed anything; unchanged records are not written. The write is
    /// conditioned on the version that was read, and the whole cycle is
    /// retried on conflict up to [`max_attempts`](Self::max_attempts) times.
    pub async fn update_subject<F>(&self, id: &str, mut apply: F) -> GateResult<Subject>
    where
        F: FnMut(&mut Subject) -> GateResult<bool>,
    {
        for attempt in 1..=self.max_attempts {
            let current = self.require_subject(id).await?;
            let mut next = current.value.clone();
            if !apply(&mut next)? {
                return Ok(next);
            }

            let tx = Transaction::new().put_subject(next.clone(), Expect::Version(current.version));
            match self.commit(tx).await {
                Ok(()) => return Ok(next),
                Err(StoreError::VersionConflict(_)) => {
                    debug!(subject_id = id, attempt, "subject write conflict, retrying");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(subject_id = id, attempts = self.max_attempts, "giving up on contended subject");
        Err(GatewayError::TransientStore("write contention".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FlakyStore;
    use std::sync::atomic::Ordering;

    fn client(store: Arc<dyn Store>) -> StoreClient {
        let config = StoreConfig {
            timeout_ms: 50,
            max_retries: 4,
            transient_retries: 2,
        };
        StoreClient::new(store, &config)
    }

    #[tokio::test]
    async fn test_transient_reads_are_retried() {
        let store = Arc::new(FlakyStore::new());
        store.inner.seed_subject(Subject::new("alice", 10, Utc::now()));
        store.failing_reads.store(2, Ordering::SeqCst);

        let client = client(store.clone());
        let subject = client.require_subject("alice").await.unwrap();
        assert_eq!(subject.value.id, "alice");
    }

    #[tokio::test]
    async fn test_transient_reads_surface_after_bounded_retries() {
        let store = Arc::new(FlakyStore::new());
        store.inner.seed_subject(Subject::new("alice", 10, Utc::now()));
        store.failing_reads.store(10, Ordering::SeqCst);

        let err = client(store).require_subject("alice").await.unwrap_err();
        assert!(matches!(err, GatewayError::TransientStore(_)));
    }

    #[tokio::test]
    async fn test_timed_out_commit_is_not_replayed() {
        let store = Arc::new(FlakyStore::new());
        store.stall_commits.store(true, Ordering::SeqCst);

        let client = client(store.clone());
        let subject = Subject::new("bob", 10, Utc::now());
        let err = client
            .commit(Transaction::new().put_subject(subject, Expect::Absent))
            .await
            .unwrap_err();

        assert_eq!(err, StoreError::Timeout("commit"));
        assert_eq!(store.commit_calls.load(Ordering::SeqCst), 1);
        assert!(GatewayError::from(err).is_retryable());
    }

    #[tokio::test]
    async fn test_update_subject_skips_unchanged_writes() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_subject(Subject::new("carol", 10, Utc::now()));
        let client = client(store.clone());

        let before = client.require_subject("carol").await.unwrap().version;
        client.update_subject("carol", |_| Ok(false)).await.unwrap();
        let after = client.require_subject("carol").await.unwrap().version;
        assert_eq!(before, after);

        client
            .update_subject("carol", |s| {
                s.messages_used = 3;
                Ok(true)
            })
            .await
            .unwrap();
        let updated = client.require_subject("carol").await.unwrap();
        assert!(updated.version > after);
        assert_eq!(updated.value.messages_used, 3);
    }
}
