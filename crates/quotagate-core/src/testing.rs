//! Test fixtures

use crate::clock::ManualClock;
use crate::config::{AuthConfig, GatewayConfig};
use crate::gateway::Gateway;
use crate::model::{AuditLogEntry, LicenseKey, Sanction, Subject};
use crate::store::{
    AuditQuery, InMemoryStore, LicenseFilter, SanctionFilter, Store, StoreError, StoreResult, SubjectFilter,
    Transaction, Versioned,
};
use crate::validator::JwtIdentityProvider;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

pub(crate) const SECRET: &str = "quotagate-test-secret";

/// Gateway on a manual clock and an inspectable in-memory store
pub(crate) struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub provider: Arc<JwtIdentityProvider>,
    pub gateway: Gateway,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(GatewayConfig::default())
    }

    pub fn with_max_retries(max_retries: u32) -> Self {
        let mut config = GatewayConfig::default();
        config.store.max_retries = max_retries;
        Self::with_config(config)
    }

    pub fn with_config(mut config: GatewayConfig) -> Self {
        config.auth.jwt_secret = SECRET.to_string();
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()));
        let provider = Arc::new(JwtIdentityProvider::new(config.auth.clone()));
        let gateway = Gateway::new(config, store.clone(), provider.clone(), clock.clone());

        Self {
            store,
            clock,
            provider,
            gateway,
        }
    }

    pub fn auth_config(&self) -> AuthConfig {
        self.gateway.config.auth.clone()
    }

    /// Store a fresh Free subject and return it
    pub fn seed_subject(&self, id: &str) -> Subject {
        let subject = Subject::new(id, self.gateway.config.plans.free, self.now());
        self.store.seed_subject(subject.clone());
        subject
    }

    pub fn seed_admin(&self, id: &str) -> Subject {
        let mut subject = self.seed_subject(id);
        subject.is_admin = true;
        self.store.seed_subject(subject.clone());
        subject
    }

    pub fn subject(&self, id: &str) -> Subject {
        self.store.peek_subject(id).expect("subject exists").value
    }

    pub fn get_version(&self, id: &str) -> u64 {
        self.store.peek_subject(id).expect("subject exists").version
    }

    pub fn token(&self, id: &str) -> String {
        self.provider
            .issue_token(id, None, Duration::hours(1))
            .expect("token signs")
    }

    fn now(&self) -> DateTime<Utc> {
        use crate::clock::Clock;
        self.clock.now()
    }
}

/// In-memory store with switchable faults
#[derive(Default)]
pub(crate) struct FlakyStore {
    pub inner: InMemoryStore,
    /// Fail this many subject reads with `Unavailable`
    pub failing_reads: AtomicU32,
    /// Hang commits past any sane timeout
    pub stall_commits: AtomicBool,
    pub commit_calls: AtomicU32,
    pub fail_audit: AtomicBool,
    /// Hang audit appends past any sane timeout
    pub stall_audit: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn get_subject(&self, id: &str) -> StoreResult<Option<Versioned<Subject>>> {
        let failed = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unavailable("injected".into()));
        }
        self.inner.get_subject(id).await
    }

    async fn list_subjects(&self, filter: &SubjectFilter) -> StoreResult<Vec<Subject>> {
        self.inner.list_subjects(filter).await
    }

    async fn get_license(&self, key: &str) -> StoreResult<Option<Versioned<LicenseKey>>> {
        self.inner.get_license(key).await
    }

    async fn list_licenses(&self, filter: &LicenseFilter) -> StoreResult<Vec<LicenseKey>> {
        self.inner.list_licenses(filter).await
    }

    async fn delete_invalid_licenses(&self) -> StoreResult<usize> {
        self.inner.delete_invalid_licenses().await
    }

    async fn list_sanctions(&self, filter: &SanctionFilter) -> StoreResult<Vec<Sanction>> {
        self.inner.list_sanctions(filter).await
    }

    async fn delete_expired_sanctions(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        self.inner.delete_expired_sanctions(now).await
    }

    async fn append_audit(&self, entry: AuditLogEntry) -> StoreResult<()> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected".into()));
        }
        if self.stall_audit.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
        self.inner.append_audit(entry).await
    }

    async fn query_audit(&self, query: &AuditQuery) -> StoreResult<Vec<AuditLogEntry>> {
        self.inner.query_audit(query).await
    }

    async fn commit(&self, tx: Transaction) -> StoreResult<()> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if self.stall_commits.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
        self.inner.commit(tx).await
    }
}
