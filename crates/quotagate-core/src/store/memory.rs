//! In-memory store (single process, tests and development)

use super::*;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct Collections {
    version: u64,
    subjects: HashMap<SubjectId, Versioned<Subject>>,
    licenses: HashMap<String, Versioned<LicenseKey>>,
    sanctions: HashMap<String, Sanction>,
    audit_logs: Vec<AuditLogEntry>,
}

impl Collections {
    fn check(expect: Expect, current: Option<u64>, what: String) -> StoreResult<()> {
        match (expect, current) {
            (Expect::Any, _) | (Expect::Absent, None) => Ok(()),
            (Expect::Absent, Some(_)) => Err(StoreError::DuplicateKey(what)),
            (Expect::Version(v), Some(c)) if v == c => Ok(()),
            (Expect::Version(_), _) => Err(StoreError::VersionConflict(what)),
        }
    }

    fn validate(&self, write: &Write) -> StoreResult<()> {
        match write {
            Write::PutSubject { subject, expect } => Self::check(
                *expect,
                self.subjects.get(&subject.id).map(|s| s.version),
                format!("subject {}", subject.id),
            ),
            Write::DeleteSubject { id, expect } => Self::check(
                *expect,
                self.subjects.get(id).map(|s| s.version),
                format!("subject {}", id),
            ),
            Write::PutLicense { license, expect } => Self::check(
                *expect,
                self.licenses.get(&license.key).map(|l| l.version),
                format!("license {}", license.key),
            ),
            Write::PutSanction(_) | Write::DeleteSanction(_) => Ok(()),
        }
    }

    fn apply(&mut self, write: Write, version: u64) {
        match write {
            Write::PutSubject { subject, .. } => {
                self.subjects.insert(subject.id.clone(), Versioned { version, value: subject });
            }
            Write::DeleteSubject { id, .. } => {
                self.subjects.remove(&id);
            }
            Write::PutLicense { license, .. } => {
                self.licenses.insert(license.key.clone(), Versioned { version, value: license });
            }
            Write::PutSanction(sanction) => {
                self.sanctions.insert(sanction.id.clone(), sanction);
            }
            Write::DeleteSanction(id) => {
                self.sanctions.remove(&id);
            }
        }
    }
}

/// Store backed by process memory. Transactions are serialized by a single
/// write lock, which makes every commit atomic.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<Collections>,
}

impl InMemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a subject outside any transaction
    pub fn seed_subject(&self, subject: Subject) {
        let mut state = self.state.write();
        state.version += 1;
        let version = state.version;
        state.subjects.insert(subject.id.clone(), Versioned { version, value: subject });
    }

    /// Current record without going through the async interface
    pub fn peek_subject(&self, id: &str) -> Option<Versioned<Subject>> {
        self.state.read().subjects.get(id).cloned()
    }

    /// Insert or replace a license outside any transaction
    pub fn seed_license(&self, license: LicenseKey) {
        let mut state = self.state.write();
        state.version += 1;
        let version = state.version;
        state.licenses.insert(license.key.clone(), Versioned { version, value: license });
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_subject(&self, id: &str) -> StoreResult<Option<Versioned<Subject>>> {
        Ok(self.state.read().subjects.get(id).cloned())
    }

    async fn list_subjects(&self, filter: &SubjectFilter) -> StoreResult<Vec<Subject>> {
        let mut subjects: Vec<_> = self
            .state
            .read()
            .subjects
            .values()
            .filter(|s| filter.matches(&s.value))
            .map(|s| s.value.clone())
            .collect();
        subjects.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(subjects)
    }

    async fn get_license(&self, key: &str) -> StoreResult<Option<Versioned<LicenseKey>>> {
        Ok(self.state.read().licenses.get(key).cloned())
    }

    async fn list_licenses(&self, filter: &LicenseFilter) -> StoreResult<Vec<LicenseKey>> {
        let mut licenses: Vec<_> = self
            .state
            .read()
            .licenses
            .values()
            .filter(|l| filter.matches(&l.value))
            .map(|l| l.value.clone())
            .collect();
        licenses.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.key.cmp(&b.key)));
        Ok(licenses)
    }

    async fn delete_invalid_licenses(&self) -> StoreResult<usize> {
        let mut state = self.state.write();
        let before = state.licenses.len();
        state.licenses.retain(|_, l| l.value.valid);
        Ok(before - state.licenses.len())
    }

    async fn list_sanctions(&self, filter: &SanctionFilter) -> StoreResult<Vec<Sanction>> {
        let mut sanctions: Vec<_> = self
            .state
            .read()
            .sanctions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        sanctions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sanctions)
    }

    async fn delete_expired_sanctions(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut state = self.state.write();
        let before = state.sanctions.len();
        state.sanctions.retain(|_, s| s.is_active(now));
        Ok(before - state.sanctions.len())
    }

    async fn append_audit(&self, entry: AuditLogEntry) -> StoreResult<()> {
        self.state.write().audit_logs.push(entry);
        Ok(())
    }

    async fn query_audit(&self, query: &AuditQuery) -> StoreResult<Vec<AuditLogEntry>> {
        let state = self.state.read();
        // Appends arrive in time order, so walking backwards yields newest first.
        Ok(state
            .audit_logs
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn commit(&self, tx: Transaction) -> StoreResult<()> {
        let mut state = self.state.write();
        for write in tx.writes() {
            state.validate(write)?;
        }

        state.version += 1;
        let version = state.version;
        for write in tx.writes {
            state.apply(write, version);
        }
        Ok(())
    }
}
