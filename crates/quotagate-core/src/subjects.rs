//! Subject Directory
//!
//! Account lifecycle: registration, admin plan and role changes, and hard
//! deletion cascading to the identity provider.

use crate::audit::{AuditAction, AuditLog};
use crate::clock::Clock;
use crate::config::PlanLimits;
use crate::ledger::QuotaSnapshot;
use crate::model::{Plan, SanctionKind, SanctionTarget, Subject, SubjectId};
use crate::reconciler::Reconciler;
use crate::store::{Expect, SanctionFilter, StoreClient, StoreError, SubjectFilter, Transaction, Versioned};
use crate::validator::IdentityProvider;
use crate::{GateResult, GatewayError};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Subject directory
#[derive(Clone)]
pub struct SubjectDirectory {
    store: StoreClient,
    plans: PlanLimits,
    reconciler: Arc<Reconciler>,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
    provider: Arc<dyn IdentityProvider>,
}

impl SubjectDirectory {
    /// Directory over `store`, deleting accounts through `provider`
    pub fn new(
        store: StoreClient,
        plans: PlanLimits,
        reconciler: Arc<Reconciler>,
        clock: Arc<dyn Clock>,
        audit: AuditLog,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            store,
            plans,
            reconciler,
            clock,
            audit,
            provider,
        }
    }

    /// Create a Free subject, or return the existing record. The flag is
    /// true when this call created it.
    pub async fn register(&self, id: &str, email: Option<&str>) -> GateResult<(Subject, bool)> {
        if id.trim().is_empty() {
            return Err(GatewayError::Validation("subject id must not be empty".into()));
        }
        if let Some(existing) = self.store.get_subject(id).await? {
            return Ok((self.settle_ban(existing).await?, false));
        }

        let mut subject = Subject::new(id, self.plans.free, self.clock.now());
        subject.email = email.map(str::to_string);

        match self
            .store
            .commit(Transaction::new().put_subject(subject.clone(), Expect::Absent))
            .await
        {
            Ok(()) => {
                info!(subject_id = id, "subject registered");
                Ok((subject, true))
            }
            // Lost a race with a concurrent registration of the same id
            Err(StoreError::DuplicateKey(_)) => {
                let existing = self.store.require_subject(id).await?;
                Ok((self.settle_ban(existing).await?, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Subject by id, with ban fields reflecting the live ban
    pub async fn get(&self, id: &str) -> GateResult<Subject> {
        let current = self.store.require_subject(id).await?;
        self.settle_ban(current).await
    }

    /// Subjects matching `filter`. `is_banned` matches the live ban, not the
    /// stored flag.
    pub async fn list(&self, filter: &SubjectFilter) -> GateResult<Vec<Subject>> {
        let scan = SubjectFilter {
            is_banned: None,
            ..filter.clone()
        };
        let subjects = self.store.list_subjects(&scan).await?;

        let now = self.clock.now();
        let bans = SanctionFilter {
            target: None,
            kind: Some(SanctionKind::Ban),
        };
        let banned: HashSet<SubjectId> = self
            .store
            .list_sanctions(&bans)
            .await?
            .into_iter()
            .filter(|s| s.blocks(now))
            .filter_map(|s| match s.target {
                SanctionTarget::Subject(id) => Some(id),
                SanctionTarget::Address(_) => None,
            })
            .collect();

        Ok(subjects
            .into_iter()
            .map(|mut subject| {
                if subject.is_banned && !banned.contains(&subject.id) {
                    subject.clear_ban();
                }
                subject
            })
            .filter(|subject| filter.matches(subject))
            .collect())
    }

    /// Clear ban fields left behind by a ban that has lapsed. The write is
    /// conditioned on the version read, so a concurrent re-ban wins; the
    /// returned view is correct either way.
    async fn settle_ban(&self, current: Versioned<Subject>) -> GateResult<Subject> {
        let Versioned { version, value: mut subject } = current;
        if !subject.is_banned {
            return Ok(subject);
        }

        let now = self.clock.now();
        let filter = SanctionFilter {
            target: Some(SanctionTarget::Subject(subject.id.clone())),
            kind: Some(SanctionKind::Ban),
        };
        if self.store.list_sanctions(&filter).await?.iter().any(|s| s.blocks(now)) {
            return Ok(subject);
        }

        subject.clear_ban();
        let tx = Transaction::new().put_subject(subject.clone(), Expect::Version(version));
        match self.store.commit(tx).await {
            Ok(()) => debug!(subject_id = %subject.id, "lapsed ban cleared"),
            Err(StoreError::VersionConflict(_)) => {
                debug!(subject_id = %subject.id, "subject changed while clearing lapsed ban");
            }
            Err(e) => warn!(subject_id = %subject.id, error = %e, "could not persist lapsed ban"),
        }
        Ok(subject)
    }

    /// Move a subject to `plan`. Dropping to Free clears license fields;
    /// a granted licensed plan has no expiry.
    pub async fn set_plan(&self, id: &str, plan: Plan, actor_id: &str) -> GateResult<QuotaSnapshot> {
        let now = self.clock.now();
        let limit = self.plans.limit_for(plan);
        let subject = self
            .store
            .update_subject(id, |subject| {
                self.reconciler.reconcile(subject, now);
                subject.plan = plan;
                subject.messages_limit = limit;
                subject.messages_used = subject.messages_used.min(limit);
                if plan == Plan::Free {
                    subject.license_key = None;
                    subject.license_expires_at = None;
                }
                Ok(true)
            })
            .await?;

        info!(subject_id = id, %plan, actor_id, "plan changed");
        self.audit
            .append(actor_id, AuditAction::SubjectSetPlan, json!({ "subjectId": id, "plan": plan }));
        Ok(QuotaSnapshot::from(&subject))
    }

    /// Grant or revoke admin. Granting fails while the subject has any
    /// active sanction.
    pub async fn set_admin(&self, id: &str, is_admin: bool, actor_id: &str) -> GateResult<Subject> {
        let target = SanctionTarget::Subject(id.to_string());

        for attempt in 1..=self.store.max_attempts() {
            let current = self.store.require_subject(id).await?;
            if current.value.is_admin == is_admin {
                return Ok(current.value);
            }
            if is_admin {
                let now = self.clock.now();
                let sanctions = self
                    .store
                    .list_sanctions(&SanctionFilter::for_target(&target))
                    .await?;
                if sanctions.iter().any(|s| s.is_active(now)) {
                    return Err(GatewayError::Conflict("subject has an active sanction".into()));
                }
            }

            let mut subject = current.value.clone();
            subject.is_admin = is_admin;
            if is_admin {
                // No live ban, so any stored ban fields are stale
                subject.clear_ban();
            }
            let tx = Transaction::new().put_subject(subject.clone(), Expect::Version(current.version));
            match self.store.commit(tx).await {
                Ok(()) => {
                    info!(subject_id = id, is_admin, actor_id, "admin flag changed");
                    self.audit
                        .append(
                            actor_id,
                            AuditAction::SubjectSetAdmin,
                            json!({ "subjectId": id, "isAdmin": is_admin }),
                        );
                    return Ok(subject);
                }
                Err(StoreError::VersionConflict(_)) => {
                    debug!(subject_id = id, attempt, "set_admin conflict, re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(GatewayError::TransientStore("write contention".into()))
    }

    /// Hard-delete a subject. The identity provider account goes first so a
    /// failure there leaves the record intact for a retry.
    pub async fn delete(&self, id: &str, actor_id: &str) -> GateResult<()> {
        self.store.require_subject(id).await?;
        self.provider.delete_account(id).await?;

        let target = SanctionTarget::Subject(id.to_string());
        let sanctions = self
            .store
            .list_sanctions(&SanctionFilter::for_target(&target))
            .await?;
        let tx = sanctions
            .into_iter()
            .fold(Transaction::new().delete_subject(id, Expect::Any), |tx, s| {
                tx.delete_sanction(s.id)
            });
        self.store.commit(tx).await?;

        info!(subject_id = id, actor_id, "subject deleted");
        self.audit
            .append(actor_id, AuditAction::SubjectDelete, json!({ "subjectId": id }));
        Ok(())
    }
}
