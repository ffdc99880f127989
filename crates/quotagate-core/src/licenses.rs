//! License Lifecycle Manager
//!
//! Keys move `Created → Redeemed` exactly once and from either state to
//! `Invalidated`, which is terminal and makes the record eligible for purge.
//! Redemption writes the license and the redeeming subject in one
//! transaction, both conditioned on the versions that were read.

use crate::audit::{AuditAction, AuditLog};
use crate::clock::Clock;
use crate::config::PlanLimits;
use crate::model::{LicenseKey, Plan};
use crate::reconciler::Reconciler;
use crate::store::{Expect, LicenseFilter, StoreClient, StoreError, Transaction};
use crate::{GateResult, GatewayError};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest redemption window accepted at creation
pub const MAX_VALIDITY_DAYS: u32 = 3650;

const SUFFIX_LEN: usize = 8;

/// Encode `n` in upper-case base 36
fn base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Manages license keys
#[derive(Clone)]
pub struct LicenseManager {
    store: StoreClient,
    plans: PlanLimits,
    reconciler: Arc<Reconciler>,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
}

impl LicenseManager {
    /// Manager over `store`, using `plans` for redeemed allowances
    pub fn new(
        store: StoreClient,
        plans: PlanLimits,
        reconciler: Arc<Reconciler>,
        clock: Arc<dyn Clock>,
        audit: AuditLog,
    ) -> Self {
        Self {
            store,
            plans,
            reconciler,
            clock,
            audit,
        }
    }

    fn generate_key(&self, plan: Plan) -> String {
        let nanos = self
            .clock
            .now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .max(0) as u64;
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SUFFIX_LEN)
            .map(char::from)
            .collect();
        format!("{}-{}-{}", plan.as_str(), base36(nanos), suffix).to_ascii_uppercase()
    }

    /// Issue a new unused key
    pub async fn create(&self, plan: Plan, validity_days: u32, issuer: &str) -> GateResult<LicenseKey> {
        if !plan.is_licensed() {
            return Err(GatewayError::Validation("license plan must be classic or pro".into()));
        }
        if !(1..=MAX_VALIDITY_DAYS).contains(&validity_days) {
            return Err(GatewayError::Validation(format!(
                "validityDays must be between 1 and {}",
                MAX_VALIDITY_DAYS
            )));
        }

        for attempt in 1..=self.store.max_attempts() {
            let license = LicenseKey {
                key: self.generate_key(plan),
                plan,
                validity_days,
                valid: true,
                created_by: issuer.to_string(),
                created_at: self.clock.now(),
                used_by: None,
                used_at: None,
                invalidated_at: None,
                invalidated_by: None,
            };

            let tx = Transaction::new().put_license(license.clone(), Expect::Absent);
            match self.store.commit(tx).await {
                Ok(()) => {
                    info!(key = %license.key, %plan, validity_days, issuer, "license created");
                    self.audit
                        .append(
                            issuer,
                            AuditAction::LicenseCreate,
                            json!({ "key": license.key, "plan": plan, "validityDays": validity_days }),
                        );
                    return Ok(license);
                }
                Err(StoreError::DuplicateKey(_)) => {
                    debug!(attempt, "license key collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(GatewayError::Conflict("could not allocate a unique license key".into()))
    }

    /// Redeem `key` for `subject_id`.
    ///
    /// Rejections are checked in order: unknown or invalidated, then past the
    /// redemption window, then already used. On success the license and the
    /// upgraded subject are committed together.
    pub async fn redeem(&self, key: &str, subject_id: &str) -> GateResult<LicenseKey> {
        let key = key.trim();
        if key.is_empty() {
            return Err(GatewayError::InvalidLicense);
        }

        for attempt in 1..=self.store.max_attempts() {
            let license = match self.store.get_license(key).await? {
                Some(license) if license.value.valid => license,
                _ => return Err(GatewayError::InvalidLicense),
            };
            let now = self.clock.now();
            if license.value.is_expired(now) {
                return Err(GatewayError::LicenseExpired);
            }
            if license.value.used_by.is_some() {
                return Err(GatewayError::LicenseAlreadyUsed);
            }

            let subject = self.store.require_subject(subject_id).await?;
            let mut upgraded = subject.value.clone();
            self.reconciler.reconcile(&mut upgraded, now);
            upgraded.plan = license.value.plan;
            upgraded.messages_limit = self.plans.limit_for(license.value.plan);
            upgraded.messages_used = 0;
            upgraded.license_key = Some(license.value.key.clone());
            upgraded.license_expires_at = Some(now + license.value.validity());
            upgraded.last_message_reset = now;

            let mut redeemed = license.value.clone();
            redeemed.used_by = Some(subject_id.to_string());
            redeemed.used_at = Some(now);

            let tx = Transaction::new()
                .put_license(redeemed.clone(), Expect::Version(license.version))
                .put_subject(upgraded, Expect::Version(subject.version));

            match self.store.commit(tx).await {
                Ok(()) => {
                    info!(key, subject_id, plan = %redeemed.plan, "license redeemed");
                    self.audit
                        .append(
                            subject_id,
                            AuditAction::LicenseRedeem,
                            json!({ "key": key, "plan": redeemed.plan, "subjectId": subject_id }),
                        );
                    return Ok(redeemed);
                }
                Err(StoreError::VersionConflict(_)) => {
                    debug!(key, subject_id, attempt, "redemption conflict, re-reading");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(key, subject_id, "giving up on contended redemption");
        Err(GatewayError::TransientStore("write contention".into()))
    }

    /// Mark `key` invalid. Irreversible; invalidating twice is a no-op.
    pub async fn invalidate(&self, key: &str, actor_id: &str) -> GateResult<LicenseKey> {
        for attempt in 1..=self.store.max_attempts() {
            let current = self
                .store
                .get_license(key)
                .await?
                .ok_or_else(|| GatewayError::NotFound(format!("license {}", key)))?;
            if !current.value.valid {
                return Ok(current.value);
            }

            let mut invalidated = current.value.clone();
            invalidated.valid = false;
            invalidated.invalidated_at = Some(self.clock.now());
            invalidated.invalidated_by = Some(actor_id.to_string());

            let tx = Transaction::new().put_license(invalidated.clone(), Expect::Version(current.version));
            match self.store.commit(tx).await {
                Ok(()) => {
                    info!(key, actor_id, "license invalidated");
                    self.audit
                        .append(actor_id, AuditAction::LicenseInvalidate, json!({ "key": key }));
                    return Ok(invalidated);
                }
                Err(StoreError::VersionConflict(_)) => {
                    debug!(key, attempt, "invalidate conflict, re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(GatewayError::TransientStore("write contention".into()))
    }

    /// Delete every invalidated key
    pub async fn purge(&self, actor_id: &str) -> GateResult<usize> {
        let deleted = self.store.delete_invalid_licenses().await?;
        info!(deleted, actor_id, "invalid licenses purged");
        self.audit
            .append(actor_id, AuditAction::LicensePurge, json!({ "deleted": deleted }));
        Ok(deleted)
    }

    /// Licenses matching `filter`
    pub async fn list(&self, filter: &LicenseFilter) -> GateResult<Vec<LicenseKey>> {
        self.store.list_licenses(filter).await
    }

    /// License by key, or `NotFound`
    pub async fn get(&self, key: &str) -> GateResult<LicenseKey> {
        self.store
            .get_license(key)
            .await?
            .map(|l| l.value)
            .ok_or_else(|| GatewayError::NotFound(format!("license {}", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use chrono::Duration;

    #[test]
    fn test_base36() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "Z");
        assert_eq!(base36(36), "10");
    }

    #[tokio::test]
    async fn test_key_format() {
        let fx = Fixture::new();
        let license = fx.gateway.licenses.create(Plan::Classic, 7, "root").await.unwrap();

        let parts: Vec<_> = license.key.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "CLASSIC");
        assert_eq!(parts[2].len(), 8);
        assert_eq!(license.key, license.key.to_ascii_uppercase());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let fx = Fixture::new();
        let licenses = &fx.gateway.licenses;

        for (plan, days) in [(Plan::Free, 30), (Plan::Pro, 0), (Plan::Pro, MAX_VALIDITY_DAYS + 1)] {
            let err = licenses.create(plan, days, "root").await.unwrap_err();
            assert!(matches!(err, GatewayError::Validation(_)), "{plan} {days}");
        }
    }

    #[tokio::test]
    async fn test_second_subject_gets_already_used() {
        let fx = Fixture::new();
        fx.seed_subject("a");
        fx.seed_subject("b");
        let license = fx.gateway.licenses.create(Plan::Pro, 30, "root").await.unwrap();

        let redeemed = fx.gateway.licenses.redeem(&license.key, "a").await.unwrap();
        assert_eq!(redeemed.used_by.as_deref(), Some("a"));

        let a = fx.subject("a");
        assert_eq!(a.plan, Plan::Pro);
        assert_eq!(a.messages_limit, 1000);
        assert_eq!(a.messages_used, 0);
        assert_eq!(a.license_key.as_deref(), Some(license.key.as_str()));
        assert_eq!(a.license_expires_at, Some(fx.clock.now() + Duration::days(30)));

        let err = fx.gateway.licenses.redeem(&license.key, "b").await.unwrap_err();
        assert_eq!(err, GatewayError::LicenseAlreadyUsed);
        assert_eq!(fx.subject("b").plan, Plan::Free);
    }

    #[tokio::test]
    async fn test_rejection_order() {
        let fx = Fixture::new();
        fx.seed_subject("a");
        let licenses = &fx.gateway.licenses;

        assert_eq!(licenses.redeem("NOPE", "a").await.unwrap_err(), GatewayError::InvalidLicense);

        let stale = licenses.create(Plan::Classic, 1, "root").await.unwrap();
        fx.clock.advance(Duration::days(2));
        assert_eq!(licenses.redeem(&stale.key, "a").await.unwrap_err(), GatewayError::LicenseExpired);

        // Invalid outranks expired
        licenses.invalidate(&stale.key, "root").await.unwrap();
        assert_eq!(licenses.redeem(&stale.key, "a").await.unwrap_err(), GatewayError::InvalidLicense);
    }

    #[tokio::test]
    async fn test_invalidate_and_purge() {
        let fx = Fixture::new();
        let licenses = &fx.gateway.licenses;
        let keep = licenses.create(Plan::Pro, 30, "root").await.unwrap();
        let drop = licenses.create(Plan::Classic, 30, "root").await.unwrap();

        let err = licenses.invalidate("MISSING", "root").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));

        let first = licenses.invalidate(&drop.key, "root").await.unwrap();
        let again = licenses.invalidate(&drop.key, "other").await.unwrap();
        assert_eq!(first, again);
        assert_eq!(again.invalidated_by.as_deref(), Some("root"));

        assert_eq!(licenses.purge("root").await.unwrap(), 1);
        assert_eq!(licenses.purge("root").await.unwrap(), 0);
        assert!(licenses.get(&keep.key).await.is_ok());
        assert!(licenses.get(&drop.key).await.is_err());
    }

    #[tokio::test]
    async fn test_invalidating_redeemed_key_keeps_subject_plan() {
        let fx = Fixture::new();
        fx.seed_subject("a");
        let license = fx.gateway.licenses.create(Plan::Classic, 30, "root").await.unwrap();
        fx.gateway.licenses.redeem(&license.key, "a").await.unwrap();

        fx.gateway.licenses.invalidate(&license.key, "root").await.unwrap();
        assert_eq!(fx.subject("a").plan, Plan::Classic);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_redemption_uses_key_once() {
        let fx = Fixture::with_max_retries(64);
        for i in 0..20 {
            fx.seed_subject(&format!("s{}", i));
        }
        let license = fx.gateway.licenses.create(Plan::Pro, 30, "root").await.unwrap();

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let licenses = fx.gateway.licenses.clone();
                let key = license.key.clone();
                tokio::spawn(async move { licenses.redeem(&key, &format!("s{}", i)).await })
            })
            .collect();

        let mut winners = Vec::new();
        for (i, handle) in handles.into_iter().enumerate() {
            match handle.await.unwrap() {
                Ok(_) => winners.push(format!("s{}", i)),
                Err(GatewayError::LicenseAlreadyUsed) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(winners.len(), 1);
        let stored = fx.gateway.licenses.get(&license.key).await.unwrap();
        assert_eq!(stored.used_by.as_ref(), Some(&winners[0]));

        let upgraded = (0..20)
            .filter(|i| fx.subject(&format!("s{}", i)).plan == Plan::Pro)
            .count();
        assert_eq!(upgraded, 1);
    }
}
