//! Gateway facade
//!
//! Wires every component from one [`GatewayConfig`] around a shared store,
//! identity provider and clock.

use crate::audit::AuditLog;
use crate::clock::{Clock, SystemClock};
use crate::config::GatewayConfig;
use crate::ledger::QuotaLedger;
use crate::licenses::LicenseManager;
use crate::ratelimit::RateLimiter;
use crate::reconciler::Reconciler;
use crate::sanctions::SanctionManager;
use crate::store::{InMemoryStore, Store, StoreClient};
use crate::subjects::SubjectDirectory;
use crate::validator::{CredentialValidator, IdentityProvider, JwtIdentityProvider};
use crate::GateResult;
use std::sync::Arc;
use tracing::{debug, info};

/// Fully wired gateway
#[derive(Clone)]
pub struct Gateway {
    /// Effective configuration
    pub config: Arc<GatewayConfig>,
    /// Time source shared by every component
    pub clock: Arc<dyn Clock>,
    /// Store handle shared by every component
    pub store: StoreClient,
    /// Admin mutation log
    pub audit: AuditLog,
    /// Per-route sliding-window limiter
    pub limiter: RateLimiter,
    /// Credential and sanction check for every authenticated call
    pub validator: CredentialValidator,
    /// Message quota counters
    pub ledger: QuotaLedger,
    /// License key lifecycle
    pub licenses: LicenseManager,
    /// Bans and warnings
    pub sanctions: SanctionManager,
    /// Subject registration and admin operations
    pub subjects: SubjectDirectory,
}

impl Gateway {
    /// Wire every component over one store, identity provider and clock
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn Store>,
        provider: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = StoreClient::new(store, &config.store);
        let reconciler = Arc::new(Reconciler::new(&config.plans, &config.reconciler));
        let audit = AuditLog::new(store.clone(), clock.clone());

        let limiter = RateLimiter::in_memory(clock.clone(), config.rate_limits.clone());
        let sanctions = SanctionManager::new(store.clone(), clock.clone(), audit.clone());
        let validator = CredentialValidator::new(provider.clone(), store.clone(), sanctions.clone());
        let ledger = QuotaLedger::new(store.clone(), reconciler.clone(), clock.clone(), audit.clone());
        let licenses = LicenseManager::new(
            store.clone(),
            config.plans.clone(),
            reconciler.clone(),
            clock.clone(),
            audit.clone(),
        );
        let subjects = SubjectDirectory::new(
            store.clone(),
            config.plans.clone(),
            reconciler,
            clock.clone(),
            audit.clone(),
            provider,
        );

        info!(
            free = config.plans.free,
            classic = config.plans.classic,
            pro = config.plans.pro,
            "gateway initialized"
        );

        Self {
            config: Arc::new(config),
            clock,
            store,
            audit,
            limiter,
            validator,
            ledger,
            licenses,
            sanctions,
            subjects,
        }
    }

    /// Single-process gateway on the in-memory store, HS256 tokens and the
    /// wall clock
    pub fn in_memory(config: GatewayConfig) -> Self {
        let provider = Arc::new(JwtIdentityProvider::new(config.auth.clone()));
        Self::new(config, Arc::new(InMemoryStore::new()), provider, Arc::new(SystemClock))
    }

    /// Physical cleanup of idle rate windows and lapsed sanctions. Lazy
    /// expiry keeps results correct whether or not this ever runs.
    pub async fn housekeeping(&self) -> GateResult<(usize, usize)> {
        let windows = self.limiter.sweep().await;
        let sanctions = self.sanctions.sweep_expired().await?;
        debug!(windows, sanctions, "housekeeping pass");
        Ok((windows, sanctions))
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{Plan, SanctionTarget};
    use crate::testing::Fixture;
    use crate::validator::Access;
    use chrono::Duration;

    #[tokio::test]
    async fn test_member_journey() {
        let fx = Fixture::new();
        let gw = &fx.gateway;
        gw.subjects.register("alice", None).await.unwrap();
        let token = fx.token("alice");

        let principal = gw.validator.verify(&token, Access::Member).await.unwrap();
        for _ in 0..10 {
            gw.ledger.try_consume(&principal.subject_id, 1).await.unwrap();
        }
        assert!(gw.ledger.try_consume("alice", 1).await.is_err());

        let license = gw.licenses.create(Plan::Classic, 30, "root").await.unwrap();
        gw.licenses.redeem(&license.key, "alice").await.unwrap();
        let usage = gw.ledger.try_consume("alice", 1).await.unwrap();
        assert_eq!((usage.plan, usage.messages_used, usage.messages_limit), (Plan::Classic, 1, 100));

        // Next day the counter rolls over; after 30 days the plan lapses
        fx.clock.advance(Duration::days(1));
        assert_eq!(gw.ledger.usage("alice").await.unwrap().messages_used, 0);
        fx.clock.advance(Duration::days(30));
        let lapsed = gw.ledger.usage("alice").await.unwrap();
        assert_eq!((lapsed.plan, lapsed.messages_limit), (Plan::Free, 10));
    }

    #[tokio::test]
    async fn test_housekeeping_removes_lapsed_state() {
        let fx = Fixture::new();
        fx.seed_subject("bob");
        let target = SanctionTarget::Subject("bob".into());
        fx.gateway.sanctions.ban(target, "spam", Some(1), "root").await.unwrap();
        fx.gateway.limiter.check("user:bob", "/x", 1_000, 5).await;

        fx.clock.advance(Duration::minutes(2));
        assert_eq!(fx.gateway.housekeeping().await.unwrap(), (1, 1));
    }
}
