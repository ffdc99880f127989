//! Daily Reset / Expiry Reconciler
//!
//! Lazily corrects a subject's plan and counters from elapsed time. Checks
//! run in a fixed order and at most one applies per invocation:
//!
//! 1. license expired → revert to Free with a fresh Free allowance
//! 2. licensed plan and the calendar day changed → zero the counter
//! 3. otherwise nothing
//!
//! Calendar days are taken in a fixed UTC offset from configuration.

use crate::config::{PlanLimits, ReconcilerConfig};
use crate::model::{Plan, Subject};
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use tracing::{debug, info};

/// What a reconciliation pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// License period ended; reverted to Free
    LicenseExpired,
    /// New calendar day; counter zeroed
    DailyRollover,
    /// Nothing to do
    Unchanged,
}

impl Reconciliation {
    /// Whether the subject was modified
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Lazy expiry and daily rollover
#[derive(Debug, Clone)]
pub struct Reconciler {
    free_limit: u32,
    offset: FixedOffset,
}

impl Reconciler {
    /// Reconciler for `plans`, counting days in the configured offset
    pub fn new(plans: &PlanLimits, config: &ReconcilerConfig) -> Self {
        // Offsets of a day or more are not representable; fall back to UTC.
        let offset = FixedOffset::east_opt(config.day_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix());
        Self {
            free_limit: plans.free,
            offset,
        }
    }

    /// Calendar day of `at` in the configured offset
    pub fn day_of(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// Apply at most one correction to `subject` in place
    pub fn reconcile(&self, subject: &mut Subject, now: DateTime<Utc>) -> Reconciliation {
        if let Some(expires_at) = subject.license_expires_at {
            if expires_at <= now {
                info!(
                    subject_id = %subject.id,
                    plan = %subject.plan,
                    %expires_at,
                    "license expired, reverting to free plan"
                );
                subject.plan = Plan::Free;
                subject.messages_limit = self.free_limit;
                subject.messages_used = 0;
                subject.license_key = None;
                subject.license_expires_at = None;
                subject.last_message_reset = now;
                return Reconciliation::LicenseExpired;
            }
        }

        if subject.plan != Plan::Free && self.day_of(subject.last_message_reset) != self.day_of(now) {
            debug!(subject_id = %subject.id, "daily usage rollover");
            subject.messages_used = 0;
            subject.last_message_reset = now;
            return Reconciliation::DailyRollover;
        }

        Reconciliation::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn reconciler(offset_minutes: i32) -> Reconciler {
        Reconciler::new(
            &PlanLimits::default(),
            &ReconcilerConfig {
                day_offset_minutes: offset_minutes,
            },
        )
    }

    fn licensed(now: DateTime<Utc>, expires_in: Duration) -> Subject {
        let mut subject = Subject::new("alice", 10, now - Duration::days(3));
        subject.plan = Plan::Pro;
        subject.messages_limit = 1000;
        subject.messages_used = 420;
        subject.license_key = Some("PRO-KEY".into());
        subject.license_expires_at = Some(now + expires_in);
        subject.last_message_reset = now;
        subject
    }

    #[test]
    fn test_expired_license_reverts_to_free() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let mut subject = licensed(now, -Duration::days(1));

        assert_eq!(reconciler(0).reconcile(&mut subject, now), Reconciliation::LicenseExpired);
        assert_eq!(subject.plan, Plan::Free);
        assert_eq!(subject.messages_limit, 10);
        assert_eq!(subject.messages_used, 0);
        assert!(subject.license_key.is_none());
        assert!(subject.license_expires_at.is_none());
    }

    #[test]
    fn test_rollover_only_for_licensed_plans() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 0, 30, 0).unwrap();
        let r = reconciler(0);

        let mut pro = licensed(now, Duration::days(10));
        pro.last_message_reset = now - Duration::hours(1);
        assert_eq!(r.reconcile(&mut pro, now), Reconciliation::DailyRollover);
        assert_eq!(pro.messages_used, 0);
        assert_eq!(pro.plan, Plan::Pro);

        let mut free = Subject::new("bob", 10, now - Duration::days(2));
        free.messages_used = 10;
        assert_eq!(r.reconcile(&mut free, now), Reconciliation::Unchanged);
        assert_eq!(free.messages_used, 10);
    }

    #[test]
    fn test_day_boundary_follows_configured_offset() {
        // 23:30 UTC on the 9th is already the 10th at UTC+1
        let last = Utc.with_ymd_and_hms(2026, 3, 9, 22, 30, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 23, 30, 0).unwrap();

        let mut utc = licensed(now, Duration::days(5));
        utc.last_message_reset = last;
        assert_eq!(reconciler(0).reconcile(&mut utc, now), Reconciliation::Unchanged);

        let mut shifted = licensed(now, Duration::days(5));
        shifted.last_message_reset = last;
        assert_eq!(reconciler(60).reconcile(&mut shifted, now), Reconciliation::DailyRollover);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let r = reconciler(0);

        let cases = [
            licensed(now, -Duration::hours(1)),
            {
                let mut s = licensed(now, Duration::days(3));
                s.last_message_reset = now - Duration::days(1);
                s
            },
            licensed(now, Duration::days(3)),
        ];

        for original in cases {
            let mut once = original.clone();
            r.reconcile(&mut once, now);

            let mut twice = original.clone();
            r.reconcile(&mut twice, now);
            assert_eq!(r.reconcile(&mut twice, now), Reconciliation::Unchanged);
            assert_eq!(once, twice);
        }
    }
}
