//! Recurring billing sweep.
//!
//! Once per cadence the sweep finds active subscriptions whose billing date
//! has passed, claims each billing cycle by moving the date forward one
//! month, and asks the gateway for an off-session charge. The charge outcome
//! arrives later through the webhook path.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use gigwallet_core::{add_one_month, Result, TopUpSubscription};

use crate::ledger::LedgerService;

/// Counters of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Subscriptions found due.
    pub due: usize,
    /// Charges initiated at the gateway.
    pub initiated: usize,
    /// Cycles already claimed by a concurrent sweep.
    pub skipped: usize,
    /// Cycles claimed whose charge could not be initiated.
    pub failed: usize,
}

/// Drives renewal charges for scheduler-billed subscriptions.
pub struct BillingScheduler {
    ledger: Arc<LedgerService>,
}

impl BillingScheduler {
    /// Create a scheduler over the ledger.
    #[must_use]
    pub fn new(ledger: Arc<LedgerService>) -> Self {
        Self { ledger }
    }

    /// Run one sweep at `now`.
    ///
    /// A failure on one subscription is logged and the sweep moves on.
    ///
    /// # Errors
    ///
    /// Returns an error only if the due subscriptions cannot be listed.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let due = self.ledger.store().list_due_subscriptions(now).await?;
        let mut report = SweepReport {
            due: due.len(),
            ..SweepReport::default()
        };

        for sub in &due {
            match self.renew(sub, now).await {
                Ok(true) => report.initiated += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        subscription_id = %sub.id,
                        user_id = %sub.user_id,
                        error = %e,
                        "Renewal failed"
                    );
                }
            }
        }

        tracing::info!(
            due = report.due,
            initiated = report.initiated,
            skipped = report.skipped,
            failed = report.failed,
            "Billing sweep finished"
        );
        Ok(report)
    }

    /// Claim the current cycle of `sub` and charge it.
    ///
    /// Returns `false` when another sweep claimed the cycle first or the
    /// subscription was cancelled since it was listed. The charge uses the
    /// claimed row, so an amount changed meanwhile is honoured. The billing
    /// date stays advanced even if the charge fails.
    async fn renew(&self, sub: &TopUpSubscription, now: DateTime<Utc>) -> Result<bool> {
        let next = next_billing_date(sub.next_billing_date, now);
        let Some(claimed) = self
            .ledger
            .store()
            .advance_subscription_billing(&sub.id, sub.next_billing_date, next)
            .await?
        else {
            tracing::debug!(subscription_id = %sub.id, "Billing cycle not claimable");
            return Ok(false);
        };

        self.ledger.charge_subscription(&claimed).await?;
        Ok(true)
    }

    /// Schedule [`BillingScheduler::run_sweep`] on a cron expression
    /// (with seconds, e.g. `0 0 3 * * *`) and start the job runner.
    ///
    /// The returned runner must be kept alive.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid expression or if the runner fails to start.
    pub async fn start(
        self: Arc<Self>,
        schedule: &str,
    ) -> std::result::Result<JobScheduler, JobSchedulerError> {
        let runner = JobScheduler::new().await?;

        runner
            .add(Job::new_async(schedule, move |_uuid, _l| {
                let scheduler = Arc::clone(&self);
                Box::pin(async move {
                    if let Err(e) = scheduler.run_sweep(Utc::now()).await {
                        tracing::error!(error = %e, "Billing sweep aborted");
                    }
                })
            })?)
            .await?;

        runner.start().await?;
        tracing::info!(schedule = %schedule, "Billing scheduler started");

        Ok(runner)
    }
}

/// Billing date after the cycle due at `due`.
///
/// Normally one month after `due`. After a long outage the date would still
/// be in the past, so it restarts one month from `now` instead of charging
/// every missed cycle.
#[must_use]
pub fn next_billing_date(due: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let next = add_one_month(due);
    if next > now {
        next
    } else {
        add_one_month(now)
    }
}
