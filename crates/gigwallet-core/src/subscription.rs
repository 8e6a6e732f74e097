//! Recurring wallet top-up subscriptions.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::transaction::text_enum;
use crate::{SubscriptionId, UserId};

/// A user's opt-in to have the wallet topped up every month.
///
/// Subscriptions are never hard-deleted; cancelling flips the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopUpSubscription {
    /// Subscription ID.
    pub id: SubscriptionId,

    /// Subscriber.
    pub user_id: UserId,

    /// Amount credited every cycle, in cents.
    pub amount_cents: i64,

    /// ISO currency code.
    pub currency: String,

    /// Gateway customer that is charged.
    pub stripe_customer_id: String,

    /// Stable reference of the subscription (carried on every charge).
    pub reference: String,

    /// Current status.
    pub status: SubscriptionStatus,

    /// When the scheduler should charge next.
    pub next_billing_date: DateTime<Utc>,

    /// Gateway recurring price backing this plan.
    pub external_price_id: Option<String>,

    /// Set when the gateway bills this subscription itself (invoice driven).
    /// The scheduler skips such subscriptions.
    pub external_subscription_id: Option<String>,

    /// When the subscription was created.
    pub created_at: DateTime<Utc>,

    /// When the subscription was last updated.
    pub updated_at: DateTime<Utc>,
}

impl TopUpSubscription {
    /// Create an active subscription whose first renewal is one month from `start`.
    #[must_use]
    pub fn new(
        user_id: UserId,
        amount_cents: i64,
        currency: impl Into<String>,
        stripe_customer_id: impl Into<String>,
        reference: impl Into<String>,
        start: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SubscriptionId::generate(),
            user_id,
            amount_cents,
            currency: currency.into(),
            stripe_customer_id: stripe_customer_id.into(),
            reference: reference.into(),
            status: SubscriptionStatus::Active,
            next_billing_date: add_one_month(start),
            external_price_id: None,
            external_subscription_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the scheduler should charge this subscription at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active
            && self.external_subscription_id.is_none()
            && self.next_billing_date <= now
    }

    /// Whether the gateway bills this subscription natively.
    #[must_use]
    pub fn is_gateway_managed(&self) -> bool {
        self.external_subscription_id.is_some()
    }
}

/// Status of a top-up subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Charged every cycle.
    Active,

    /// No further charges.
    Cancelled,
}

text_enum!(SubscriptionStatus {
    Active => "active",
    Cancelled => "cancelled",
});

/// Advance a billing date by one calendar month.
///
/// Days that do not exist in the next month clamp to its last day
/// (Jan 31 -> Feb 28/29).
#[must_use]
pub fn add_one_month(date: DateTime<Utc>) -> DateTime<Utc> {
    date.checked_add_months(Months::new(1)).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn one_month_clamps_to_month_end() {
        let jan31 = Utc.with_ymd_and_hms(2025, 1, 31, 3, 0, 0).unwrap();
        let feb28 = Utc.with_ymd_and_hms(2025, 2, 28, 3, 0, 0).unwrap();
        assert_eq!(add_one_month(jan31), feb28);
    }

    #[test]
    fn due_only_when_active_and_scheduler_billed() {
        let now = Utc::now();
        let mut sub = TopUpSubscription::new(
            UserId::generate(),
            2000,
            "usd",
            "cus_1",
            "sub-ref",
            now - Duration::days(40),
        );
        assert!(sub.is_due(now));

        sub.external_subscription_id = Some("sub_123".into());
        assert!(!sub.is_due(now));

        sub.external_subscription_id = None;
        sub.status = SubscriptionStatus::Cancelled;
        assert!(!sub.is_due(now));
    }
}
