//! Purchasable marketplace requests as seen by the ledger.
//!
//! Only the columns the ledger reads or advances are modeled; the rest of
//! the request lives with the marketplace CRUD layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transaction::text_enum;
use crate::{PurchaseId, UserId};

/// A paid request a client buys from a talent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    /// Purchase ID.
    pub id: PurchaseId,

    /// Paying client.
    pub user_id: UserId,

    /// Base price in cents.
    pub price_cents: i64,

    /// Surcharge for the selected delivery duration, in cents.
    pub duration_surcharge_cents: i64,

    /// Payment status.
    pub status: PurchaseStatus,

    /// When the purchase was created.
    pub created_at: DateTime<Utc>,

    /// When the purchase was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Purchase {
    /// Create an unpaid purchase.
    #[must_use]
    pub fn new(user_id: UserId, price_cents: i64, duration_surcharge_cents: i64) -> Self {
        let now = Utc::now();
        Self {
            id: PurchaseId::generate(),
            user_id,
            price_cents,
            duration_surcharge_cents,
            status: PurchaseStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Total amount due, including the duration surcharge.
    #[must_use]
    pub const fn total_cents(&self) -> i64 {
        self.price_cents + self.duration_surcharge_cents
    }
}

/// Payment state of a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    /// Awaiting payment.
    Pending,

    /// Paid; the talent may start working.
    Progressing,

    /// Delivered.
    Completed,

    /// Withdrawn before payment.
    Cancelled,
}

text_enum!(PurchaseStatus {
    Pending => "pending",
    Progressing => "progressing",
    Completed => "completed",
    Cancelled => "cancelled",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_includes_surcharge() {
        let purchase = Purchase::new(UserId::generate(), 1000, 250);
        assert_eq!(purchase.total_cents(), 1250);
        assert_eq!(purchase.status, PurchaseStatus::Pending);
    }
}
