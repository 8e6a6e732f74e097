//! Wallet and user records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{UserId, WalletId};

/// Default ledger currency.
pub const DEFAULT_CURRENCY: &str = "usd";

/// Smallest amount the gateway will charge, in cents ($0.50).
pub const MIN_CHARGE_CENTS: i64 = 50;

/// A per-user stored-value balance.
///
/// Exactly one non-deleted wallet exists per user. The balance is only mutated
/// by the ledger service inside a storage transaction holding the wallet row lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet ID.
    pub id: WalletId,

    /// Owner of the wallet (unique).
    pub user_id: UserId,

    /// Current balance in cents.
    pub balance_cents: i64,

    /// ISO currency code, lowercase.
    pub currency: String,

    /// Suspended wallets cannot fund purchases but still receive credits.
    pub is_suspended: bool,

    /// Soft-delete flag.
    pub is_deleted: bool,

    /// When the wallet was created.
    pub created_at: DateTime<Utc>,

    /// When the wallet was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create a new zero-balance wallet.
    #[must_use]
    pub fn new(user_id: UserId, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WalletId::generate(),
            user_id,
            balance_cents: 0,
            currency: currency.into(),
            is_suspended: false,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether the balance can fund a debit of `amount_cents`.
    #[must_use]
    pub fn can_fund(&self, amount_cents: i64) -> bool {
        !self.is_suspended && self.balance_cents >= amount_cents
    }

    /// Balance that may be applied towards a purchase.
    #[must_use]
    pub fn spendable_cents(&self) -> i64 {
        if self.is_suspended {
            0
        } else {
            self.balance_cents.max(0)
        }
    }
}

/// A marketplace user as seen by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User ID.
    pub id: UserId,

    /// Billing email, used to match recurring invoices to users.
    pub email: String,

    /// Memoized gateway customer ID.
    pub stripe_customer_id: Option<String>,
}

impl User {
    /// Create a user without a gateway customer.
    #[must_use]
    pub fn new(id: UserId, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            stripe_customer_id: None,
        }
    }
}

/// Format cents as a dollar string for display.
#[must_use]
pub fn format_cents(amount_cents: i64) -> String {
    let sign = if amount_cents < 0 { "-" } else { "" };
    let abs = amount_cents.unsigned_abs();
    format!("{sign}${}.{:02}", abs / 100, abs % 100)
}
