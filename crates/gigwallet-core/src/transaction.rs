//! Ledger transaction types.
//!
//! Every balance change is recorded as a [`Transaction`] whose `reference` is
//! the idempotency key of one logical payment attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{TransactionId, UserId};

/// An entry in the append-mostly transaction log.
///
/// For a `Success` transaction `balance_after_cents - balance_before_cents`
/// equals `amount_cents` and matches the wallet balance at the moment the row
/// was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The user whose ledger this entry belongs to.
    pub user_id: UserId,

    /// Amount in cents. Positive = credit, Negative = debit.
    pub amount_cents: i64,

    /// Type of transaction.
    pub transaction_type: TransactionType,

    /// Lifecycle status.
    pub status: TransactionStatus,

    /// Human-readable description.
    pub description: String,

    /// Caller-generated idempotency key, unique per logical operation.
    pub reference: String,

    /// Gateway payment-intent or invoice ID, when the money moved at the gateway.
    pub external_payment_id: Option<String>,

    /// Wallet balance before the mutation (set once the row settles).
    pub balance_before_cents: Option<i64>,

    /// Wallet balance after the mutation (set once the row settles).
    pub balance_after_cents: Option<i64>,

    /// Audit metadata.
    pub metadata: serde_json::Value,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,

    /// When the transaction was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a transaction in the given status with no settled balances.
    #[must_use]
    pub fn new(
        user_id: UserId,
        transaction_type: TransactionType,
        status: TransactionStatus,
        amount_cents: i64,
        reference: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::generate(),
            user_id,
            amount_cents,
            transaction_type,
            status,
            description: description.into(),
            reference: reference.into(),
            external_payment_id: None,
            balance_before_cents: None,
            balance_after_cents: None,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a settled transaction moving the balance from `balance_before_cents`.
    #[must_use]
    pub fn settled(
        user_id: UserId,
        transaction_type: TransactionType,
        amount_cents: i64,
        balance_before_cents: i64,
        reference: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let mut tx = Self::new(
            user_id,
            transaction_type,
            TransactionStatus::Success,
            amount_cents,
            reference,
            description,
        );
        tx.balance_before_cents = Some(balance_before_cents);
        tx.balance_after_cents = Some(balance_before_cents + amount_cents);
        tx
    }

    /// Attach the gateway payment ID.
    #[must_use]
    pub fn with_external_payment_id(mut self, id: impl Into<String>) -> Self {
        self.external_payment_id = Some(id.into());
        self
    }

    /// Replace the metadata bag.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Mark the transaction as settled against the given balance.
    pub fn settle(&mut self, amount_cents: i64, balance_before_cents: i64) {
        self.amount_cents = amount_cents;
        self.status = TransactionStatus::Success;
        self.balance_before_cents = Some(balance_before_cents);
        self.balance_after_cents = Some(balance_before_cents + amount_cents);
        self.updated_at = Utc::now();
    }

    /// Mark the transaction as failed or cancelled; the balance is untouched.
    pub fn close_unpaid(&mut self, status: TransactionStatus, reason: &str) {
        debug_assert!(matches!(
            status,
            TransactionStatus::Failed | TransactionStatus::Cancelled
        ));
        self.status = status;
        self.amount_cents = 0;
        self.balance_before_cents = None;
        self.balance_after_cents = None;
        self.merge_metadata(serde_json::json!({ "failure_reason": reason }));
        self.updated_at = Utc::now();
    }

    /// Merge keys into the metadata object.
    pub fn merge_metadata(&mut self, extra: serde_json::Value) {
        if !self.metadata.is_object() {
            self.metadata = serde_json::Value::Object(serde_json::Map::new());
        }
        if let (Some(target), serde_json::Value::Object(extra)) =
            (self.metadata.as_object_mut(), extra)
        {
            target.extend(extra);
        }
    }

    /// Whether the before/after balances agree with the amount.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        match (self.balance_before_cents, self.balance_after_cents) {
            (Some(before), Some(after)) => after - before == self.amount_cents,
            _ => self.status != TransactionStatus::Success,
        }
    }
}

/// Type of ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Wallet top-up paid by card (one-time or recurring).
    Deposit,

    /// Money taken out of the wallet by an administrator.
    Withdrawal,

    /// Refund issued back to the wallet.
    Refund,

    /// Payment for a marketplace request.
    TaskPayment,

    /// Credit to the wallet (overpayment return, administrative credit).
    WalletCredit,

    /// A payment attempt that failed or was cancelled.
    Failed,

    /// Disputed card payment.
    Chargeback,
}

/// Lifecycle status of a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Created but not yet seen by the gateway.
    Pending,

    /// The gateway reported the payment as in flight.
    Processing,

    /// Settled; the balance change is applied.
    Success,

    /// The payment failed; no balance change.
    Failed,

    /// The payment was cancelled; no balance change.
    Cancelled,
}

impl TransactionStatus {
    /// Terminal states never move back to `Pending`/`Processing`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    /// Whether a gateway report of `next` may replace this status.
    ///
    /// A failed intent may still succeed on a later attempt; success and
    /// cancellation are final.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, _) => !matches!(next, Self::Pending),
            (Self::Processing, _) => next.is_terminal(),
            (Self::Failed, Self::Success | Self::Cancelled) => true,
            _ => false,
        }
    }
}

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Database and wire representation.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {other}", stringify!($name))),
                }
            }
        }
    };
}

pub(crate) use text_enum;

text_enum!(TransactionType {
    Deposit => "deposit",
    Withdrawal => "withdrawal",
    Refund => "refund",
    TaskPayment => "task_payment",
    WalletCredit => "wallet_credit",
    Failed => "failed",
    Chargeback => "chargeback",
});

text_enum!(TransactionStatus {
    Pending => "pending",
    Processing => "processing",
    Success => "success",
    Failed => "failed",
    Cancelled => "cancelled",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_transaction_is_balanced() {
        let tx = Transaction::settled(
            UserId::generate(),
            TransactionType::TaskPayment,
            -1000,
            1500,
            "ref-1",
            "Request payment",
        );
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.balance_before_cents, Some(1500));
        assert_eq!(tx.balance_after_cents, Some(500));
        assert!(tx.is_balanced());
    }

    #[test]
    fn close_unpaid_zeroes_amount() {
        let mut tx = Transaction::new(
            UserId::generate(),
            TransactionType::Deposit,
            TransactionStatus::Processing,
            2000,
            "ref-2",
            "Top-up",
        );
        tx.close_unpaid(TransactionStatus::Failed, "card_declined");
        assert_eq!(tx.amount_cents, 0);
        assert_eq!(tx.metadata["failure_reason"], "card_declined");
        assert!(tx.is_balanced());
    }

    #[test]
    fn status_never_regresses() {
        use TransactionStatus::{Cancelled, Failed, Pending, Processing, Success};

        assert!(Pending.can_advance_to(Processing));
        assert!(Processing.can_advance_to(Success));
        assert!(Failed.can_advance_to(Success));
        assert!(!Success.can_advance_to(Processing));
        assert!(!Success.can_advance_to(Failed));
        assert!(!Cancelled.can_advance_to(Success));
        assert!(!Processing.can_advance_to(Pending));
    }

    #[test]
    fn text_representation_roundtrip() {
        for ty in [
            TransactionType::Deposit,
            TransactionType::TaskPayment,
            TransactionType::WalletCredit,
            TransactionType::Chargeback,
        ] {
            assert_eq!(ty.as_str().parse::<TransactionType>().unwrap(), ty);
        }
        assert!("bogus".parse::<TransactionStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&TransactionType::TaskPayment).unwrap(),
            "\"task_payment\""
        );
    }
}
