//! Payment metadata contract.
//!
//! Metadata attached to every gateway object at creation time is the only
//! channel back from the gateway's webhook events to the ledger. It carries an
//! explicit [`PaymentKind`] discriminator so reconciliation never has to guess
//! what a payment was for.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{PurchaseId, UserId};

/// Metadata keys shared by the gateway adapter and the reconciler.
pub mod keys {
    /// Discriminator, see [`super::PaymentKind`].
    pub const TRANSACTION_TYPE: &str = "transaction_type";
    /// Paying user.
    pub const USER_ID: &str = "user_id";
    /// Ledger idempotency reference.
    pub const REFERENCE: &str = "reference";
    /// Purchased request.
    pub const PURCHASE_ID: &str = "purchase_id";
    /// Wallet amount intended to be applied to a split purchase.
    pub const WALLET_AMOUNT: &str = "wallet_amount_cents";
    /// Purchase price at the time the split was planned.
    pub const TOTAL_PRICE: &str = "total_price_cents";
    /// Reference of the top-up subscription a charge belongs to.
    pub const SUBSCRIPTION_REFERENCE: &str = "subscription_reference";
    /// Set to `true` on scheduler-initiated renewals.
    pub const RECURRING: &str = "recurring";
    /// Gateway recurring price backing a subscription.
    pub const PRICE_ID: &str = "price_id";
}

/// What a gateway payment was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    /// Card part of a marketplace purchase.
    Purchase,
    /// One-time wallet top-up.
    WalletTopup,
    /// Recurring wallet top-up (first charge or renewal).
    WalletSubscription,
}

impl PaymentKind {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::WalletTopup => "wallet_topup",
            Self::WalletSubscription => "wallet_subscription",
        }
    }
}

impl fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentKind {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(Self::Purchase),
            "wallet_topup" => Ok(Self::WalletTopup),
            "wallet_subscription" => Ok(Self::WalletSubscription),
            other => Err(MetadataError::UnknownKind(other.to_string())),
        }
    }
}

/// Errors raised when reading metadata back from a gateway event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    /// No discriminator: the payment was not created by this ledger.
    #[error("payment carries no {} discriminator", keys::TRANSACTION_TYPE)]
    Untagged,

    /// Unrecognized discriminator value.
    #[error("unknown payment kind: {0}")]
    UnknownKind(String),

    /// A required key is missing.
    #[error("metadata key missing: {0}")]
    Missing(&'static str),

    /// A key is present but unparsable.
    #[error("metadata key {key} is invalid: {value}")]
    Invalid {
        /// Offending key.
        key: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Business intent carried on a gateway payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentMetadata {
    /// Discriminator.
    pub kind: PaymentKind,
    /// Paying user.
    pub user_id: UserId,
    /// Ledger reference for this payment attempt.
    pub reference: String,
    /// Purchase details, for [`PaymentKind::Purchase`].
    pub purchase: Option<PurchaseIntent>,
    /// Subscription reference, for [`PaymentKind::WalletSubscription`].
    pub subscription_reference: Option<String>,
    /// Whether the scheduler initiated this charge.
    pub recurring: bool,
    /// Gateway price of the subscription, for [`PaymentKind::WalletSubscription`].
    pub price_id: Option<String>,
}

/// Purchase part of [`PaymentMetadata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchaseIntent {
    /// Purchased request.
    pub purchase_id: PurchaseId,
    /// Wallet amount intended to be applied.
    pub wallet_amount_cents: i64,
    /// Price when the split was planned.
    pub total_price_cents: i64,
}

impl PaymentMetadata {
    /// Metadata for a one-time top-up.
    #[must_use]
    pub fn topup(user_id: UserId, reference: impl Into<String>) -> Self {
        Self {
            kind: PaymentKind::WalletTopup,
            user_id,
            reference: reference.into(),
            purchase: None,
            subscription_reference: None,
            recurring: false,
            price_id: None,
        }
    }

    /// Metadata for a recurring top-up charge.
    #[must_use]
    pub fn subscription(
        user_id: UserId,
        reference: impl Into<String>,
        subscription_reference: impl Into<String>,
        recurring: bool,
    ) -> Self {
        Self {
            kind: PaymentKind::WalletSubscription,
            user_id,
            reference: reference.into(),
            purchase: None,
            subscription_reference: Some(subscription_reference.into()),
            recurring,
            price_id: None,
        }
    }

    /// Attach the gateway price of a subscription.
    #[must_use]
    pub fn with_price_id(mut self, price_id: Option<String>) -> Self {
        self.price_id = price_id;
        self
    }

    /// Metadata for the card part of a purchase.
    #[must_use]
    pub fn purchase(user_id: UserId, reference: impl Into<String>, intent: PurchaseIntent) -> Self {
        Self {
            kind: PaymentKind::Purchase,
            user_id,
            reference: reference.into(),
            purchase: Some(intent),
            subscription_reference: None,
            recurring: false,
            price_id: None,
        }
    }

    /// Flatten into the string map sent to the gateway.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(keys::TRANSACTION_TYPE.into(), self.kind.as_str().into());
        map.insert(keys::USER_ID.into(), self.user_id.to_string());
        map.insert(keys::REFERENCE.into(), self.reference.clone());
        if let Some(purchase) = &self.purchase {
            map.insert(keys::PURCHASE_ID.into(), purchase.purchase_id.to_string());
            map.insert(
                keys::WALLET_AMOUNT.into(),
                purchase.wallet_amount_cents.to_string(),
            );
            map.insert(
                keys::TOTAL_PRICE.into(),
                purchase.total_price_cents.to_string(),
            );
        }
        if let Some(subscription) = &self.subscription_reference {
            map.insert(keys::SUBSCRIPTION_REFERENCE.into(), subscription.clone());
        }
        if self.recurring {
            map.insert(keys::RECURRING.into(), "true".into());
        }
        if let Some(price_id) = &self.price_id {
            map.insert(keys::PRICE_ID.into(), price_id.clone());
        }
        map
    }

    /// Rebuild the intent from a gateway event's metadata.
    ///
    /// # Errors
    ///
    /// [`MetadataError::Untagged`] when the discriminator is absent, otherwise
    /// the first missing or invalid key.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, MetadataError> {
        let kind: PaymentKind = map
            .get(keys::TRANSACTION_TYPE)
            .ok_or(MetadataError::Untagged)?
            .parse()?;
        let user_id = parse_key(map, keys::USER_ID)?;
        let reference = map
            .get(keys::REFERENCE)
            .filter(|r| !r.is_empty())
            .cloned()
            .ok_or(MetadataError::Missing(keys::REFERENCE))?;

        let purchase = if kind == PaymentKind::Purchase {
            Some(PurchaseIntent {
                purchase_id: parse_key(map, keys::PURCHASE_ID)?,
                wallet_amount_cents: parse_key(map, keys::WALLET_AMOUNT)?,
                total_price_cents: parse_key(map, keys::TOTAL_PRICE)?,
            })
        } else {
            None
        };

        let subscription_reference = map.get(keys::SUBSCRIPTION_REFERENCE).cloned();
        if kind == PaymentKind::WalletSubscription && subscription_reference.is_none() {
            return Err(MetadataError::Missing(keys::SUBSCRIPTION_REFERENCE));
        }

        Ok(Self {
            kind,
            user_id,
            reference,
            purchase,
            subscription_reference,
            recurring: map.get(keys::RECURRING).is_some_and(|v| v == "true"),
            price_id: map.get(keys::PRICE_ID).cloned(),
        })
    }
}

fn parse_key<T: FromStr>(
    map: &HashMap<String, String>,
    key: &'static str,
) -> Result<T, MetadataError> {
    let value = map.get(key).ok_or(MetadataError::Missing(key))?;
    value.parse().map_err(|_| MetadataError::Invalid {
        key,
        value: value.clone(),
    })
}
