//! Funding-split arithmetic.
//!
//! Purchases are paid wallet-first; whatever the wallet cannot cover is charged
//! to a card. When the card confirmation arrives the split is recomputed
//! against the balance at that moment, and any overpayment is returned to the
//! wallet.

use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::wallet::MIN_CHARGE_CENTS;

/// How a purchase will be funded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FundingPlan {
    /// The wallet covers the whole price.
    WalletOnly {
        /// Amount debited from the wallet.
        total_cents: i64,
    },

    /// Part (or none) of the price comes from the wallet, the rest from a card.
    Split {
        /// Wallet amount intended to be applied when the card payment settles.
        wallet_cents: i64,
        /// Amount charged to the card.
        card_cents: i64,
        /// Full price of the purchase.
        total_cents: i64,
    },
}

/// Decide the funding split for a purchase.
///
/// `spendable_cents` must be read inside the same storage transaction that
/// performs the debit, otherwise two purchases can both see the same balance.
///
/// # Errors
///
/// Returns [`BillingError::Validation`] when the price is not positive, or when
/// the card amount is below the gateway minimum or cannot cover the part of
/// the price the wallet leaves open.
pub fn plan_funding(
    spendable_cents: i64,
    total_cents: i64,
    requested_card_cents: i64,
) -> Result<FundingPlan> {
    if total_cents <= 0 {
        return Err(BillingError::Validation(format!(
            "purchase total must be positive, got {total_cents}"
        )));
    }

    let spendable_cents = spendable_cents.max(0);
    if spendable_cents >= total_cents {
        return Ok(FundingPlan::WalletOnly { total_cents });
    }

    let remainder = total_cents - spendable_cents;
    if requested_card_cents < MIN_CHARGE_CENTS {
        return Err(BillingError::Validation(format!(
            "card amount must be at least {MIN_CHARGE_CENTS} cents"
        )));
    }
    if requested_card_cents < remainder {
        return Err(BillingError::Validation(format!(
            "card amount {requested_card_cents} does not cover the remaining {remainder}"
        )));
    }

    Ok(FundingPlan::Split {
        wallet_cents: spendable_cents,
        card_cents: requested_card_cents,
        total_cents,
    })
}

/// Outcome of settling a confirmed card payment against the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardSettlement {
    /// Amount debited from the wallet for the purchase.
    pub wallet_debit_cents: i64,
    /// Amount returned to the wallet because card plus wallet exceeded the price.
    pub excess_cents: i64,
}

/// Recompute a split purchase when the card payment is confirmed.
///
/// The wallet contributes at least the intended amount (`wallet_intended_cents`)
/// and at least whatever the card left uncovered, never more than the current
/// spendable balance. The excess `card + wallet - price` goes back to the
/// wallet.
///
/// # Errors
///
/// Returns [`BillingError::InsufficientFunds`] when card and wallet together no
/// longer cover the price (the balance was spent in between).
pub fn settle_card_payment(
    spendable_cents: i64,
    wallet_intended_cents: i64,
    card_paid_cents: i64,
    total_cents: i64,
) -> Result<CardSettlement> {
    let uncovered = (total_cents - card_paid_cents).max(0);
    let wanted = wallet_intended_cents.max(uncovered).max(0);
    let wallet_debit_cents = wanted.min(spendable_cents.max(0));

    if card_paid_cents + wallet_debit_cents < total_cents {
        return Err(BillingError::InsufficientFunds {
            balance: spendable_cents,
            required: uncovered,
        });
    }

    Ok(CardSettlement {
        wallet_debit_cents,
        excess_cents: card_paid_cents + wallet_debit_cents - total_cents,
    })
}
