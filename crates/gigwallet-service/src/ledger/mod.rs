//! Wallet ledger service.
//!
//! [`LedgerService`] is the only writer of wallet balances. Each balance
//! change runs inside one [`LedgerTx`](gigwallet_store::LedgerTx): the wallet
//! row is locked first, the funding decision is taken against the locked
//! balance, and the balance plus its transaction-log rows commit together.
//!
//! Gateway calls never happen while a ledger transaction is open.

mod reconcile;
mod subscriptions;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use gigwallet_core::{
    format_cents, plan_funding, BillingError, FundingPlan, PaymentMetadata, PurchaseId,
    PurchaseIntent, PurchaseStatus, Result, Transaction, TransactionId, TransactionType, User,
    UserId, Wallet, DEFAULT_CURRENCY, MIN_CHARGE_CENTS,
};
use gigwallet_store::Store;

use crate::gateway::{GatewayError, InvoicePage, PaymentGateway, PaymentHandle, PaymentIntentRequest};
use crate::notify::{Notifier, NOTIFY_TIMEOUT};

pub use reconcile::ReconcileOutcome;

/// Default bound on a single gateway call.
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest page of ledger history returned at once.
pub const MAX_PAGE_SIZE: usize = 100;

/// One page of a user's transaction history.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionPage {
    /// Transactions, newest first.
    pub transactions: Vec<Transaction>,
    /// Whether more transactions follow.
    pub has_more: bool,
}

/// Result of asking the ledger to pay for a purchase.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PurchaseCharge {
    /// The wallet covered the whole price; the purchase is progressing.
    Paid {
        /// The settled wallet debit.
        transaction: Transaction,
    },

    /// A card payment is needed; the purchase stays pending until the
    /// gateway confirms it.
    RequiresPayment(CardPayment),
}

/// A card payment the client still has to confirm.
#[derive(Debug, Clone, Serialize)]
pub struct CardPayment {
    /// Gateway payment handle (carries the client secret).
    pub payment: PaymentHandle,
    /// Ledger reference of the payment attempt.
    pub reference: String,
    /// Wallet amount that will be applied once the card payment settles.
    pub wallet_amount_cents: i64,
    /// Amount charged to the card.
    pub card_amount_cents: i64,
    /// Full price.
    pub total_cents: i64,
}

/// A top-up the client still has to confirm.
#[derive(Debug, Clone, Serialize)]
pub struct TopUpIntent {
    /// Gateway payment handle (carries the client secret).
    pub payment: PaymentHandle,
    /// Ledger reference of the payment attempt.
    pub reference: String,
    /// Amount in cents.
    pub amount_cents: i64,
    /// Whether the top-up repeats monthly.
    pub recurring: bool,
    /// Reference of the subscription created on the first successful charge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_reference: Option<String>,
}

/// The wallet ledger.
pub struct LedgerService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    currency: String,
    gateway_timeout: Duration,
}

impl LedgerService {
    /// Create a ledger over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            currency: DEFAULT_CURRENCY.to_string(),
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
        }
    }

    /// Set the ledger currency.
    #[must_use]
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into().to_lowercase();
        self
    }

    /// Set the bound on a single gateway call.
    #[must_use]
    pub const fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Run a gateway call under the configured timeout.
    ///
    /// A timeout is reported as a retryable gateway error; no ledger state
    /// exists for the call yet.
    async fn call_gateway<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, GatewayError>> + Send,
    {
        match tokio::time::timeout(self.gateway_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(operation, error = %e, retryable = e.is_retryable(), "Gateway call failed");
                Err(e.into())
            }
            Err(_) => {
                tracing::warn!(operation, timeout = ?self.gateway_timeout, "Gateway call timed out");
                Err(BillingError::Gateway {
                    message: format!("{operation} timed out"),
                    retryable: true,
                })
            }
        }
    }

    async fn notify(&self, user_id: &UserId, title: &str, message: &str) {
        let sent = tokio::time::timeout(
            NOTIFY_TIMEOUT,
            self.notifier.notify(user_id, title, message),
        )
        .await;
        if sent.is_err() {
            tracing::warn!(user_id = %user_id, title = %title, "Notification abandoned");
        }
    }

    // =========================================================================
    // Balances and history
    // =========================================================================

    /// Current wallet of a user, created with a zero balance on first access.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Storage` if the store fails.
    pub async fn get_balance(&self, user_id: &UserId) -> Result<Wallet> {
        Ok(self.store.ensure_wallet(user_id, &self.currency).await?)
    }

    /// A page of a user's transaction history, newest first.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Storage` if the store fails.
    pub async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<TransactionPage> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let mut transactions = self
            .store
            .list_transactions(user_id, limit + 1, offset)
            .await?;

        let has_more = transactions.len() > limit;
        transactions.truncate(limit);
        Ok(TransactionPage {
            transactions,
            has_more,
        })
    }

    // =========================================================================
    // Users and gateway customers
    // =========================================================================

    /// Record the billing email of a user.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` for an unusable email or one
    /// already registered to another user.
    pub async fn register_user(&self, user_id: &UserId, email: &str) -> Result<User> {
        let email = email.trim();
        if !email.contains('@') {
            return Err(BillingError::Validation(format!("invalid email: {email}")));
        }

        if let Some(user) = self.store.get_user(user_id).await? {
            if user.email.eq_ignore_ascii_case(email) {
                return Ok(user);
            }
        }
        if let Some(holder) = self.store.find_user_by_email(email).await? {
            if holder.id != *user_id {
                return Err(BillingError::Validation(format!(
                    "email {email} is registered to another user"
                )));
            }
        }

        let user = User::new(*user_id, email);
        self.store.put_user(&user).await?;
        Ok(self.store.get_user(user_id).await?.unwrap_or(user))
    }

    /// The gateway customer of a user, created and memoized on first use.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::NotFound` for an unknown user, or a gateway error.
    pub async fn ensure_customer(&self, user_id: &UserId) -> Result<String> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| BillingError::not_found("user", user_id))?;

        if let Some(customer_id) = user.stripe_customer_id {
            return Ok(customer_id);
        }

        let customer_id = self
            .call_gateway("create_customer", self.gateway.create_customer(&user))
            .await?;
        self.store
            .set_stripe_customer_id(user_id, &customer_id)
            .await?;

        Ok(customer_id)
    }

    // =========================================================================
    // Purchases and top-ups
    // =========================================================================

    /// Pay for a purchase, wallet first.
    ///
    /// When the wallet covers the price the debit settles synchronously.
    /// Otherwise a card payment is created for `requested_card_cents`
    /// (default: whatever the wallet leaves open, at least the gateway
    /// minimum) and the purchase stays pending until the gateway confirms it.
    ///
    /// # Errors
    ///
    /// - `BillingError::NotFound` if the purchase doesn't exist or belongs to
    ///   someone else
    /// - `BillingError::Validation` if the purchase is not payable or the card
    ///   amount doesn't cover the remainder
    /// - `BillingError::Gateway` if the card payment cannot be created
    pub async fn plan_and_charge_for_purchase(
        &self,
        user_id: &UserId,
        purchase_id: &PurchaseId,
        requested_card_cents: Option<i64>,
    ) -> Result<PurchaseCharge> {
        let mut tx = self.store.begin().await?;
        let wallet = tx.lock_wallet(user_id, &self.currency).await?;

        let purchase = match tx.lock_purchase(purchase_id).await? {
            Some(purchase) if purchase.user_id == *user_id => purchase,
            _ => return Err(BillingError::not_found("purchase", purchase_id)),
        };
        if purchase.status != PurchaseStatus::Pending {
            return Err(BillingError::Validation(format!(
                "purchase {purchase_id} is {} and cannot be paid",
                purchase.status
            )));
        }

        let total = purchase.total_cents();
        let spendable = wallet.spendable_cents();
        let requested =
            requested_card_cents.unwrap_or_else(|| (total - spendable).max(MIN_CHARGE_CENTS));

        match plan_funding(spendable, total, requested)? {
            FundingPlan::WalletOnly { total_cents } => {
                let reference = new_reference("purchase");
                let entry = Transaction::settled(
                    *user_id,
                    TransactionType::TaskPayment,
                    -total_cents,
                    wallet.balance_cents,
                    &reference,
                    format!("Payment for purchase {purchase_id}"),
                )
                .with_metadata(serde_json::json!({
                    "purchase_id": purchase_id.to_string(),
                    "funding": "wallet",
                }));

                tx.set_wallet_balance(user_id, wallet.balance_cents - total_cents)
                    .await?;
                tx.set_purchase_status(purchase_id, PurchaseStatus::Progressing)
                    .await?;
                tx.insert_transaction(&entry).await?;
                tx.commit().await?;

                tracing::info!(
                    user_id = %user_id,
                    purchase_id = %purchase_id,
                    reference = %reference,
                    amount_cents = total_cents,
                    balance_before = wallet.balance_cents,
                    balance_after = wallet.balance_cents - total_cents,
                    "Purchase paid from wallet"
                );
                self.notify(
                    user_id,
                    "Payment successful",
                    &format!("{} was paid from your wallet.", format_cents(total_cents)),
                )
                .await;

                Ok(PurchaseCharge::Paid { transaction: entry })
            }
            FundingPlan::Split {
                wallet_cents,
                card_cents,
                total_cents,
            } => {
                // Nothing was written; release the wallet before talking to the gateway.
                tx.rollback().await?;

                let customer_id = self.ensure_customer(user_id).await?;
                let reference = new_reference("purchase");
                let metadata = PaymentMetadata::purchase(
                    *user_id,
                    &reference,
                    PurchaseIntent {
                        purchase_id: *purchase_id,
                        wallet_amount_cents: wallet_cents,
                        total_price_cents: total_cents,
                    },
                );
                let request = PaymentIntentRequest {
                    amount_cents: card_cents,
                    currency: self.currency.clone(),
                    customer_id,
                    metadata,
                    description: format!("Payment for purchase {purchase_id}"),
                    idempotency_key: reference.clone(),
                    save_card: false,
                };

                let payment = self
                    .call_gateway(
                        "create_payment_intent",
                        self.gateway.create_payment_intent(&request),
                    )
                    .await?;

                tracing::info!(
                    user_id = %user_id,
                    purchase_id = %purchase_id,
                    reference = %reference,
                    payment_intent_id = %payment.id,
                    wallet_cents,
                    card_cents,
                    "Card payment created for purchase"
                );

                Ok(PurchaseCharge::RequiresPayment(CardPayment {
                    payment,
                    reference,
                    wallet_amount_cents: wallet_cents,
                    card_amount_cents: card_cents,
                    total_cents,
                }))
            }
        }
    }

    /// Create a card payment that tops up the wallet.
    ///
    /// With `recurring`, the card is saved for off-session use and the first
    /// successful charge creates a monthly top-up subscription. No ledger row
    /// exists until the gateway reports the payment.
    ///
    /// # Errors
    ///
    /// - `BillingError::Validation` if the amount is below the gateway minimum
    /// - `BillingError::NotFound` if the user is unknown
    /// - `BillingError::Gateway` if the payment cannot be created
    pub async fn create_top_up_intent(
        &self,
        user_id: &UserId,
        amount_cents: i64,
        recurring: bool,
    ) -> Result<TopUpIntent> {
        if amount_cents < MIN_CHARGE_CENTS {
            return Err(BillingError::Validation(format!(
                "top-up must be at least {}",
                format_cents(MIN_CHARGE_CENTS)
            )));
        }

        let customer_id = self.ensure_customer(user_id).await?;
        let reference = new_reference("topup");

        let (metadata, subscription_reference, description) = if recurring {
            let price_id = self
                .call_gateway(
                    "create_recurring_price",
                    self.gateway
                        .create_recurring_price(amount_cents, &self.currency),
                )
                .await?;
            let subscription_reference = new_reference("sub");
            let metadata =
                PaymentMetadata::subscription(*user_id, &reference, &subscription_reference, false)
                    .with_price_id(Some(price_id));
            (
                metadata,
                Some(subscription_reference),
                format!("Monthly wallet top-up of {}", format_cents(amount_cents)),
            )
        } else {
            (
                PaymentMetadata::topup(*user_id, &reference),
                None,
                format!("Wallet top-up of {}", format_cents(amount_cents)),
            )
        };

        let request = PaymentIntentRequest {
            amount_cents,
            currency: self.currency.clone(),
            customer_id,
            metadata,
            description,
            idempotency_key: reference.clone(),
            save_card: recurring,
        };
        let payment = self
            .call_gateway(
                "create_payment_intent",
                self.gateway.create_payment_intent(&request),
            )
            .await?;

        tracing::info!(
            user_id = %user_id,
            reference = %reference,
            payment_intent_id = %payment.id,
            amount_cents,
            recurring,
            "Top-up payment created"
        );

        Ok(TopUpIntent {
            payment,
            reference,
            amount_cents,
            recurring,
            subscription_reference,
        })
    }

    /// A page of the user's gateway invoices.
    ///
    /// Users without a gateway customer have no invoices.
    ///
    /// # Errors
    ///
    /// Returns a gateway or storage error.
    pub async fn list_invoices(
        &self,
        user_id: &UserId,
        limit: u32,
        starting_after: Option<&str>,
    ) -> Result<InvoicePage> {
        let Some(customer_id) = self
            .store
            .get_user(user_id)
            .await?
            .and_then(|user| user.stripe_customer_id)
        else {
            return Ok(InvoicePage::default());
        };

        self.call_gateway(
            "list_invoices",
            self.gateway
                .list_invoices(&customer_id, limit, starting_after),
        )
        .await
    }

    // =========================================================================
    // Administrative correction
    // =========================================================================

    /// Credit (positive) or debit (negative) a wallet directly.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` for a zero amount, a missing reason,
    /// or a debit larger than the balance.
    pub async fn admin_adjust(
        &self,
        user_id: &UserId,
        amount_cents: i64,
        reason: &str,
        admin_id: &str,
    ) -> Result<Transaction> {
        if amount_cents == 0 {
            return Err(BillingError::Validation("adjustment must not be zero".into()));
        }
        if reason.trim().is_empty() {
            return Err(BillingError::Validation("adjustment needs a reason".into()));
        }

        let mut tx = self.store.begin().await?;
        let wallet = tx.lock_wallet(user_id, &self.currency).await?;

        let balance_after = wallet.balance_cents + amount_cents;
        if balance_after < 0 {
            return Err(BillingError::Validation(format!(
                "adjustment of {} would leave a negative balance ({})",
                format_cents(amount_cents),
                format_cents(balance_after)
            )));
        }

        let transaction_type = if amount_cents > 0 {
            TransactionType::WalletCredit
        } else {
            TransactionType::Withdrawal
        };
        let entry = Transaction::settled(
            *user_id,
            transaction_type,
            amount_cents,
            wallet.balance_cents,
            new_reference("adjust"),
            reason.trim(),
        )
        .with_metadata(serde_json::json!({ "admin_id": admin_id, "reason": reason.trim() }));

        tx.set_wallet_balance(user_id, balance_after).await?;
        tx.insert_transaction(&entry).await?;
        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            admin_id = %admin_id,
            reference = %entry.reference,
            amount_cents,
            balance_before = wallet.balance_cents,
            balance_after,
            "Wallet adjusted by admin"
        );

        Ok(entry)
    }

    /// Suspend or release a wallet.
    ///
    /// A suspended wallet keeps receiving credits but funds nothing.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Storage` if the store fails.
    pub async fn set_wallet_suspended(
        &self,
        user_id: &UserId,
        suspended: bool,
        admin_id: &str,
    ) -> Result<Wallet> {
        let wallet = self
            .store
            .set_wallet_suspended(user_id, &self.currency, suspended)
            .await?;
        tracing::info!(
            user_id = %user_id,
            admin_id = %admin_id,
            suspended,
            "Wallet suspension changed by admin"
        );
        Ok(wallet)
    }
}

/// Fresh idempotency reference for one logical payment attempt.
fn new_reference(prefix: &str) -> String {
    format!("{prefix}_{}", TransactionId::generate())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_are_unique_and_prefixed() {
        let a = new_reference("topup");
        let b = new_reference("topup");
        assert!(a.starts_with("topup_"));
        assert_ne!(a, b);
    }
}
