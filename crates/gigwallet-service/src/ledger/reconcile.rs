//! Applying gateway events to the ledger.
//!
//! Every method here is idempotent on the payment reference: gateways
//! redeliver events and deliver them out of order, so a replayed event is a
//! no-op and a late "processing" never regresses a settled transaction.
//! Each call uses exactly one ledger transaction.

use chrono::Utc;
use serde::Serialize;

use gigwallet_core::{
    format_cents, settle_card_payment, BillingError, PaymentKind, PaymentMetadata, PurchaseStatus,
    Result, SubscriptionStatus, TopUpSubscription, Transaction, TransactionStatus, TransactionType,
};
use gigwallet_store::LedgerTx;

use super::LedgerService;
use crate::gateway::{InvoiceEvent, PaymentEvent};

/// What a reconciliation call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The ledger changed.
    Applied,
    /// The event was already applied.
    Duplicate,
    /// The event contradicts the ledger and was dropped.
    Conflict(String),
    /// The event is not relevant to the ledger.
    Ignored(String),
}

impl LedgerService {
    /// Record that a payment is in flight.
    ///
    /// Inserts a `processing` row unless the reference is already known.
    ///
    /// # Errors
    ///
    /// Returns a storage error; the transaction is rolled back.
    pub async fn reconcile_payment_processing(
        &self,
        event: &PaymentEvent,
    ) -> Result<ReconcileOutcome> {
        let meta = &event.metadata;
        let mut tx = self.store.begin().await?;
        tx.lock_wallet(&meta.user_id, &self.currency).await?;

        if let Some(mut existing) = tx.find_transaction(&meta.reference).await? {
            if !existing.status.can_advance_to(TransactionStatus::Processing) {
                return Ok(ReconcileOutcome::Duplicate);
            }
            existing.status = TransactionStatus::Processing;
            existing.external_payment_id = Some(event.payment_intent_id.clone());
            existing.updated_at = Utc::now();
            tx.update_transaction(&existing).await?;
        } else {
            let (transaction_type, amount_cents) = match (meta.kind, meta.purchase) {
                (PaymentKind::Purchase, Some(intent)) => {
                    (TransactionType::TaskPayment, -intent.total_price_cents)
                }
                _ => (TransactionType::Deposit, event.amount_cents),
            };
            let entry = Transaction::new(
                meta.user_id,
                transaction_type,
                TransactionStatus::Processing,
                amount_cents,
                &meta.reference,
                describe(meta.kind),
            )
            .with_external_payment_id(&event.payment_intent_id)
            .with_metadata(audit_metadata(meta));
            tx.insert_transaction(&entry).await?;
        }
        tx.commit().await?;

        tracing::debug!(
            user_id = %meta.user_id,
            reference = %meta.reference,
            payment_intent_id = %event.payment_intent_id,
            "Payment processing"
        );
        Ok(ReconcileOutcome::Applied)
    }

    /// Settle a successful card payment.
    ///
    /// # Errors
    ///
    /// Returns a storage error; the transaction is rolled back.
    pub async fn reconcile_payment_succeeded(
        &self,
        event: &PaymentEvent,
    ) -> Result<ReconcileOutcome> {
        match event.metadata.kind {
            PaymentKind::Purchase => self.settle_purchase_payment(event).await,
            PaymentKind::WalletTopup | PaymentKind::WalletSubscription => {
                self.credit_top_up(event).await
            }
        }
    }

    /// Close a failed or cancelled payment. The balance is untouched.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` for a non-closing status, or a
    /// storage error.
    pub async fn reconcile_payment_closed(
        &self,
        event: &PaymentEvent,
        status: TransactionStatus,
    ) -> Result<ReconcileOutcome> {
        if !matches!(
            status,
            TransactionStatus::Failed | TransactionStatus::Cancelled
        ) {
            return Err(BillingError::Validation(format!(
                "{status} does not close a payment"
            )));
        }

        let meta = &event.metadata;
        let reason = event.failure_reason.clone().unwrap_or_else(|| {
            if status == TransactionStatus::Failed {
                "payment failed".to_string()
            } else {
                "payment cancelled".to_string()
            }
        });

        let mut tx = self.store.begin().await?;
        tx.lock_wallet(&meta.user_id, &self.currency).await?;

        match tx.find_transaction(&meta.reference).await? {
            Some(existing) if existing.status == status => {
                return Ok(ReconcileOutcome::Duplicate);
            }
            Some(existing) if !existing.status.can_advance_to(status) => {
                let reason = format!("transaction is already {}", existing.status);
                tracing::warn!(
                    reference = %meta.reference,
                    payment_intent_id = %event.payment_intent_id,
                    event_status = %status,
                    reason = %reason,
                    "Reconciliation conflict"
                );
                return Ok(ReconcileOutcome::Conflict(reason));
            }
            Some(mut existing) => {
                existing.transaction_type = TransactionType::Failed;
                existing.external_payment_id = Some(event.payment_intent_id.clone());
                existing.close_unpaid(status, &reason);
                tx.update_transaction(&existing).await?;
            }
            None => {
                let mut entry = Transaction::new(
                    meta.user_id,
                    TransactionType::Failed,
                    status,
                    0,
                    &meta.reference,
                    describe(meta.kind),
                )
                .with_external_payment_id(&event.payment_intent_id)
                .with_metadata(audit_metadata(meta));
                entry.merge_metadata(serde_json::json!({ "failure_reason": reason }));
                tx.insert_transaction(&entry).await?;
            }
        }
        tx.commit().await?;

        tracing::info!(
            user_id = %meta.user_id,
            reference = %meta.reference,
            payment_intent_id = %event.payment_intent_id,
            status = %status,
            reason = %reason,
            "Payment closed without settlement"
        );
        let title = if status == TransactionStatus::Failed {
            "Payment failed"
        } else {
            "Payment cancelled"
        };
        self.notify(&meta.user_id, title, &reason).await;

        Ok(ReconcileOutcome::Applied)
    }

    /// Credit a paid recurring invoice, resolving the user by billing email.
    ///
    /// # Errors
    ///
    /// Fails when the invoice has no email or no user matches it: the money
    /// was taken and must not be dropped, so the gateway has to redeliver.
    pub async fn reconcile_invoice_paid(&self, event: &InvoiceEvent) -> Result<ReconcileOutcome> {
        if event.amount_paid_cents <= 0 {
            return Ok(ReconcileOutcome::Ignored("nothing was paid".into()));
        }

        let email = event.customer_email.as_deref().ok_or_else(|| {
            BillingError::Validation(format!("invoice {} has no customer email", event.invoice_id))
        })?;
        let user = self
            .store
            .find_user_by_email(email)
            .await?
            .ok_or_else(|| BillingError::not_found("user", email))?;

        let reference = event.invoice_id.clone();
        let mut tx = self.store.begin().await?;
        let wallet = tx.lock_wallet(&user.id, &self.currency).await?;

        let existing = tx.find_transaction(&reference).await?;
        if let Some(outcome) = check_settleable(existing.as_ref(), &reference) {
            return Ok(outcome);
        }
        let is_new = existing.is_none();

        let before = wallet.balance_cents;
        let amount = event.amount_paid_cents;
        let mut entry = existing.unwrap_or_else(|| {
            Transaction::new(
                user.id,
                TransactionType::Deposit,
                TransactionStatus::Pending,
                amount,
                &reference,
                "Recurring wallet top-up",
            )
            .with_metadata(serde_json::json!({
                "invoice_id": event.invoice_id,
                "subscription_id": event.subscription_id,
            }))
        });
        entry.transaction_type = TransactionType::Deposit;
        entry.external_payment_id = Some(
            event
                .payment_intent_id
                .clone()
                .unwrap_or_else(|| event.invoice_id.clone()),
        );
        entry.settle(amount, before);
        write_entry(tx.as_mut(), &entry, is_new).await?;
        tx.set_wallet_balance(&user.id, before + amount).await?;

        if let (Some(subscription_id), Some(customer_id)) =
            (&event.subscription_id, &event.customer_id)
        {
            if tx
                .find_subscription_by_external_id(subscription_id)
                .await?
                .is_none()
            {
                let mut mirror = TopUpSubscription::new(
                    user.id,
                    event.amount_due_cents.max(amount),
                    currency_or(&event.currency, &self.currency),
                    customer_id,
                    format!("ext_{subscription_id}"),
                    Utc::now(),
                );
                mirror.external_subscription_id = Some(subscription_id.clone());
                tx.insert_subscription(&mirror).await?;
                tracing::info!(
                    user_id = %user.id,
                    subscription_id = %subscription_id,
                    "Mirrored gateway subscription"
                );
            }
        }
        tx.commit().await?;

        tracing::info!(
            user_id = %user.id,
            reference = %reference,
            amount_cents = amount,
            balance_before = before,
            balance_after = before + amount,
            "Recurring invoice credited"
        );
        self.notify(
            &user.id,
            "Wallet topped up",
            &format!("{} was added to your wallet.", format_cents(amount)),
        )
        .await;

        Ok(ReconcileOutcome::Applied)
    }

    /// Tell the user a recurring invoice could not be collected.
    ///
    /// The subscription stays active.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn reconcile_invoice_failed(
        &self,
        event: &InvoiceEvent,
    ) -> Result<ReconcileOutcome> {
        let user = match event.customer_email.as_deref() {
            Some(email) => self.store.find_user_by_email(email).await?,
            None => None,
        };
        let Some(user) = user else {
            tracing::warn!(invoice_id = %event.invoice_id, "Failed invoice for unknown user");
            return Ok(ReconcileOutcome::Ignored("unknown user".into()));
        };

        tracing::info!(user_id = %user.id, invoice_id = %event.invoice_id, "Recurring invoice failed");
        self.notify(
            &user.id,
            "Recurring top-up failed",
            &format!(
                "We could not charge {} for your monthly wallet top-up.",
                format_cents(event.amount_due_cents)
            ),
        )
        .await;

        Ok(ReconcileOutcome::Applied)
    }

    /// Mark the local mirror of a gateway subscription as cancelled.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn reconcile_subscription_deleted(
        &self,
        external_subscription_id: &str,
    ) -> Result<ReconcileOutcome> {
        let Some(subscription) = self
            .store
            .find_subscription_by_external_id(external_subscription_id)
            .await?
        else {
            return Ok(ReconcileOutcome::Ignored("unknown subscription".into()));
        };

        if subscription.status == SubscriptionStatus::Cancelled {
            return Ok(ReconcileOutcome::Duplicate);
        }

        let subscription = self
            .store
            .set_subscription_status(&subscription.id, SubscriptionStatus::Cancelled)
            .await?;

        tracing::info!(
            user_id = %subscription.user_id,
            subscription_id = %subscription.id,
            external_subscription_id = %external_subscription_id,
            "Gateway subscription cancelled"
        );
        self.notify(
            &subscription.user_id,
            "Recurring top-up cancelled",
            "Your monthly wallet top-up has ended.",
        )
        .await;

        Ok(ReconcileOutcome::Applied)
    }

    /// Credit a top-up (one-time, first subscription charge or renewal).
    async fn credit_top_up(&self, event: &PaymentEvent) -> Result<ReconcileOutcome> {
        let meta = &event.metadata;
        let amount = event.amount_received_cents;
        if amount <= 0 {
            return Ok(ReconcileOutcome::Ignored("nothing was received".into()));
        }

        let mut tx = self.store.begin().await?;
        let wallet = tx.lock_wallet(&meta.user_id, &self.currency).await?;

        let existing = tx.find_transaction(&meta.reference).await?;
        if let Some(outcome) = check_settleable(existing.as_ref(), &meta.reference) {
            return Ok(outcome);
        }
        let is_new = existing.is_none();

        let before = wallet.balance_cents;
        let mut entry = existing.unwrap_or_else(|| {
            Transaction::new(
                meta.user_id,
                TransactionType::Deposit,
                TransactionStatus::Pending,
                amount,
                &meta.reference,
                describe(meta.kind),
            )
            .with_metadata(audit_metadata(meta))
        });
        entry.transaction_type = TransactionType::Deposit;
        entry.external_payment_id = Some(event.payment_intent_id.clone());
        entry.settle(amount, before);
        write_entry(tx.as_mut(), &entry, is_new).await?;
        tx.set_wallet_balance(&meta.user_id, before + amount).await?;

        if meta.kind == PaymentKind::WalletSubscription && !meta.recurring {
            self.start_subscription(tx.as_mut(), event).await?;
        }
        tx.commit().await?;

        tracing::info!(
            user_id = %meta.user_id,
            reference = %meta.reference,
            payment_intent_id = %event.payment_intent_id,
            amount_cents = amount,
            balance_before = before,
            balance_after = before + amount,
            "Wallet topped up"
        );
        self.notify(
            &meta.user_id,
            "Wallet topped up",
            &format!("{} was added to your wallet.", format_cents(amount)),
        )
        .await;

        Ok(ReconcileOutcome::Applied)
    }

    /// Create the local subscription on the first successful recurring top-up.
    async fn start_subscription(&self, tx: &mut dyn LedgerTx, event: &PaymentEvent) -> Result<()> {
        let meta = &event.metadata;
        let Some(subscription_reference) = &meta.subscription_reference else {
            return Ok(());
        };
        if tx.find_subscription(subscription_reference).await?.is_some() {
            return Ok(());
        }
        let Some(customer_id) = &event.customer_id else {
            tracing::warn!(
                reference = %meta.reference,
                subscription_reference = %subscription_reference,
                "Subscription payment without customer, not scheduling renewals"
            );
            return Ok(());
        };

        let mut subscription = TopUpSubscription::new(
            meta.user_id,
            event.amount_cents,
            currency_or(&event.currency, &self.currency),
            customer_id,
            subscription_reference,
            Utc::now(),
        );
        subscription.external_price_id.clone_from(&meta.price_id);
        tx.insert_subscription(&subscription).await?;

        tracing::info!(
            user_id = %meta.user_id,
            subscription_id = %subscription.id,
            next_billing_date = %subscription.next_billing_date,
            "Recurring top-up started"
        );
        Ok(())
    }

    /// Settle the card part of a purchase and return any overpayment.
    ///
    /// If the purchase can no longer be paid (already paid, cancelled, or the
    /// wallet share was spent meanwhile), the card amount is credited to the
    /// wallet instead so the money is never dropped.
    async fn settle_purchase_payment(&self, event: &PaymentEvent) -> Result<ReconcileOutcome> {
        let meta = &event.metadata;
        let Some(intent) = meta.purchase else {
            return Ok(ReconcileOutcome::Conflict(
                "purchase payment without purchase details".into(),
            ));
        };
        let user_id = meta.user_id;
        let card_paid = event.amount_received_cents;
        let credit_reference = format!("{}_credit", meta.reference);

        let mut tx = self.store.begin().await?;
        let wallet = tx.lock_wallet(&user_id, &self.currency).await?;

        let existing = tx.find_transaction(&meta.reference).await?;
        if let Some(outcome) = check_settleable(existing.as_ref(), &meta.reference) {
            return Ok(outcome);
        }
        if tx.find_transaction(&credit_reference).await?.is_some() {
            return Ok(ReconcileOutcome::Duplicate);
        }
        let is_new = existing.is_none();

        let purchase = tx
            .lock_purchase(&intent.purchase_id)
            .await?
            .filter(|p| p.user_id == user_id && p.status == PurchaseStatus::Pending);
        let settlement = purchase.as_ref().and_then(|p| {
            settle_card_payment(
                wallet.spendable_cents(),
                intent.wallet_amount_cents,
                card_paid,
                p.total_cents(),
            )
            .ok()
        });

        let before = wallet.balance_cents;
        let mut entry = existing.unwrap_or_else(|| {
            Transaction::new(
                user_id,
                TransactionType::TaskPayment,
                TransactionStatus::Pending,
                -intent.total_price_cents,
                &meta.reference,
                describe(meta.kind),
            )
            .with_metadata(audit_metadata(meta))
        });
        entry.transaction_type = TransactionType::TaskPayment;
        entry.external_payment_id = Some(event.payment_intent_id.clone());

        let Some(settlement) = settlement else {
            let reason = if purchase.is_none() {
                "purchase is no longer payable"
            } else {
                "wallet no longer covers the remainder"
            };
            entry.close_unpaid(TransactionStatus::Failed, reason);
            write_entry(tx.as_mut(), &entry, is_new).await?;

            let credit = Transaction::settled(
                user_id,
                TransactionType::WalletCredit,
                card_paid,
                before,
                &credit_reference,
                "Card payment credited to wallet",
            )
            .with_external_payment_id(&event.payment_intent_id)
            .with_metadata(serde_json::json!({
                "purchase_id": intent.purchase_id.to_string(),
                "reason": reason,
            }));
            tx.insert_transaction(&credit).await?;
            tx.set_wallet_balance(&user_id, before + card_paid).await?;
            tx.commit().await?;

            tracing::warn!(
                user_id = %user_id,
                purchase_id = %intent.purchase_id,
                reference = %meta.reference,
                payment_intent_id = %event.payment_intent_id,
                amount_cents = card_paid,
                balance_before = before,
                balance_after = before + card_paid,
                reason,
                "Purchase not settled, card payment credited to wallet"
            );
            self.notify(
                &user_id,
                "Payment credited to wallet",
                &format!(
                    "{} was added to your wallet because the purchase could not be completed.",
                    format_cents(card_paid)
                ),
            )
            .await;
            return Ok(ReconcileOutcome::Applied);
        };

        entry.settle(-settlement.wallet_debit_cents, before);
        entry.merge_metadata(serde_json::json!({
            "card_paid_cents": card_paid,
            "wallet_debit_cents": settlement.wallet_debit_cents,
            "excess_cents": settlement.excess_cents,
        }));
        write_entry(tx.as_mut(), &entry, is_new).await?;

        let mut balance = before - settlement.wallet_debit_cents;
        if settlement.excess_cents > 0 {
            let credit = Transaction::settled(
                user_id,
                TransactionType::WalletCredit,
                settlement.excess_cents,
                balance,
                format!("{}_excess", meta.reference),
                "Overpayment returned to wallet",
            )
            .with_external_payment_id(&event.payment_intent_id)
            .with_metadata(serde_json::json!({
                "purchase_id": intent.purchase_id.to_string(),
            }));
            tx.insert_transaction(&credit).await?;
            balance += settlement.excess_cents;
        }
        tx.set_wallet_balance(&user_id, balance).await?;
        tx.set_purchase_status(&intent.purchase_id, PurchaseStatus::Progressing)
            .await?;
        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            purchase_id = %intent.purchase_id,
            reference = %meta.reference,
            payment_intent_id = %event.payment_intent_id,
            card_paid_cents = card_paid,
            wallet_debit_cents = settlement.wallet_debit_cents,
            excess_cents = settlement.excess_cents,
            balance_before = before,
            balance_after = balance,
            "Purchase settled"
        );
        self.notify(
            &user_id,
            "Payment successful",
            &format!("Your payment of {} was received.", format_cents(card_paid)),
        )
        .await;

        Ok(ReconcileOutcome::Applied)
    }
}

/// Decide whether an existing row may still move to `success`.
///
/// Returns the outcome to report when it may not.
fn check_settleable(existing: Option<&Transaction>, reference: &str) -> Option<ReconcileOutcome> {
    let existing = existing?;
    if existing.status == TransactionStatus::Success {
        return Some(ReconcileOutcome::Duplicate);
    }
    if existing.status.can_advance_to(TransactionStatus::Success) {
        return None;
    }

    let reason = format!("transaction is already {}", existing.status);
    tracing::warn!(reference = %reference, reason = %reason, "Reconciliation conflict");
    Some(ReconcileOutcome::Conflict(reason))
}

async fn write_entry(tx: &mut dyn LedgerTx, entry: &Transaction, is_new: bool) -> Result<()> {
    if is_new {
        tx.insert_transaction(entry).await?;
    } else {
        tx.update_transaction(entry).await?;
    }
    Ok(())
}

fn audit_metadata(meta: &PaymentMetadata) -> serde_json::Value {
    serde_json::Value::Object(
        meta.to_map()
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect(),
    )
}

fn describe(kind: PaymentKind) -> &'static str {
    match kind {
        PaymentKind::Purchase => "Card payment for purchase",
        PaymentKind::WalletTopup => "Wallet top-up",
        PaymentKind::WalletSubscription => "Recurring wallet top-up",
    }
}

fn currency_or(reported: &str, fallback: &str) -> String {
    if reported.is_empty() {
        fallback.to_string()
    } else {
        reported.to_lowercase()
    }
}
