//! Recurring top-up management.

use chrono::Utc;

use gigwallet_core::{
    add_one_month, format_cents, BillingError, PaymentMetadata, Result, SubscriptionId,
    SubscriptionStatus, TopUpSubscription, UserId, MIN_CHARGE_CENTS,
};

use super::{new_reference, LedgerService};
use crate::gateway::{OffSessionCharge, PaymentHandle};

impl LedgerService {
    /// A user's top-up subscriptions, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn list_subscriptions(&self, user_id: &UserId) -> Result<Vec<TopUpSubscription>> {
        Ok(self.store.list_subscriptions(user_id).await?)
    }

    async fn owned_subscription(
        &self,
        user_id: &UserId,
        id: &SubscriptionId,
    ) -> Result<TopUpSubscription> {
        self.store
            .get_subscription(id)
            .await?
            .filter(|sub| sub.user_id == *user_id)
            .ok_or_else(|| BillingError::not_found("subscription", id))
    }

    /// Stop a subscription. Cancelling twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::NotFound` if the user has no such subscription,
    /// or a gateway error for gateway-billed subscriptions.
    pub async fn cancel_subscription(
        &self,
        user_id: &UserId,
        id: &SubscriptionId,
    ) -> Result<TopUpSubscription> {
        let sub = self.owned_subscription(user_id, id).await?;
        if sub.status == SubscriptionStatus::Cancelled {
            return Ok(sub);
        }

        if let Some(external_id) = &sub.external_subscription_id {
            self.call_gateway(
                "cancel_subscription",
                self.gateway.cancel_subscription(external_id),
            )
            .await?;
        }

        let sub = self
            .store
            .set_subscription_status(id, SubscriptionStatus::Cancelled)
            .await?;

        tracing::info!(user_id = %user_id, subscription_id = %id, "Subscription cancelled");
        Ok(sub)
    }

    /// Resume a cancelled subscription.
    ///
    /// A billing date already in the past moves to one month from now, so
    /// reactivating never triggers an immediate catch-up charge.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::NotFound` if the user has no such subscription,
    /// or a gateway error for gateway-billed subscriptions.
    pub async fn reactivate_subscription(
        &self,
        user_id: &UserId,
        id: &SubscriptionId,
    ) -> Result<TopUpSubscription> {
        let sub = self.owned_subscription(user_id, id).await?;
        if sub.status == SubscriptionStatus::Active {
            return Ok(sub);
        }

        if let Some(external_id) = &sub.external_subscription_id {
            self.call_gateway(
                "reactivate_subscription",
                self.gateway.reactivate_subscription(external_id),
            )
            .await?;
        }

        let now = Utc::now();
        let sub = self
            .store
            .resume_subscription(id, now, add_one_month(now))
            .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %id,
            next_billing_date = %sub.next_billing_date,
            "Subscription reactivated"
        );
        Ok(sub)
    }

    /// Change the monthly amount of an active subscription.
    ///
    /// A new gateway price is created; gateway-billed subscriptions are
    /// moved onto it.
    ///
    /// # Errors
    ///
    /// - `BillingError::Validation` for an amount below the gateway minimum or
    ///   a cancelled subscription
    /// - `BillingError::NotFound` if the user has no such subscription
    /// - `BillingError::Gateway` if the gateway refuses the change
    pub async fn update_subscription_amount(
        &self,
        user_id: &UserId,
        id: &SubscriptionId,
        amount_cents: i64,
    ) -> Result<TopUpSubscription> {
        if amount_cents < MIN_CHARGE_CENTS {
            return Err(BillingError::Validation(format!(
                "subscription amount must be at least {}",
                format_cents(MIN_CHARGE_CENTS)
            )));
        }

        let sub = self.owned_subscription(user_id, id).await?;
        if sub.status == SubscriptionStatus::Cancelled {
            return Err(BillingError::Validation(format!(
                "subscription {id} is cancelled"
            )));
        }

        let price_id = self
            .call_gateway(
                "create_recurring_price",
                self.gateway
                    .create_recurring_price(amount_cents, &sub.currency),
            )
            .await?;
        if let Some(external_id) = &sub.external_subscription_id {
            self.call_gateway(
                "update_subscription_price",
                self.gateway
                    .update_subscription_price(external_id, &price_id),
            )
            .await?;
        }

        let previous = sub.amount_cents;
        let sub = self
            .store
            .set_subscription_price(id, amount_cents, &price_id)
            .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %id,
            previous_amount_cents = previous,
            amount_cents,
            "Subscription amount updated"
        );
        Ok(sub)
    }

    /// Initiate a renewal charge for a subscription.
    ///
    /// The outcome arrives later as a payment webhook tagged `recurring`.
    ///
    /// # Errors
    ///
    /// Returns a gateway error if the charge cannot be initiated.
    pub async fn charge_subscription(&self, sub: &TopUpSubscription) -> Result<PaymentHandle> {
        let reference = new_reference("renewal");
        let metadata = PaymentMetadata::subscription(sub.user_id, &reference, &sub.reference, true)
            .with_price_id(sub.external_price_id.clone());
        let charge = OffSessionCharge {
            customer_id: sub.stripe_customer_id.clone(),
            amount_cents: sub.amount_cents,
            currency: sub.currency.clone(),
            metadata,
            idempotency_key: reference.clone(),
        };

        let payment = self
            .call_gateway(
                "charge_off_session",
                self.gateway.charge_off_session(&charge),
            )
            .await?;

        tracing::info!(
            user_id = %sub.user_id,
            subscription_id = %sub.id,
            reference = %reference,
            payment_intent_id = %payment.id,
            amount_cents = sub.amount_cents,
            "Renewal charge initiated"
        );
        Ok(payment)
    }
}
