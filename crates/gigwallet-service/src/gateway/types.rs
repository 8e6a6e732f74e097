//! Stripe API wire types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use gigwallet_core::{MetadataError, PaymentMetadata};

use super::{GatewaySubscription, Invoice, InvoiceEvent, PaymentEvent, PaymentHandle};

/// Stripe customer object.
#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    /// Stripe customer ID.
    pub id: String,
    /// Customer email.
    #[serde(default)]
    pub email: Option<String>,
}

/// Stripe price object.
#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    /// Price ID.
    pub id: String,
    /// Unit amount in cents.
    #[serde(default)]
    pub unit_amount: Option<i64>,
}

/// Stripe payment method object (only the ID is used).
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentMethod {
    /// Payment method ID.
    pub id: String,
}

/// Error attached to a failed payment intent.
#[derive(Debug, Clone, Deserialize)]
pub struct LastPaymentError {
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Error code (e.g. `card_declined`).
    #[serde(default)]
    pub code: Option<String>,
}

/// Stripe `PaymentIntent` object.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    /// Payment intent ID.
    pub id: String,
    /// Amount in cents.
    #[serde(default)]
    pub amount: i64,
    /// Amount captured in cents.
    #[serde(default)]
    pub amount_received: i64,
    /// Currency (e.g., "usd").
    #[serde(default)]
    pub currency: String,
    /// Status (succeeded, processing, canceled, ...).
    #[serde(default)]
    pub status: String,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Client secret for confirmation.
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Invoice that created this intent, for subscription payments.
    #[serde(default)]
    pub invoice: Option<String>,
    /// Metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Failure of the last attempt.
    #[serde(default)]
    pub last_payment_error: Option<LastPaymentError>,
    /// Why the intent was cancelled.
    #[serde(default)]
    pub cancellation_reason: Option<String>,
}

impl PaymentIntent {
    /// Whether the intent was created by a gateway invoice rather than by us.
    #[must_use]
    pub fn is_invoice_payment(&self) -> bool {
        self.invoice.is_some()
    }

    /// Decode the ledger event carried by this intent.
    ///
    /// # Errors
    ///
    /// Returns the metadata error when the intent was not tagged by the
    /// ledger or its tags are incomplete.
    pub fn to_event(&self) -> Result<PaymentEvent, MetadataError> {
        let metadata = PaymentMetadata::from_map(&self.metadata)?;
        let failure_reason = self
            .last_payment_error
            .as_ref()
            .and_then(|e| e.message.clone().or_else(|| e.code.clone()))
            .or_else(|| self.cancellation_reason.clone());

        Ok(PaymentEvent {
            payment_intent_id: self.id.clone(),
            amount_cents: self.amount,
            amount_received_cents: self.amount_received,
            currency: self.currency.clone(),
            customer_id: self.customer.clone(),
            metadata,
            failure_reason,
        })
    }
}

impl From<PaymentIntent> for PaymentHandle {
    fn from(pi: PaymentIntent) -> Self {
        Self {
            id: pi.id,
            client_secret: pi.client_secret,
            status: pi.status,
            amount_cents: pi.amount,
        }
    }
}

/// Stripe invoice object.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeInvoice {
    /// Invoice ID.
    pub id: String,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Billing email of the customer.
    #[serde(default)]
    pub customer_email: Option<String>,
    /// Amount paid in cents.
    #[serde(default)]
    pub amount_paid: i64,
    /// Amount due in cents.
    #[serde(default)]
    pub amount_due: i64,
    /// Currency.
    #[serde(default)]
    pub currency: String,
    /// Status.
    #[serde(default)]
    pub status: Option<String>,
    /// Subscription ID.
    #[serde(default)]
    pub subscription: Option<String>,
    /// Payment intent ID.
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// Hosted invoice page.
    #[serde(default)]
    pub hosted_invoice_url: Option<String>,
    /// Created timestamp (Unix).
    #[serde(default)]
    pub created: i64,
}

impl StripeInvoice {
    /// Decode the ledger event carried by this invoice.
    #[must_use]
    pub fn to_event(&self) -> InvoiceEvent {
        InvoiceEvent {
            invoice_id: self.id.clone(),
            customer_email: self.customer_email.clone(),
            customer_id: self.customer.clone(),
            amount_paid_cents: self.amount_paid,
            amount_due_cents: self.amount_due,
            currency: self.currency.clone(),
            subscription_id: self.subscription.clone(),
            payment_intent_id: self.payment_intent.clone(),
        }
    }
}

impl From<StripeInvoice> for Invoice {
    fn from(inv: StripeInvoice) -> Self {
        Self {
            created_at: timestamp(inv.created),
            id: inv.id,
            amount_paid_cents: inv.amount_paid,
            amount_due_cents: inv.amount_due,
            currency: inv.currency,
            status: inv.status,
            subscription_id: inv.subscription,
            hosted_invoice_url: inv.hosted_invoice_url,
        }
    }
}

/// Stripe subscription object.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    /// Subscription ID.
    pub id: String,
    /// Status.
    #[serde(default)]
    pub status: String,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Whether the subscription ends with the current period.
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// End of the current period (Unix).
    #[serde(default)]
    pub current_period_end: Option<i64>,
    /// Subscription items.
    #[serde(default)]
    pub items: Option<StripeList<SubscriptionItem>>,
}

/// Stripe subscription item.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    /// Item ID.
    pub id: String,
    /// Price of the item.
    pub price: Price,
}

impl From<Subscription> for GatewaySubscription {
    fn from(sub: Subscription) -> Self {
        let first_item = sub.items.and_then(|items| items.data.into_iter().next());
        Self {
            id: sub.id,
            status: sub.status,
            cancel_at_period_end: sub.cancel_at_period_end,
            item_id: first_item.as_ref().map(|item| item.id.clone()),
            price_id: first_item.map(|item| item.price.id),
            current_period_end: sub.current_period_end.and_then(timestamp),
        }
    }
}

/// Stripe list response wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    /// Data items.
    pub data: Vec<T>,
    /// Whether there are more items.
    #[serde(default)]
    pub has_more: bool,
}

/// Stripe webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Event ID.
    pub id: String,
    /// Event type (e.g., "payment_intent.succeeded").
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event data.
    pub data: WebhookEventData,
    /// Created timestamp (Unix).
    #[serde(default)]
    pub created: i64,
}

/// Webhook event data container.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    /// The event object.
    pub object: serde_json::Value,
}

/// Stripe API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorResponse {
    /// Error details.
    pub error: StripeErrorDetail,
}

/// Stripe error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorDetail {
    /// Error type.
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    /// Error message.
    #[serde(default)]
    pub message: Option<String>,
    /// Error code.
    #[serde(default)]
    pub code: Option<String>,
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}
