//! Payment gateway adapter.
//!
//! [`PaymentGateway`] is the ledger's only view of money that moves outside
//! the wallet. Every creation call carries a [`PaymentMetadata`] so that the
//! business intent can be rebuilt from the webhook payload alone.
//!
//! [`StripeClient`] is the production implementation.

pub mod stripe;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use gigwallet_core::{BillingError, PaymentMetadata, User};

pub use stripe::StripeClient;

/// Errors raised by the gateway adapter.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Network failure, timeout, HTTP 5xx or rate limiting. Safe to retry
    /// with the same idempotency key.
    #[error("gateway unavailable: {0}")]
    Transient(String),

    /// The gateway refused the request (HTTP 4xx).
    #[error("gateway rejected request: {message}")]
    Rejected {
        /// Error message from the gateway.
        message: String,
        /// Gateway error code, if any.
        code: Option<String>,
    },

    /// A webhook signature did not verify.
    #[error("invalid webhook signature")]
    InvalidSignature,

    /// A gateway payload could not be decoded.
    #[error("malformed gateway payload: {0}")]
    Malformed(String),

    /// The adapter is misconfigured.
    #[error("gateway configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    /// Whether the caller may retry the same request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }
}

impl From<GatewayError> for BillingError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidSignature => Self::Validation(err.to_string()),
            other => Self::Gateway {
                retryable: other.is_retryable(),
                message: other.to_string(),
            },
        }
    }
}

/// A one-time card payment to create.
#[derive(Debug, Clone)]
pub struct PaymentIntentRequest {
    /// Amount in cents.
    pub amount_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Gateway customer to charge.
    pub customer_id: String,
    /// Business intent, echoed back on every webhook.
    pub metadata: PaymentMetadata,
    /// Statement description.
    pub description: String,
    /// Idempotency key (the ledger reference).
    pub idempotency_key: String,
    /// Keep the card on file for later off-session charges.
    pub save_card: bool,
}

/// An off-session charge against a saved card.
#[derive(Debug, Clone)]
pub struct OffSessionCharge {
    /// Gateway customer to charge.
    pub customer_id: String,
    /// Amount in cents.
    pub amount_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Business intent, echoed back on every webhook.
    pub metadata: PaymentMetadata,
    /// Idempotency key (the ledger reference).
    pub idempotency_key: String,
}

/// Handle on a created payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentHandle {
    /// Gateway payment-intent ID.
    pub id: String,
    /// Secret the client uses to confirm the payment.
    pub client_secret: Option<String>,
    /// Gateway status at creation time.
    pub status: String,
    /// Amount in cents.
    pub amount_cents: i64,
}

/// A subscription billed natively by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewaySubscription {
    /// Gateway subscription ID.
    pub id: String,
    /// Gateway status (`active`, `canceled`, ...).
    pub status: String,
    /// Whether the subscription ends with the current period.
    pub cancel_at_period_end: bool,
    /// ID of the first subscription item.
    pub item_id: Option<String>,
    /// Price of the first subscription item.
    pub price_id: Option<String>,
    /// End of the current billing period.
    pub current_period_end: Option<DateTime<Utc>>,
}

/// A gateway invoice, as listed to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invoice {
    /// Invoice ID.
    pub id: String,
    /// Amount paid in cents.
    pub amount_paid_cents: i64,
    /// Amount due in cents.
    pub amount_due_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Gateway status (`paid`, `open`, ...).
    pub status: Option<String>,
    /// Subscription that produced the invoice.
    pub subscription_id: Option<String>,
    /// Hosted invoice page.
    pub hosted_invoice_url: Option<String>,
    /// When the invoice was created.
    pub created_at: Option<DateTime<Utc>>,
}

/// One page of invoices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvoicePage {
    /// Invoices, newest first.
    pub invoices: Vec<Invoice>,
    /// Whether another page exists after the last invoice.
    pub has_more: bool,
}

/// A payment-intent lifecycle event, decoded from a webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    /// Gateway payment-intent ID.
    pub payment_intent_id: String,
    /// Amount the intent was created for, in cents.
    pub amount_cents: i64,
    /// Amount actually captured, in cents.
    pub amount_received_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Gateway customer.
    pub customer_id: Option<String>,
    /// Business intent attached at creation.
    pub metadata: PaymentMetadata,
    /// Gateway explanation for a failure or cancellation.
    pub failure_reason: Option<String>,
}

/// A recurring invoice event, decoded from a webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceEvent {
    /// Invoice ID.
    pub invoice_id: String,
    /// Billing email of the paying customer.
    pub customer_email: Option<String>,
    /// Gateway customer.
    pub customer_id: Option<String>,
    /// Amount paid, in cents.
    pub amount_paid_cents: i64,
    /// Amount due, in cents.
    pub amount_due_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Gateway subscription that produced the invoice.
    pub subscription_id: Option<String>,
    /// Payment intent that paid the invoice.
    pub payment_intent_id: Option<String>,
}

/// Operations the ledger needs from a card-payment processor.
///
/// Implementations must never touch the ledger; results flow back through
/// webhooks.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a gateway customer for `user`, returning its ID.
    async fn create_customer(&self, user: &User) -> Result<String, GatewayError>;

    /// Create a one-time payment intent.
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentHandle, GatewayError>;

    /// Create a monthly recurring price, returning its ID.
    async fn create_recurring_price(
        &self,
        amount_cents: i64,
        currency: &str,
    ) -> Result<String, GatewayError>;

    /// Charge the customer's saved card without the customer present.
    async fn charge_off_session(
        &self,
        charge: &OffSessionCharge,
    ) -> Result<PaymentHandle, GatewayError>;

    /// Retrieve a gateway subscription.
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError>;

    /// Stop a gateway subscription at the end of its current period.
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError>;

    /// Undo a pending cancellation.
    async fn reactivate_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError>;

    /// Move a gateway subscription to another price.
    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        price_id: &str,
    ) -> Result<GatewaySubscription, GatewayError>;

    /// List a customer's invoices, newest first.
    async fn list_invoices(
        &self,
        customer_id: &str,
        limit: u32,
        starting_after: Option<&str>,
    ) -> Result<InvoicePage, GatewayError>;

    /// Verify a webhook signature over the raw request body.
    fn verify_webhook(&self, payload: &[u8], signature: &str) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(GatewayError::Transient("timeout".into()).is_retryable());
        assert!(!GatewayError::Rejected {
            message: "card declined".into(),
            code: Some("card_declined".into()),
        }
        .is_retryable());
        assert!(!GatewayError::InvalidSignature.is_retryable());
    }

    #[test]
    fn gateway_errors_map_to_billing_errors() {
        let err: BillingError = GatewayError::Transient("503".into()).into();
        assert!(matches!(err, BillingError::Gateway { retryable: true, .. }));

        let err: BillingError = GatewayError::Rejected {
            message: "No such customer".into(),
            code: None,
        }
        .into();
        assert!(matches!(err, BillingError::Gateway { retryable: false, .. }));

        let err: BillingError = GatewayError::InvalidSignature.into();
        assert!(matches!(err, BillingError::Validation(_)));
    }
}
