//! Webhook event router.
//!
//! An event is verified against the raw body, decoded, and dispatched by type
//! to the ledger. The gateway retries any delivery that is not acknowledged,
//! so:
//!
//! - a bad signature is rejected and never reaches the ledger;
//! - an event that can never apply (unknown type, foreign payment, conflict)
//!   is acknowledged so it is not redelivered forever;
//! - a ledger failure is returned as an error so the gateway redelivers.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use gigwallet_core::{BillingError, MetadataError, TransactionStatus};

use crate::gateway::types::{PaymentIntent, StripeInvoice, Subscription, WebhookEvent};
use crate::gateway::{GatewayError, PaymentGateway};
use crate::ledger::{LedgerService, ReconcileOutcome};

/// Why a webhook was not acknowledged.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The delivery is not authentic or not decodable; it is dropped.
    #[error("webhook rejected: {0}")]
    Rejected(String),

    /// The ledger could not apply the event; the gateway should redeliver.
    #[error("webhook processing failed: {0}")]
    Failed(#[from] BillingError),
}

/// An acknowledged webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookAck {
    /// Gateway event ID.
    pub event_id: String,
    /// Gateway event type.
    pub event_type: String,
    /// What the ledger did.
    pub outcome: ReconcileOutcome,
}

enum PaymentStage {
    Processing,
    Succeeded,
    Closed(TransactionStatus),
}

/// Verifies and dispatches gateway webhooks.
pub struct WebhookRouter {
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<LedgerService>,
}

impl WebhookRouter {
    /// Create a router.
    #[must_use]
    pub fn new(gateway: Arc<dyn PaymentGateway>, ledger: Arc<LedgerService>) -> Self {
        Self { gateway, ledger }
    }

    /// Handle one delivery.
    ///
    /// # Errors
    ///
    /// - `WebhookError::Rejected` for a missing or bad signature, or an
    ///   undecodable body
    /// - `WebhookError::Failed` if the ledger failed; the gateway should retry
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, WebhookError> {
        let signature =
            signature.ok_or_else(|| WebhookError::Rejected("missing signature".into()))?;

        if let Err(e) = self.gateway.verify_webhook(payload, signature) {
            tracing::warn!(error = %e, "Dropping webhook with invalid signature");
            let reason = match e {
                GatewayError::Configuration(_) => "webhook verification is not configured",
                _ => "invalid signature",
            };
            return Err(WebhookError::Rejected(reason.into()));
        }

        let event: WebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "Dropping undecodable webhook");
            WebhookError::Rejected(format!("invalid payload: {e}"))
        })?;

        tracing::info!(event_id = %event.id, event_type = %event.event_type, "Received webhook");

        let outcome = match self.dispatch(&event).await {
            Ok(outcome) => outcome,
            Err(BillingError::ReconciliationConflict { reference, reason }) => {
                tracing::warn!(
                    event_id = %event.id,
                    reference = %reference,
                    reason = %reason,
                    "Reconciliation conflict"
                );
                ReconcileOutcome::Conflict(reason)
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Webhook processing failed"
                );
                return Err(e.into());
            }
        };

        match &outcome {
            ReconcileOutcome::Conflict(reason) => {
                tracing::warn!(event_id = %event.id, reason = %reason, "Webhook acknowledged without effect");
            }
            ReconcileOutcome::Ignored(reason) => {
                tracing::debug!(event_id = %event.id, reason = %reason, "Webhook ignored");
            }
            ReconcileOutcome::Applied | ReconcileOutcome::Duplicate => {
                tracing::debug!(event_id = %event.id, outcome = ?outcome, "Webhook applied");
            }
        }

        Ok(WebhookAck {
            event_id: event.id,
            event_type: event.event_type,
            outcome,
        })
    }

    async fn dispatch(&self, event: &WebhookEvent) -> Result<ReconcileOutcome, BillingError> {
        match event.event_type.as_str() {
            "payment_intent.created" | "payment_intent.processing" => {
                self.on_payment_intent(event, PaymentStage::Processing).await
            }
            "payment_intent.succeeded" => {
                self.on_payment_intent(event, PaymentStage::Succeeded).await
            }
            "payment_intent.payment_failed" => {
                self.on_payment_intent(event, PaymentStage::Closed(TransactionStatus::Failed))
                    .await
            }
            "payment_intent.canceled" => {
                self.on_payment_intent(event, PaymentStage::Closed(TransactionStatus::Cancelled))
                    .await
            }
            "invoice.payment_succeeded" => {
                let Some(invoice) = decode::<StripeInvoice>(event) else {
                    return Ok(malformed(event));
                };
                self.ledger.reconcile_invoice_paid(&invoice.to_event()).await
            }
            "invoice.payment_failed" => {
                let Some(invoice) = decode::<StripeInvoice>(event) else {
                    return Ok(malformed(event));
                };
                self.ledger
                    .reconcile_invoice_failed(&invoice.to_event())
                    .await
            }
            "customer.subscription.deleted" => {
                let Some(subscription) = decode::<Subscription>(event) else {
                    return Ok(malformed(event));
                };
                self.ledger
                    .reconcile_subscription_deleted(&subscription.id)
                    .await
            }
            other => Ok(ReconcileOutcome::Ignored(format!("unhandled event type {other}"))),
        }
    }

    async fn on_payment_intent(
        &self,
        event: &WebhookEvent,
        stage: PaymentStage,
    ) -> Result<ReconcileOutcome, BillingError> {
        let Some(intent) = decode::<PaymentIntent>(event) else {
            return Ok(malformed(event));
        };
        if intent.is_invoice_payment() {
            return Ok(ReconcileOutcome::Ignored(
                "invoice payments are reconciled from invoice events".into(),
            ));
        }

        let payment = match intent.to_event() {
            Ok(payment) => payment,
            Err(MetadataError::Untagged) => {
                return Ok(ReconcileOutcome::Ignored("payment not created by the ledger".into()));
            }
            Err(e) => {
                tracing::warn!(
                    event_id = %event.id,
                    payment_intent_id = %intent.id,
                    error = %e,
                    "Payment metadata unusable"
                );
                return Ok(ReconcileOutcome::Conflict(e.to_string()));
            }
        };

        match stage {
            PaymentStage::Processing => self.ledger.reconcile_payment_processing(&payment).await,
            PaymentStage::Succeeded => self.ledger.reconcile_payment_succeeded(&payment).await,
            PaymentStage::Closed(status) => {
                self.ledger.reconcile_payment_closed(&payment, status).await
            }
        }
    }
}

fn decode<T: DeserializeOwned>(event: &WebhookEvent) -> Option<T> {
    serde_json::from_value(event.data.object.clone()).ok()
}

fn malformed(event: &WebhookEvent) -> ReconcileOutcome {
    tracing::warn!(event_id = %event.id, event_type = %event.event_type, "Webhook object is malformed");
    ReconcileOutcome::Conflict("malformed event object".into())
}
