//! Stripe webhook handler.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::ledger::ReconcileOutcome;
use crate::state::AppState;
use crate::webhook::WebhookError;

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
    /// What the ledger did with it.
    pub outcome: ReconcileOutcome,
}

/// Handle Stripe webhooks.
///
/// The body is taken as raw bytes so the signature is checked against
/// exactly what was sent.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    match state.webhooks.handle(&body, signature).await {
        Ok(ack) => Ok(Json(WebhookResponse {
            received: true,
            outcome: ack.outcome,
        })),
        Err(WebhookError::Rejected(reason)) => Err(ApiError::BadRequest(reason)),
        Err(WebhookError::Failed(e)) => Err(ApiError::Internal(e.to_string())),
    }
}
