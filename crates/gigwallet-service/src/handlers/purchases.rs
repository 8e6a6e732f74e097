//! Purchase payment handler.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use gigwallet_core::PurchaseId;

use super::register_caller;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::ledger::PurchaseCharge;
use crate::state::AppState;

/// Purchase charge request.
#[derive(Debug, Default, Deserialize)]
pub struct ChargePurchaseRequest {
    /// Card amount the client wants to pay; defaults to what the wallet
    /// leaves open.
    #[serde(default)]
    pub requested_amount_cents: Option<i64>,
}

/// Pay for a purchase, wallet first.
pub async fn charge_purchase(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(purchase_id): Path<String>,
    body: Option<Json<ChargePurchaseRequest>>,
) -> Result<Json<PurchaseCharge>, ApiError> {
    let purchase_id: PurchaseId = purchase_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid purchase ID: {purchase_id}")))?;
    let body = body.map(|Json(body)| body).unwrap_or_default();

    register_caller(&state, &auth).await?;

    let charge = state
        .ledger
        .plan_and_charge_for_purchase(&auth.user_id, &purchase_id, body.requested_amount_cents)
        .await?;

    Ok(Json(charge))
}
