//! Administrative wallet correction and suspension.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::parse_user_id;
use super::wallet::TransactionResponse;
use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Admin adjustment request.
#[derive(Debug, Deserialize)]
pub struct AdjustWalletRequest {
    /// User whose wallet is adjusted.
    pub user_id: String,
    /// Signed amount in cents (negative debits the wallet).
    pub amount_cents: i64,
    /// Reason recorded on the ledger row.
    pub reason: String,
}

/// Admin adjustment response.
#[derive(Debug, Serialize)]
pub struct AdjustWalletResponse {
    /// The recorded ledger row.
    pub transaction: TransactionResponse,
    /// Balance after the adjustment.
    pub balance_cents: i64,
}

/// Credit or debit a wallet.
pub async fn adjust_wallet(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<AdjustWalletRequest>,
) -> Result<Json<AdjustWalletResponse>, ApiError> {
    let user_id = parse_user_id(&body.user_id)?;

    let entry = state
        .ledger
        .admin_adjust(&user_id, body.amount_cents, &body.reason, &admin.admin_id)
        .await?;

    Ok(Json(AdjustWalletResponse {
        balance_cents: entry.balance_after_cents.unwrap_or_default(),
        transaction: TransactionResponse::from(&entry),
    }))
}

/// Wallet suspension request.
#[derive(Debug, Deserialize)]
pub struct SuspendWalletRequest {
    /// User whose wallet is suspended or released.
    pub user_id: String,
    /// `true` to suspend, `false` to release.
    pub suspended: bool,
}

/// Wallet suspension response.
#[derive(Debug, Serialize)]
pub struct SuspendWalletResponse {
    pub suspended: bool,
    pub balance_cents: i64,
}

/// Suspend or release a wallet.
pub async fn suspend_wallet(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<SuspendWalletRequest>,
) -> Result<Json<SuspendWalletResponse>, ApiError> {
    let user_id = parse_user_id(&body.user_id)?;

    let wallet = state
        .ledger
        .set_wallet_suspended(&user_id, body.suspended, &admin.admin_id)
        .await?;

    Ok(Json(SuspendWalletResponse {
        suspended: wallet.is_suspended,
        balance_cents: wallet.balance_cents,
    }))
}
