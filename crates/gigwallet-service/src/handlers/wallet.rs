//! Wallet balance, history and top-up handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use gigwallet_core::{format_cents, Transaction};

use super::register_caller;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::ledger::TopUpIntent;
use crate::state::AppState;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Balance in cents.
    pub balance_cents: i64,
    /// Amount available for payments (zero while suspended).
    pub spendable_cents: i64,
    /// Balance formatted as dollars.
    pub balance_formatted: String,
    /// Wallet currency.
    pub currency: String,
}

/// Get the caller's wallet balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let wallet = state.ledger.get_balance(&auth.user_id).await?;

    Ok(Json(BalanceResponse {
        balance_cents: wallet.balance_cents,
        spendable_cents: wallet.spendable_cents(),
        balance_formatted: format_cents(wallet.balance_cents),
        currency: wallet.currency,
    }))
}

/// Transaction list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    /// Maximum number of transactions to return (default: 50, max: 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// A ledger row as shown to its owner.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// Transaction ID.
    pub id: String,
    /// Idempotency reference.
    pub reference: String,
    /// Signed amount in cents.
    pub amount_cents: i64,
    /// Transaction type.
    pub transaction_type: String,
    /// Lifecycle status.
    pub status: String,
    /// Balance after this transaction, once settled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_after_cents: Option<i64>,
    /// Description.
    pub description: String,
    /// Timestamp.
    pub created_at: String,
}

impl From<&Transaction> for TransactionResponse {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.to_string(),
            reference: tx.reference.clone(),
            amount_cents: tx.amount_cents,
            transaction_type: tx.transaction_type.to_string(),
            status: tx.status.to_string(),
            balance_after_cents: tx.balance_after_cents,
            description: tx.description.clone(),
            created_at: tx.created_at.to_rfc3339(),
        }
    }
}

/// List transactions response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Transactions (newest first).
    pub transactions: Vec<TransactionResponse>,
    /// Whether there are more transactions.
    pub has_more: bool,
}

/// List the caller's ledger history.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    let page = state
        .ledger
        .list_transactions(&auth.user_id, query.limit, query.offset)
        .await?;

    Ok(Json(ListTransactionsResponse {
        transactions: page
            .transactions
            .iter()
            .map(TransactionResponse::from)
            .collect(),
        has_more: page.has_more,
    }))
}

/// Top-up request.
#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    /// Amount in cents.
    pub amount_cents: i64,
    /// Repeat the top-up monthly.
    #[serde(default)]
    pub recurring: bool,
}

/// Create a top-up payment for the client to confirm.
pub async fn create_top_up(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<TopUpRequest>,
) -> Result<Json<TopUpIntent>, ApiError> {
    register_caller(&state, &auth).await?;

    let intent = state
        .ledger
        .create_top_up_intent(&auth.user_id, body.amount_cents, body.recurring)
        .await?;

    Ok(Json(intent))
}
