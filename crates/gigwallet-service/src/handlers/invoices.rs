//! Invoice history handler.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::gateway::InvoicePage;
use crate::state::AppState;

/// Invoice list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListInvoicesQuery {
    /// Maximum number of invoices to return (default: 10, max: 100).
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: the last invoice ID of the previous page.
    #[serde(default)]
    pub starting_after: Option<String>,
}

fn default_limit() -> u32 {
    10
}

/// List the caller's gateway invoices.
pub async fn list_invoices(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListInvoicesQuery>,
) -> Result<Json<InvoicePage>, ApiError> {
    let page = state
        .ledger
        .list_invoices(&auth.user_id, query.limit, query.starting_after.as_deref())
        .await?;
    Ok(Json(page))
}
