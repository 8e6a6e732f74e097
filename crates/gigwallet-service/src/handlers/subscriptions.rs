//! Recurring top-up handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use gigwallet_core::TopUpSubscription;

use super::parse_subscription_id;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// List subscriptions response.
#[derive(Debug, Serialize)]
pub struct ListSubscriptionsResponse {
    /// Subscriptions, newest first.
    pub subscriptions: Vec<TopUpSubscription>,
}

/// List the caller's top-up subscriptions.
pub async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ListSubscriptionsResponse>, ApiError> {
    let subscriptions = state.ledger.list_subscriptions(&auth.user_id).await?;
    Ok(Json(ListSubscriptionsResponse { subscriptions }))
}

/// Cancel a subscription.
pub async fn cancel_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<TopUpSubscription>, ApiError> {
    let id = parse_subscription_id(&id)?;
    let sub = state.ledger.cancel_subscription(&auth.user_id, &id).await?;
    Ok(Json(sub))
}

/// Reactivate a cancelled subscription.
pub async fn reactivate_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<TopUpSubscription>, ApiError> {
    let id = parse_subscription_id(&id)?;
    let sub = state
        .ledger
        .reactivate_subscription(&auth.user_id, &id)
        .await?;
    Ok(Json(sub))
}

/// Subscription update request.
#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    /// New monthly amount in cents.
    pub amount_cents: i64,
}

/// Change the monthly amount of a subscription.
pub async fn update_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateSubscriptionRequest>,
) -> Result<Json<TopUpSubscription>, ApiError> {
    let id = parse_subscription_id(&id)?;
    let sub = state
        .ledger
        .update_subscription_amount(&auth.user_id, &id, body.amount_cents)
        .await?;
    Ok(Json(sub))
}
