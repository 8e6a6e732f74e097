//! API handlers.

pub mod admin;
pub mod health;
pub mod invoices;
pub mod purchases;
pub mod subscriptions;
pub mod wallet;
pub mod webhooks;

use gigwallet_core::{SubscriptionId, UserId};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Record the billing email carried by the caller's token, if any.
///
/// Card payments need a gateway customer, which needs an email.
async fn register_caller(state: &AppState, auth: &AuthUser) -> Result<(), ApiError> {
    if let Some(email) = &auth.email {
        state.ledger.register_user(&auth.user_id, email).await?;
    }
    Ok(())
}

fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid user ID: {raw}")))
}

fn parse_subscription_id(raw: &str) -> Result<SubscriptionId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid subscription ID: {raw}")))
}
