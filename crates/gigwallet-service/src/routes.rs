//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, health, invoices, purchases, subscriptions, wallet, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Wallet (bearer JWT)
/// - `GET /v1/wallet/balance` - Current balance
/// - `GET /v1/wallet/transactions` - Ledger history
/// - `POST /v1/wallet/top-up` - Create a one-off or recurring top-up payment
///
/// ## Purchases (bearer JWT)
/// - `POST /v1/purchases/:id/charge` - Pay for a purchase, wallet first
///
/// ## Subscriptions (bearer JWT)
/// - `GET /v1/subscriptions` - List recurring top-ups
/// - `PATCH /v1/subscriptions/:id` - Change the monthly amount
/// - `POST /v1/subscriptions/:id/cancel` - Cancel
/// - `POST /v1/subscriptions/:id/reactivate` - Reactivate
///
/// ## Invoices (bearer JWT)
/// - `GET /v1/invoices` - Gateway invoice history
///
/// ## Admin (admin key)
/// - `POST /v1/admin/wallets/adjust` - Credit or debit a wallet
/// - `POST /v1/admin/wallets/suspend` - Suspend or release a wallet
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/stripe` - Stripe webhooks
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout = Duration::from_secs(state.config.request_timeout_seconds);

    let state = Arc::new(state);

    let api_routes = Router::new()
        // Wallet
        .route("/wallet/balance", get(wallet::get_balance))
        .route("/wallet/transactions", get(wallet::list_transactions))
        .route("/wallet/top-up", post(wallet::create_top_up))
        // Purchases
        .route("/purchases/:id/charge", post(purchases::charge_purchase))
        // Subscriptions
        .route("/subscriptions", get(subscriptions::list_subscriptions))
        .route(
            "/subscriptions/:id",
            axum::routing::patch(subscriptions::update_subscription),
        )
        .route(
            "/subscriptions/:id/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route(
            "/subscriptions/:id/reactivate",
            post(subscriptions::reactivate_subscription),
        )
        // Invoices
        .route("/invoices", get(invoices::list_invoices))
        // Admin
        .route("/admin/wallets/adjust", post(admin::adjust_wallet))
        .route("/admin/wallets/suspend", post(admin::suspend_wallet))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Webhooks are not rate limited; the gateway controls delivery.
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
