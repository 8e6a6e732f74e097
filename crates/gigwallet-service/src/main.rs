//! Gigwallet service - wallet ledger and payment reconciliation over HTTP.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gigwallet_service::{
    create_router, AppState, BillingScheduler, LogNotifier, ServiceConfig, StripeClient,
};
use gigwallet_store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gigwallet=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting gigwallet service");

    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        database_configured = %config.database_url.is_some(),
        stripe_configured = %config.stripe_api_key.is_some(),
        webhooks_configured = %config.stripe_webhook_secret.is_some(),
        currency = %config.default_currency,
        billing_schedule = %config.billing_schedule,
        "Service configuration loaded"
    );

    let store: Arc<dyn Store> = if let Some(url) = &config.database_url {
        tracing::info!("Connecting to PostgreSQL");
        let store = PgStore::connect(url, config.database_max_connections).await?;
        store.migrate().await?;
        Arc::new(store)
    } else {
        tracing::warn!("DATABASE_URL not set - using in-memory store, balances are not persisted");
        Arc::new(MemoryStore::new())
    };

    let api_key = config
        .stripe_api_key
        .clone()
        .ok_or("STRIPE_API_KEY is required")?;
    if config.stripe_webhook_secret.is_none() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET not set - all webhooks will be rejected");
    }
    let gateway = StripeClient::new(
        api_key,
        config.stripe_webhook_secret.clone(),
        config.gateway_timeout(),
    )?
    .with_base_url(config.stripe_api_base.clone())
    .with_webhook_tolerance(config.webhook_tolerance_seconds);

    let state = AppState::new(
        config.clone(),
        store,
        Arc::new(gateway),
        Arc::new(LogNotifier),
    );

    let scheduler = Arc::new(BillingScheduler::new(Arc::clone(&state.ledger)));
    let _runner = scheduler.start(&config.billing_schedule).await?;

    let app = create_router(state);

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
