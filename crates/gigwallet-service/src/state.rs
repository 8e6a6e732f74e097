//! Application state.

use std::sync::Arc;

use gigwallet_store::Store;

use crate::config::ServiceConfig;
use crate::gateway::PaymentGateway;
use crate::ledger::LedgerService;
use crate::notify::Notifier;
use crate::webhook::WebhookRouter;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: ServiceConfig,

    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// The wallet ledger.
    pub ledger: Arc<LedgerService>,

    /// Gateway webhook router.
    pub webhooks: Arc<WebhookRouter>,
}

impl AppState {
    /// Wire the ledger and webhook router over the given collaborators.
    #[must_use]
    pub fn new(
        config: ServiceConfig,
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let ledger = Arc::new(
            LedgerService::new(Arc::clone(&store), Arc::clone(&gateway), notifier)
                .with_currency(config.default_currency.clone())
                .with_gateway_timeout(config.gateway_timeout()),
        );
        let webhooks = Arc::new(WebhookRouter::new(gateway, Arc::clone(&ledger)));

        Self {
            config,
            store,
            ledger,
            webhooks,
        }
    }
}
