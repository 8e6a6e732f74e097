//! User notification collaborator.
//!
//! The ledger calls [`Notifier::notify`] after every terminal reconciliation
//! outcome. Delivery is fire-and-forget: implementations swallow their own
//! failures so a notification can never undo a committed ledger change.
//!
//! Notifications run before the webhook is acknowledged, so implementations
//! must return promptly and hand slow delivery to their own queue. The ledger
//! abandons a notification after [`NOTIFY_TIMEOUT`].

use std::time::Duration;

use async_trait::async_trait;

use gigwallet_core::UserId;

/// Longest the ledger waits for one notification.
pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// Delivers a short message to a user.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a notification. Must not block on slow delivery.
    async fn notify(&self, user_id: &UserId, title: &str, message: &str);
}

/// Notifier that records notifications in the service log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: &UserId, title: &str, message: &str) {
        tracing::info!(user_id = %user_id, title = %title, message = %message, "User notification");
    }
}
