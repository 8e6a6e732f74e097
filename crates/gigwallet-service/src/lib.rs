//! Gigwallet HTTP service.
//!
//! This crate wires the wallet ledger to the outside world:
//!
//! - [`ledger::LedgerService`] - the only writer of wallet balances
//! - [`webhook::WebhookRouter`] - verifies and applies gateway events
//! - [`scheduler::BillingScheduler`] - monthly recurring top-up charges
//! - [`gateway::StripeClient`] - the Stripe implementation of [`gateway::PaymentGateway`]
//! - the axum router in [`routes`]
//!
//! # Authentication
//!
//! 1. **Bearer JWTs** (HS256) for end users
//! 2. **Admin API key** for wallet adjustments
//!
//! Webhooks authenticate with the gateway's signature header.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod ledger;
pub mod notify;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod webhook;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use gateway::{GatewayError, PaymentGateway, StripeClient};
pub use ledger::{LedgerService, PurchaseCharge, ReconcileOutcome};
pub use notify::{LogNotifier, Notifier};
pub use routes::create_router;
pub use scheduler::{BillingScheduler, SweepReport};
pub use state::AppState;
pub use webhook::{WebhookAck, WebhookError, WebhookRouter};
