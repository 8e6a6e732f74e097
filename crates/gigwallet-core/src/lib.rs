//! Core types for the gigwallet payment backend.
//!
//! This crate provides the foundational types used by the ledger store and
//! the ledger service:
//!
//! - **Identifiers**: `UserId`, `WalletId`, `PurchaseId`, `SubscriptionId`, `TransactionId`
//! - **Ledger**: `Wallet`, `Transaction`, `TransactionType`, `TransactionStatus`
//! - **Billing**: `Purchase`, `TopUpSubscription`
//! - **Funding**: wallet-first funding split and overpayment settlement
//! - **Metadata**: the contract carried on gateway payments back to the ledger
//!
//! # Amounts
//!
//! All amounts are `i64` in the smallest currency unit (cents) so that no
//! floating point ever touches a balance.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod funding;
pub mod ids;
pub mod metadata;
pub mod purchase;
pub mod subscription;
pub mod transaction;
pub mod wallet;

pub use error::{BillingError, Result};
pub use funding::{plan_funding, settle_card_payment, CardSettlement, FundingPlan};
pub use ids::{IdError, PurchaseId, SubscriptionId, TransactionId, UserId, WalletId};
pub use metadata::{MetadataError, PaymentKind, PaymentMetadata, PurchaseIntent};
pub use purchase::{Purchase, PurchaseStatus};
pub use subscription::{add_one_month, SubscriptionStatus, TopUpSubscription};
pub use transaction::{Transaction, TransactionStatus, TransactionType};
pub use wallet::{format_cents, User, Wallet, DEFAULT_CURRENCY, MIN_CHARGE_CENTS};
