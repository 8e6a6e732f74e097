//! Ledger storage for gigwallet.
//!
//! This crate owns the `wallets`, `transactions`, `wallet_topup_subscriptions`
//! and `users` tables (plus the payment columns of `purchases`).
//!
//! # Architecture
//!
//! - [`Store`] exposes plain reads and single-row writes.
//! - [`LedgerTx`] is a unit of work obtained from [`Store::begin`]. Every
//!   balance change goes through a `LedgerTx`: the wallet row is locked with
//!   [`LedgerTx::lock_wallet`], the balance and the transaction log are
//!   written, and both become visible together on [`LedgerTx::commit`].
//!   Dropping a `LedgerTx` without committing rolls it back.
//!
//! Two backends are provided: [`PgStore`] (PostgreSQL, row locks via
//! `SELECT ... FOR UPDATE`) and [`MemoryStore`] (single writer, used by tests
//! and local development).
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> gigwallet_store::Result<()> {
//! use gigwallet_core::{Transaction, TransactionType, UserId};
//! use gigwallet_store::{MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let user_id = UserId::generate();
//!
//! let mut tx = store.begin().await?;
//! let wallet = tx.lock_wallet(&user_id, "usd").await?;
//! let entry = Transaction::settled(
//!     user_id,
//!     TransactionType::WalletCredit,
//!     500,
//!     wallet.balance_cents,
//!     "credit-1",
//!     "Welcome credit",
//! );
//! tx.set_wallet_balance(&user_id, wallet.balance_cents + 500).await?;
//! tx.insert_transaction(&entry).await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gigwallet_core::{
    Purchase, PurchaseId, PurchaseStatus, SubscriptionId, SubscriptionStatus, TopUpSubscription,
    Transaction, User, UserId, Wallet,
};

/// The storage trait defining all ledger reads and non-balance writes.
#[async_trait]
pub trait Store: Send + Sync {
    /// Start a unit of work.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot open a transaction.
    async fn begin(&self) -> Result<Box<dyn LedgerTx>>;

    // =========================================================================
    // Users
    // =========================================================================

    /// Insert or update a user record.
    ///
    /// Emails are unique across users, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if another user holds the email.
    async fn put_user(&self, user: &User) -> Result<()>;

    /// Get a user by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>>;

    /// Find a user by billing email (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Memoize the gateway customer ID on the user row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user doesn't exist.
    async fn set_stripe_customer_id(&self, user_id: &UserId, customer_id: &str) -> Result<()>;

    // =========================================================================
    // Wallets & transactions (read side)
    // =========================================================================

    /// Get the wallet of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_wallet(&self, user_id: &UserId) -> Result<Option<Wallet>>;

    /// Get the wallet of a user, creating a zero-balance wallet if absent.
    ///
    /// Concurrent calls return the same wallet.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn ensure_wallet(&self, user_id: &UserId, currency: &str) -> Result<Wallet>;

    /// Suspend or release the wallet of a user, creating it if absent.
    ///
    /// The balance is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn set_wallet_suspended(
        &self,
        user_id: &UserId,
        currency: &str,
        suspended: bool,
    ) -> Result<Wallet>;

    /// Get a transaction by its reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_transaction_by_reference(&self, reference: &str) -> Result<Option<Transaction>>;

    /// List transactions for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>>;

    // =========================================================================
    // Purchases
    // =========================================================================

    /// Insert or update a purchase record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_purchase(&self, purchase: &Purchase) -> Result<()>;

    /// Get a purchase by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_purchase(&self, purchase_id: &PurchaseId) -> Result<Option<Purchase>>;

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Get a subscription by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<TopUpSubscription>>;

    /// Find the subscription mirroring a gateway-managed subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_subscription_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<TopUpSubscription>>;

    /// List a user's subscriptions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_subscriptions(&self, user_id: &UserId) -> Result<Vec<TopUpSubscription>>;

    /// Active, scheduler-billed subscriptions whose next billing date is at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_due_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<TopUpSubscription>>;

    /// Set the status of a subscription. The billing date is left alone.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the subscription doesn't exist.
    async fn set_subscription_status(
        &self,
        id: &SubscriptionId,
        status: SubscriptionStatus,
    ) -> Result<TopUpSubscription>;

    /// Mark a subscription active again. A billing date before `now` moves
    /// to `next`; a future one is kept.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the subscription doesn't exist.
    async fn resume_subscription(
        &self,
        id: &SubscriptionId,
        now: DateTime<Utc>,
        next: DateTime<Utc>,
    ) -> Result<TopUpSubscription>;

    /// Set the monthly amount and gateway price of a subscription. Status and
    /// billing date are left alone.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the subscription doesn't exist.
    async fn set_subscription_price(
        &self,
        id: &SubscriptionId,
        amount_cents: i64,
        price_id: &str,
    ) -> Result<TopUpSubscription>;

    /// Claim the billing cycle due at `expected` by moving the date to `next`.
    ///
    /// Only an active, scheduler-billed subscription still due at `expected`
    /// is claimed. Returns the claimed row, or `None` when another sweep got
    /// there first or the subscription was cancelled meanwhile.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn advance_subscription_billing(
        &self,
        id: &SubscriptionId,
        expected: DateTime<Utc>,
        next: DateTime<Utc>,
    ) -> Result<Option<TopUpSubscription>>;
}

/// A storage transaction over the ledger tables.
///
/// Reads return the state as seen by this unit of work. Writes become visible
/// to other readers only after [`LedgerTx::commit`].
#[async_trait]
pub trait LedgerTx: Send {
    /// Lock the user's wallet row for the rest of the transaction, creating a
    /// zero-balance wallet first if the user has none.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn lock_wallet(&mut self, user_id: &UserId, currency: &str) -> Result<Wallet>;

    /// Set the balance of a wallet previously locked with [`LedgerTx::lock_wallet`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the wallet doesn't exist.
    async fn set_wallet_balance(&mut self, user_id: &UserId, balance_cents: i64) -> Result<()>;

    /// Lock a purchase row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn lock_purchase(&mut self, purchase_id: &PurchaseId) -> Result<Option<Purchase>>;

    /// Set the status of a purchase.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the purchase doesn't exist.
    async fn set_purchase_status(
        &mut self,
        purchase_id: &PurchaseId,
        status: PurchaseStatus,
    ) -> Result<()>;

    /// Find a transaction by reference, locking it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_transaction(&mut self, reference: &str) -> Result<Option<Transaction>>;

    /// Insert a transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateReference` if the reference is taken.
    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<()>;

    /// Overwrite a transaction (matched by ID).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the transaction doesn't exist.
    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()>;

    /// Find a subscription by its reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_subscription(&mut self, reference: &str) -> Result<Option<TopUpSubscription>>;

    /// Find the subscription mirroring a gateway-managed subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_subscription_by_external_id(
        &mut self,
        external_subscription_id: &str,
    ) -> Result<Option<TopUpSubscription>>;

    /// Insert a subscription.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the reference is taken.
    async fn insert_subscription(&mut self, subscription: &TopUpSubscription) -> Result<()>;

    /// Commit every write of this unit of work.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing is applied in that case.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write of this unit of work.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to roll back.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
