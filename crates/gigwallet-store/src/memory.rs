//! In-memory storage implementation.
//!
//! A [`MemoryStore`] holds every table behind one async mutex. A [`LedgerTx`]
//! keeps the mutex for its whole lifetime and works on a staged copy that
//! replaces the live state on commit, so units of work are fully serialized.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use gigwallet_core::{
    Purchase, PurchaseId, PurchaseStatus, SubscriptionId, SubscriptionStatus, TopUpSubscription,
    Transaction, User, UserId, Wallet,
};

use crate::error::{Result, StoreError};
use crate::{LedgerTx, Store};

#[derive(Debug, Clone, Default)]
struct State {
    users: HashMap<UserId, User>,
    wallets: HashMap<UserId, Wallet>,
    /// Insertion order.
    transactions: Vec<Transaction>,
    /// Insertion order.
    subscriptions: Vec<TopUpSubscription>,
    purchases: HashMap<PurchaseId, Purchase>,
}

impl State {
    fn live_wallet(&self, user_id: &UserId) -> Option<&Wallet> {
        self.wallets.get(user_id).filter(|w| !w.is_deleted)
    }

    fn subscription_mut(&mut self, id: &SubscriptionId) -> Result<&mut TopUpSubscription> {
        self.subscriptions
            .iter_mut()
            .find(|s| s.id == *id)
            .ok_or_else(|| StoreError::not_found("subscription", id))
    }

    fn wallet_or_create(&mut self, user_id: &UserId, currency: &str) -> &mut Wallet {
        let stale = self.wallets.get(user_id).is_some_and(|w| w.is_deleted);
        if stale {
            self.wallets.remove(user_id);
        }
        self.wallets
            .entry(*user_id)
            .or_insert_with(|| Wallet::new(*user_id, currency))
    }

    fn transaction_by_reference(&self, reference: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.reference == reference)
    }

    fn subscription_by_external_id(&self, external_id: &str) -> Option<&TopUpSubscription> {
        self.subscriptions
            .iter()
            .find(|s| s.external_subscription_id.as_deref() == Some(external_id))
    }
}

/// In-memory ledger store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn put_user(&self, user: &User) -> Result<()> {
        let mut state = self.state.lock().await;
        if state
            .users
            .values()
            .any(|u| u.id != user.id && u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(StoreError::Conflict(format!(
                "email {} belongs to another user",
                user.email
            )));
        }
        let mut user = user.clone();
        if user.stripe_customer_id.is_none() {
            user.stripe_customer_id = state
                .users
                .get(&user.id)
                .and_then(|u| u.stripe_customer_id.clone());
        }
        state.users.insert(user.id, user);
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        Ok(self.state.lock().await.users.get(user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .state
            .lock()
            .await
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn set_stripe_customer_id(&self, user_id: &UserId, customer_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::not_found("user", user_id))?;
        user.stripe_customer_id = Some(customer_id.to_string());
        Ok(())
    }

    async fn get_wallet(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        Ok(self.state.lock().await.live_wallet(user_id).cloned())
    }

    async fn ensure_wallet(&self, user_id: &UserId, currency: &str) -> Result<Wallet> {
        let mut state = self.state.lock().await;
        Ok(state.wallet_or_create(user_id, currency).clone())
    }

    async fn set_wallet_suspended(
        &self,
        user_id: &UserId,
        currency: &str,
        suspended: bool,
    ) -> Result<Wallet> {
        let mut state = self.state.lock().await;
        let wallet = state.wallet_or_create(user_id, currency);
        wallet.is_suspended = suspended;
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }

    async fn get_transaction_by_reference(&self, reference: &str) -> Result<Option<Transaction>> {
        Ok(self
            .state
            .lock()
            .await
            .transaction_by_reference(reference)
            .cloned())
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        Ok(self
            .state
            .lock()
            .await
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == *user_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn put_purchase(&self, purchase: &Purchase) -> Result<()> {
        self.state
            .lock()
            .await
            .purchases
            .insert(purchase.id, purchase.clone());
        Ok(())
    }

    async fn get_purchase(&self, purchase_id: &PurchaseId) -> Result<Option<Purchase>> {
        Ok(self.state.lock().await.purchases.get(purchase_id).cloned())
    }

    async fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<TopUpSubscription>> {
        Ok(self
            .state
            .lock()
            .await
            .subscriptions
            .iter()
            .find(|s| s.id == *id)
            .cloned())
    }

    async fn find_subscription_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<TopUpSubscription>> {
        Ok(self
            .state
            .lock()
            .await
            .subscription_by_external_id(external_subscription_id)
            .cloned())
    }

    async fn list_subscriptions(&self, user_id: &UserId) -> Result<Vec<TopUpSubscription>> {
        Ok(self
            .state
            .lock()
            .await
            .subscriptions
            .iter()
            .rev()
            .filter(|s| s.user_id == *user_id)
            .cloned()
            .collect())
    }

    async fn list_due_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<TopUpSubscription>> {
        let mut due: Vec<_> = self
            .state
            .lock()
            .await
            .subscriptions
            .iter()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_billing_date);
        Ok(due)
    }

    async fn set_subscription_status(
        &self,
        id: &SubscriptionId,
        status: SubscriptionStatus,
    ) -> Result<TopUpSubscription> {
        let mut state = self.state.lock().await;
        let sub = state.subscription_mut(id)?;
        sub.status = status;
        sub.updated_at = Utc::now();
        Ok(sub.clone())
    }

    async fn resume_subscription(
        &self,
        id: &SubscriptionId,
        now: DateTime<Utc>,
        next: DateTime<Utc>,
    ) -> Result<TopUpSubscription> {
        let mut state = self.state.lock().await;
        let sub = state.subscription_mut(id)?;
        sub.status = SubscriptionStatus::Active;
        if sub.next_billing_date < now {
            sub.next_billing_date = next;
        }
        sub.updated_at = Utc::now();
        Ok(sub.clone())
    }

    async fn set_subscription_price(
        &self,
        id: &SubscriptionId,
        amount_cents: i64,
        price_id: &str,
    ) -> Result<TopUpSubscription> {
        let mut state = self.state.lock().await;
        let sub = state.subscription_mut(id)?;
        sub.amount_cents = amount_cents;
        sub.external_price_id = Some(price_id.to_string());
        sub.updated_at = Utc::now();
        Ok(sub.clone())
    }

    async fn advance_subscription_billing(
        &self,
        id: &SubscriptionId,
        expected: DateTime<Utc>,
        next: DateTime<Utc>,
    ) -> Result<Option<TopUpSubscription>> {
        let mut state = self.state.lock().await;
        let Some(sub) = state
            .subscriptions
            .iter_mut()
            .find(|s| s.id == *id && s.next_billing_date == expected && s.is_due(expected))
        else {
            return Ok(None);
        };
        sub.next_billing_date = next;
        sub.updated_at = Utc::now();
        Ok(Some(sub.clone()))
    }
}

/// Unit of work over a [`MemoryStore`].
struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    staged: State,
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_wallet(&mut self, user_id: &UserId, currency: &str) -> Result<Wallet> {
        Ok(self.staged.wallet_or_create(user_id, currency).clone())
    }

    async fn set_wallet_balance(&mut self, user_id: &UserId, balance_cents: i64) -> Result<()> {
        let wallet = self
            .staged
            .wallets
            .get_mut(user_id)
            .filter(|w| !w.is_deleted)
            .ok_or_else(|| StoreError::not_found("wallet", user_id))?;
        wallet.balance_cents = balance_cents;
        wallet.updated_at = Utc::now();
        Ok(())
    }

    async fn lock_purchase(&mut self, purchase_id: &PurchaseId) -> Result<Option<Purchase>> {
        Ok(self.staged.purchases.get(purchase_id).cloned())
    }

    async fn set_purchase_status(
        &mut self,
        purchase_id: &PurchaseId,
        status: PurchaseStatus,
    ) -> Result<()> {
        let purchase = self
            .staged
            .purchases
            .get_mut(purchase_id)
            .ok_or_else(|| StoreError::not_found("purchase", purchase_id))?;
        purchase.status = status;
        purchase.updated_at = Utc::now();
        Ok(())
    }

    async fn find_transaction(&mut self, reference: &str) -> Result<Option<Transaction>> {
        Ok(self.staged.transaction_by_reference(reference).cloned())
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        if self
            .staged
            .transaction_by_reference(&transaction.reference)
            .is_some()
        {
            return Err(StoreError::DuplicateReference {
                reference: transaction.reference.clone(),
            });
        }
        self.staged.transactions.push(transaction.clone());
        Ok(())
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        let slot = self
            .staged
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction.id)
            .ok_or_else(|| StoreError::not_found("transaction", transaction.id))?;
        *slot = transaction.clone();
        Ok(())
    }

    async fn find_subscription(&mut self, reference: &str) -> Result<Option<TopUpSubscription>> {
        Ok(self
            .staged
            .subscriptions
            .iter()
            .find(|s| s.reference == reference)
            .cloned())
    }

    async fn find_subscription_by_external_id(
        &mut self,
        external_subscription_id: &str,
    ) -> Result<Option<TopUpSubscription>> {
        Ok(self
            .staged
            .subscription_by_external_id(external_subscription_id)
            .cloned())
    }

    async fn insert_subscription(&mut self, subscription: &TopUpSubscription) -> Result<()> {
        if self
            .staged
            .subscriptions
            .iter()
            .any(|s| s.reference == subscription.reference)
        {
            return Err(StoreError::Conflict(format!(
                "subscription reference already exists: {}",
                subscription.reference
            )));
        }
        self.staged.subscriptions.push(subscription.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
