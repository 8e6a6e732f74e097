//! PostgreSQL storage implementation.
//!
//! Balance-changing units of work hold `SELECT ... FOR UPDATE` locks on the
//! wallet row, so concurrent writers on the same wallet are serialized by the
//! database. Inserts keyed by `reference` use `ON CONFLICT DO NOTHING` so a
//! duplicate never aborts the surrounding transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgExecutor, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};

use gigwallet_core::{
    Purchase, PurchaseId, PurchaseStatus, SubscriptionId, SubscriptionStatus, TopUpSubscription,
    Transaction, TransactionId, User, UserId, Wallet, WalletId,
};

use crate::error::{Result, StoreError};
use crate::schema::{columns, table};
use crate::{LedgerTx, Store};

/// PostgreSQL-backed ledger store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database at `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection pool cannot be created.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Ledger migrations applied");
        Ok(())
    }

    /// Access the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Row decoding
// ============================================================================

fn parse_text<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: T::Err| StoreError::Serialization(format!("{column}: {e}")))
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        id: UserId::from_uuid(row.try_get("id")?),
        email: row.try_get("email")?,
        stripe_customer_id: row.try_get("stripe_customer_id")?,
    })
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet> {
    Ok(Wallet {
        id: WalletId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        balance_cents: row.try_get("balance")?,
        currency: row.try_get("currency")?,
        is_suspended: row.try_get("is_suspended")?,
        is_deleted: row.try_get("is_deleted")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    Ok(Transaction {
        id: parse_text::<TransactionId>(row, "id")?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        amount_cents: row.try_get("amount")?,
        transaction_type: parse_text(row, "type")?,
        status: parse_text(row, "status")?,
        description: row.try_get("description")?,
        reference: row.try_get("reference")?,
        external_payment_id: row.try_get("stripe_payment_intent_id")?,
        balance_before_cents: row.try_get("wallet_balance_before")?,
        balance_after_cents: row.try_get("wallet_balance_after")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<TopUpSubscription> {
    Ok(TopUpSubscription {
        id: SubscriptionId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        amount_cents: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        stripe_customer_id: row.try_get("stripe_customer_id")?,
        reference: row.try_get("reference")?,
        status: parse_text(row, "status")?,
        next_billing_date: row.try_get("next_billing_date")?,
        external_price_id: row.try_get("stripe_price_id")?,
        external_subscription_id: row.try_get("stripe_subscription_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn purchase_from_row(row: &PgRow) -> Result<Purchase> {
    Ok(Purchase {
        id: PurchaseId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        price_cents: row.try_get("price")?,
        duration_surcharge_cents: row.try_get("duration_surcharge")?,
        status: parse_text(row, "status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

// ============================================================================
// Shared statements
// ============================================================================

fn insert_wallet_sql() -> String {
    format!(
        "INSERT INTO {} (id, user_id, balance, currency) VALUES ($1, $2, 0, $3) \
         ON CONFLICT (user_id) WHERE NOT is_deleted DO NOTHING",
        table::WALLETS
    )
}

async fn insert_wallet<'e, E>(executor: E, user_id: &UserId, currency: &str) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(&insert_wallet_sql())
        .bind(*WalletId::generate().as_uuid())
        .bind(*user_id.as_uuid())
        .bind(currency)
        .execute(executor)
        .await?;
    Ok(())
}

fn select_wallet_sql(for_update: bool) -> String {
    format!(
        "SELECT {} FROM {} WHERE user_id = $1 AND NOT is_deleted{}",
        columns::WALLET,
        table::WALLETS,
        if for_update { " FOR UPDATE" } else { "" }
    )
}

fn select_subscription_by_external_sql() -> String {
    format!(
        "SELECT {} FROM {} WHERE stripe_subscription_id = $1",
        columns::SUBSCRIPTION,
        table::SUBSCRIPTIONS
    )
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn put_user(&self, user: &User) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (id, email, stripe_customer_id) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email, \
             stripe_customer_id = COALESCE(EXCLUDED.stripe_customer_id, {0}.stripe_customer_id)",
            table::USERS
        ))
        .bind(*user.id.as_uuid())
        .bind(&user.email)
        .bind(&user.stripe_customer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        sqlx::query(&format!(
            "SELECT {} FROM {} WHERE id = $1",
            columns::USER,
            table::USERS
        ))
        .bind(*user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(|row| user_from_row(&row))
        .transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        sqlx::query(&format!(
            "SELECT {} FROM {} WHERE lower(email) = lower($1) LIMIT 1",
            columns::USER,
            table::USERS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| user_from_row(&row))
        .transpose()
    }

    async fn set_stripe_customer_id(&self, user_id: &UserId, customer_id: &str) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET stripe_customer_id = $2 WHERE id = $1",
            table::USERS
        ))
        .bind(*user_id.as_uuid())
        .bind(customer_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("user", user_id));
        }
        Ok(())
    }

    async fn get_wallet(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        sqlx::query(&select_wallet_sql(false))
            .bind(*user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| wallet_from_row(&row))
            .transpose()
    }

    async fn ensure_wallet(&self, user_id: &UserId, currency: &str) -> Result<Wallet> {
        insert_wallet(&self.pool, user_id, currency).await?;
        let row = sqlx::query(&select_wallet_sql(false))
            .bind(*user_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        wallet_from_row(&row)
    }

    async fn set_wallet_suspended(
        &self,
        user_id: &UserId,
        currency: &str,
        suspended: bool,
    ) -> Result<Wallet> {
        insert_wallet(&self.pool, user_id, currency).await?;
        let row = sqlx::query(&format!(
            "UPDATE {} SET is_suspended = $2, updated_at = NOW() \
             WHERE user_id = $1 AND NOT is_deleted RETURNING {}",
            table::WALLETS,
            columns::WALLET
        ))
        .bind(*user_id.as_uuid())
        .bind(suspended)
        .fetch_one(&self.pool)
        .await?;
        wallet_from_row(&row)
    }

    async fn get_transaction_by_reference(&self, reference: &str) -> Result<Option<Transaction>> {
        sqlx::query(&format!(
            "SELECT {} FROM {} WHERE reference = $1",
            columns::TRANSACTION,
            table::TRANSACTIONS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| transaction_from_row(&row))
        .transpose()
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        sqlx::query(&format!(
            "SELECT {} FROM {} WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
            columns::TRANSACTION,
            table::TRANSACTIONS
        ))
        .bind(*user_id.as_uuid())
        .bind(to_i64(limit))
        .bind(to_i64(offset))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(transaction_from_row)
        .collect()
    }

    async fn put_purchase(&self, purchase: &Purchase) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO UPDATE SET price = EXCLUDED.price, \
             duration_surcharge = EXCLUDED.duration_surcharge, status = EXCLUDED.status, \
             updated_at = EXCLUDED.updated_at",
            table::PURCHASES,
            columns::PURCHASE
        ))
        .bind(*purchase.id.as_uuid())
        .bind(*purchase.user_id.as_uuid())
        .bind(purchase.price_cents)
        .bind(purchase.duration_surcharge_cents)
        .bind(purchase.status.as_str())
        .bind(purchase.created_at)
        .bind(purchase.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_purchase(&self, purchase_id: &PurchaseId) -> Result<Option<Purchase>> {
        sqlx::query(&format!(
            "SELECT {} FROM {} WHERE id = $1",
            columns::PURCHASE,
            table::PURCHASES
        ))
        .bind(*purchase_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(|row| purchase_from_row(&row))
        .transpose()
    }

    async fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<TopUpSubscription>> {
        sqlx::query(&format!(
            "SELECT {} FROM {} WHERE id = $1",
            columns::SUBSCRIPTION,
            table::SUBSCRIPTIONS
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(|row| subscription_from_row(&row))
        .transpose()
    }

    async fn find_subscription_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<TopUpSubscription>> {
        sqlx::query(&select_subscription_by_external_sql())
            .bind(external_subscription_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| subscription_from_row(&row))
            .transpose()
    }

    async fn list_subscriptions(&self, user_id: &UserId) -> Result<Vec<TopUpSubscription>> {
        sqlx::query(&format!(
            "SELECT {} FROM {} WHERE user_id = $1 ORDER BY created_at DESC",
            columns::SUBSCRIPTION,
            table::SUBSCRIPTIONS
        ))
        .bind(*user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(subscription_from_row)
        .collect()
    }

    async fn list_due_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<TopUpSubscription>> {
        sqlx::query(&format!(
            "SELECT {} FROM {} WHERE status = 'active' AND stripe_subscription_id IS NULL \
             AND next_billing_date <= $1 ORDER BY next_billing_date",
            columns::SUBSCRIPTION,
            table::SUBSCRIPTIONS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(subscription_from_row)
        .collect()
    }

    async fn set_subscription_status(
        &self,
        id: &SubscriptionId,
        status: SubscriptionStatus,
    ) -> Result<TopUpSubscription> {
        let row = sqlx::query(&format!(
            "UPDATE {} SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            table::SUBSCRIPTIONS,
            columns::SUBSCRIPTION
        ))
        .bind(*id.as_uuid())
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("subscription", id))?;
        subscription_from_row(&row)
    }

    async fn resume_subscription(
        &self,
        id: &SubscriptionId,
        now: DateTime<Utc>,
        next: DateTime<Utc>,
    ) -> Result<TopUpSubscription> {
        let row = sqlx::query(&format!(
            "UPDATE {} SET status = 'active', \
             next_billing_date = CASE WHEN next_billing_date < $2 THEN $3 ELSE next_billing_date END, \
             updated_at = NOW() WHERE id = $1 RETURNING {}",
            table::SUBSCRIPTIONS,
            columns::SUBSCRIPTION
        ))
        .bind(*id.as_uuid())
        .bind(now)
        .bind(next)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("subscription", id))?;
        subscription_from_row(&row)
    }

    async fn set_subscription_price(
        &self,
        id: &SubscriptionId,
        amount_cents: i64,
        price_id: &str,
    ) -> Result<TopUpSubscription> {
        let row = sqlx::query(&format!(
            "UPDATE {} SET amount = $2, stripe_price_id = $3, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            table::SUBSCRIPTIONS,
            columns::SUBSCRIPTION
        ))
        .bind(*id.as_uuid())
        .bind(amount_cents)
        .bind(price_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("subscription", id))?;
        subscription_from_row(&row)
    }

    async fn advance_subscription_billing(
        &self,
        id: &SubscriptionId,
        expected: DateTime<Utc>,
        next: DateTime<Utc>,
    ) -> Result<Option<TopUpSubscription>> {
        sqlx::query(&format!(
            "UPDATE {} SET next_billing_date = $3, updated_at = NOW() \
             WHERE id = $1 AND next_billing_date = $2 \
             AND status = 'active' AND stripe_subscription_id IS NULL \
             RETURNING {}",
            table::SUBSCRIPTIONS,
            columns::SUBSCRIPTION
        ))
        .bind(*id.as_uuid())
        .bind(expected)
        .bind(next)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(subscription_from_row)
        .transpose()
    }
}

/// Unit of work over a [`PgStore`] connection.
struct PgLedgerTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_wallet(&mut self, user_id: &UserId, currency: &str) -> Result<Wallet> {
        insert_wallet(&mut *self.tx, user_id, currency).await?;
        let row = sqlx::query(&select_wallet_sql(true))
            .bind(*user_id.as_uuid())
            .fetch_one(&mut *self.tx)
            .await?;
        wallet_from_row(&row)
    }

    async fn set_wallet_balance(&mut self, user_id: &UserId, balance_cents: i64) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET balance = $2, updated_at = NOW() WHERE user_id = $1 AND NOT is_deleted",
            table::WALLETS
        ))
        .bind(*user_id.as_uuid())
        .bind(balance_cents)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("wallet", user_id));
        }
        Ok(())
    }

    async fn lock_purchase(&mut self, purchase_id: &PurchaseId) -> Result<Option<Purchase>> {
        sqlx::query(&format!(
            "SELECT {} FROM {} WHERE id = $1 FOR UPDATE",
            columns::PURCHASE,
            table::PURCHASES
        ))
        .bind(*purchase_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?
        .map(|row| purchase_from_row(&row))
        .transpose()
    }

    async fn set_purchase_status(
        &mut self,
        purchase_id: &PurchaseId,
        status: PurchaseStatus,
    ) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET status = $2, updated_at = NOW() WHERE id = $1",
            table::PURCHASES
        ))
        .bind(*purchase_id.as_uuid())
        .bind(status.as_str())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("purchase", purchase_id));
        }
        Ok(())
    }

    async fn find_transaction(&mut self, reference: &str) -> Result<Option<Transaction>> {
        sqlx::query(&format!(
            "SELECT {} FROM {} WHERE reference = $1 FOR UPDATE",
            columns::TRANSACTION,
            table::TRANSACTIONS
        ))
        .bind(reference)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(|row| transaction_from_row(&row))
        .transpose()
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        let result = sqlx::query(&format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (reference) DO NOTHING",
            table::TRANSACTIONS,
            columns::TRANSACTION
        ))
        .bind(transaction.id.to_string())
        .bind(*transaction.user_id.as_uuid())
        .bind(transaction.amount_cents)
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.status.as_str())
        .bind(&transaction.description)
        .bind(&transaction.reference)
        .bind(&transaction.external_payment_id)
        .bind(transaction.balance_before_cents)
        .bind(transaction.balance_after_cents)
        .bind(&transaction.metadata)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateReference {
                reference: transaction.reference.clone(),
            });
        }
        Ok(())
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET amount = $2, type = $3, status = $4, description = $5, \
             stripe_payment_intent_id = $6, wallet_balance_before = $7, \
             wallet_balance_after = $8, metadata = $9, updated_at = $10 WHERE id = $1",
            table::TRANSACTIONS
        ))
        .bind(transaction.id.to_string())
        .bind(transaction.amount_cents)
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.status.as_str())
        .bind(&transaction.description)
        .bind(&transaction.external_payment_id)
        .bind(transaction.balance_before_cents)
        .bind(transaction.balance_after_cents)
        .bind(&transaction.metadata)
        .bind(transaction.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("transaction", transaction.id));
        }
        Ok(())
    }

    async fn find_subscription(&mut self, reference: &str) -> Result<Option<TopUpSubscription>> {
        sqlx::query(&format!(
            "SELECT {} FROM {} WHERE reference = $1 FOR UPDATE",
            columns::SUBSCRIPTION,
            table::SUBSCRIPTIONS
        ))
        .bind(reference)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(|row| subscription_from_row(&row))
        .transpose()
    }

    async fn find_subscription_by_external_id(
        &mut self,
        external_subscription_id: &str,
    ) -> Result<Option<TopUpSubscription>> {
        sqlx::query(&format!(
            "{} FOR UPDATE",
            select_subscription_by_external_sql()
        ))
        .bind(external_subscription_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(|row| subscription_from_row(&row))
        .transpose()
    }

    async fn insert_subscription(&mut self, subscription: &TopUpSubscription) -> Result<()> {
        let result = sqlx::query(&format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (reference) DO NOTHING",
            table::SUBSCRIPTIONS,
            columns::SUBSCRIPTION
        ))
        .bind(*subscription.id.as_uuid())
        .bind(*subscription.user_id.as_uuid())
        .bind(subscription.amount_cents)
        .bind(&subscription.currency)
        .bind(&subscription.stripe_customer_id)
        .bind(&subscription.reference)
        .bind(subscription.status.as_str())
        .bind(subscription.next_billing_date)
        .bind(&subscription.external_price_id)
        .bind(&subscription.external_subscription_id)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "subscription reference already exists: {}",
                subscription.reference
            )));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
