//! Table and column definitions shared by the SQL backend.

/// Table names.
pub mod table {
    /// Users known to the ledger, keyed by `id`.
    pub const USERS: &str = "users";

    /// One wallet per user (`user_id` unique).
    pub const WALLETS: &str = "wallets";

    /// Transaction log, keyed by ULID `id`; `reference` unique.
    pub const TRANSACTIONS: &str = "transactions";

    /// Recurring top-up subscriptions.
    pub const SUBSCRIPTIONS: &str = "wallet_topup_subscriptions";

    /// Purchasable requests (only the payment columns).
    pub const PURCHASES: &str = "purchases";
}

/// Selected columns, in the order the row decoders expect.
pub mod columns {
    /// `users` columns.
    pub const USER: &str = "id, email, stripe_customer_id";

    /// `wallets` columns.
    pub const WALLET: &str =
        "id, user_id, balance, currency, is_suspended, is_deleted, created_at, updated_at";

    /// `transactions` columns.
    pub const TRANSACTION: &str = "id, user_id, amount, type, status, description, reference, \
         stripe_payment_intent_id, wallet_balance_before, wallet_balance_after, metadata, \
         created_at, updated_at";

    /// `wallet_topup_subscriptions` columns.
    pub const SUBSCRIPTION: &str = "id, user_id, amount, currency, stripe_customer_id, reference, \
         status, next_billing_date, stripe_price_id, stripe_subscription_id, created_at, updated_at";

    /// `purchases` columns.
    pub const PURCHASE: &str =
        "id, user_id, price, duration_surcharge, status, created_at, updated_at";
}
