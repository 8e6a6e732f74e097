//! Common test utilities for gigwallet integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

use gigwallet_core::{
    PaymentMetadata, Purchase, TopUpSubscription, TransactionStatus, User, UserId,
};
use gigwallet_service::auth::JwtClaims;
use gigwallet_service::crypto::{sign_payload, verify_signature};
use gigwallet_service::gateway::{
    GatewayError, GatewaySubscription, Invoice, InvoicePage, OffSessionCharge, PaymentGateway,
    PaymentHandle, PaymentIntentRequest,
};
use gigwallet_service::{
    create_router, AppState, LedgerService, Notifier, ReconcileOutcome, ServiceConfig,
};
use gigwallet_store::{MemoryStore, Store};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const JWT_SECRET: &str = "test-jwt-secret";
pub const ADMIN_KEY: &str = "test-admin-key";

// ============================================================================
// Fake gateway
// ============================================================================

/// A gateway call recorded by [`FakeGateway`].
#[derive(Debug, Clone)]
pub enum GatewayCall {
    CreateCustomer(UserId),
    PaymentIntent(PaymentIntentRequest),
    RecurringPrice { amount_cents: i64 },
    OffSession(OffSessionCharge),
    CancelSubscription(String),
    ReactivateSubscription(String),
    UpdateSubscriptionPrice { subscription_id: String, price_id: String },
    ListInvoices(String),
}

/// Scripted in-process gateway.
#[derive(Default)]
pub struct FakeGateway {
    calls: Mutex<Vec<GatewayCall>>,
    counter: AtomicUsize,
    /// Refuse off-session charges (card declined).
    pub decline_charges: AtomicBool,
    /// Fail every call with a transient error.
    pub unavailable: AtomicBool,
    /// Invoices returned by `list_invoices`.
    pub invoices: Mutex<Vec<Invoice>>,
    /// Milliseconds every creation call takes before answering.
    pub latency_ms: AtomicU64,
}

impl FakeGateway {
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn payment_intents(&self) -> Vec<PaymentIntentRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                GatewayCall::PaymentIntent(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn off_session_charges(&self) -> Vec<OffSessionCharge> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                GatewayCall::OffSession(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    async fn respond_slowly(&self) {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(latency)).await;
        }
    }

    fn record(&self, call: GatewayCall) -> Result<usize, GatewayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Transient("gateway unavailable".into()));
        }
        self.calls.lock().unwrap().push(call);
        Ok(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn subscription(id: &str, cancel_at_period_end: bool) -> GatewaySubscription {
        GatewaySubscription {
            id: id.to_string(),
            status: "active".into(),
            cancel_at_period_end,
            item_id: Some(format!("si_{id}")),
            price_id: None,
            current_period_end: None,
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_customer(&self, user: &User) -> Result<String, GatewayError> {
        self.respond_slowly().await;
        let n = self.record(GatewayCall::CreateCustomer(user.id))?;
        Ok(format!("cus_{n}"))
    }

    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentHandle, GatewayError> {
        self.respond_slowly().await;
        let n = self.record(GatewayCall::PaymentIntent(request.clone()))?;
        Ok(PaymentHandle {
            id: format!("pi_{n}"),
            client_secret: Some(format!("pi_{n}_secret")),
            status: "requires_payment_method".into(),
            amount_cents: request.amount_cents,
        })
    }

    async fn create_recurring_price(
        &self,
        amount_cents: i64,
        _currency: &str,
    ) -> Result<String, GatewayError> {
        self.respond_slowly().await;
        let n = self.record(GatewayCall::RecurringPrice { amount_cents })?;
        Ok(format!("price_{n}"))
    }

    async fn charge_off_session(
        &self,
        charge: &OffSessionCharge,
    ) -> Result<PaymentHandle, GatewayError> {
        self.respond_slowly().await;
        let n = self.record(GatewayCall::OffSession(charge.clone()))?;
        if self.decline_charges.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                message: "Your card was declined.".into(),
                code: Some("card_declined".into()),
            });
        }
        Ok(PaymentHandle {
            id: format!("pi_{n}"),
            client_secret: None,
            status: "processing".into(),
            amount_cents: charge.amount_cents,
        })
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError> {
        Ok(Self::subscription(subscription_id, false))
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError> {
        self.record(GatewayCall::CancelSubscription(subscription_id.into()))?;
        Ok(Self::subscription(subscription_id, true))
    }

    async fn reactivate_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError> {
        self.record(GatewayCall::ReactivateSubscription(subscription_id.into()))?;
        Ok(Self::subscription(subscription_id, false))
    }

    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        price_id: &str,
    ) -> Result<GatewaySubscription, GatewayError> {
        self.record(GatewayCall::UpdateSubscriptionPrice {
            subscription_id: subscription_id.into(),
            price_id: price_id.into(),
        })?;
        Ok(Self::subscription(subscription_id, false))
    }

    async fn list_invoices(
        &self,
        customer_id: &str,
        _limit: u32,
        _starting_after: Option<&str>,
    ) -> Result<InvoicePage, GatewayError> {
        self.record(GatewayCall::ListInvoices(customer_id.into()))?;
        Ok(InvoicePage {
            invoices: self.invoices.lock().unwrap().clone(),
            has_more: false,
        })
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> Result<(), GatewayError> {
        verify_signature(
            WEBHOOK_SECRET,
            payload,
            signature,
            300,
            Utc::now().timestamp(),
        )
    }
}

// ============================================================================
// Recording notifier
// ============================================================================

/// A notification captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub user_id: UserId,
    pub title: String,
    pub message: String,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn titles_for(&self, user_id: &UserId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|n| n.user_id == *user_id)
            .map(|n| n.title)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: &UserId, title: &str, message: &str) {
        self.sent.lock().unwrap().push(Notification {
            user_id: *user_id,
            title: title.to_string(),
            message: message.to_string(),
        });
    }
}

// ============================================================================
// Ledger fixture
// ============================================================================

/// A ledger over the memory store, the fake gateway and the recording notifier.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub state: AppState,
    pub ledger: Arc<LedgerService>,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let state = AppState::new(
            test_config(),
            store.clone(),
            gateway.clone(),
            notifier.clone(),
        );
        let ledger = Arc::clone(&state.ledger);

        Self {
            store,
            gateway,
            notifier,
            state,
            ledger,
        }
    }

    /// Register a user with a billing email.
    pub async fn user(&self) -> UserId {
        let user_id = UserId::generate();
        self.ledger
            .register_user(&user_id, &format!("{user_id}@example.com"))
            .await
            .unwrap();
        user_id
    }

    /// Register a user and fund the wallet.
    pub async fn funded_user(&self, balance_cents: i64) -> UserId {
        let user_id = self.user().await;
        if balance_cents > 0 {
            self.ledger
                .admin_adjust(&user_id, balance_cents, "test funding", "tests")
                .await
                .unwrap();
        }
        user_id
    }

    /// Store an unpaid purchase.
    pub async fn purchase(&self, user_id: UserId, price_cents: i64) -> Purchase {
        let purchase = Purchase::new(user_id, price_cents, 0);
        self.store.put_purchase(&purchase).await.unwrap();
        purchase
    }

    /// An active scheduler-billed subscription, not yet stored.
    pub fn new_subscription(&self, user_id: UserId, amount_cents: i64) -> TopUpSubscription {
        TopUpSubscription::new(
            user_id,
            amount_cents,
            "usd",
            "cus_saved",
            format!("sub_{}", UserId::generate()),
            Utc::now(),
        )
    }

    /// Store `sub` as is.
    pub async fn insert_subscription(&self, sub: TopUpSubscription) -> TopUpSubscription {
        let mut tx = self.store.begin().await.unwrap();
        tx.insert_subscription(&sub).await.unwrap();
        tx.commit().await.unwrap();
        sub
    }

    /// Store an active scheduler-billed subscription.
    pub async fn subscription(&self, user_id: UserId, amount_cents: i64) -> TopUpSubscription {
        let sub = self.new_subscription(user_id, amount_cents);
        self.insert_subscription(sub).await
    }

    /// Store an active subscription that fell due at `due`.
    pub async fn due_subscription(
        &self,
        user_id: UserId,
        amount_cents: i64,
        due: DateTime<Utc>,
    ) -> TopUpSubscription {
        let mut sub = self.new_subscription(user_id, amount_cents);
        sub.next_billing_date = due;
        self.insert_subscription(sub).await
    }

    /// Store an active subscription billed by the gateway as `external_id`.
    pub async fn gateway_subscription(
        &self,
        user_id: UserId,
        amount_cents: i64,
        external_id: &str,
    ) -> TopUpSubscription {
        let mut sub = self.new_subscription(user_id, amount_cents);
        sub.external_subscription_id = Some(external_id.to_string());
        self.insert_subscription(sub).await
    }

    /// Deliver a correctly signed webhook.
    pub async fn deliver(&self, payload: &[u8]) -> ReconcileOutcome {
        self.state
            .webhooks
            .handle(payload, Some(&sign(payload)))
            .await
            .unwrap()
            .outcome
    }

    pub async fn balance(&self, user_id: &UserId) -> i64 {
        self.ledger.get_balance(user_id).await.unwrap().balance_cents
    }

    /// The balance equals the sum of settled rows, and every row is balanced.
    pub async fn assert_consistent(&self, user_id: &UserId) {
        let rows = self.store.list_transactions(user_id, 10_000, 0).await.unwrap();
        let settled: i64 = rows
            .iter()
            .filter(|t| t.status == TransactionStatus::Success)
            .map(|t| t.amount_cents)
            .sum();
        assert_eq!(settled, self.balance(user_id).await, "balance drifted from ledger");
        for row in &rows {
            assert!(row.is_balanced(), "unbalanced row {}", row.reference);
        }
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        listen_addr: "127.0.0.1:0".into(),
        auth_jwt_secret: Some(JWT_SECRET.into()),
        admin_api_key: Some(ADMIN_KEY.into()),
        stripe_api_key: Some("sk_test_fake".into()),
        stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
        ..ServiceConfig::default()
    }
}

// ============================================================================
// Webhook payloads
// ============================================================================

/// A `payment_intent.*` event carrying `metadata`.
pub fn payment_intent_event(
    event_type: &str,
    payment_intent_id: &str,
    amount_cents: i64,
    amount_received_cents: i64,
    metadata: &PaymentMetadata,
) -> Vec<u8> {
    json!({
        "id": format!("evt_{}", UserId::generate()),
        "type": event_type,
        "created": Utc::now().timestamp(),
        "data": {
            "object": {
                "id": payment_intent_id,
                "object": "payment_intent",
                "amount": amount_cents,
                "amount_received": amount_received_cents,
                "currency": "usd",
                "customer": "cus_1",
                "metadata": metadata.to_map(),
            }
        }
    })
    .to_string()
    .into_bytes()
}

/// An `invoice.*` event.
pub fn invoice_event(
    event_type: &str,
    invoice_id: &str,
    email: &str,
    amount_paid_cents: i64,
    subscription_id: &str,
) -> Vec<u8> {
    json!({
        "id": format!("evt_{}", UserId::generate()),
        "type": event_type,
        "data": {
            "object": {
                "id": invoice_id,
                "object": "invoice",
                "customer": "cus_1",
                "customer_email": email,
                "amount_paid": amount_paid_cents,
                "amount_due": 1500,
                "currency": "usd",
                "subscription": subscription_id,
                "payment_intent": format!("pi_{invoice_id}"),
            }
        }
    })
    .to_string()
    .into_bytes()
}

/// A valid `Stripe-Signature` header for `payload`.
pub fn sign(payload: &[u8]) -> String {
    sign_payload(WEBHOOK_SECRET, payload, Utc::now().timestamp()).unwrap()
}

// ============================================================================
// HTTP harness
// ============================================================================

/// Test harness containing everything needed for HTTP tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Ledger collaborators behind the server.
    pub fixture: Fixture,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
}

impl TestHarness {
    pub fn new() -> Self {
        let fixture = Fixture::new();
        let server = TestServer::new(create_router(fixture.state.clone()))
            .expect("Failed to create test server");

        Self {
            server,
            fixture,
            test_user_id: UserId::generate(),
        }
    }

    /// Bearer JWT for the test user, carrying a billing email.
    pub fn user_auth_header(&self) -> String {
        Self::auth_header_for(&self.test_user_id)
    }

    /// Bearer JWT for any user.
    pub fn auth_header_for(user_id: &UserId) -> String {
        let claims = JwtClaims {
            sub: user_id.to_string(),
            exp: Utc::now().timestamp() + 3600,
            aud: Some(json!("gigwallet")),
            email: Some(format!("{user_id}@example.com")),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .unwrap();
        format!("Bearer {token}")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
