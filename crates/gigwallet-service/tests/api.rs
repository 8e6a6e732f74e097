//! HTTP API integration tests.

mod common;

use std::sync::atomic::Ordering;

use axum::http::StatusCode;
use common::{invoice_event, payment_intent_event, sign, TestHarness, ADMIN_KEY};
use serde_json::{json, Value};

use gigwallet_core::{PurchaseId, UserId};
use gigwallet_service::gateway::Invoice;

async fn fund(harness: &TestHarness, user_id: &UserId, amount_cents: i64) {
    harness
        .server
        .post("/v1/admin/wallets/adjust")
        .add_header("x-admin-key", ADMIN_KEY)
        .json(&json!({
            "user_id": user_id.to_string(),
            "amount_cents": amount_cents,
            "reason": "Test funding"
        }))
        .await
        .assert_status_ok();
}

// ============================================================================
// Health and auth
// ============================================================================

#[tokio::test]
async fn health_is_public() {
    let harness = TestHarness::new();

    let response = harness.server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "gigwallet");
}

#[tokio::test]
async fn wallet_requires_auth() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/wallet/balance")
        .await
        .assert_status_unauthorized();

    harness
        .server
        .get("/v1/wallet/balance")
        .add_header("authorization", "Bearer not-a-jwt")
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn admin_endpoint_requires_admin_key() {
    let harness = TestHarness::new();
    let body = json!({
        "user_id": harness.test_user_id.to_string(),
        "amount_cents": 500,
        "reason": "bonus"
    });

    harness
        .server
        .post("/v1/admin/wallets/adjust")
        .json(&body)
        .await
        .assert_status_unauthorized();

    harness
        .server
        .post("/v1/admin/wallets/adjust")
        .add_header("x-admin-key", "wrong")
        .json(&body)
        .await
        .assert_status_unauthorized();
}

// ============================================================================
// Wallet
// ============================================================================

#[tokio::test]
async fn new_wallet_has_zero_balance() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/wallet/balance")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["balance_cents"], 0);
    assert_eq!(body["currency"], "usd");
}

#[tokio::test]
async fn admin_adjustment_shows_in_balance_and_history() {
    let harness = TestHarness::new();
    fund(&harness, &harness.test_user_id, 1234).await;

    let balance: Value = harness
        .server
        .get("/v1/wallet/balance")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(balance["balance_cents"], 1234);
    assert_eq!(balance["balance_formatted"], "$12.34");

    let history: Value = harness
        .server
        .get("/v1/wallet/transactions")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(history["transactions"].as_array().unwrap().len(), 1);
    assert_eq!(history["transactions"][0]["transaction_type"], "wallet_credit");
    assert_eq!(history["transactions"][0]["status"], "success");
    assert_eq!(history["has_more"], false);
}

#[tokio::test]
async fn admin_overdraft_is_bad_request() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/admin/wallets/adjust")
        .add_header("x-admin-key", ADMIN_KEY)
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "amount_cents": -100,
            "reason": "correction"
        }))
        .await;

    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn suspended_wallet_has_nothing_spendable() {
    let harness = TestHarness::new();
    fund(&harness, &harness.test_user_id, 800).await;

    let response = harness
        .server
        .post("/v1/admin/wallets/suspend")
        .add_header("x-admin-key", ADMIN_KEY)
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "suspended": true
        }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["suspended"], true);
    assert_eq!(body["balance_cents"], 800);

    let balance: Value = harness
        .server
        .get("/v1/wallet/balance")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(balance["balance_cents"], 800);
    assert_eq!(balance["spendable_cents"], 0);
}

#[tokio::test]
async fn top_up_returns_client_secret() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/wallet/top-up")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "amount_cents": 2500 }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["amount_cents"], 2500);
    assert_eq!(body["recurring"], false);
    assert!(body["payment"]["client_secret"].is_string());
    assert!(body["reference"].as_str().unwrap().starts_with("topup_"));
}

#[tokio::test]
async fn top_up_below_minimum_is_rejected() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/wallet/top-up")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "amount_cents": 10 }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn gateway_outage_is_service_unavailable() {
    let harness = TestHarness::new();
    harness
        .fixture
        .gateway
        .unavailable
        .store(true, Ordering::SeqCst);

    let response = harness
        .server
        .post("/v1/wallet/top-up")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "amount_cents": 2500 }))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["error"]["details"]["retryable"], true);
}

// ============================================================================
// Purchases
// ============================================================================

#[tokio::test]
async fn funded_purchase_is_paid_from_wallet() {
    let harness = TestHarness::new();
    fund(&harness, &harness.test_user_id, 5000).await;
    let purchase = harness
        .fixture
        .purchase(harness.test_user_id, 2000)
        .await;

    let response = harness
        .server
        .post(&format!("/v1/purchases/{}/charge", purchase.id))
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "paid");
    assert_eq!(body["transaction"]["amount_cents"], -2000);
    assert_eq!(harness.fixture.balance(&harness.test_user_id).await, 3000);
}

#[tokio::test]
async fn unfunded_purchase_requires_card_payment() {
    let harness = TestHarness::new();
    let purchase = harness
        .fixture
        .purchase(harness.test_user_id, 2000)
        .await;

    let response = harness
        .server
        .post(&format!("/v1/purchases/{}/charge", purchase.id))
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "requested_amount_cents": 2500 }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "requires_payment");
    assert_eq!(body["card_amount_cents"], 2500);
    assert_eq!(body["wallet_amount_cents"], 0);
}

#[tokio::test]
async fn unknown_purchase_is_not_found() {
    let harness = TestHarness::new();

    harness
        .server
        .post(&format!("/v1/purchases/{}/charge", PurchaseId::generate()))
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status_not_found();

    harness
        .server
        .post("/v1/purchases/not-a-uuid/charge")
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status_bad_request();
}

// ============================================================================
// Subscriptions and invoices
// ============================================================================

#[tokio::test]
async fn subscription_lifecycle() {
    let harness = TestHarness::new();
    let sub = harness
        .fixture
        .subscription(harness.test_user_id, 1500)
        .await;

    let list: Value = harness
        .server
        .get("/v1/subscriptions")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(list["subscriptions"].as_array().unwrap().len(), 1);

    let updated: Value = harness
        .server
        .patch(&format!("/v1/subscriptions/{}", sub.id))
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "amount_cents": 3000 }))
        .await
        .json();
    assert_eq!(updated["amount_cents"], 3000);

    let cancelled: Value = harness
        .server
        .post(&format!("/v1/subscriptions/{}/cancel", sub.id))
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(cancelled["status"], "cancelled");

    let reactivated: Value = harness
        .server
        .post(&format!("/v1/subscriptions/{}/reactivate", sub.id))
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(reactivated["status"], "active");
}

#[tokio::test]
async fn other_users_subscription_is_not_found() {
    let harness = TestHarness::new();
    let sub = harness.fixture.subscription(UserId::generate(), 1500).await;

    harness
        .server
        .post(&format!("/v1/subscriptions/{}/cancel", sub.id))
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn invoices_come_from_the_gateway_customer() {
    let harness = TestHarness::new();

    // No gateway customer yet: no invoices and no gateway call.
    let empty: Value = harness
        .server
        .get("/v1/invoices")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(empty["invoices"].as_array().unwrap().len(), 0);

    harness.fixture.gateway.invoices.lock().unwrap().push(Invoice {
        id: "in_1".into(),
        amount_paid_cents: 1500,
        amount_due_cents: 1500,
        currency: "usd".into(),
        status: Some("paid".into()),
        subscription_id: Some("sub_ext_1".into()),
        hosted_invoice_url: None,
        created_at: None,
    });
    harness
        .server
        .post("/v1/wallet/top-up")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "amount_cents": 1500, "recurring": true }))
        .await
        .assert_status_ok();

    let page: Value = harness
        .server
        .get("/v1/invoices?limit=5")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(page["invoices"][0]["id"], "in_1");
    assert_eq!(page["has_more"], false);
}

// ============================================================================
// Webhooks
// ============================================================================

#[tokio::test]
async fn signed_webhook_is_applied() {
    let harness = TestHarness::new();
    harness
        .server
        .post("/v1/wallet/top-up")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "amount_cents": 2500 }))
        .await
        .assert_status_ok();
    let meta = harness
        .fixture
        .gateway
        .payment_intents()
        .pop()
        .unwrap()
        .metadata;
    let payload = payment_intent_event("payment_intent.succeeded", "pi_1", 2500, 2500, &meta);

    let response = harness
        .server
        .post("/webhooks/stripe")
        .add_header("stripe-signature", sign(&payload))
        .bytes(payload.clone().into())
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["received"], true);
    assert_eq!(body["outcome"]["outcome"], "applied");
    assert_eq!(harness.fixture.balance(&harness.test_user_id).await, 2500);

    let replay: Value = harness
        .server
        .post("/webhooks/stripe")
        .add_header("stripe-signature", sign(&payload))
        .bytes(payload.into())
        .await
        .json();
    assert_eq!(replay["outcome"]["outcome"], "duplicate");
    assert_eq!(harness.fixture.balance(&harness.test_user_id).await, 2500);
}

#[tokio::test]
async fn unsigned_webhook_is_bad_request() {
    let harness = TestHarness::new();
    let payload = invoice_event("invoice.payment_succeeded", "in_1", "a@b.c", 100, "sub_1");

    harness
        .server
        .post("/webhooks/stripe")
        .bytes(payload.clone().into())
        .await
        .assert_status_bad_request();

    harness
        .server
        .post("/webhooks/stripe")
        .add_header("stripe-signature", "t=1,v1=deadbeef")
        .bytes(payload.into())
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn unprocessable_webhook_asks_for_redelivery() {
    let harness = TestHarness::new();
    let payload = invoice_event(
        "invoice.payment_succeeded",
        "in_1",
        "nobody@example.com",
        1500,
        "sub_1",
    );

    harness
        .server
        .post("/webhooks/stripe")
        .add_header("stripe-signature", sign(&payload))
        .bytes(payload.into())
        .await
        .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
}
