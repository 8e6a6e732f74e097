//! Wallet ledger integration tests: funding, top-ups, adjustments.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{payment_intent_event, Fixture, GatewayCall};
use futures::future::join_all;

use gigwallet_core::{
    BillingError, PaymentKind, PurchaseStatus, TransactionStatus, TransactionType, UserId,
};
use gigwallet_service::{LedgerService, PurchaseCharge, ReconcileOutcome};
use gigwallet_store::Store;

// ============================================================================
// Purchases
// ============================================================================

#[tokio::test]
async fn wallet_pays_whole_purchase() {
    let fx = Fixture::new();
    let user = fx.funded_user(3000).await;
    let purchase = fx.purchase(user, 2000).await;

    let charge = fx
        .ledger
        .plan_and_charge_for_purchase(&user, &purchase.id, None)
        .await
        .unwrap();

    let PurchaseCharge::Paid { transaction } = charge else {
        panic!("expected wallet payment, got {charge:?}");
    };
    assert_eq!(transaction.amount_cents, -2000);
    assert_eq!(transaction.transaction_type, TransactionType::TaskPayment);
    assert_eq!(transaction.status, TransactionStatus::Success);
    assert_eq!(fx.balance(&user).await, 1000);

    let stored = fx.store.get_purchase(&purchase.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PurchaseStatus::Progressing);
    assert!(fx.gateway.payment_intents().is_empty());
    assert!(fx
        .notifier
        .titles_for(&user)
        .contains(&"Payment successful".to_string()));
    fx.assert_consistent(&user).await;
}

#[tokio::test]
async fn short_wallet_creates_card_payment_for_remainder() {
    let fx = Fixture::new();
    let user = fx.funded_user(500).await;
    let purchase = fx.purchase(user, 2000).await;

    let charge = fx
        .ledger
        .plan_and_charge_for_purchase(&user, &purchase.id, None)
        .await
        .unwrap();

    let PurchaseCharge::RequiresPayment(card) = charge else {
        panic!("expected card payment, got {charge:?}");
    };
    assert_eq!(card.wallet_amount_cents, 500);
    assert_eq!(card.card_amount_cents, 1500);
    assert_eq!(card.total_cents, 2000);
    assert!(card.payment.client_secret.is_some());

    let intents = fx.gateway.payment_intents();
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].amount_cents, 1500);
    assert_eq!(intents[0].metadata.kind, PaymentKind::Purchase);
    assert_eq!(intents[0].idempotency_key, card.reference);
    let intent = intents[0].metadata.purchase.unwrap();
    assert_eq!(intent.purchase_id, purchase.id);
    assert_eq!(intent.wallet_amount_cents, 500);

    // Nothing moves until the gateway confirms.
    assert_eq!(fx.balance(&user).await, 500);
    let stored = fx.store.get_purchase(&purchase.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PurchaseStatus::Pending);
}

#[tokio::test]
async fn empty_wallet_charges_at_least_the_gateway_minimum() {
    let fx = Fixture::new();
    let user = fx.user().await;
    let purchase = fx.purchase(user, 30).await;

    let charge = fx
        .ledger
        .plan_and_charge_for_purchase(&user, &purchase.id, None)
        .await
        .unwrap();

    let PurchaseCharge::RequiresPayment(card) = charge else {
        panic!("expected card payment");
    };
    assert_eq!(card.card_amount_cents, 50);
}

#[tokio::test]
async fn card_amount_must_cover_remainder() {
    let fx = Fixture::new();
    let user = fx.funded_user(500).await;
    let purchase = fx.purchase(user, 2000).await;

    let err = fx
        .ledger
        .plan_and_charge_for_purchase(&user, &purchase.id, Some(1000))
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::Validation(_)));
    assert!(fx.gateway.payment_intents().is_empty());
}

#[tokio::test]
async fn suspended_wallet_pays_by_card_and_still_receives_credits() {
    let fx = Fixture::new();
    let user = fx.funded_user(3000).await;
    let wallet = fx
        .ledger
        .set_wallet_suspended(&user, true, "tests")
        .await
        .unwrap();
    assert!(wallet.is_suspended);
    let purchase = fx.purchase(user, 2000).await;

    let charge = fx
        .ledger
        .plan_and_charge_for_purchase(&user, &purchase.id, None)
        .await
        .unwrap();

    let PurchaseCharge::RequiresPayment(card) = charge else {
        panic!("expected card payment, got {charge:?}");
    };
    assert_eq!(card.wallet_amount_cents, 0);
    assert_eq!(card.card_amount_cents, 2000);
    assert_eq!(fx.balance(&user).await, 3000);

    fx.ledger.create_top_up_intent(&user, 1500, false).await.unwrap();
    let meta = fx.gateway.payment_intents().pop().unwrap().metadata;
    let event = payment_intent_event("payment_intent.succeeded", "pi_top", 1500, 1500, &meta);
    assert_eq!(fx.deliver(&event).await, ReconcileOutcome::Applied);

    let wallet = fx.ledger.get_balance(&user).await.unwrap();
    assert!(wallet.is_suspended);
    assert_eq!(wallet.balance_cents, 4500);
    assert_eq!(wallet.spendable_cents(), 0);
    fx.assert_consistent(&user).await;
}

#[tokio::test]
async fn someone_elses_purchase_is_not_found() {
    let fx = Fixture::new();
    let owner = fx.funded_user(5000).await;
    let intruder = fx.funded_user(5000).await;
    let purchase = fx.purchase(owner, 2000).await;

    let err = fx
        .ledger
        .plan_and_charge_for_purchase(&intruder, &purchase.id, None)
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::NotFound { .. }));
    assert_eq!(fx.balance(&intruder).await, 5000);
}

#[tokio::test]
async fn paid_purchase_cannot_be_paid_again() {
    let fx = Fixture::new();
    let user = fx.funded_user(5000).await;
    let purchase = fx.purchase(user, 2000).await;

    fx.ledger
        .plan_and_charge_for_purchase(&user, &purchase.id, None)
        .await
        .unwrap();
    let err = fx
        .ledger
        .plan_and_charge_for_purchase(&user, &purchase.id, None)
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::Validation(_)));
    assert_eq!(fx.balance(&user).await, 3000);
}

#[tokio::test]
async fn concurrent_purchases_never_overdraw() {
    let fx = Fixture::new();
    let user = fx.funded_user(1000).await;

    let mut purchases = Vec::new();
    for _ in 0..5 {
        purchases.push(fx.purchase(user, 800).await);
    }

    let results = join_all(
        purchases
            .iter()
            .map(|p| fx.ledger.plan_and_charge_for_purchase(&user, &p.id, None)),
    )
    .await;

    let paid = results
        .iter()
        .filter(|r| matches!(r, Ok(PurchaseCharge::Paid { .. })))
        .count();
    assert_eq!(paid, 1);
    assert_eq!(fx.balance(&user).await, 200);
    fx.assert_consistent(&user).await;
}

// ============================================================================
// Top-ups
// ============================================================================

#[tokio::test]
async fn top_up_below_minimum_is_rejected() {
    let fx = Fixture::new();
    let user = fx.user().await;

    let err = fx
        .ledger
        .create_top_up_intent(&user, 49, false)
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::Validation(_)));
    assert!(fx.gateway.calls().is_empty());
}

#[tokio::test]
async fn top_up_needs_a_known_user() {
    let fx = Fixture::new();

    let err = fx
        .ledger
        .create_top_up_intent(&UserId::generate(), 1000, false)
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::NotFound { .. }));
}

#[tokio::test]
async fn gateway_customer_is_created_once() {
    let fx = Fixture::new();
    let user = fx.user().await;

    fx.ledger.create_top_up_intent(&user, 1000, false).await.unwrap();
    fx.ledger.create_top_up_intent(&user, 2000, false).await.unwrap();

    let customers = fx
        .gateway
        .calls()
        .into_iter()
        .filter(|c| matches!(c, GatewayCall::CreateCustomer(_)))
        .count();
    assert_eq!(customers, 1);
    let intents = fx.gateway.payment_intents();
    assert_eq!(intents[0].customer_id, intents[1].customer_id);
}

#[tokio::test]
async fn recurring_top_up_saves_card_and_tags_subscription() {
    let fx = Fixture::new();
    let user = fx.user().await;

    let intent = fx.ledger.create_top_up_intent(&user, 1500, true).await.unwrap();

    assert!(intent.recurring);
    let sub_ref = intent.subscription_reference.clone().unwrap();
    let request = &fx.gateway.payment_intents()[0];
    assert!(request.save_card);
    assert_eq!(request.metadata.kind, PaymentKind::WalletSubscription);
    assert!(!request.metadata.recurring);
    assert_eq!(request.metadata.subscription_reference.as_deref(), Some(sub_ref.as_str()));
    assert!(request.metadata.price_id.is_some());

    // No ledger row and no subscription before the payment succeeds.
    assert!(fx.store.list_subscriptions(&user).await.unwrap().is_empty());
    assert!(fx
        .store
        .get_transaction_by_reference(&intent.reference)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn unavailable_gateway_is_retryable() {
    let fx = Fixture::new();
    let user = fx.user().await;
    fx.gateway.unavailable.store(true, Ordering::SeqCst);

    let err = fx
        .ledger
        .create_top_up_intent(&user, 1000, false)
        .await
        .unwrap_err();

    assert!(err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn hanging_gateway_times_out_without_ledger_rows() {
    let fx = Fixture::new();
    let user = fx.funded_user(500).await;
    let purchase = fx.purchase(user, 2000).await;
    fx.gateway.latency_ms.store(5_000, Ordering::SeqCst);
    let ledger = LedgerService::new(fx.store.clone(), fx.gateway.clone(), fx.notifier.clone())
        .with_gateway_timeout(Duration::from_millis(50));
    let rows_before = fx.store.list_transactions(&user, 100, 0).await.unwrap().len();

    let err = ledger
        .plan_and_charge_for_purchase(&user, &purchase.id, None)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let err = ledger
        .create_top_up_intent(&user, 1000, false)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Gateway { retryable: true, .. }));

    assert!(fx.gateway.calls().is_empty());
    let rows = fx.store.list_transactions(&user, 100, 0).await.unwrap();
    assert_eq!(rows.len(), rows_before);
    assert_eq!(fx.balance(&user).await, 500);
    let stored = fx.store.get_purchase(&purchase.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PurchaseStatus::Pending);
}

// ============================================================================
// History and adjustments
// ============================================================================

#[tokio::test]
async fn transactions_are_paged_newest_first() {
    let fx = Fixture::new();
    let user = fx.user().await;
    for amount in [100, 200, 300] {
        fx.ledger
            .admin_adjust(&user, amount, "bonus", "tests")
            .await
            .unwrap();
    }

    let page = fx.ledger.list_transactions(&user, 2, 0).await.unwrap();
    assert_eq!(page.transactions.len(), 2);
    assert!(page.has_more);
    assert_eq!(page.transactions[0].amount_cents, 300);

    let rest = fx.ledger.list_transactions(&user, 2, 2).await.unwrap();
    assert_eq!(rest.transactions.len(), 1);
    assert!(!rest.has_more);
}

#[tokio::test]
async fn admin_debit_cannot_go_negative() {
    let fx = Fixture::new();
    let user = fx.funded_user(1000).await;

    let err = fx
        .ledger
        .admin_adjust(&user, -1500, "chargeback", "tests")
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));

    let entry = fx
        .ledger
        .admin_adjust(&user, -400, "chargeback", "tests")
        .await
        .unwrap();
    assert_eq!(entry.transaction_type, TransactionType::Withdrawal);
    assert_eq!(entry.metadata["admin_id"], "tests");
    assert_eq!(fx.balance(&user).await, 600);
    fx.assert_consistent(&user).await;
}

#[tokio::test]
async fn admin_adjustment_needs_amount_and_reason() {
    let fx = Fixture::new();
    let user = fx.user().await;

    assert!(fx.ledger.admin_adjust(&user, 0, "noop", "tests").await.is_err());
    assert!(fx.ledger.admin_adjust(&user, 100, "  ", "tests").await.is_err());
    assert_eq!(fx.balance(&user).await, 0);
}
