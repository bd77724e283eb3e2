mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use tower::ServiceExt;
use uuid::Uuid;

use vendibook_backend::entities::prelude::*;
use vendibook_backend::entities::{sale_transactions, transaction_events};
use vendibook_backend::services::escrow::{self, PayoutOutcome};

use crate::common::{
    build_test_app, insert_transaction, link_payout_account, TestApp, ADMIN_TOKEN, BUYER_TOKEN,
    SELLER_TOKEN, STRANGER_TOKEN,
};

async fn post_json(app: &TestApp, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn get_json(app: &TestApp, uri: &str, token: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn confirm(app: &TestApp, token: &str, tx: Uuid, role: &str) -> (StatusCode, Value) {
    post_json(
        app,
        "/api/transactions/confirm",
        Some(token),
        json!({ "transaction_id": tx, "role": role }),
    )
    .await
}

async fn fetch_row(db: &DatabaseConnection, id: Uuid) -> sale_transactions::Model {
    SaleTransactions::find_by_id(id)
        .one(db)
        .await
        .unwrap()
        .expect("transaction row missing")
}

async fn event_kinds(db: &DatabaseConnection, id: Uuid) -> Vec<String> {
    TransactionEvents::find()
        .filter(transaction_events::Column::TransactionId.eq(id))
        .all(db)
        .await
        .unwrap()
        .into_iter()
        .map(|event| event.kind)
        .collect()
}

#[tokio::test]
async fn confirm_requires_a_bearer_token() {
    let app = build_test_app().await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "paid").await;

    let (status, body) = post_json(
        &app,
        "/api/transactions/confirm",
        None,
        json!({ "transaction_id": tx, "role": "buyer" }),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("authorization"));
}

#[tokio::test]
async fn confirm_unknown_transaction_is_not_found() {
    let app = build_test_app().await;

    let (status, _) = confirm(&app, BUYER_TOKEN, Uuid::new_v4(), "buyer").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn confirm_as_the_wrong_party_is_forbidden() {
    let app = build_test_app().await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "paid").await;

    // The seller cannot confirm on the buyer's behalf
    let (status, _) = confirm(&app, SELLER_TOKEN, tx, "buyer").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let row = fetch_row(&app.db, tx).await;
    assert_eq!(row.status, "paid");
}

#[tokio::test]
async fn buyer_confirmation_records_timestamp_and_waits_for_seller() {
    let app = build_test_app().await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "paid").await;

    let (status, body) = confirm(&app, BUYER_TOKEN, tx, "buyer").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["status"], "buyer_confirmed");
    assert!(body["message"].as_str().unwrap().contains("seller"));

    let row = fetch_row(&app.db, tx).await;
    assert_eq!(row.status, "buyer_confirmed");
    assert!(row.buyer_confirmed_at.is_some());
    assert!(row.seller_confirmed_at.is_none());
    assert!(row.transfer_id.is_none());
}

#[tokio::test]
async fn dual_confirmation_completes_and_pays_the_seller() {
    let app = build_test_app().await;
    link_payout_account(&app.db, app.seller).await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "paid").await;

    let (status, _) = confirm(&app, BUYER_TOKEN, tx, "buyer").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = confirm(&app, SELLER_TOKEN, tx, "seller").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert!(body["message"].as_str().unwrap().contains("Payout has been sent"));

    let row = fetch_row(&app.db, tx).await;
    assert_eq!(row.status, "completed");
    assert!(row.buyer_confirmed_at.is_some());
    assert!(row.seller_confirmed_at.is_some());
    assert!(row.transfer_id.is_some());
    assert!(row.payout_completed_at.is_some());

    // Transfer was requested exactly once, with the deterministic key
    let keys = app.payments.transfer_keys.lock().unwrap().clone();
    assert_eq!(keys, vec![format!("payout-{}", tx)]);

    let kinds = event_kinds(&app.db, tx).await;
    assert!(kinds.contains(&"buyer_confirmed".to_string()));
    assert!(kinds.contains(&"seller_confirmed".to_string()));
    assert!(kinds.contains(&"transaction_completed".to_string()));
    assert!(kinds.contains(&"payout_settled".to_string()));
}

#[tokio::test]
async fn confirming_twice_as_the_same_role_is_rejected_without_mutation() {
    let app = build_test_app().await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "paid").await;

    let (status, _) = confirm(&app, BUYER_TOKEN, tx, "buyer").await;
    assert_eq!(status, StatusCode::OK);
    let first = fetch_row(&app.db, tx).await;

    let (status, body) = confirm(&app, BUYER_TOKEN, tx, "buyer").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already"));

    let second = fetch_row(&app.db, tx).await;
    assert_eq!(first.buyer_confirmed_at, second.buyer_confirmed_at);
    assert_eq!(second.status, "buyer_confirmed");
}

#[tokio::test]
async fn confirm_on_a_pending_transaction_is_an_invalid_state() {
    let app = build_test_app().await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "pending").await;

    let (status, _) = confirm(&app, BUYER_TOKEN, tx, "buyer").await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn payout_is_deferred_when_the_seller_has_no_account() {
    let app = build_test_app().await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "paid").await;

    confirm(&app, BUYER_TOKEN, tx, "buyer").await;
    let (status, body) = confirm(&app, SELLER_TOKEN, tx, "seller").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert!(body["message"].as_str().unwrap().contains("payout account"));

    let row = fetch_row(&app.db, tx).await;
    assert_eq!(row.status, "completed");
    assert!(row.transfer_id.is_none());
    assert!(row.operational_note.unwrap().contains("no payout account"));
    assert_eq!(app.payments.transfer_count(), 0);

    let kinds = event_kinds(&app.db, tx).await;
    assert!(kinds.contains(&"payout_deferred".to_string()));
}

#[tokio::test]
async fn payout_is_deferred_when_platform_balance_is_insufficient() {
    let app = build_test_app().await;
    link_payout_account(&app.db, app.seller).await;
    app.payments.balance.store(500, Ordering::SeqCst);
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "paid").await;

    confirm(&app, BUYER_TOKEN, tx, "buyer").await;
    let (status, body) = confirm(&app, SELLER_TOKEN, tx, "seller").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert!(body["message"].as_str().unwrap().contains("retried"));

    let row = fetch_row(&app.db, tx).await;
    assert!(row.transfer_id.is_none());
    assert!(row.operational_note.unwrap().contains("insufficient"));
    assert_eq!(app.payments.transfer_count(), 0);
}

#[tokio::test]
async fn transfer_failure_never_rolls_back_the_completed_agreement() {
    let app = build_test_app().await;
    link_payout_account(&app.db, app.seller).await;
    app.payments.fail_transfers.store(true, Ordering::SeqCst);
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "paid").await;

    confirm(&app, BUYER_TOKEN, tx, "buyer").await;
    let (status, body) = confirm(&app, SELLER_TOKEN, tx, "seller").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");

    let row = fetch_row(&app.db, tx).await;
    assert_eq!(row.status, "completed");
    assert!(row.transfer_id.is_none());
    assert!(row.operational_note.unwrap().contains("Payout failed"));

    let kinds = event_kinds(&app.db, tx).await;
    assert!(kinds.contains(&"payout_failed".to_string()));
}

#[tokio::test]
async fn deferred_payout_settles_once_an_account_is_linked() {
    let app = build_test_app().await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "paid").await;

    confirm(&app, BUYER_TOKEN, tx, "buyer").await;
    confirm(&app, SELLER_TOKEN, tx, "seller").await;
    assert!(fetch_row(&app.db, tx).await.transfer_id.is_none());

    // Seller finishes onboarding; the retry path picks the payout up
    link_payout_account(&app.db, app.seller).await;
    let row = fetch_row(&app.db, tx).await;
    let outcome = escrow::initiate_payout(&app.db, app.payments.as_ref(), &row)
        .await
        .unwrap();
    assert!(matches!(outcome, PayoutOutcome::Settled { .. }));

    let row = fetch_row(&app.db, tx).await;
    assert!(row.transfer_id.is_some());
    assert_eq!(app.payments.transfer_count(), 1);

    // A second pass reuses the recorded transfer instead of paying again
    let outcome = escrow::initiate_payout(&app.db, app.payments.as_ref(), &row)
        .await
        .unwrap();
    assert!(matches!(outcome, PayoutOutcome::Settled { .. }));
    assert_eq!(app.payments.transfer_count(), 1);
}

#[tokio::test]
async fn dispute_with_a_short_reason_is_rejected_unchanged() {
    let app = build_test_app().await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "paid").await;

    let (status, body) = post_json(
        &app,
        "/api/transactions/dispute",
        Some(BUYER_TOKEN),
        json!({ "transaction_id": tx, "reason": "bad" }),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("10 characters"));

    let row = fetch_row(&app.db, tx).await;
    assert_eq!(row.status, "paid");
    assert!(row.dispute_reason.is_none());
}

#[tokio::test]
async fn dispute_freezes_further_confirmation() {
    let app = build_test_app().await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "paid").await;

    confirm(&app, BUYER_TOKEN, tx, "buyer").await;

    let (status, body) = post_json(
        &app,
        "/api/transactions/dispute",
        Some(SELLER_TOKEN),
        json!({ "transaction_id": tx, "reason": "item never arrived" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "disputed");

    let row = fetch_row(&app.db, tx).await;
    assert_eq!(row.status, "disputed");
    assert_eq!(row.dispute_reason.unwrap(), "seller: item never arrived");

    // Confirmation is now rejected until an operator resolves
    let (status, _) = confirm(&app, SELLER_TOKEN, tx, "seller").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let kinds = event_kinds(&app.db, tx).await;
    assert!(kinds.contains(&"dispute_raised".to_string()));
}

#[tokio::test]
async fn a_second_dispute_reports_one_already_open() {
    let app = build_test_app().await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "paid").await;

    post_json(
        &app,
        "/api/transactions/dispute",
        Some(BUYER_TOKEN),
        json!({ "transaction_id": tx, "reason": "wrong equipment delivered" }),
    )
    .await;

    let (status, body) = post_json(
        &app,
        "/api/transactions/dispute",
        Some(SELLER_TOKEN),
        json!({ "transaction_id": tx, "reason": "buyer refused the handoff" }),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already open"));
}

#[tokio::test]
async fn a_stranger_cannot_dispute() {
    let app = build_test_app().await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "paid").await;

    let (status, _) = post_json(
        &app,
        "/api/transactions/dispute",
        Some(STRANGER_TOKEN),
        json!({ "transaction_id": tx, "reason": "not my transaction at all" }),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn resolution_requires_the_operator_capability() {
    let app = build_test_app().await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "disputed").await;

    let (status, _) = post_json(
        &app,
        "/api/admin/disputes/resolve",
        Some(BUYER_TOKEN),
        json!({ "transaction_id": tx, "resolution": "refund_buyer" }),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(fetch_row(&app.db, tx).await.status, "disputed");
}

#[tokio::test]
async fn refund_resolution_is_terminal_and_never_double_refunds() {
    let app = build_test_app().await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "disputed").await;

    let (status, body) = post_json(
        &app,
        "/api/admin/disputes/resolve",
        Some(ADMIN_TOKEN),
        json!({ "transaction_id": tx, "resolution": "refund_buyer", "admin_notes": "buyer evidence accepted" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "refunded");

    let row = fetch_row(&app.db, tx).await;
    assert_eq!(row.status, "refunded");
    assert!(row.operational_note.unwrap().contains("buyer evidence accepted"));
    assert!(row.resolved_by.is_some());
    assert_eq!(app.payments.refund_count(), 1);

    // Already terminal: a second attempt must not move money again
    let (status, _) = post_json(
        &app,
        "/api/admin/disputes/resolve",
        Some(ADMIN_TOKEN),
        json!({ "transaction_id": tx, "resolution": "refund_buyer" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(app.payments.refund_count(), 1);
}

#[tokio::test]
async fn release_resolution_completes_without_confirmations() {
    let app = build_test_app().await;
    link_payout_account(&app.db, app.seller).await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "disputed").await;

    let (status, body) = post_json(
        &app,
        "/api/admin/disputes/resolve",
        Some(ADMIN_TOKEN),
        json!({ "transaction_id": tx, "resolution": "release_to_seller" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");

    // The documented exception: completed with no confirmation timestamps
    let row = fetch_row(&app.db, tx).await;
    assert_eq!(row.status, "completed");
    assert!(row.buyer_confirmed_at.is_none());
    assert!(row.seller_confirmed_at.is_none());
    assert!(row.transfer_id.is_some());
    assert_eq!(app.payments.transfer_count(), 1);
}

#[tokio::test]
async fn release_failure_surfaces_and_leaves_the_dispute_open() {
    let app = build_test_app().await;
    link_payout_account(&app.db, app.seller).await;
    app.payments.fail_transfers.store(true, Ordering::SeqCst);
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "disputed").await;

    let (status, body) = post_json(
        &app,
        "/api/admin/disputes/resolve",
        Some(ADMIN_TOKEN),
        json!({ "transaction_id": tx, "resolution": "release_to_seller" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("rejected"));
    assert_eq!(fetch_row(&app.db, tx).await.status, "disputed");

    // The operator retries once the processor recovers
    app.payments.fail_transfers.store(false, Ordering::SeqCst);
    let (status, _) = post_json(
        &app,
        "/api/admin/disputes/resolve",
        Some(ADMIN_TOKEN),
        json!({ "transaction_id": tx, "resolution": "release_to_seller" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetch_row(&app.db, tx).await.status, "completed");
    assert_eq!(app.payments.transfer_count(), 1);
}

#[tokio::test]
async fn release_reuses_a_transfer_recorded_by_an_earlier_attempt() {
    let app = build_test_app().await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "disputed").await;

    // A previous attempt moved the money but crashed before finalizing
    let mut row: sale_transactions::ActiveModel = fetch_row(&app.db, tx).await.into();
    row.transfer_id = Set(Some("tr_prior_attempt".to_string()));
    row.update(&app.db).await.unwrap();

    let (status, body) = post_json(
        &app,
        "/api/admin/disputes/resolve",
        Some(ADMIN_TOKEN),
        json!({ "transaction_id": tx, "resolution": "release_to_seller" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(
        fetch_row(&app.db, tx).await.transfer_id.unwrap(),
        "tr_prior_attempt"
    );
    assert_eq!(app.payments.transfer_count(), 0);
}

#[tokio::test]
async fn resolution_of_a_non_disputed_transaction_is_rejected() {
    let app = build_test_app().await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "paid").await;

    let (status, body) = post_json(
        &app,
        "/api/admin/disputes/resolve",
        Some(ADMIN_TOKEN),
        json!({ "transaction_id": tx, "resolution": "refund_buyer" }),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("disputed"));
    assert_eq!(app.payments.refund_count(), 0);
}

#[tokio::test]
async fn parties_can_read_the_transaction_but_strangers_cannot() {
    let app = build_test_app().await;
    let tx = insert_transaction(&app.db, app.buyer, app.seller, "paid").await;
    let uri = format!("/api/transactions/{}", tx);

    let (status, body) = get_json(&app, &uri, BUYER_TOKEN).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paid");
    assert_eq!(body["gross_amount"], 10_000);

    let (status, _) = get_json(&app, &uri, ADMIN_TOKEN).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = get_json(&app, &uri, STRANGER_TOKEN).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
