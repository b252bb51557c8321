mod common;

use chrono::{Duration, Utc};
use common::{subscription_event, TestApp, PERIOD_END, PERIOD_START, TEST_USER_ID, WEBHOOK_SECRET};
use reqwest::StatusCode;
use serde_json::{json, Value};
use service_core::utils::signature::sign_hex;
use subscription_service::models::{
    from_epoch_seconds, FieldUpdate, GatewaySubscriptionStatus, SubscriptionStatus, UserPatch,
};
use subscription_service::services::RecordStore;

async fn provisioned(subscription_id: &str) -> TestApp {
    let app = TestApp::spawn().await;
    app.mock_gateway_subscription(subscription_id).await;
    assert_eq!(app.provision("Gold").await.status(), StatusCode::OK);
    app
}

async fn outcome(response: reqwest::Response) -> String {
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    body["outcome"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn tampered_body_is_rejected_until_resigned() {
    let app = provisioned("sub_gold").await;
    let original = serde_json::to_vec(&subscription_event(
        "subscription.activated",
        "sub_gold",
        PERIOD_START,
        PERIOD_END,
        1,
    ))
    .unwrap();
    let signature = sign_hex(WEBHOOK_SECRET, &original).unwrap();

    let tampered = String::from_utf8(original)
        .unwrap()
        .replace("1702592000", "1902592000")
        .into_bytes();

    let response = app.post_webhook_raw(tampered.clone(), Some(&signature)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        app.store.subscription("sub_gold").unwrap().status,
        GatewaySubscriptionStatus::Created
    );

    let resigned = sign_hex(WEBHOOK_SECRET, &tampered).unwrap();
    let response = app.post_webhook_raw(tampered, Some(&resigned)).await;
    assert_eq!(outcome(response).await, "applied");
    assert_eq!(
        app.store.subscription("sub_gold").unwrap().current_period_end,
        from_epoch_seconds(1_902_592_000)
    );
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let app = provisioned("sub_gold").await;
    let raw = serde_json::to_vec(&subscription_event(
        "subscription.activated",
        "sub_gold",
        PERIOD_START,
        PERIOD_END,
        1,
    ))
    .unwrap();

    let response = app.post_webhook_raw(raw, None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Invalid signature");
}

#[tokio::test]
async fn razorpay_signature_header_is_accepted() {
    let app = provisioned("sub_gold").await;
    let raw = serde_json::to_vec(&subscription_event(
        "subscription.activated",
        "sub_gold",
        PERIOD_START,
        PERIOD_END,
        1,
    ))
    .unwrap();
    let signature = sign_hex(WEBHOOK_SECRET, &raw).unwrap();

    let response = app
        .client
        .post(app.url("/webhooks/razorpay"))
        .header("X-Razorpay-Signature", signature)
        .body(raw)
        .send()
        .await
        .unwrap();

    assert_eq!(outcome(response).await, "applied");
}

#[tokio::test]
async fn repeated_charge_leaves_same_state() {
    let app = provisioned("sub_gold").await;
    let charge = subscription_event("subscription.charged", "sub_gold", PERIOD_START, PERIOD_END, 1);

    assert_eq!(outcome(app.post_webhook(&charge).await).await, "applied");
    let first = app.store.subscription("sub_gold").unwrap();

    assert_eq!(outcome(app.post_webhook(&charge).await).await, "duplicate");
    let second = app.store.subscription("sub_gold").unwrap();

    assert_eq!(first.current_period_end, second.current_period_end);
    assert_eq!(first.paid_count, second.paid_count);
    assert_eq!(app.store.events_for("sub_gold").len(), 1);
}

#[tokio::test]
async fn cancelled_subscription_keeps_access_until_period_end() {
    let app = provisioned("sub_gold").await;
    let now = Utc::now();
    let start = (now - Duration::days(10)).timestamp();
    let end = (now + Duration::days(20)).timestamp();

    app.post_webhook(&subscription_event("subscription.activated", "sub_gold", start, end, 1))
        .await;
    let response = app
        .post_webhook(&subscription_event("subscription.cancelled", "sub_gold", start, end, 1))
        .await;
    assert_eq!(outcome(response).await, "applied");
    assert_eq!(
        app.store.subscription("sub_gold").unwrap().status,
        GatewaySubscriptionStatus::Cancelled
    );

    let response = app
        .post("/access/check", Some(TEST_USER_ID), &json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Let the paid period run out.
    app.store
        .update_user(
            TEST_USER_ID,
            &UserPatch {
                subscription_end_date: FieldUpdate::Set(now - Duration::seconds(1)),
                ..Default::default()
            },
            now,
        )
        .await
        .unwrap();

    let response = app.get("/access", Some(TEST_USER_ID)).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "expired");
    assert_eq!(body["canAccess"], false);
    assert_eq!(
        app.store.user(TEST_USER_ID).unwrap().subscription_status,
        SubscriptionStatus::Expired
    );
}

#[tokio::test]
async fn renewal_extends_user_after_abandoned_second_checkout() {
    let app = provisioned("sub_old").await;
    let month = 30 * 24 * 60 * 60;
    app.post_webhook(&subscription_event(
        "subscription.activated",
        "sub_old",
        PERIOD_START,
        PERIOD_END,
        1,
    ))
    .await;

    // A second checkout that is never paid.
    app.gateway.reset().await;
    app.mock_gateway_subscription("sub_new").await;
    assert_eq!(app.provision("Gold").await.status(), StatusCode::OK);
    assert!(app.store.subscription("sub_new").is_some());

    let response = app
        .post_webhook(&subscription_event(
            "subscription.charged",
            "sub_old",
            PERIOD_END,
            PERIOD_END + month,
            2,
        ))
        .await;

    assert_eq!(outcome(response).await, "applied");
    let user = app.store.user(TEST_USER_ID).unwrap();
    assert_eq!(user.subscription_status, SubscriptionStatus::Active);
    assert_eq!(
        user.subscription_end_date,
        from_epoch_seconds(PERIOD_END + month)
    );
}

#[tokio::test]
async fn unknown_event_is_acknowledged() {
    let app = TestApp::spawn().await;

    let response = app
        .post_webhook(&json!({
            "event": "invoice.paid",
            "payload": { "invoice": { "entity": { "id": "inv_1" } } }
        }))
        .await;

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["outcome"], "ignored");
}

#[tokio::test]
async fn event_for_unknown_subscription_is_acknowledged_not_created() {
    let app = TestApp::spawn().await;

    let response = app
        .post_webhook(&subscription_event(
            "subscription.activated",
            "sub_nowhere",
            PERIOD_START,
            PERIOD_END,
            1,
        ))
        .await;

    assert_eq!(outcome(response).await, "record_not_found");
    assert!(app.store.subscription("sub_nowhere").is_none());
}

#[tokio::test]
async fn store_outage_asks_gateway_to_retry() {
    let app = provisioned("sub_gold").await;
    app.store.set_fail_writes(true);

    let response = app
        .post_webhook(&subscription_event(
            "subscription.activated",
            "sub_gold",
            PERIOD_START,
            PERIOD_END,
            1,
        ))
        .await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    app.store.set_fail_writes(false);

    let response = app
        .post_webhook(&subscription_event(
            "subscription.activated",
            "sub_gold",
            PERIOD_START,
            PERIOD_END,
            1,
        ))
        .await;
    assert_eq!(outcome(response).await, "applied");
}

#[tokio::test]
async fn verified_but_malformed_payload_is_rejected() {
    let app = TestApp::spawn().await;
    let raw = br#"{"event":"subscription.charged","payload":{}}"#.to_vec();
    let signature = sign_hex(WEBHOOK_SECRET, &raw).unwrap();

    let response = app.post_webhook_raw(raw, Some(&signature)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
