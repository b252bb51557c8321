mod common;

use axum::body::Body;
use axum::http::Request;
use common::TestApp;
use service_core::tower::ServiceExt;
use std::fmt;
use std::sync::{Arc, Mutex};
use subscription_service::build_router;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;
use wiremock::MockServer;

/// Collects the `request_id` recorded on each `http_request` span.
#[derive(Clone, Default)]
struct RequestSpanIds(Arc<Mutex<Vec<String>>>);

impl<S: Subscriber> Layer<S> for RequestSpanIds {
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        if attrs.metadata().name() != "http_request" {
            return;
        }
        let mut visitor = RequestIdField(None);
        attrs.record(&mut visitor);
        if let Some(request_id) = visitor.0 {
            self.0.lock().unwrap().push(request_id);
        }
    }
}

struct RequestIdField(Option<String>);

impl Visit for RequestIdField {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "request_id" {
            self.0 = Some(format!("{:?}", value));
        }
    }
}

#[tokio::test]
async fn health_check_works() {
    let app = TestApp::spawn().await;

    let response = app.get("/health", None).await;

    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "subscription-service");
}

#[tokio::test]
async fn readiness_check_works() {
    let app = TestApp::spawn().await;

    let response = app.get("/ready", None).await;

    assert!(response.status().is_success());
}

#[tokio::test]
async fn readiness_fails_while_store_is_unreachable() {
    let app = TestApp::spawn().await;
    app.store.set_fail_writes(true);

    let response = app.get("/ready", None).await;
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    app.store.set_fail_writes(false);
    let response = app.get("/ready", None).await;
    assert!(response.status().is_success());
}

#[tokio::test]
async fn request_id_is_echoed() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/health"))
        .header("x-request-id", "req-123")
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.headers()["x-request-id"], "req-123");
}

#[tokio::test]
async fn minted_request_id_is_on_the_request_span() {
    let gateway = MockServer::start().await;
    let (state, _) = common::test_state(&gateway, 20);
    let spans = RequestSpanIds::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(spans.clone()));

    let response = build_router(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let minted = response.headers()["x-request-id"].to_str().unwrap().to_string();
    assert_ne!(minted, "-");
    assert_eq!(*spans.0.lock().unwrap(), vec![minted]);
}

#[tokio::test]
async fn metrics_endpoint_renders_text() {
    let app = TestApp::spawn().await;

    let response = app.get("/metrics", None).await;

    assert!(response.status().is_success());
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
}
