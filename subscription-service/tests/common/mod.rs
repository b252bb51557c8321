#![allow(dead_code)]

use chrono::{Duration, Utc};
use secrecy::Secret;
use serde_json::{json, Value};
use service_core::config::Config as CoreConfig;
use service_core::utils::signature::sign_hex;
use std::sync::Arc;
use subscription_service::config::{
    Config, DatabaseConfig, RazorpayConfig, ServerConfig, TrialConfig,
};
use subscription_service::models::{Role, SubscriptionPlan, User};
use subscription_service::services::{MockRecordStore, RecordStore};
use subscription_service::{build_router, AppState};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const KEY_SECRET: &str = "test_key_secret";
pub const WEBHOOK_SECRET: &str = "test_webhook_secret";
pub const TEST_USER_ID: &str = "u1";
pub const TEST_ADMIN_ID: &str = "root";
pub const PERIOD_START: i64 = 1_700_000_000;
pub const PERIOD_END: i64 = 1_702_592_000;

pub struct TestApp {
    pub address: String,
    pub store: Arc<MockRecordStore>,
    pub gateway: MockServer,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_timeout(20).await
    }

    /// `timeout_seconds` bounds every call to the mocked gateway.
    pub async fn spawn_with_timeout(timeout_seconds: u64) -> Self {
        let gateway = MockServer::start().await;
        let (state, store) = test_state(&gateway, timeout_seconds);
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind random port");
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.ok();
        });

        TestApp {
            address: format!("http://127.0.0.1:{}", port),
            store,
            gateway,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn get(&self, path: &str, user_id: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(self.url(path));
        if let Some(user_id) = user_id {
            request = request.header("X-User-ID", user_id);
        }
        request.send().await.expect("Failed to execute request")
    }

    pub async fn post(&self, path: &str, user_id: Option<&str>, body: &Value) -> reqwest::Response {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(user_id) = user_id {
            request = request.header("X-User-ID", user_id);
        }
        request.send().await.expect("Failed to execute request")
    }

    /// Deliver a webhook signed over its exact bytes.
    pub async fn post_webhook(&self, body: &Value) -> reqwest::Response {
        let raw = serde_json::to_vec(body).unwrap();
        let signature = sign_hex(WEBHOOK_SECRET, &raw).unwrap();
        self.post_webhook_raw(raw, Some(&signature)).await
    }

    pub async fn post_webhook_raw(&self, raw: Vec<u8>, signature: Option<&str>) -> reqwest::Response {
        let mut request = self
            .client
            .post(self.url("/webhooks/razorpay"))
            .header("content-type", "application/json")
            .body(raw);
        if let Some(signature) = signature {
            request = request.header("X-Signature", signature);
        }
        request.send().await.expect("Failed to execute request")
    }

    /// Gateway answers customer and subscription creation successfully.
    pub async fn mock_gateway_subscription(&self, subscription_id: &str) {
        Mock::given(method("POST"))
            .and(path("/customers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cust_1",
                "entity": "customer",
                "email": "gold@x.com"
            })))
            .mount(&self.gateway)
            .await;

        Mock::given(method("POST"))
            .and(path("/subscriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": subscription_id,
                "entity": "subscription",
                "status": "created",
                "customer_id": "cust_1",
                "short_url": format!("https://rzp.io/i/{}", subscription_id)
            })))
            .mount(&self.gateway)
            .await;
    }

    /// Provision `plan_name` for the test user through the HTTP API.
    pub async fn provision(&self, plan_name: &str) -> reqwest::Response {
        self.post(
            "/subscriptions",
            None,
            &json!({
                "userId": TEST_USER_ID,
                "planName": plan_name,
                "userEmail": "gold@x.com",
                "userName": "Gold User"
            }),
        )
        .await
    }

    /// JSON bodies the gateway received on `path`.
    pub async fn gateway_requests(&self, request_path: &str) -> Vec<Value> {
        self.gateway
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == request_path)
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }

    /// A user whose trial started long enough ago to have run out.
    pub async fn seed_expired_trial_user(&self, id: &str) {
        let user = User::new(
            id,
            format!("{}@x.com", id),
            id,
            Role::User,
            Utc::now() - Duration::days(30),
            14,
        );
        self.store
            .insert_user(&user)
            .await
            .expect("Failed to seed user");
    }
}

pub fn plan(name: &str, gateway_plan_id: Option<&str>, days: u32, price: f64) -> SubscriptionPlan {
    SubscriptionPlan {
        id: format!("plan-{}", name.to_lowercase()),
        name: name.to_string(),
        display_name: name.to_string(),
        gateway_plan_id: gateway_plan_id.map(str::to_string),
        duration_days: days,
        price,
        currency: "INR".to_string(),
        is_active: true,
    }
}

pub fn subscription_event(event: &str, subscription_id: &str, start: i64, end: i64, paid_count: u32) -> Value {
    json!({
        "entity": "event",
        "account_id": "acc_test",
        "event": event,
        "contains": ["subscription"],
        "payload": {
            "subscription": {
                "entity": {
                    "id": subscription_id,
                    "entity": "subscription",
                    "plan_id": "plan_abc",
                    "customer_id": "cust_1",
                    "status": "active",
                    "current_start": start,
                    "current_end": end,
                    "paid_count": paid_count,
                    "total_count": 1
                }
            }
        },
        "created_at": start
    })
}

pub fn payment_event(event: &str, order_id: &str, amount: u64, error_description: Option<&str>) -> Value {
    json!({
        "entity": "event",
        "event": event,
        "contains": ["payment"],
        "payload": {
            "payment": {
                "entity": {
                    "id": "pay_1",
                    "entity": "payment",
                    "order_id": order_id,
                    "amount": amount,
                    "currency": "INR",
                    "status": if error_description.is_some() { "failed" } else { "captured" },
                    "error_description": error_description
                }
            }
        }
    })
}

/// Application state over a seeded in-memory store and the mocked gateway.
pub fn test_state(
    gateway: &MockServer,
    timeout_seconds: u64,
) -> (AppState, Arc<MockRecordStore>) {
    let now = Utc::now();

    let store = Arc::new(
        MockRecordStore::new()
            .with_plan(plan("Gold", Some("plan_abc"), 30, 499.0))
            .with_plan(plan("Quarterly", Some("plan_qtr"), 90, 1299.0))
            .with_plan(plan("Draft", None, 30, 99.0))
            .with_user(User::new(
                TEST_USER_ID,
                "gold@x.com",
                "Gold User",
                Role::User,
                now,
                14,
            ))
            .with_user(User::new(
                TEST_ADMIN_ID,
                "root@x.com",
                "Root",
                Role::Admin,
                now,
                14,
            )),
    );

    let config = Config {
        common: CoreConfig::default(),
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: DatabaseConfig {
            url: Secret::new("mongodb://unused".to_string()),
            db_name: "subscription_test".to_string(),
        },
        razorpay: RazorpayConfig {
            key_id: "rzp_test_key".to_string(),
            key_secret: Secret::new(KEY_SECRET.to_string()),
            webhook_secret: Secret::new(WEBHOOK_SECRET.to_string()),
            api_base_url: gateway.uri(),
            timeout_seconds,
        },
        trial: TrialConfig { days: 14 },
        origin_system: "policy-backoffice".to_string(),
        service_name: "subscription-service-test".to_string(),
    };

    let state = AppState::new(config, store.clone()).expect("Failed to build application state");
    (state, store)
}
