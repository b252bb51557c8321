//! Application startup and lifecycle management.

use crate::config::Config;
use crate::handlers;
use crate::services::webhook::WebhookVerifier;
use crate::services::{
    AccessService, AccountService, MongoRecordStore, OrderService, PlanCatalog, RazorpayClient,
    RecordStore, SubscriptionLifecycle, SubscriptionProvisioner, WebhookProcessor,
};
use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware, security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state. Every component is built once here from the
/// loaded configuration.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn RecordStore>,
    pub access: AccessService,
    pub accounts: AccountService,
    pub provisioner: SubscriptionProvisioner,
    pub orders: OrderService,
    pub webhooks: WebhookProcessor,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn RecordStore>) -> Result<Self, AppError> {
        let razorpay = RazorpayClient::new(config.razorpay.clone()).map_err(|e| {
            tracing::error!("Failed to build Razorpay client: {}", e);
            AppError::ConfigError(e.into())
        })?;
        if !razorpay.is_configured() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Razorpay credentials not configured"
            )));
        }

        let catalog = PlanCatalog::new(store.clone());
        let orders = OrderService::new(
            store.clone(),
            catalog.clone(),
            razorpay.clone(),
            config.origin_system.clone(),
        );
        let provisioner = SubscriptionProvisioner::new(
            store.clone(),
            catalog,
            razorpay,
            config.origin_system.clone(),
            config.common.environment.clone(),
        );
        let webhooks = WebhookProcessor::new(
            WebhookVerifier::new(config.razorpay.webhook_secret.clone()),
            SubscriptionLifecycle::new(store.clone()),
            orders.clone(),
        );

        Ok(Self {
            access: AccessService::new(store.clone()),
            accounts: AccountService::new(store.clone(), config.trial.days),
            provisioner,
            orders,
            webhooks,
            store,
            config,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route(
            "/subscriptions",
            post(handlers::subscriptions::create_subscription),
        )
        .route(
            "/subscriptions/:id",
            get(handlers::subscriptions::get_subscription),
        )
        .route(
            "/webhooks/razorpay",
            post(handlers::webhooks::razorpay_webhook),
        )
        .route("/orders", post(handlers::orders::create_order))
        .route("/payments/verify", post(handlers::orders::verify_payment))
        .route("/users", post(handlers::users::create_user))
        .route("/admin/users/:id/lock", post(handlers::users::lock_user))
        .route("/admin/users/:id/unlock", post(handlers::users::unlock_user))
        .route("/access", get(handlers::access::get_access))
        .route("/access/check", post(handlers::access::check_access))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    user_id = tracing::field::Empty,
                )
            }),
        )
        // Outermost, so the span above sees the minted id.
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Connect to MongoDB, ensure indexes and bind the listener.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let mut client_options = ClientOptions::parse(config.database.url.expose_secret())
            .await
            .map_err(|e| {
                tracing::error!("Failed to parse MongoDB connection string: {}", e);
                AppError::DatabaseError(e.into())
            })?;
        client_options.app_name = Some(config.service_name.clone());

        let client = Client::with_options(client_options).map_err(|e| {
            tracing::error!("Failed to create MongoDB client: {}", e);
            AppError::DatabaseError(e.into())
        })?;
        let db = client.database(&config.database.db_name);

        let store = MongoRecordStore::new(&db);
        store.init_indexes().await.map_err(|e| {
            tracing::error!("Failed to initialize database indexes: {}", e);
            AppError::DatabaseError(e)
        })?;

        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        let state = AppState::new(config, Arc::new(store))?;
        let router = build_router(state);

        tracing::info!("Subscription service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router).await
    }
}
