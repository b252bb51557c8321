//! Webhook ingestion: signature check on the raw body, then dispatch.

use crate::error::BillingError;
use crate::models::{GatewayEvent, PaymentEntity};
use crate::services::{metrics, OrderService, SubscriptionLifecycle};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use service_core::utils::signature::verify_hex;

/// What handling a verified event did. All of these are acknowledged to the
/// gateway; only store failures ask it to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    Duplicate,
    Ignored,
    RecordNotFound,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::RecordNotFound => "record_not_found",
        }
    }
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Secret<String>,
}

impl WebhookVerifier {
    pub fn new(secret: Secret<String>) -> Self {
        Self { secret }
    }

    /// HMAC-SHA256 of the exact bytes received, hex, compared in constant
    /// time. A missing header fails the same way as a wrong one.
    pub fn verify(&self, raw_body: &[u8], signature: Option<&str>) -> Result<(), BillingError> {
        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(BillingError::InvalidSignature)?;

        match verify_hex(self.secret.expose_secret(), raw_body, signature) {
            Ok(true) => Ok(()),
            Ok(false) => Err(BillingError::InvalidSignature),
            Err(e) => {
                tracing::error!(error = %e, "Webhook signature check failed to run");
                Err(BillingError::InvalidSignature)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookReceipt {
    pub event: String,
    pub outcome: WebhookOutcome,
}

#[derive(Clone)]
pub struct WebhookProcessor {
    verifier: WebhookVerifier,
    lifecycle: SubscriptionLifecycle,
    orders: OrderService,
}

impl WebhookProcessor {
    pub fn new(
        verifier: WebhookVerifier,
        lifecycle: SubscriptionLifecycle,
        orders: OrderService,
    ) -> Self {
        Self {
            verifier,
            lifecycle,
            orders,
        }
    }

    /// Verify, parse and apply one delivery. The body is not parsed unless
    /// the signature holds.
    pub async fn process(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WebhookReceipt, BillingError> {
        if let Err(e) = self.verifier.verify(raw_body, signature) {
            tracing::warn!(has_signature = signature.is_some(), "Rejected webhook with bad signature");
            metrics::record_webhook_event("unverified", "invalid_signature");
            return Err(e);
        }

        let event = GatewayEvent::parse(raw_body).map_err(|e| {
            metrics::record_webhook_event("unparseable", "invalid_payload");
            BillingError::InvalidRequest(format!("Malformed webhook payload: {}", e))
        })?;

        let label = match &event {
            GatewayEvent::Unknown(_) => "unknown",
            known => known.name(),
        };

        match self.dispatch(&event, now).await {
            Ok(outcome) => {
                tracing::info!(event = %event.name(), outcome = outcome.as_str(), "Webhook handled");
                metrics::record_webhook_event(label, outcome.as_str());
                Ok(WebhookReceipt {
                    event: event.name().to_string(),
                    outcome,
                })
            }
            Err(e) => {
                tracing::error!(event = %event.name(), error = %e, "Webhook handling failed");
                metrics::record_webhook_event(label, "error");
                Err(e)
            }
        }
    }

    async fn dispatch(
        &self,
        event: &GatewayEvent,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, BillingError> {
        match event {
            GatewayEvent::Subscription(kind, entity) => {
                self.lifecycle.apply(*kind, entity, now).await
            }
            GatewayEvent::PaymentAuthorized(payment) | GatewayEvent::PaymentCaptured(payment) => {
                match order_id(payment) {
                    Some(order_id) => {
                        let amount = (payment.amount > 0).then_some(payment.amount);
                        self.orders
                            .complete_payment(order_id, &payment.id, amount, now)
                            .await
                    }
                    None => Ok(WebhookOutcome::Ignored),
                }
            }
            GatewayEvent::PaymentFailed(payment) => match order_id(payment) {
                Some(order_id) => {
                    self.orders
                        .fail_payment(order_id, &payment.id, payment.error_description.as_deref(), now)
                        .await
                }
                None => Ok(WebhookOutcome::Ignored),
            },
            GatewayEvent::Unknown(name) => {
                tracing::info!(event = %name, "Unhandled webhook event type");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }
}

fn order_id(payment: &PaymentEntity) -> Option<&str> {
    payment.order_id.as_deref().filter(|id| !id.is_empty())
}
