//! Razorpay webhook payloads as a closed set of known events.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::dates::from_epoch_seconds;

/// Subscription events that drive the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Activated,
    Charged,
    Cancelled,
    Completed,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Activated => "subscription.activated",
            LifecycleEvent::Charged => "subscription.charged",
            LifecycleEvent::Cancelled => "subscription.cancelled",
            LifecycleEvent::Completed => "subscription.completed",
        }
    }
}

/// `payload.subscription.entity` of a subscription event.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionEntity {
    pub id: String,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub current_start: Option<i64>,
    #[serde(default)]
    pub current_end: Option<i64>,
    #[serde(default)]
    pub paid_count: u32,
    #[serde(default)]
    pub total_count: Option<u32>,
}

impl SubscriptionEntity {
    pub fn period_start(&self) -> Option<DateTime<Utc>> {
        self.current_start.and_then(from_epoch_seconds)
    }

    pub fn period_end(&self) -> Option<DateTime<Utc>> {
        self.current_end.and_then(from_epoch_seconds)
    }
}

/// `payload.payment.entity` of a payment event.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: EnvelopePayload,
}

#[derive(Debug, Default, Deserialize)]
struct EnvelopePayload {
    subscription: Option<Wrapped<SubscriptionEntity>>,
    payment: Option<Wrapped<PaymentEntity>>,
}

#[derive(Debug, Deserialize)]
struct Wrapped<T> {
    entity: T,
}

/// A verified gateway event.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Subscription(LifecycleEvent, SubscriptionEntity),
    PaymentAuthorized(PaymentEntity),
    PaymentCaptured(PaymentEntity),
    PaymentFailed(PaymentEntity),
    /// Event types this service does not handle yet.
    Unknown(String),
}

impl GatewayEvent {
    /// Parse a raw webhook body. Only call this after the signature check.
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_slice(raw)?;
        let payload = envelope.payload;

        let lifecycle = match envelope.event.as_str() {
            "subscription.activated" => Some(LifecycleEvent::Activated),
            "subscription.charged" => Some(LifecycleEvent::Charged),
            "subscription.cancelled" => Some(LifecycleEvent::Cancelled),
            "subscription.completed" => Some(LifecycleEvent::Completed),
            _ => None,
        };

        if let Some(kind) = lifecycle {
            return match payload.subscription {
                Some(wrapped) => Ok(GatewayEvent::Subscription(kind, wrapped.entity)),
                None => Err(missing_entity(&envelope.event, "subscription")),
            };
        }

        let payment = |event: &str| {
            payload
                .payment
                .map(|wrapped| wrapped.entity)
                .ok_or_else(|| missing_entity(event, "payment"))
        };

        match envelope.event.as_str() {
            "payment.authorized" => Ok(GatewayEvent::PaymentAuthorized(payment(&envelope.event)?)),
            "payment.captured" => Ok(GatewayEvent::PaymentCaptured(payment(&envelope.event)?)),
            "payment.failed" => Ok(GatewayEvent::PaymentFailed(payment(&envelope.event)?)),
            _ => Ok(GatewayEvent::Unknown(envelope.event)),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            GatewayEvent::Subscription(kind, _) => kind.as_str(),
            GatewayEvent::PaymentAuthorized(_) => "payment.authorized",
            GatewayEvent::PaymentCaptured(_) => "payment.captured",
            GatewayEvent::PaymentFailed(_) => "payment.failed",
            GatewayEvent::Unknown(name) => name,
        }
    }
}

fn missing_entity(event: &str, entity: &str) -> serde_json::Error {
    serde::de::Error::custom(format!("{} event without a {} entity", event, entity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscription_charged() {
        let raw = br#"{
            "entity": "event",
            "account_id": "acc_1",
            "event": "subscription.charged",
            "contains": ["subscription", "payment"],
            "payload": {
                "subscription": {"entity": {
                    "id": "sub_1", "status": "active",
                    "current_start": 1700000000, "current_end": 1702592000,
                    "paid_count": 2
                }},
                "payment": {"entity": {"id": "pay_1", "amount": 49900}}
            },
            "created_at": 1700000100
        }"#;

        match GatewayEvent::parse(raw).unwrap() {
            GatewayEvent::Subscription(LifecycleEvent::Charged, sub) => {
                assert_eq!(sub.id, "sub_1");
                assert_eq!(sub.paid_count, 2);
                assert_eq!(sub.period_end(), from_epoch_seconds(1_702_592_000));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn parses_payment_failed() {
        let raw = br#"{"event":"payment.failed","payload":{"payment":{"entity":{
            "id":"pay_9","order_id":"order_9","error_description":"Card declined"}}}}"#;

        match GatewayEvent::parse(raw).unwrap() {
            GatewayEvent::PaymentFailed(payment) => {
                assert_eq!(payment.order_id.as_deref(), Some("order_9"));
                assert_eq!(payment.error_description.as_deref(), Some("Card declined"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn unknown_events_are_kept_not_rejected() {
        let event = GatewayEvent::parse(br#"{"event":"subscription.paused","payload":{}}"#).unwrap();
        assert!(matches!(event, GatewayEvent::Unknown(ref name) if name == "subscription.paused"));
        assert_eq!(event.name(), "subscription.paused");
    }

    #[test]
    fn known_event_without_entity_is_malformed() {
        assert!(GatewayEvent::parse(br#"{"event":"subscription.activated","payload":{}}"#).is_err());
        assert!(GatewayEvent::parse(b"not json").is_err());
    }
}
