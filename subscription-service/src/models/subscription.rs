//! Local mirror of gateway subscriptions.

use chrono::{DateTime, Utc};
use mongodb::bson;
use serde::{Deserialize, Serialize};

use super::dates::lenient_datetime;
use super::event::LifecycleEvent;
use super::patch::{FieldUpdate, UpdateDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewaySubscriptionStatus {
    Created,
    Active,
    Cancelled,
    Completed,
}

impl GatewaySubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewaySubscriptionStatus::Created => "created",
            GatewaySubscriptionStatus::Active => "active",
            GatewaySubscriptionStatus::Cancelled => "cancelled",
            GatewaySubscriptionStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GatewaySubscriptionStatus::Cancelled | GatewaySubscriptionStatus::Completed
        )
    }

    /// State reached by applying `event`, or `None` if the transition is not
    /// allowed. Re-delivery into the current terminal state is allowed and
    /// leaves it unchanged.
    pub fn next(self, event: LifecycleEvent) -> Option<Self> {
        use GatewaySubscriptionStatus::*;

        match (self, event) {
            (Created | Active, LifecycleEvent::Activated | LifecycleEvent::Charged) => {
                Some(Active)
            }
            (Created | Active | Cancelled, LifecycleEvent::Cancelled) => Some(Cancelled),
            (Created | Active | Completed, LifecycleEvent::Completed) => Some(Completed),
            _ => None,
        }
    }
}

/// One row per gateway subscription created for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSubscription {
    #[serde(rename = "_id")]
    pub gateway_subscription_id: String,
    pub gateway_customer_id: String,
    pub user_id: String,
    pub plan_id: String,
    pub plan_name: String,
    pub status: GatewaySubscriptionStatus,
    #[serde(default)]
    pub payment_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub current_period_start: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub current_period_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paid_count: u32,
    #[serde(default)]
    pub total_count: u32,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionPatch {
    pub status: FieldUpdate<GatewaySubscriptionStatus>,
    pub current_period_start: FieldUpdate<DateTime<Utc>>,
    pub current_period_end: FieldUpdate<DateTime<Utc>>,
    pub paid_count: FieldUpdate<u32>,
}

impl SubscriptionPatch {
    pub fn is_empty(&self) -> bool {
        self == &SubscriptionPatch::default()
    }

    pub fn apply(&self, subscription: &mut UserSubscription, now: DateTime<Utc>) {
        self.status.apply_to_required(&mut subscription.status);
        self.current_period_start
            .apply_to(&mut subscription.current_period_start);
        self.current_period_end
            .apply_to(&mut subscription.current_period_end);
        self.paid_count.apply_to_required(&mut subscription.paid_count);
        subscription.updated_at = now;
    }

    pub fn to_update(&self, now: DateTime<Utc>) -> Result<bson::Document, bson::ser::Error> {
        let mut update = UpdateDocument::new();
        update
            .field("status", &self.status)?
            .field("current_period_start", &self.current_period_start)?
            .field("current_period_end", &self.current_period_end)?
            .field("paid_count", &self.paid_count)?;
        update.finish(now)
    }
}

/// Append-only ledger row for an applied webhook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionEventRecord {
    /// Dedupe key, see [`SubscriptionEventRecord::dedupe_key`].
    #[serde(rename = "_id")]
    pub id: String,
    pub gateway_subscription_id: String,
    pub event: String,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub period_start: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub period_end: Option<DateTime<Utc>>,
    pub paid_count: u32,
    pub resulting_status: GatewaySubscriptionStatus,
    pub received_at: DateTime<Utc>,
}

impl SubscriptionEventRecord {
    /// Identical gateway deliveries collapse onto the same key.
    pub fn dedupe_key(
        gateway_subscription_id: &str,
        event: &str,
        period_end: Option<DateTime<Utc>>,
        paid_count: u32,
    ) -> String {
        format!(
            "{}:{}:{}:{}",
            gateway_subscription_id,
            event,
            period_end.map(|d| d.timestamp()).unwrap_or(0),
            paid_count
        )
    }
}
