use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use service_core::error::AppError;

use super::json_body;
use crate::error::BillingError;
use crate::models::UserSubscription;
use crate::services::provisioner::ProvisionRequest;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    pub id: String,
    pub user_id: String,
    pub plan_name: String,
    pub status: String,
    pub payment_url: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub paid_count: u32,
    pub total_count: u32,
    pub amount: f64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserSubscription> for SubscriptionView {
    fn from(s: UserSubscription) -> Self {
        Self {
            id: s.gateway_subscription_id,
            user_id: s.user_id,
            plan_name: s.plan_name,
            status: s.status.as_str().to_string(),
            payment_url: s.payment_url,
            current_period_start: s.current_period_start,
            current_period_end: s.current_period_end,
            paid_count: s.paid_count,
            total_count: s.total_count,
            amount: s.amount,
            currency: s.currency,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

/// Start a recurring subscription and hand back the gateway payment link.
pub async fn create_subscription(
    State(state): State<AppState>,
    body: Result<Json<ProvisionRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let request = json_body(body)?;
    let subscription = state.provisioner.provision(&request).await?;

    Ok(Json(json!({
        "success": true,
        "subscription": subscription,
    })))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SubscriptionView>, AppError> {
    let subscription = state
        .store
        .find_subscription(&id)
        .await
        .map_err(BillingError::Store)?
        .ok_or_else(|| BillingError::RecordNotFound(format!("subscription {}", id)))?;

    Ok(Json(subscription.into()))
}
