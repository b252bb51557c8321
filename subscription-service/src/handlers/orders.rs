use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use service_core::error::AppError;

use super::json_body;
use crate::services::orders::{CreateOrderRequest, CreatedOrder, VerifyPaymentRequest};
use crate::AppState;

/// Create a one-time gateway order for a plan.
pub async fn create_order(
    State(state): State<AppState>,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<Json<CreatedOrder>, AppError> {
    let request = json_body(body)?;
    let order = state.orders.create_order(&request).await?;
    Ok(Json(order))
}

/// Checkout callback for the one-time flow.
pub async fn verify_payment(
    State(state): State<AppState>,
    body: Result<Json<VerifyPaymentRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let request = json_body(body)?;
    let outcome = state.orders.verify_payment(&request, Utc::now()).await?;

    Ok(Json(json!({
        "verified": true,
        "outcome": outcome,
    })))
}
