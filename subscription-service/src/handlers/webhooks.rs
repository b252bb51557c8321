use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde_json::{json, Value};
use service_core::error::AppError;

use crate::AppState;

pub const SIGNATURE_HEADER: &str = "X-Signature";
/// Header name Razorpay itself uses.
pub const RAZORPAY_SIGNATURE_HEADER: &str = "X-Razorpay-Signature";

/// Gateway callback. The body is taken as raw bytes because the signature
/// covers exactly what was sent.
pub async fn razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .or_else(|| headers.get(RAZORPAY_SIGNATURE_HEADER))
        .and_then(|v| v.to_str().ok());

    let receipt = state.webhooks.process(&body, signature, Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "event": receipt.event,
        "outcome": receipt.outcome,
    })))
}
