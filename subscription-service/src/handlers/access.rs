use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};
use service_core::error::AppError;

use crate::middleware::CallerContext;
use crate::services::access::{Entitlement, BILLING_REDIRECT};
use crate::AppState;

/// Login / session refresh: reconcile expiry and report the entitlement.
pub async fn get_access(
    State(state): State<AppState>,
    caller: CallerContext,
) -> Result<Json<Entitlement>, AppError> {
    let entitlement = state.access.refresh(&caller.user_id, Utc::now()).await?;
    Ok(Json(entitlement))
}

/// Gate for protected requests. Denial is a 403 that points at billing.
pub async fn check_access(
    State(state): State<AppState>,
    caller: CallerContext,
) -> Result<Json<Value>, AppError> {
    let entitlement = state.access.refresh(&caller.user_id, Utc::now()).await?;

    if let Some(reason) = entitlement.denial_reason {
        return Err(AppError::AccessDenied {
            reason: reason.as_str().to_string(),
            redirect: BILLING_REDIRECT.to_string(),
        });
    }

    Ok(Json(json!({
        "allowed": true,
        "entitlement": entitlement,
    })))
}
