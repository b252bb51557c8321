use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use super::json_body;
use crate::middleware::CallerContext;
use crate::models::{Role, SubscriptionStatus, User};
use crate::services::accounts::NewUser;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub subscription_status: SubscriptionStatus,
    pub trial_start_date: Option<DateTime<Utc>>,
    pub trial_end_date: Option<DateTime<Utc>>,
    pub subscription_start_date: Option<DateTime<Utc>>,
    pub subscription_end_date: Option<DateTime<Utc>>,
    pub is_locked: bool,
    pub locked_reason: Option<String>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
}

impl From<User> for UserView {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            name: u.name,
            role: u.role,
            subscription_status: u.subscription_status,
            trial_start_date: u.trial_start_date,
            trial_end_date: u.trial_end_date,
            subscription_start_date: u.subscription_start_date,
            subscription_end_date: u.subscription_end_date,
            is_locked: u.is_locked,
            locked_reason: u.locked_reason,
            locked_by: u.locked_by,
            locked_at: u.locked_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LockRequest {
    pub reason: String,
}

pub async fn create_user(
    State(state): State<AppState>,
    body: Result<Json<NewUser>, JsonRejection>,
) -> Result<(StatusCode, Json<UserView>), AppError> {
    let request = json_body(body)?;
    let user = state.accounts.create_user(&request, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

pub async fn lock_user(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<String>,
    body: Result<Json<LockRequest>, JsonRejection>,
) -> Result<Json<UserView>, AppError> {
    let request = json_body(body)?;
    let user = state
        .accounts
        .lock_user(&caller.user_id, &id, &request.reason, Utc::now())
        .await?;
    Ok(Json(user.into()))
}

pub async fn unlock_user(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<String>,
) -> Result<Json<UserView>, AppError> {
    let user = state
        .accounts
        .unlock_user(&caller.user_id, &id, Utc::now())
        .await?;
    Ok(Json(user.into()))
}
