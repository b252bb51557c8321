//! Account registration and the administrative lock.

use crate::error::BillingError;
use crate::models::{Role, User, UserPatch};
use crate::services::RecordStore;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

/// Self-registration payload. The role is never taken from the caller;
/// every registered account starts as `Role::User`.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct NewUser {
    #[validate(length(min = 1, message = "id is required"))]
    pub id: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
}

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn RecordStore>,
    trial_days: i64,
}

impl AccountService {
    pub fn new(store: Arc<dyn RecordStore>, trial_days: i64) -> Self {
        Self { store, trial_days }
    }

    pub async fn create_user(
        &self,
        request: &NewUser,
        now: DateTime<Utc>,
    ) -> Result<User, BillingError> {
        request
            .validate()
            .map_err(|e| BillingError::InvalidRequest(e.to_string()))?;

        if self.load(&request.id).await?.is_some() {
            return Err(BillingError::AlreadyExists(format!("user {}", request.id)));
        }

        let user = User::new(
            request.id.trim(),
            request.email.trim(),
            request.name.trim(),
            Role::User,
            now,
            self.trial_days,
        );
        self.store
            .insert_user(&user)
            .await
            .map_err(BillingError::Store)?;

        tracing::info!(user_id = %user.id, role = ?user.role, "User registered");
        Ok(user)
    }

    /// Deny access to `target_id` regardless of billing state. Only an
    /// explicit unlock lifts it.
    #[tracing::instrument(skip(self, reason, now))]
    pub async fn lock_user(
        &self,
        admin_id: &str,
        target_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<User, BillingError> {
        self.require_admin(admin_id).await?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(BillingError::InvalidRequest("reason is required".to_string()));
        }

        let patch = UserPatch::lock(reason.to_string(), admin_id.to_string(), now);
        let user = self.update(target_id, &patch, now).await?;
        tracing::warn!(reason, "User locked");
        Ok(user)
    }

    #[tracing::instrument(skip(self, now))]
    pub async fn unlock_user(
        &self,
        admin_id: &str,
        target_id: &str,
        now: DateTime<Utc>,
    ) -> Result<User, BillingError> {
        self.require_admin(admin_id).await?;
        let user = self.update(target_id, &UserPatch::unlock(), now).await?;
        tracing::info!("User unlocked");
        Ok(user)
    }

    async fn require_admin(&self, admin_id: &str) -> Result<(), BillingError> {
        match self.load(admin_id).await? {
            Some(user) if user.is_admin() => Ok(()),
            _ => Err(BillingError::Forbidden(
                "administrator role required".to_string(),
            )),
        }
    }

    async fn update(
        &self,
        id: &str,
        patch: &UserPatch,
        now: DateTime<Utc>,
    ) -> Result<User, BillingError> {
        let found = self
            .store
            .update_user(id, patch, now)
            .await
            .map_err(BillingError::Store)?;
        if !found {
            return Err(BillingError::RecordNotFound(format!("user {}", id)));
        }
        self.load(id)
            .await?
            .ok_or_else(|| BillingError::RecordNotFound(format!("user {}", id)))
    }

    async fn load(&self, id: &str) -> Result<Option<User>, BillingError> {
        self.store.get_user(id).await.map_err(BillingError::Store)
    }
}
