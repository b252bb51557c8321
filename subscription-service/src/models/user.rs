use chrono::{DateTime, Duration, Utc};
use mongodb::bson;
use serde::{Deserialize, Serialize};

use super::dates::lenient_datetime;
use super::patch::{FieldUpdate, UpdateDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    /// Anything that is not explicitly an admin is treated as a plain user.
    #[default]
    #[serde(other)]
    User,
}

/// Entitlement status mirrored on the user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    Expired,
    Cancelled,
    Completed,
    /// Unrecognised stored value. Never grants access.
    #[default]
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Completed => "completed",
            SubscriptionStatus::Unknown => "unknown",
        }
    }
}

/// Identity plus entitlement snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub subscription_status: SubscriptionStatus,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub trial_start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub trial_end_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub subscription_start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub subscription_end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub locked_reason: Option<String>,
    #[serde(default)]
    pub locked_by: Option<String>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub locked_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl User {
    /// A freshly registered account. Non-admins start a trial of
    /// `trial_days`; the trial window is never rewritten afterwards.
    pub fn new(
        id: impl Into<String>,
        email: impl Into<String>,
        name: impl Into<String>,
        role: Role,
        now: DateTime<Utc>,
        trial_days: i64,
    ) -> Self {
        let (status, trial_start, trial_end) = match role {
            Role::Admin => (SubscriptionStatus::Active, None, None),
            Role::User => (
                SubscriptionStatus::Trial,
                Some(now),
                Some(now + Duration::days(trial_days)),
            ),
        };

        Self {
            id: id.into(),
            email: email.into(),
            name: name.into(),
            role,
            subscription_status: status,
            trial_start_date: trial_start,
            trial_end_date: trial_end,
            subscription_start_date: None,
            subscription_end_date: None,
            is_locked: false,
            locked_reason: None,
            locked_by: None,
            locked_at: None,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Partial update of a user's entitlement fields.
///
/// Trial dates are fixed at registration and never patched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub subscription_status: FieldUpdate<SubscriptionStatus>,
    pub subscription_start_date: FieldUpdate<DateTime<Utc>>,
    pub subscription_end_date: FieldUpdate<DateTime<Utc>>,
    pub is_locked: FieldUpdate<bool>,
    pub locked_reason: FieldUpdate<String>,
    pub locked_by: FieldUpdate<String>,
    pub locked_at: FieldUpdate<DateTime<Utc>>,
}

impl UserPatch {
    pub fn status(status: SubscriptionStatus) -> Self {
        Self {
            subscription_status: FieldUpdate::Set(status),
            ..Default::default()
        }
    }

    pub fn lock(reason: String, locked_by: String, now: DateTime<Utc>) -> Self {
        Self {
            is_locked: FieldUpdate::Set(true),
            locked_reason: FieldUpdate::Set(reason),
            locked_by: FieldUpdate::Set(locked_by),
            locked_at: FieldUpdate::Set(now),
            ..Default::default()
        }
    }

    pub fn unlock() -> Self {
        Self {
            is_locked: FieldUpdate::Set(false),
            locked_reason: FieldUpdate::Clear,
            locked_by: FieldUpdate::Clear,
            locked_at: FieldUpdate::Clear,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &UserPatch::default()
    }

    pub fn apply(&self, user: &mut User, now: DateTime<Utc>) {
        self.subscription_status
            .apply_to_required(&mut user.subscription_status);
        self.subscription_start_date
            .apply_to(&mut user.subscription_start_date);
        self.subscription_end_date
            .apply_to(&mut user.subscription_end_date);
        self.is_locked.apply_to_required(&mut user.is_locked);
        self.locked_reason.apply_to(&mut user.locked_reason);
        self.locked_by.apply_to(&mut user.locked_by);
        self.locked_at.apply_to(&mut user.locked_at);
        user.updated_at = Some(now);
    }

    pub fn to_update(&self, now: DateTime<Utc>) -> Result<bson::Document, bson::ser::Error> {
        let mut update = UpdateDocument::new();
        update
            .field("subscription_status", &self.subscription_status)?
            .field("subscription_start_date", &self.subscription_start_date)?
            .field("subscription_end_date", &self.subscription_end_date)?
            .field("is_locked", &self.is_locked)?
            .field("locked_reason", &self.locked_reason)?
            .field("locked_by", &self.locked_by)?
            .field("locked_at", &self.locked_at)?;
        update.finish(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_member_gets_trial_window() {
        let now = Utc::now();
        let user = User::new("u1", "a@x.com", "A", Role::User, now, 14);

        assert_eq!(user.subscription_status, SubscriptionStatus::Trial);
        assert_eq!(user.trial_start_date, Some(now));
        assert_eq!(user.trial_end_date, Some(now + Duration::days(14)));
        assert!(!user.is_locked);
    }

    #[test]
    fn admin_has_no_trial() {
        let user = User::new("root", "root@x.com", "Root", Role::Admin, Utc::now(), 14);
        assert!(user.is_admin());
        assert!(user.trial_end_date.is_none());
    }

    #[test]
    fn unknown_stored_values_fail_closed() {
        let user: User = serde_json::from_str(
            r#"{"_id":"u9","role":"superuser","subscription_status":"platinum","subscription_end_date":"soon"}"#,
        )
        .unwrap();

        assert_eq!(user.role, Role::User);
        assert_eq!(user.subscription_status, SubscriptionStatus::Unknown);
        assert!(user.subscription_end_date.is_none());
    }

    #[test]
    fn unlock_clears_lock_metadata() {
        let now = Utc::now();
        let mut user = User::new("u1", "a@x.com", "A", Role::User, now, 14);

        UserPatch::lock("chargeback".into(), "admin1".into(), now).apply(&mut user, now);
        assert!(user.is_locked);
        assert_eq!(user.locked_by.as_deref(), Some("admin1"));

        UserPatch::unlock().apply(&mut user, now);
        assert!(!user.is_locked);
        assert!(user.locked_reason.is_none());
        assert!(user.locked_by.is_none());
        assert!(user.locked_at.is_none());
    }
}
