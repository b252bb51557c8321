//! Entitlement evaluation.
//!
//! Everything above [`AccessService`] is pure and needs no I/O, so it can run
//! on every protected request. Missing or unreadable dates never grant
//! access: a window without a known end is treated as closed.

use crate::error::BillingError;
use crate::models::{SubscriptionStatus, User, UserPatch};
use crate::services::{metrics, RecordStore};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::sync::Arc;

/// Where a denied user is sent to regain access.
pub const BILLING_REDIRECT: &str = "/billing";

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    Locked,
    TrialExpired,
    SubscriptionExpired,
    NoEntitlement,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::Locked => "locked",
            DenialReason::TrialExpired => "trial_expired",
            DenialReason::SubscriptionExpired => "subscription_expired",
            DenialReason::NoEntitlement => "no_entitlement",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaysRemaining {
    Unlimited,
    Days(u32),
}

impl Serialize for DaysRemaining {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DaysRemaining::Unlimited => serializer.serialize_none(),
            DaysRemaining::Days(days) => serializer.serialize_u32(*days),
        }
    }
}

/// End of the window that currently entitles the user, if any.
///
/// A cancelled subscription stays entitled until the paid period runs out.
pub fn entitlement_end(user: &User) -> Option<DateTime<Utc>> {
    match user.subscription_status {
        SubscriptionStatus::Trial => user.trial_end_date,
        SubscriptionStatus::Active | SubscriptionStatus::Cancelled => user.subscription_end_date,
        _ => None,
    }
}

pub fn can_access_system(user: &User, now: DateTime<Utc>) -> bool {
    denial_reason(user, now).is_none()
}

pub fn denial_reason(user: &User, now: DateTime<Utc>) -> Option<DenialReason> {
    if user.is_admin() {
        return None;
    }
    if user.is_locked {
        return Some(DenialReason::Locked);
    }

    let window_open = entitlement_end(user).is_some_and(|end| now < end);
    if window_open {
        return None;
    }

    Some(match user.subscription_status {
        SubscriptionStatus::Trial => DenialReason::TrialExpired,
        SubscriptionStatus::Active
        | SubscriptionStatus::Cancelled
        | SubscriptionStatus::Expired => DenialReason::SubscriptionExpired,
        SubscriptionStatus::Completed | SubscriptionStatus::Unknown => {
            DenialReason::NoEntitlement
        }
    })
}

/// Whole days left in the current window, rounded up and never negative.
pub fn days_remaining(user: &User, now: DateTime<Utc>) -> DaysRemaining {
    if user.is_admin() {
        return DaysRemaining::Unlimited;
    }

    let days = entitlement_end(user)
        .map(|end| (end - now).num_milliseconds())
        .filter(|millis| *millis > 0)
        .map(|millis| (millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY)
        .unwrap_or(0);

    DaysRemaining::Days(u32::try_from(days).unwrap_or(u32::MAX))
}

/// The status change needed once a window has run out, if any.
///
/// Trials and subscriptions end on their own without any gateway event, so
/// this local check is what catches them.
pub fn reconcile_expiry(user: &User, now: DateTime<Utc>) -> Option<UserPatch> {
    if user.is_admin() {
        return None;
    }

    match user.subscription_status {
        SubscriptionStatus::Trial
        | SubscriptionStatus::Active
        | SubscriptionStatus::Cancelled => {
            let expired = entitlement_end(user).map_or(true, |end| now >= end);
            expired.then(|| UserPatch::status(SubscriptionStatus::Expired))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub user_id: String,
    pub status: SubscriptionStatus,
    pub can_access: bool,
    pub days_remaining: DaysRemaining,
    pub access_ends_at: Option<DateTime<Utc>>,
    pub is_admin: bool,
    pub is_locked: bool,
    pub denial_reason: Option<DenialReason>,
}

pub fn evaluate(user: &User, now: DateTime<Utc>) -> Entitlement {
    let denial_reason = denial_reason(user, now);
    Entitlement {
        user_id: user.id.clone(),
        status: user.subscription_status,
        can_access: denial_reason.is_none(),
        days_remaining: days_remaining(user, now),
        access_ends_at: if user.is_admin() {
            None
        } else {
            entitlement_end(user)
        },
        is_admin: user.is_admin(),
        is_locked: user.is_locked,
        denial_reason,
    }
}

/// Loads a user, applies lazy expiry and evaluates entitlement.
#[derive(Clone)]
pub struct AccessService {
    store: Arc<dyn RecordStore>,
}

impl AccessService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Run at login and on session refresh.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Entitlement, BillingError> {
        let mut user = self
            .store
            .get_user(user_id)
            .await
            .map_err(BillingError::Store)?
            .ok_or_else(|| BillingError::RecordNotFound(format!("user {}", user_id)))?;

        if let Some(patch) = reconcile_expiry(&user, now) {
            tracing::info!(
                user_id = %user.id,
                from = %user.subscription_status.as_str(),
                "Entitlement window elapsed, marking expired"
            );
            // The evaluation below uses the reconciled user either way; a
            // failed write only delays persisting it until the next check.
            if let Err(e) = self.store.update_user(&user.id, &patch, now).await {
                tracing::warn!(user_id = %user.id, error = %e, "Failed to persist expiry");
                metrics::record_persistence_warning("reconcile_expiry");
            }
            patch.apply(&mut user, now);
        }

        let entitlement = evaluate(&user, now);
        if let Some(reason) = entitlement.denial_reason {
            metrics::record_access_denied(reason.as_str());
        }
        Ok(entitlement)
    }
}
