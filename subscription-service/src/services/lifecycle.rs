//! Subscription state machine driven by verified gateway events.
//!
//! Period fields are absolute overwrites taken from the event, so replays
//! and reordered deliveries converge. Every applied event is written to the
//! `subscription_events` ledger last; a delivery whose ledger row already
//! exists is a duplicate and changes nothing.

use crate::error::BillingError;
use crate::models::{
    FieldUpdate, GatewaySubscriptionStatus, LifecycleEvent, SubscriptionEntity,
    SubscriptionEventRecord, SubscriptionPatch, SubscriptionStatus, UserPatch, UserSubscription,
};
use crate::services::webhook::WebhookOutcome;
use crate::services::RecordStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct SubscriptionLifecycle {
    store: Arc<dyn RecordStore>,
}

impl SubscriptionLifecycle {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip_all, fields(gateway_subscription_id = %entity.id, event = event.as_str()))]
    pub async fn apply(
        &self,
        event: LifecycleEvent,
        entity: &SubscriptionEntity,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, BillingError> {
        let Some(subscription) = self
            .store
            .find_subscription(&entity.id)
            .await
            .map_err(BillingError::Store)?
        else {
            tracing::warn!("No local subscription for gateway event");
            return Ok(match event {
                LifecycleEvent::Charged => WebhookOutcome::Ignored,
                _ => WebhookOutcome::RecordNotFound,
            });
        };

        let period_end = entity.period_end();
        let key = SubscriptionEventRecord::dedupe_key(
            &entity.id,
            event.as_str(),
            period_end,
            entity.paid_count,
        );
        if self
            .store
            .has_subscription_event(&key)
            .await
            .map_err(BillingError::Store)?
        {
            tracing::info!(dedupe_key = %key, "Duplicate delivery, already applied");
            return Ok(WebhookOutcome::Duplicate);
        }

        let Some(next) = subscription.status.next(event) else {
            tracing::warn!(
                status = subscription.status.as_str(),
                "Transition not allowed, event ignored"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        let fresh = is_fresh_period(&subscription, period_end);
        if !fresh {
            tracing::info!("Event period is older than the stored one, keeping period");
        }

        let patch = subscription_patch(event, next, entity, fresh);
        let updated = self
            .store
            .update_subscription(&entity.id, &patch, now)
            .await
            .map_err(BillingError::Store)?;
        if !updated {
            tracing::warn!("Subscription disappeared before update");
            return Ok(WebhookOutcome::RecordNotFound);
        }

        self.apply_user_effects(event, &subscription, entity, fresh, now)
            .await?;

        let record = SubscriptionEventRecord {
            id: key,
            gateway_subscription_id: entity.id.clone(),
            event: event.as_str().to_string(),
            period_start: entity.period_start(),
            period_end,
            paid_count: entity.paid_count,
            resulting_status: next,
            received_at: now,
        };
        let recorded = self
            .store
            .record_subscription_event(&record)
            .await
            .map_err(BillingError::Store)?;
        if !recorded {
            tracing::info!(dedupe_key = %record.id, "Concurrent delivery recorded first");
            return Ok(WebhookOutcome::Duplicate);
        }

        tracing::info!(
            from = subscription.status.as_str(),
            to = next.as_str(),
            paid_count = entity.paid_count,
            "Subscription event applied"
        );
        Ok(WebhookOutcome::Applied)
    }

    async fn apply_user_effects(
        &self,
        event: LifecycleEvent,
        subscription: &UserSubscription,
        entity: &SubscriptionEntity,
        fresh: bool,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        let patch = match event {
            LifecycleEvent::Activated | LifecycleEvent::Charged if fresh => UserPatch {
                subscription_status: FieldUpdate::Set(SubscriptionStatus::Active),
                subscription_start_date: FieldUpdate::from(entity.period_start()),
                subscription_end_date: FieldUpdate::from(entity.period_end()),
                ..Default::default()
            },
            LifecycleEvent::Cancelled => UserPatch::status(SubscriptionStatus::Cancelled),
            _ => return Ok(()),
        };

        // A newer subscription that has been paid for owns the user's window.
        // Unpaid checkouts never take it over.
        let latest_paid = self
            .store
            .latest_paid_subscription_for_user(&subscription.user_id)
            .await
            .map_err(BillingError::Store)?;
        let superseded = latest_paid.is_some_and(|other| {
            other.gateway_subscription_id != subscription.gateway_subscription_id
                && other.created_at > subscription.created_at
        });
        if superseded {
            tracing::info!(
                user_id = %subscription.user_id,
                "Event is for a superseded subscription, user left unchanged"
            );
            return Ok(());
        }

        if event == LifecycleEvent::Cancelled {
            // Only a paying user moves to cancelled; a trial stays a trial.
            let user = self
                .store
                .get_user(&subscription.user_id)
                .await
                .map_err(BillingError::Store)?;
            let active = user.is_some_and(|u| u.subscription_status == SubscriptionStatus::Active);
            if !active {
                return Ok(());
            }
        }

        let found = self
            .store
            .update_user(&subscription.user_id, &patch, now)
            .await
            .map_err(BillingError::Store)?;
        if !found {
            tracing::warn!(user_id = %subscription.user_id, "Subscription owner not found");
        }
        Ok(())
    }
}

/// Whether the event's period may overwrite the stored one. An event with no
/// period end never does.
fn is_fresh_period(subscription: &UserSubscription, period_end: Option<DateTime<Utc>>) -> bool {
    match (period_end, subscription.current_period_end) {
        (Some(incoming), Some(stored)) => incoming >= stored,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

fn subscription_patch(
    event: LifecycleEvent,
    next: GatewaySubscriptionStatus,
    entity: &SubscriptionEntity,
    fresh: bool,
) -> SubscriptionPatch {
    let mut patch = SubscriptionPatch {
        status: FieldUpdate::Set(next),
        ..Default::default()
    };

    if matches!(event, LifecycleEvent::Activated | LifecycleEvent::Charged) && fresh {
        patch.current_period_start = FieldUpdate::from(entity.period_start());
        patch.current_period_end = FieldUpdate::from(entity.period_end());
        patch.paid_count = FieldUpdate::Set(entity.paid_count);
    }
    patch
}
