//! In-memory record store for tests and local development.

use super::repository::RecordStore;
use crate::models::{
    PaymentPatch, PaymentRecord, PaymentStatus, SubscriptionEventRecord, SubscriptionPatch,
    SubscriptionPlan, User, UserPatch, UserSubscription,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct MockRecordStore {
    users: DashMap<String, User>,
    plans: DashMap<String, SubscriptionPlan>,
    subscriptions: DashMap<String, UserSubscription>,
    events: DashMap<String, SubscriptionEventRecord>,
    payments: DashMap<String, PaymentRecord>,
    fail_writes: AtomicBool,
    fail_user_writes: AtomicBool,
    stale_payments: DashMap<String, PaymentRecord>,
}

impl MockRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(self, plan: SubscriptionPlan) -> Self {
        self.plans.insert(plan.name.clone(), plan);
        self
    }

    pub fn with_user(self, user: User) -> Self {
        self.users.insert(user.id.clone(), user);
        self
    }

    /// Make every subsequent write and health check fail, as if the store
    /// were unreachable.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make user writes fail while the other collections stay writable.
    pub fn set_fail_user_writes(&self, fail: bool) {
        self.fail_user_writes.store(fail, Ordering::SeqCst);
    }

    /// Answer the next `find_payment` for this order with `record` instead
    /// of the stored row, like a read that raced a concurrent writer.
    pub fn serve_stale_payment(&self, record: PaymentRecord) {
        self.stale_payments.insert(record.order_id.clone(), record);
    }

    pub fn user(&self, id: &str) -> Option<User> {
        self.users.get(id).map(|u| u.clone())
    }

    pub fn subscription(&self, gateway_subscription_id: &str) -> Option<UserSubscription> {
        self.subscriptions
            .get(gateway_subscription_id)
            .map(|s| s.clone())
    }

    pub fn payment(&self, order_id: &str) -> Option<PaymentRecord> {
        self.payments.get(order_id).map(|p| p.clone())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn events_for(&self, gateway_subscription_id: &str) -> Vec<SubscriptionEventRecord> {
        let mut events: Vec<_> = self
            .events
            .iter()
            .filter(|e| e.gateway_subscription_id == gateway_subscription_id)
            .map(|e| e.clone())
            .collect();
        events.sort_by_key(|e| e.received_at);
        events
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("record store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MockRecordStore {
    async fn health_check(&self) -> Result<()> {
        self.check_writable()
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.user(id))
    }

    async fn insert_user(&self, user: &User) -> Result<()> {
        self.check_writable()?;
        if self.users.contains_key(&user.id) {
            return Err(anyhow!("duplicate user id {}", user.id));
        }
        self.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn update_user(&self, id: &str, patch: &UserPatch, now: DateTime<Utc>) -> Result<bool> {
        self.check_writable()?;
        if self.fail_user_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("users collection unavailable"));
        }
        Ok(match self.users.get_mut(id) {
            Some(mut user) => {
                patch.apply(&mut user, now);
                true
            }
            None => false,
        })
    }

    async fn find_active_plan(&self, name: &str) -> Result<Option<SubscriptionPlan>> {
        Ok(self
            .plans
            .get(name)
            .filter(|p| p.is_active)
            .map(|p| p.clone()))
    }

    async fn insert_subscription(&self, subscription: &UserSubscription) -> Result<()> {
        self.check_writable()?;
        self.subscriptions.insert(
            subscription.gateway_subscription_id.clone(),
            subscription.clone(),
        );
        Ok(())
    }

    async fn find_subscription(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<UserSubscription>> {
        Ok(self.subscription(gateway_subscription_id))
    }

    async fn latest_paid_subscription_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<UserSubscription>> {
        Ok(self
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.current_period_end.is_some())
            .max_by_key(|s| s.created_at)
            .map(|s| s.clone()))
    }

    async fn update_subscription(
        &self,
        gateway_subscription_id: &str,
        patch: &SubscriptionPatch,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_writable()?;
        Ok(match self.subscriptions.get_mut(gateway_subscription_id) {
            Some(mut subscription) => {
                patch.apply(&mut subscription, now);
                true
            }
            None => false,
        })
    }

    async fn has_subscription_event(&self, id: &str) -> Result<bool> {
        Ok(self.events.contains_key(id))
    }

    async fn record_subscription_event(&self, event: &SubscriptionEventRecord) -> Result<bool> {
        self.check_writable()?;
        Ok(match self.events.entry(event.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(event.clone());
                true
            }
        })
    }

    async fn insert_payment(&self, record: &PaymentRecord) -> Result<()> {
        self.check_writable()?;
        self.payments
            .insert(record.order_id.clone(), record.clone());
        Ok(())
    }

    async fn find_payment(&self, order_id: &str) -> Result<Option<PaymentRecord>> {
        if let Some((_, stale)) = self.stale_payments.remove(order_id) {
            return Ok(Some(stale));
        }
        Ok(self.payment(order_id))
    }

    async fn transition_payment(
        &self,
        order_id: &str,
        from: PaymentStatus,
        patch: &PaymentPatch,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_writable()?;
        Ok(match self.payments.get_mut(order_id) {
            Some(mut record) if record.status == from => {
                patch.apply(&mut record, now);
                true
            }
            _ => false,
        })
    }
}
