//! Record store: the document collections this service reads and writes.

use crate::models::{
    PaymentPatch, PaymentRecord, PaymentStatus, SubscriptionEventRecord, SubscriptionPatch,
    SubscriptionPlan, User, UserPatch, UserSubscription,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOneOptions, IndexOptions};
use mongodb::{
    bson::{doc, to_bson},
    Collection, Database, IndexModel,
};

const DUPLICATE_KEY: i32 = 11000;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Cheap round trip used by the readiness check.
    async fn health_check(&self) -> Result<()>;

    async fn get_user(&self, id: &str) -> Result<Option<User>>;
    async fn insert_user(&self, user: &User) -> Result<()>;
    /// Returns `false` when no user with `id` exists.
    async fn update_user(&self, id: &str, patch: &UserPatch, now: DateTime<Utc>) -> Result<bool>;

    async fn find_active_plan(&self, name: &str) -> Result<Option<SubscriptionPlan>>;

    async fn insert_subscription(&self, subscription: &UserSubscription) -> Result<()>;
    async fn find_subscription(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<UserSubscription>>;
    /// Most recently created subscription for a user that has been paid for
    /// at least once (it carries a billing period). Unpaid checkouts never
    /// count.
    async fn latest_paid_subscription_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<UserSubscription>>;
    async fn update_subscription(
        &self,
        gateway_subscription_id: &str,
        patch: &SubscriptionPatch,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn has_subscription_event(&self, id: &str) -> Result<bool>;
    /// Insert-if-absent. Returns `false` when the event was already recorded.
    async fn record_subscription_event(&self, event: &SubscriptionEventRecord) -> Result<bool>;

    async fn insert_payment(&self, record: &PaymentRecord) -> Result<()>;
    async fn find_payment(&self, order_id: &str) -> Result<Option<PaymentRecord>>;
    /// Applies `patch` only while the record is still in status `from`.
    /// Returns `false` when it is missing or has already moved on.
    async fn transition_payment(
        &self,
        order_id: &str,
        from: PaymentStatus,
        patch: &PaymentPatch,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

#[derive(Clone)]
pub struct MongoRecordStore {
    db: Database,
    users: Collection<User>,
    plans: Collection<SubscriptionPlan>,
    subscriptions: Collection<UserSubscription>,
    events: Collection<SubscriptionEventRecord>,
    payments: Collection<PaymentRecord>,
}

impl MongoRecordStore {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            users: db.collection("users"),
            plans: db.collection("subscription_plans"),
            subscriptions: db.collection("user_subscriptions"),
            events: db.collection("subscription_events"),
            payments: db.collection("payments"),
        }
    }

    pub async fn init_indexes(&self) -> Result<()> {
        let plan_name_index = IndexModel::builder()
            .keys(doc! { "name": 1 })
            .options(
                IndexOptions::builder()
                    .name("plan_name_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.plans.create_indexes([plan_name_index], None).await?;

        // Latest-subscription-per-user lookups
        let user_subscription_index = IndexModel::builder()
            .keys(doc! { "user_id": 1, "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("user_subscription_idx".to_string())
                    .build(),
            )
            .build();

        self.subscriptions
            .create_indexes([user_subscription_index], None)
            .await?;

        let event_subscription_index = IndexModel::builder()
            .keys(doc! { "gateway_subscription_id": 1, "received_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("event_subscription_idx".to_string())
                    .build(),
            )
            .build();

        self.events
            .create_indexes([event_subscription_index], None)
            .await?;

        tracing::info!("Subscription service indexes initialized");
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl RecordStore for MongoRecordStore {
    async fn health_check(&self) -> Result<()> {
        self.db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.users.find_one(doc! { "_id": id }, None).await?)
    }

    async fn insert_user(&self, user: &User) -> Result<()> {
        self.users.insert_one(user, None).await?;
        Ok(())
    }

    async fn update_user(&self, id: &str, patch: &UserPatch, now: DateTime<Utc>) -> Result<bool> {
        let result = self
            .users
            .update_one(doc! { "_id": id }, patch.to_update(now)?, None)
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn find_active_plan(&self, name: &str) -> Result<Option<SubscriptionPlan>> {
        let filter = doc! { "name": name, "is_active": true };
        Ok(self.plans.find_one(filter, None).await?)
    }

    async fn insert_subscription(&self, subscription: &UserSubscription) -> Result<()> {
        self.subscriptions.insert_one(subscription, None).await?;
        Ok(())
    }

    async fn find_subscription(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<UserSubscription>> {
        let filter = doc! { "_id": gateway_subscription_id };
        Ok(self.subscriptions.find_one(filter, None).await?)
    }

    async fn latest_paid_subscription_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<UserSubscription>> {
        let options = FindOneOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        let filter = doc! { "user_id": user_id, "current_period_end": { "$ne": null } };
        Ok(self.subscriptions.find_one(filter, options).await?)
    }

    async fn update_subscription(
        &self,
        gateway_subscription_id: &str,
        patch: &SubscriptionPatch,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = self
            .subscriptions
            .update_one(
                doc! { "_id": gateway_subscription_id },
                patch.to_update(now)?,
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn has_subscription_event(&self, id: &str) -> Result<bool> {
        let count = self
            .events
            .count_documents(doc! { "_id": id }, None)
            .await?;
        Ok(count > 0)
    }

    async fn record_subscription_event(&self, event: &SubscriptionEventRecord) -> Result<bool> {
        match self.events.insert_one(event, None).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_payment(&self, record: &PaymentRecord) -> Result<()> {
        self.payments.insert_one(record, None).await?;
        Ok(())
    }

    async fn find_payment(&self, order_id: &str) -> Result<Option<PaymentRecord>> {
        Ok(self.payments.find_one(doc! { "_id": order_id }, None).await?)
    }

    async fn transition_payment(
        &self,
        order_id: &str,
        from: PaymentStatus,
        patch: &PaymentPatch,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let filter = doc! { "_id": order_id, "status": to_bson(&from)? };
        let result = self
            .payments
            .update_one(filter, patch.to_update(now)?, None)
            .await?;
        Ok(result.matched_count > 0)
    }
}
