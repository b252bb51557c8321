//! Legacy one-time order bookkeeping.

use chrono::{DateTime, Utc};
use mongodb::bson;
use serde::{Deserialize, Serialize};

use super::patch::{FieldUpdate, UpdateDocument};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaymentRecord {
    /// Gateway order id.
    #[serde(rename = "_id")]
    pub order_id: String,
    pub user_id: String,
    pub plan_name: String,
    pub receipt: String,
    /// Amount in the smallest currency unit.
    pub amount: u64,
    pub currency: String,
    pub status: PaymentStatus,
    /// Entitlement granted once the payment succeeds.
    pub subscription_days: u32,
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentPatch {
    pub status: FieldUpdate<PaymentStatus>,
    pub payment_id: FieldUpdate<String>,
    pub error_message: FieldUpdate<String>,
}

impl PaymentPatch {
    pub fn apply(&self, record: &mut PaymentRecord, now: DateTime<Utc>) {
        self.status.apply_to_required(&mut record.status);
        self.payment_id.apply_to(&mut record.payment_id);
        self.error_message.apply_to(&mut record.error_message);
        record.updated_at = now;
    }

    pub fn to_update(&self, now: DateTime<Utc>) -> Result<bson::Document, bson::ser::Error> {
        let mut update = UpdateDocument::new();
        update
            .field("status", &self.status)?
            .field("payment_id", &self.payment_id)?
            .field("error_message", &self.error_message)?;
        update.finish(now)
    }
}
