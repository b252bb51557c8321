//! Billing plan catalog entry.

use serde::{Deserialize, Serialize};

/// Days the gateway bills per cycle.
const DAYS_PER_CYCLE: u32 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    #[serde(rename = "_id")]
    pub id: String,
    /// Unique lookup key, e.g. "gold".
    pub name: String,
    pub display_name: String,
    /// Plan identifier on the gateway; unbillable when absent.
    #[serde(default)]
    pub gateway_plan_id: Option<String>,
    pub duration_days: u32,
    /// Price in major currency units.
    pub price: f64,
    pub currency: String,
    #[serde(default)]
    pub is_active: bool,
}

impl SubscriptionPlan {
    /// Price in the smallest currency unit (paise for INR).
    pub fn amount_minor(&self) -> u64 {
        (self.price * 100.0).round().max(0.0) as u64
    }

    pub fn billing_cycles(&self) -> u32 {
        billing_cycle_count(self.duration_days)
    }
}

/// Monthly cycles needed to cover `duration_days`, rounded up so a plan is
/// never under-billed. A plan always bills at least one cycle.
pub fn billing_cycle_count(duration_days: u32) -> u32 {
    duration_days.div_ceil(DAYS_PER_CYCLE).max(1)
}
