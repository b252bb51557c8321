//! Legacy one-time order flow: pending, then success or failed, once.

use crate::error::BillingError;
use crate::models::{
    FieldUpdate, PaymentPatch, PaymentRecord, PaymentStatus, SubscriptionStatus, UserPatch,
};
use crate::services::webhook::WebhookOutcome;
use crate::services::{metrics, PlanCatalog, RazorpayClient, RecordStore};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

/// Razorpay rejects longer receipts.
pub const MAX_RECEIPT_LEN: usize = 40;

/// `rcpt_{first 8 chars of user id}_{last 10 digits of epoch millis}`.
pub fn build_receipt(user_id: &str, epoch_millis: i64) -> String {
    let short_user: String = user_id.chars().take(8).collect();
    let millis = epoch_millis.to_string();
    let tail = &millis[millis.len().saturating_sub(10)..];

    format!("rcpt_{}_{}", short_user, tail)
        .chars()
        .take(MAX_RECEIPT_LEN)
        .collect()
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "userId is required"))]
    pub user_id: String,
    #[validate(length(min = 1, message = "planName is required"))]
    pub plan_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    pub order_id: String,
    pub amount: u64,
    pub currency: String,
    pub receipt: String,
    /// Public key the checkout widget needs.
    pub key_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct VerifyPaymentRequest {
    #[validate(length(min = 1, message = "orderId is required"))]
    pub order_id: String,
    #[validate(length(min = 1, message = "paymentId is required"))]
    pub payment_id: String,
    #[validate(length(min = 1, message = "signature is required"))]
    pub signature: String,
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn RecordStore>,
    catalog: PlanCatalog,
    gateway: RazorpayClient,
    origin_system: String,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        catalog: PlanCatalog,
        gateway: RazorpayClient,
        origin_system: String,
    ) -> Self {
        Self {
            store,
            catalog,
            gateway,
            origin_system,
        }
    }

    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id, plan = %request.plan_name))]
    pub async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<CreatedOrder, BillingError> {
        request
            .validate()
            .map_err(|e| BillingError::InvalidRequest(e.to_string()))?;

        self.store
            .get_user(&request.user_id)
            .await
            .map_err(BillingError::Store)?
            .ok_or_else(|| BillingError::RecordNotFound(format!("user {}", request.user_id)))?;

        let plan = self.catalog.find_active_plan(&request.plan_name).await?;
        let amount = plan.amount_minor();
        let now = Utc::now();
        let receipt = build_receipt(&request.user_id, now.timestamp_millis());

        let order = self
            .gateway
            .create_order(
                amount,
                &plan.currency,
                &receipt,
                Some(json!({
                    "source": self.origin_system,
                    "user_id": request.user_id,
                    "plan_name": plan.name,
                })),
            )
            .await?;

        let record = PaymentRecord {
            order_id: order.id.clone(),
            user_id: request.user_id.clone(),
            plan_name: plan.name.clone(),
            receipt: receipt.clone(),
            amount: order.amount,
            currency: order.currency.clone(),
            status: PaymentStatus::Pending,
            subscription_days: plan.duration_days,
            payment_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.store.insert_payment(&record).await {
            tracing::warn!(order_id = %order.id, error = %e, "Order created at gateway but not recorded locally");
            metrics::record_persistence_warning("insert_payment");
        }

        Ok(CreatedOrder {
            order_id: order.id,
            amount: order.amount,
            currency: order.currency,
            receipt,
            key_id: self.gateway.key_id().to_string(),
        })
    }

    /// Checkout callback: checks `HMAC(orderId|paymentId)` and, if it holds,
    /// completes the order exactly like a captured-payment webhook would.
    pub async fn verify_payment(
        &self,
        request: &VerifyPaymentRequest,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, BillingError> {
        request
            .validate()
            .map_err(|e| BillingError::InvalidRequest(e.to_string()))?;

        let valid = self
            .gateway
            .verify_payment_signature(&request.order_id, &request.payment_id, &request.signature)
            .map_err(|e| {
                tracing::error!(error = %e, "Payment signature check failed to run");
                BillingError::InvalidSignature
            })?;
        if !valid {
            tracing::warn!(order_id = %request.order_id, "Payment signature mismatch");
            return Err(BillingError::InvalidSignature);
        }

        self.complete_payment(&request.order_id, &request.payment_id, None, now)
            .await
    }

    /// `pending -> success`; grants `subscriptionDays` of access from `now`.
    ///
    /// `amount`, when the gateway reports one, must match the order.
    #[tracing::instrument(skip(self, now))]
    pub async fn complete_payment(
        &self,
        order_id: &str,
        payment_id: &str,
        amount: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, BillingError> {
        let Some(record) = self.find_payment(order_id).await? else {
            return Ok(WebhookOutcome::RecordNotFound);
        };

        match record.status {
            PaymentStatus::Success => return Ok(WebhookOutcome::Duplicate),
            PaymentStatus::Failed => {
                tracing::warn!("Payment already marked failed, ignoring success");
                return Ok(WebhookOutcome::Ignored);
            }
            PaymentStatus::Pending => {}
        }

        if let Some(paid) = amount.filter(|paid| *paid != record.amount) {
            tracing::error!(expected = record.amount, paid, "Payment amount mismatch");
            return Ok(WebhookOutcome::Ignored);
        }

        // Claim the order before granting. A concurrent delivery that read
        // the same pending record loses the claim and grants nothing.
        let patch = PaymentPatch {
            status: FieldUpdate::Set(PaymentStatus::Success),
            payment_id: FieldUpdate::Set(payment_id.to_string()),
            error_message: FieldUpdate::Clear,
        };
        let claimed = self
            .store
            .transition_payment(order_id, PaymentStatus::Pending, &patch, now)
            .await
            .map_err(BillingError::Store)?;
        if !claimed {
            tracing::info!("Order settled by a concurrent delivery");
            return Ok(WebhookOutcome::Duplicate);
        }

        let grant = UserPatch {
            subscription_status: FieldUpdate::Set(SubscriptionStatus::Active),
            subscription_start_date: FieldUpdate::Set(now),
            subscription_end_date: FieldUpdate::Set(
                now + Duration::days(i64::from(record.subscription_days)),
            ),
            ..Default::default()
        };
        match self.store.update_user(&record.user_id, &grant, now).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(user_id = %record.user_id, "Order owner not found"),
            Err(e) => {
                self.release_claim(order_id, now).await;
                return Err(BillingError::Store(e));
            }
        }

        tracing::info!(
            user_id = %record.user_id,
            days = record.subscription_days,
            "One-time payment completed"
        );
        Ok(WebhookOutcome::Applied)
    }

    /// `pending -> failed` with the gateway's error description.
    #[tracing::instrument(skip(self, now))]
    pub async fn fail_payment(
        &self,
        order_id: &str,
        payment_id: &str,
        error_description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, BillingError> {
        let Some(record) = self.find_payment(order_id).await? else {
            return Ok(WebhookOutcome::RecordNotFound);
        };

        match record.status {
            PaymentStatus::Failed => return Ok(WebhookOutcome::Duplicate),
            PaymentStatus::Success => return Ok(WebhookOutcome::Ignored),
            PaymentStatus::Pending => {}
        }

        let patch = PaymentPatch {
            status: FieldUpdate::Set(PaymentStatus::Failed),
            payment_id: FieldUpdate::Set(payment_id.to_string()),
            error_message: FieldUpdate::Set(
                error_description.unwrap_or("Payment failed").to_string(),
            ),
        };
        let settled = self
            .store
            .transition_payment(order_id, PaymentStatus::Pending, &patch, now)
            .await
            .map_err(BillingError::Store)?;
        if !settled {
            tracing::info!("Order settled by a concurrent delivery");
            return Ok(WebhookOutcome::Ignored);
        }

        tracing::info!(user_id = %record.user_id, "One-time payment failed");
        Ok(WebhookOutcome::Applied)
    }

    /// Hand a claimed order back to `pending` so a redelivery can finish the
    /// grant.
    async fn release_claim(&self, order_id: &str, now: DateTime<Utc>) {
        let patch = PaymentPatch {
            status: FieldUpdate::Set(PaymentStatus::Pending),
            payment_id: FieldUpdate::Clear,
            error_message: FieldUpdate::Unchanged,
        };
        if let Err(e) = self
            .store
            .transition_payment(order_id, PaymentStatus::Success, &patch, now)
            .await
        {
            tracing::error!(order_id, error = %e, "Order marked paid but access was not granted");
            metrics::record_persistence_warning("release_payment");
        }
    }

    async fn find_payment(&self, order_id: &str) -> Result<Option<PaymentRecord>, BillingError> {
        let record = self
            .store
            .find_payment(order_id)
            .await
            .map_err(BillingError::Store)?;
        if record.is_none() {
            tracing::warn!(order_id, "No local payment record for order");
        }
        Ok(record)
    }
}
