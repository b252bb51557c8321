//! Recurring subscription provisioning against the payment gateway.

use crate::error::BillingError;
use crate::models::{GatewaySubscriptionStatus, SubscriptionPlan, UserSubscription};
use crate::services::razorpay::CreateSubscriptionRequest;
use crate::services::{metrics, PlanCatalog, RazorpayClient, RecordStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

const UNRESOLVED_PLAN: &str = "unknown";

/// Absent fields deserialize as empty so they fail validation, not parsing.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvisionRequest {
    #[validate(length(min = 1, message = "userId is required"))]
    pub user_id: String,
    #[validate(length(min = 1, message = "planName is required"))]
    pub plan_name: String,
    #[validate(email(message = "userEmail must be a valid email"))]
    pub user_email: String,
    #[validate(length(min = 1, message = "userName is required"))]
    pub user_name: String,
}

impl ProvisionRequest {
    fn check(&self) -> Result<(), BillingError> {
        self.validate()
            .map_err(|e| BillingError::InvalidRequest(e.to_string()))?;

        let blank = [
            ("userId", &self.user_id),
            ("planName", &self.plan_name),
            ("userName", &self.user_name),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty());

        match blank {
            Some((field, _)) => Err(BillingError::InvalidRequest(format!(
                "{} is required",
                field
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedSubscription {
    pub id: String,
    pub status: String,
    pub payment_url: Option<String>,
    pub plan_name: String,
    pub amount: f64,
    pub currency: String,
}

#[derive(Clone)]
pub struct SubscriptionProvisioner {
    store: Arc<dyn RecordStore>,
    catalog: PlanCatalog,
    gateway: RazorpayClient,
    origin_system: String,
    environment: String,
}

impl SubscriptionProvisioner {
    pub fn new(
        store: Arc<dyn RecordStore>,
        catalog: PlanCatalog,
        gateway: RazorpayClient,
        origin_system: String,
        environment: String,
    ) -> Self {
        Self {
            store,
            catalog,
            gateway,
            origin_system,
            environment,
        }
    }

    /// Creates a gateway subscription and records it locally as `created`.
    ///
    /// Only the gateway calls can fail this operation. Once the gateway has
    /// issued a payment link the caller gets it, even if the local record
    /// could not be written.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id, plan = %request.plan_name))]
    pub async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionedSubscription, BillingError> {
        // Metric labels only ever carry catalog plan names.
        let plan = match self.resolve_plan(request).await {
            Ok(plan) => plan,
            Err(e) => {
                metrics::record_provisioning(UNRESOLVED_PLAN, "rejected");
                return Err(e);
            }
        };

        let result = self.provision_plan(request, &plan).await;
        let outcome = match &result {
            Ok(_) => "created",
            Err(BillingError::GatewayError(_)) => "gateway_error",
            Err(BillingError::ProvisionFailed(_)) => "provision_failed",
            Err(_) => "rejected",
        };
        metrics::record_provisioning(&plan.name, outcome);
        result
    }

    async fn resolve_plan(&self, request: &ProvisionRequest) -> Result<SubscriptionPlan, BillingError> {
        request.check()?;
        self.catalog.get_active_plan(&request.plan_name).await
    }

    async fn provision_plan(
        &self,
        request: &ProvisionRequest,
        plan: &SubscriptionPlan,
    ) -> Result<ProvisionedSubscription, BillingError> {
        let gateway_plan_id = plan
            .gateway_plan_id
            .clone()
            .ok_or_else(|| BillingError::PlanMisconfigured(plan.name.clone()))?;

        let customer = self
            .gateway
            .create_or_fetch_customer(&request.user_name, &request.user_email)
            .await?;

        let total_count = plan.billing_cycles();
        let gateway_request = CreateSubscriptionRequest {
            plan_id: gateway_plan_id.clone(),
            customer_id: customer.id.clone(),
            total_count,
            quantity: 1,
            customer_notify: 1,
            notes: json!({
                "source": self.origin_system,
                "environment": self.environment,
                "user_id": request.user_id,
                "plan_name": plan.name,
            }),
        };
        let created = self.gateway.create_subscription(&gateway_request).await?;

        let now = Utc::now();
        let record = UserSubscription {
            gateway_subscription_id: created.id.clone(),
            gateway_customer_id: created.customer_id.clone().unwrap_or(customer.id),
            user_id: request.user_id.clone(),
            plan_id: gateway_plan_id,
            plan_name: plan.name.clone(),
            status: GatewaySubscriptionStatus::Created,
            payment_url: created.short_url.clone(),
            current_period_start: None,
            current_period_end: None,
            paid_count: 0,
            total_count: created.total_count.unwrap_or(total_count),
            amount: plan.price,
            currency: plan.currency.clone(),
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.store.insert_subscription(&record).await {
            tracing::warn!(
                gateway_subscription_id = %record.gateway_subscription_id,
                error = %e,
                "Subscription created at gateway but not recorded locally"
            );
            metrics::record_persistence_warning("insert_subscription");
        } else {
            tracing::info!(
                gateway_subscription_id = %record.gateway_subscription_id,
                total_count = record.total_count,
                "Subscription provisioned"
            );
        }

        Ok(ProvisionedSubscription {
            id: created.id,
            status: GatewaySubscriptionStatus::Created.as_str().to_string(),
            payment_url: created.short_url,
            plan_name: plan.name.clone(),
            amount: plan.price,
            currency: plan.currency.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RazorpayConfig;
    use crate::services::MockRecordStore;
    use secrecy::Secret;

    fn provisioner(store: Arc<MockRecordStore>) -> SubscriptionProvisioner {
        let gateway = RazorpayClient::new(RazorpayConfig {
            key_id: "rzp_test".to_string(),
            key_secret: Secret::new("secret".to_string()),
            webhook_secret: Secret::new("whsec".to_string()),
            // Nothing listens here; these tests must fail before any call.
            api_base_url: "http://127.0.0.1:9".to_string(),
            timeout_seconds: 1,
        })
        .unwrap();
        SubscriptionProvisioner::new(
            store.clone(),
            PlanCatalog::new(store),
            gateway,
            "policy-backoffice".to_string(),
            "test".to_string(),
        )
    }

    fn request() -> ProvisionRequest {
        ProvisionRequest {
            user_id: "u1".to_string(),
            plan_name: "Gold".to_string(),
            user_email: "gold@x.com".to_string(),
            user_name: "Gold User".to_string(),
        }
    }

    #[tokio::test]
    async fn missing_fields_are_invalid() {
        let store = Arc::new(MockRecordStore::new());
        let provisioner = provisioner(store.clone());

        for bad in [
            ProvisionRequest {
                user_id: "".to_string(),
                ..request()
            },
            ProvisionRequest {
                plan_name: "   ".to_string(),
                ..request()
            },
            ProvisionRequest {
                user_email: "not-an-email".to_string(),
                ..request()
            },
        ] {
            let err = provisioner.provision(&bad).await.unwrap_err();
            assert!(matches!(err, BillingError::InvalidRequest(_)), "{:?}", err);
        }
        assert_eq!(store.subscription_count(), 0);
    }

    #[tokio::test]
    async fn unknown_plan_is_not_found() {
        let store = Arc::new(MockRecordStore::new());
        let err = provisioner(store).provision(&request()).await.unwrap_err();
        assert!(matches!(err, BillingError::PlanNotFound(name) if name == "Gold"));
    }

    #[tokio::test]
    async fn unresolved_plan_names_are_not_metric_labels() {
        // Only the first init in a test binary succeeds.
        let _ = metrics::init_metrics();
        let store = Arc::new(MockRecordStore::new());
        let bogus = ProvisionRequest {
            plan_name: "zz-caller-chosen-7f3a".to_string(),
            ..request()
        };

        let err = provisioner(store).provision(&bogus).await.unwrap_err();

        assert!(matches!(err, BillingError::PlanNotFound(_)));
        let rendered = metrics::get_metrics();
        assert!(!rendered.contains("zz-caller-chosen-7f3a"));
        assert!(rendered.contains(r#"plan="unknown""#));
    }
}
