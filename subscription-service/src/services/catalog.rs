//! Read-only plan lookup.

use crate::error::BillingError;
use crate::models::SubscriptionPlan;
use crate::services::RecordStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct PlanCatalog {
    store: Arc<dyn RecordStore>,
}

impl PlanCatalog {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Active plan by name, whether or not it is set up for recurring billing.
    pub async fn find_active_plan(&self, name: &str) -> Result<SubscriptionPlan, BillingError> {
        self.store
            .find_active_plan(name)
            .await
            .map_err(BillingError::Store)?
            .ok_or_else(|| BillingError::PlanNotFound(name.to_string()))
    }

    /// Active, billable plan by name.
    pub async fn get_active_plan(&self, name: &str) -> Result<SubscriptionPlan, BillingError> {
        let plan = self.find_active_plan(name).await?;

        match plan.gateway_plan_id.as_deref() {
            Some(id) if !id.trim().is_empty() => Ok(plan),
            _ => {
                tracing::error!(plan = %name, "Plan has no gateway plan id");
                Err(BillingError::PlanMisconfigured(name.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MockRecordStore;

    fn plan(name: &str, gateway_plan_id: Option<&str>, is_active: bool) -> SubscriptionPlan {
        SubscriptionPlan {
            id: format!("plan-{}", name),
            name: name.to_string(),
            display_name: name.to_uppercase(),
            gateway_plan_id: gateway_plan_id.map(str::to_string),
            duration_days: 30,
            price: 499.0,
            currency: "INR".to_string(),
            is_active,
        }
    }

    fn catalog() -> PlanCatalog {
        let store = MockRecordStore::new()
            .with_plan(plan("gold", Some("plan_abc"), true))
            .with_plan(plan("retired", Some("plan_old"), false))
            .with_plan(plan("draft", None, true))
            .with_plan(plan("blank", Some("  "), true));
        PlanCatalog::new(Arc::new(store))
    }

    #[tokio::test]
    async fn finds_active_billable_plan() {
        let plan = catalog().get_active_plan("gold").await.unwrap();
        assert_eq!(plan.gateway_plan_id.as_deref(), Some("plan_abc"));
    }

    #[tokio::test]
    async fn inactive_or_missing_plan_is_not_found() {
        let catalog = catalog();
        assert!(matches!(
            catalog.get_active_plan("retired").await,
            Err(BillingError::PlanNotFound(_))
        ));
        assert!(matches!(
            catalog.get_active_plan("platinum").await,
            Err(BillingError::PlanNotFound(_))
        ));
    }

    #[tokio::test]
    async fn plan_without_gateway_id_is_misconfigured() {
        let catalog = catalog();
        assert!(matches!(
            catalog.get_active_plan("draft").await,
            Err(BillingError::PlanMisconfigured(_))
        ));
        assert!(matches!(
            catalog.get_active_plan("blank").await,
            Err(BillingError::PlanMisconfigured(_))
        ));
    }

    #[tokio::test]
    async fn one_time_lookup_does_not_need_gateway_id() {
        let plan = catalog().find_active_plan("draft").await.unwrap();
        assert!(plan.gateway_plan_id.is_none());
    }
}
