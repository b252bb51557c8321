//! Error taxonomy of the subscription lifecycle.

use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("Plan {0} has no gateway plan id")]
    PlanMisconfigured(String),

    /// The gateway answered and rejected the call.
    #[error("Payment gateway error: {0}")]
    GatewayError(String),

    /// The gateway could not be reached in time; nothing was provisioned
    /// from the caller's point of view.
    #[error("Provisioning failed: {0}")]
    ProvisionFailed(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Record store unreachable or failing; safe to retry.
    #[error("Record store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidRequest(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            BillingError::PlanNotFound(name) => {
                AppError::NotFound(anyhow::anyhow!("Plan not found: {}", name))
            }
            BillingError::PlanMisconfigured(name) => AppError::BadRequest(anyhow::anyhow!(
                "Plan {} is not configured for billing",
                name
            )),
            BillingError::GatewayError(msg) => AppError::UpstreamError(msg),
            BillingError::ProvisionFailed(msg) => AppError::BadGateway(msg),
            BillingError::InvalidSignature => {
                AppError::BadRequest(anyhow::anyhow!("Invalid signature"))
            }
            BillingError::RecordNotFound(what) => AppError::NotFound(anyhow::anyhow!(what)),
            BillingError::Forbidden(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            BillingError::AlreadyExists(what) => {
                AppError::Conflict(anyhow::anyhow!("{} already exists", what))
            }
            BillingError::Store(err) => {
                tracing::error!(error = ?err, "Record store failure");
                AppError::ServiceUnavailable("record store unavailable".to_string())
            }
        }
    }
}
