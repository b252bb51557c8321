//! Razorpay API client.
//!
//! Covers the three calls this service makes: customer creation (idempotent
//! per email), recurring subscription creation and one-time orders, plus the
//! checkout signature check for the legacy order flow.

use crate::config::RazorpayConfig;
use crate::error::BillingError;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use service_core::utils::signature::verify_hex;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayFailure {
    #[error("Razorpay credentials not configured")]
    NotConfigured,

    #[error("Razorpay error: {code} - {description}")]
    Rejected { code: String, description: String },

    #[error("Razorpay request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected Razorpay response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl GatewayFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayFailure::Transport(e) if e.is_timeout())
    }
}

/// A rejection carries the gateway's own message; anything else means the
/// gateway could not be reached or understood.
impl From<GatewayFailure> for BillingError {
    fn from(failure: GatewayFailure) -> Self {
        match failure {
            GatewayFailure::Rejected { description, .. } => BillingError::GatewayError(description),
            other if other.is_timeout() => {
                BillingError::ProvisionFailed("payment gateway timed out".to_string())
            }
            other => BillingError::ProvisionFailed(other.to_string()),
        }
    }
}

/// Razorpay client for interacting with the Razorpay API.
#[derive(Clone)]
pub struct RazorpayClient {
    client: Client,
    config: RazorpayConfig,
}

#[derive(Debug, Serialize)]
struct CreateCustomerRequest<'a> {
    name: &'a str,
    email: &'a str,
    /// "0" makes Razorpay return the existing customer for this email
    /// instead of failing or creating a duplicate.
    fail_existing: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RazorpayCustomer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Request to create a Razorpay subscription.
#[derive(Debug, Serialize)]
pub struct CreateSubscriptionRequest {
    pub plan_id: String,
    pub customer_id: String,
    /// Number of billing cycles.
    pub total_count: u32,
    pub quantity: u32,
    /// 1 lets Razorpay email the payment link to the customer.
    pub customer_notify: u8,
    pub notes: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RazorpaySubscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub short_url: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub total_count: Option<u32>,
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    /// Amount in smallest currency unit (paise for INR).
    amount: u64,
    currency: &'a str,
    receipt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<serde_json::Value>,
}

/// Response from Razorpay order creation.
#[derive(Debug, Clone, Deserialize)]
pub struct RazorpayOrder {
    pub id: String,
    pub amount: u64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct RazorpayError {
    error: RazorpayErrorDetail,
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

impl RazorpayClient {
    pub fn new(config: RazorpayConfig) -> Result<Self, GatewayFailure> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    /// Check if Razorpay is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.key_id.is_empty() && !self.config.key_secret.expose_secret().is_empty()
    }

    pub fn key_id(&self) -> &str {
        &self.config.key_id
    }

    /// Create the customer for `email`, or get the existing one back.
    pub async fn create_or_fetch_customer(
        &self,
        name: &str,
        email: &str,
    ) -> Result<RazorpayCustomer, GatewayFailure> {
        let request = CreateCustomerRequest {
            name,
            email,
            fail_existing: "0",
        };
        let customer: RazorpayCustomer = self.post("customers", &request).await?;
        tracing::info!(customer_id = %customer.id, "Razorpay customer ready");
        Ok(customer)
    }

    pub async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<RazorpaySubscription, GatewayFailure> {
        let subscription: RazorpaySubscription = self.post("subscriptions", request).await?;
        tracing::info!(
            subscription_id = %subscription.id,
            status = %subscription.status,
            "Razorpay subscription created"
        );
        Ok(subscription)
    }

    /// Create a new one-time order in Razorpay.
    pub async fn create_order(
        &self,
        amount: u64,
        currency: &str,
        receipt: &str,
        notes: Option<serde_json::Value>,
    ) -> Result<RazorpayOrder, GatewayFailure> {
        let request = CreateOrderRequest {
            amount,
            currency,
            receipt,
            notes,
        };
        let order: RazorpayOrder = self.post("orders", &request).await?;
        tracing::info!(
            order_id = %order.id,
            amount = order.amount,
            currency = %order.currency,
            "Razorpay order created"
        );
        Ok(order)
    }

    /// Verify the checkout signature:
    /// `HMAC-SHA256(order_id + "|" + payment_id, key_secret)`
    pub fn verify_payment_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> anyhow::Result<bool> {
        let payload = format!("{}|{}", order_id, payment_id);
        verify_hex(
            self.config.key_secret.expose_secret(),
            payload.as_bytes(),
            signature,
        )
    }

    async fn post<B, R>(&self, resource: &str, body: &B) -> Result<R, GatewayFailure>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        if !self.is_configured() {
            return Err(GatewayFailure::NotConfigured);
        }

        let url = format!(
            "{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            resource
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(
                &self.config.key_id,
                Some(self.config.key_secret.expose_secret()),
            )
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(resource, status = %status, "Razorpay response");

        if status.is_success() {
            return Ok(serde_json::from_str(&body)?);
        }

        let error = serde_json::from_str::<RazorpayError>(&body)
            .map(|e| e.error)
            .unwrap_or_else(|_| RazorpayErrorDetail {
                code: status.as_u16().to_string(),
                description: body.clone(),
            });

        tracing::error!(
            resource,
            code = %error.code,
            description = %error.description,
            "Razorpay call rejected"
        );

        Err(GatewayFailure::Rejected {
            code: error.code,
            description: error.description,
        })
    }
}
