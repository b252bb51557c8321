use secrecy::Secret;
use serde::Deserialize;
use service_core::config::{self as core_config, env_or, parsed_env_or, required_env};
use service_core::error::AppError;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub common: core_config::Config,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub razorpay: RazorpayConfig,
    pub trial: TrialConfig,
    /// Tag written into gateway metadata so events can be traced back here.
    pub origin_system: String,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    /// Upper bound for every outbound gateway call.
    pub timeout_seconds: u64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct TrialConfig {
    pub days: i64,
}

impl Config {
    /// Load configuration from the environment. Missing gateway or store
    /// credentials are an error: the service must not start without them.
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            server: ServerConfig {
                host: env_or("SUBSCRIPTION_SERVICE_HOST", "0.0.0.0"),
                port: parsed_env_or("SUBSCRIPTION_SERVICE_PORT", 3010)?,
            },
            database: DatabaseConfig {
                url: Secret::new(required_env("SUBSCRIPTION_DATABASE_URL")?),
                db_name: env_or("SUBSCRIPTION_DATABASE_NAME", "subscription_db"),
            },
            razorpay: RazorpayConfig {
                key_id: required_env("RAZORPAY_KEY_ID")?,
                key_secret: Secret::new(required_env("RAZORPAY_KEY_SECRET")?),
                webhook_secret: Secret::new(required_env("RAZORPAY_WEBHOOK_SECRET")?),
                api_base_url: env_or("RAZORPAY_API_BASE_URL", "https://api.razorpay.com/v1"),
                timeout_seconds: parsed_env_or("RAZORPAY_TIMEOUT_SECONDS", 20)?,
            },
            trial: TrialConfig {
                days: parsed_env_or("TRIAL_DAYS", 14)?,
            },
            origin_system: env_or("ORIGIN_SYSTEM", "policy-backoffice"),
            service_name: "subscription-service".to_string(),
        })
    }
}
