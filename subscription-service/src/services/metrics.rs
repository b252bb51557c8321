use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
pub static SUBSCRIPTIONS_PROVISIONED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static WEBHOOK_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static PERSISTENCE_WARNINGS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static ACCESS_DENIED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn counter(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)
        .with_context(|| format!("Failed to create {}", name))?;
    registry
        .register(Box::new(counter.clone()))
        .with_context(|| format!("Failed to register {}", name))?;
    Ok(counter)
}

/// Installs the HTTP metrics recorder and the domain counters. Calling it a
/// second time is an error.
pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    METRICS_HANDLE
        .set(handle)
        .map_err(|_| anyhow::anyhow!("Metrics already initialized"))?;

    let registry = Registry::new();

    let provisioned = counter(
        &registry,
        "subscription_provisioned_total",
        "Subscription provisioning attempts by plan and outcome",
        &["plan", "outcome"],
    )?;
    let webhooks = counter(
        &registry,
        "subscription_webhook_events_total",
        "Verified webhook events by event type and outcome",
        &["event", "outcome"],
    )?;
    let warnings = counter(
        &registry,
        "subscription_persistence_warnings_total",
        "Local writes that failed after the gateway call succeeded",
        &["operation"],
    )?;
    let denied = counter(
        &registry,
        "subscription_access_denied_total",
        "Access evaluations that denied entry, by reason",
        &["reason"],
    )?;

    // Only one init can get past METRICS_HANDLE, so these sets cannot fail.
    let _ = PROMETHEUS_REGISTRY.set(registry);
    let _ = SUBSCRIPTIONS_PROVISIONED_TOTAL.set(provisioned);
    let _ = WEBHOOK_EVENTS_TOTAL.set(webhooks);
    let _ = PERSISTENCE_WARNINGS_TOTAL.set(warnings);
    let _ = ACCESS_DENIED_TOTAL.set(denied);

    Ok(())
}

pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

pub fn record_provisioning(plan: &str, outcome: &str) {
    if let Some(counter) = SUBSCRIPTIONS_PROVISIONED_TOTAL.get() {
        counter.with_label_values(&[plan, outcome]).inc();
    }
}

pub fn record_webhook_event(event: &str, outcome: &str) {
    if let Some(counter) = WEBHOOK_EVENTS_TOTAL.get() {
        counter.with_label_values(&[event, outcome]).inc();
    }
}

/// A gateway-side effect succeeded but the local record of it did not.
pub fn record_persistence_warning(operation: &str) {
    if let Some(counter) = PERSISTENCE_WARNINGS_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}

pub fn record_access_denied(reason: &str) {
    if let Some(counter) = ACCESS_DENIED_TOTAL.get() {
        counter.with_label_values(&[reason]).inc();
    }
}
