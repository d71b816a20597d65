//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a finished vault attempt
pub fn record_vault_attempt(outcome: &'static str) {
    metrics::counter!("lunar_vault_vault_attempts_total", "outcome" => outcome).increment(1);
}

/// Record a verification lookup
pub fn record_verification(found: bool) {
    let outcome = if found { "found" } else { "not_found" };
    metrics::counter!("lunar_vault_verifications_total", "outcome" => outcome).increment(1);
}

/// Record a rent request outcome
pub fn record_rental(outcome: &'static str) {
    metrics::counter!("lunar_vault_rentals_total", "outcome" => outcome).increment(1);
}

pub fn record_listing() {
    metrics::counter!("lunar_vault_listings_total").increment(1);
}

/// Record streamed chat chunks
pub fn record_chat_tokens(count: usize) {
    metrics::counter!("lunar_vault_chat_chunks_total").increment(count as u64);
}

/// Update ledger size gauge
pub fn update_ledger_size(count: usize) {
    metrics::gauge!("lunar_vault_ledger_assets").set(count as f64);
}
