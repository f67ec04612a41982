use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once; later
/// calls (e.g. from parallel test binaries) are no-ops.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder already installed");
        }
    }
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

/// Count a transaction reaching (or being created in) a status.
pub fn record_transaction(provider: &'static str, status: &'static str) {
    counter!(
        "payment_transactions_total",
        &[("provider", provider), ("status", status)]
    )
    .increment(1);
}

/// Count a webhook delivery by outcome (applied, replayed, mismatch, ...).
pub fn record_webhook(provider: &'static str, outcome: &'static str) {
    counter!(
        "webhook_events_total",
        &[("provider", provider), ("outcome", outcome)]
    )
    .increment(1);
}
