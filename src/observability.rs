use std::net::SocketAddr;

use crate::engine::ValidationReport;

// ── Validation passes ───────────────────────────────────────────

/// Counter: validation passes run. Labels: scope, status.
pub const VALIDATIONS_TOTAL: &str = "rota_validations_total";

/// Histogram: wall time of one validation pass in seconds. Labels: scope.
pub const VALIDATION_DURATION_SECONDS: &str = "rota_validation_duration_seconds";

/// Counter: findings emitted. Labels: kind.
pub const FINDINGS_TOTAL: &str = "rota_findings_total";

/// Counter: shifts excluded at ingestion.
pub const REJECTED_SHIFTS_TOTAL: &str = "rota_rejected_shifts_total";

// ── Sources ─────────────────────────────────────────────────────

/// Counter: loads that failed because the store was unreachable or returned bad rows.
pub const STORE_FAILURES_TOTAL: &str = "rota_store_failures_total";

/// Counter: days recomputed by the live rota.
pub const LIVE_DAYS_REVALIDATED_TOTAL: &str = "rota_live_days_revalidated_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Count a finished pass and what it found.
pub fn record_report(scope: &'static str, report: &ValidationReport, elapsed_secs: f64) {
    let summary = report.summary();
    metrics::counter!(VALIDATIONS_TOTAL, "scope" => scope, "status" => "ok").increment(1);
    metrics::histogram!(VALIDATION_DURATION_SECONDS, "scope" => scope).record(elapsed_secs);
    metrics::counter!(FINDINGS_TOTAL, "kind" => "conflict").increment(summary.conflicts as u64);
    metrics::counter!(FINDINGS_TOTAL, "kind" => "ratio_violation").increment(summary.ratio_violations as u64);
    metrics::counter!(REJECTED_SHIFTS_TOTAL).increment(summary.rejected as u64);
}

/// Count a pass abandoned before producing a report.
pub fn record_failure(scope: &'static str) {
    metrics::counter!(VALIDATIONS_TOTAL, "scope" => scope, "status" => "error").increment(1);
}
