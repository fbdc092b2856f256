//! Operational metrics for range runs
//!
//! Counters and histograms go through the `metrics` facade, so recording is a
//! no-op until a recorder is installed. [`init_metrics`] installs the
//! Prometheus exporter and serves a scrape endpoint.
//!
//! ## Emitted series
//!
//! - `windows_fetched_total`, `window_rows_total`
//! - `fetch_retries_total{operation}`, `retry_backoff_duration_seconds{operation}`
//! - `fetch_exhausted_total{operation}`
//! - `pages_fetched_total`
//! - `http_responses_total{status}`, `http_429_errors_total`
//! - `range_runs_total{outcome}`, `range_run_duration_seconds{outcome}`

use ::metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

static METRICS_INITIALIZED: Lazy<RwLock<bool>> = Lazy::new(|| RwLock::new(false));

/// Install the Prometheus exporter listening on `addr`.
///
/// Idempotent: later calls return `Ok(())` without rebinding.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_metrics();

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Whether [`init_metrics`] has completed
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Register descriptions with the installed recorder
pub fn describe_metrics() {
    describe_counter!(
        "windows_fetched_total",
        Unit::Count,
        "Windows fetched successfully by range runs"
    );
    describe_counter!(
        "window_rows_total",
        Unit::Count,
        "Rows returned across all fetched windows"
    );
    describe_counter!(
        "fetch_retries_total",
        Unit::Count,
        "Retries scheduled after a transient failure"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Backoff delay before each retry"
    );
    describe_counter!(
        "fetch_exhausted_total",
        Unit::Count,
        "Operations that failed on every attempt"
    );
    describe_counter!(
        "pages_fetched_total",
        Unit::Count,
        "Pages fetched from paginated endpoints"
    );
    describe_counter!(
        "http_responses_total",
        Unit::Count,
        "HTTP responses by status code"
    );
    describe_counter!(
        "http_429_errors_total",
        Unit::Count,
        "Rate limit responses from providers"
    );
    describe_counter!(
        "range_runs_total",
        Unit::Count,
        "Completed range runs by outcome"
    );
    describe_histogram!(
        "range_run_duration_seconds",
        Unit::Seconds,
        "Wall time of a range run"
    );
}

/// A window fetch returned `rows` rows
pub fn record_window_fetched(rows: usize) {
    counter!("windows_fetched_total").increment(1);
    counter!("window_rows_total").increment(rows as u64);
}

/// A retry of `operation` is scheduled after `delay`
pub fn record_retry(operation: &str, delay: Duration) {
    counter!("fetch_retries_total", "operation" => operation.to_string()).increment(1);
    histogram!("retry_backoff_duration_seconds", "operation" => operation.to_string())
        .record(delay.as_secs_f64());
}

/// `operation` failed on every attempt
pub fn record_exhausted(operation: &str) {
    counter!("fetch_exhausted_total", "operation" => operation.to_string()).increment(1);
}

/// One page of a paginated endpoint arrived
pub fn record_page_fetched() {
    counter!("pages_fetched_total").increment(1);
}

/// An HTTP response with `status` arrived
pub fn record_http_response(status: u16) {
    counter!("http_responses_total", "status" => status.to_string()).increment(1);

    if status == 429 {
        counter!("http_429_errors_total").increment(1);
        warn!(status, "Rate limit response recorded");
    }
}

/// A range run finished after `elapsed`
pub fn record_run(success: bool, elapsed: Duration) {
    let outcome = if success { "success" } else { "failure" };
    counter!("range_runs_total", "outcome" => outcome).increment(1);
    histogram!("range_run_duration_seconds", "outcome" => outcome).record(elapsed.as_secs_f64());
}
