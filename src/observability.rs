//! Structured logging and metrics setup (`spec.md` §10 ambient stack).

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber from `RUST_LOG`, defaulting
/// to `info` when unset.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();
}

/// Installs the process-wide Prometheus recorder and starts its exporter
/// HTTP listener on `port`. Call once at startup.
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: std::net::SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    Ok(())
}

pub mod metric_names {
    pub const RESPONSES_CREATED: &str = "antwort_responses_created_total";
    pub const RESPONSES_COMPLETED: &str = "antwort_responses_completed_total";
    pub const RESPONSES_FAILED: &str = "antwort_responses_failed_total";
    pub const RESPONSES_CANCELLED: &str = "antwort_responses_cancelled_total";
    pub const BACKEND_ROUNDS: &str = "antwort_backend_rounds_total";
    pub const TOOL_CALLS: &str = "antwort_tool_calls_total";
    pub const RESPONSE_DURATION: &str = "antwort_response_duration_seconds";
}
