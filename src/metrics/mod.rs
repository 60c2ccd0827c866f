pub mod collector;
pub mod exporter;

pub use collector::MetricsCollector;
pub use exporter::export_metrics;

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
};

lazy_static! {
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "waf_http_requests_total",
        "Total HTTP requests seen by the gateway",
        &["method", "status"]
    )
    .unwrap();
    pub static ref HTTP_RESPONSE_TIME: HistogramVec = register_histogram_vec!(
        "waf_http_response_time_seconds",
        "End-to-end response time per request",
        &["method"]
    )
    .unwrap();
    pub static ref REQUESTS_BLOCKED: IntCounterVec = register_int_counter_vec!(
        "waf_requests_blocked_total",
        "Requests blocked by the pipeline",
        &["attack_type"]
    )
    .unwrap();
    pub static ref RATE_LIMIT_TRIGGERED: IntCounter = register_int_counter!(
        "waf_rate_limit_triggered_total",
        "Requests rejected by the sliding-window rate limiter"
    )
    .unwrap();
    pub static ref PIPELINE_FAULTS: IntCounterVec = register_int_counter_vec!(
        "waf_pipeline_faults_total",
        "Internal pipeline faults handled fail-open",
        &["stage"]
    )
    .unwrap();
    pub static ref PROXY_ERRORS: IntCounter = register_int_counter!(
        "waf_proxy_errors_total",
        "Failed forwards to the origin"
    )
    .unwrap();
    pub static ref ANOMALIES_DETECTED: IntCounterVec = register_int_counter_vec!(
        "waf_anomalies_detected_total",
        "Anomalies created by detection runs",
        &["type"]
    )
    .unwrap();
    pub static ref ACTIVE_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        "waf_active_connections",
        "Currently open client connections",
        &["protocol"]
    )
    .unwrap();
}
