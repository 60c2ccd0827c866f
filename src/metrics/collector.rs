use super::*;

pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn record_request(&self, method: &str, status: u16, duration_secs: f64) {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&[method, &status.to_string()])
            .inc();

        HTTP_RESPONSE_TIME
            .with_label_values(&[method])
            .observe(duration_secs);
    }

    pub fn inc_blocked(&self, attack_type: &str) {
        REQUESTS_BLOCKED.with_label_values(&[attack_type]).inc();
    }

    pub fn inc_rate_limit_triggered(&self) {
        RATE_LIMIT_TRIGGERED.inc();
    }

    pub fn inc_pipeline_fault(&self, stage: &str) {
        PIPELINE_FAULTS.with_label_values(&[stage]).inc();
    }

    pub fn inc_proxy_error(&self) {
        PROXY_ERRORS.inc();
    }

    pub fn inc_anomaly(&self, anomaly_type: &str) {
        ANOMALIES_DETECTED.with_label_values(&[anomaly_type]).inc();
    }

    pub fn inc_active_connections(&self) {
        ACTIVE_CONNECTIONS.with_label_values(&["http"]).inc();
    }

    pub fn dec_active_connections(&self) {
        ACTIVE_CONNECTIONS.with_label_values(&["http"]).dec();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
