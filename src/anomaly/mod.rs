//! Statistical anomaly detection over the persisted audit log.
//!
//! Runs as a batch job outside the request path, globally or scoped to one
//! domain. Three detectors: per-IP traffic spikes, high block-rate sources,
//! and sensitive-path probing. Signals dedup against open anomalies with the
//! same (type, source, domain) key, so re-running a window does not create
//! duplicates while the first finding is still unresolved.

use crate::config::AnomalyConfig;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::model::{Anomaly, AnomalyStatus, AnomalyType, RequestLog};
use crate::storage::MemoryStore;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const MAX_SCORE: f64 = 95.0;
const PROBE_SCORE: f64 = 80.0;

#[derive(Debug, Default)]
pub struct DetectionReport {
    pub created: Vec<Anomaly>,
    pub deduplicated: usize,
    pub logs_scanned: usize,
}

pub struct AnomalyDetector {
    store: Arc<MemoryStore>,
    metrics: Arc<MetricsCollector>,
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(
        store: Arc<MemoryStore>,
        metrics: Arc<MetricsCollector>,
        config: AnomalyConfig,
    ) -> Self {
        Self {
            store,
            metrics,
            config,
        }
    }

    /// Run every detector over the configured window, optionally scoped to
    /// one domain.
    pub async fn run(&self, domain_id: Option<u64>) -> Result<DetectionReport> {
        let window_end = Utc::now();
        let window_start = window_end - Duration::hours(self.config.window_hours);
        let logs = self
            .store
            .get_request_logs_since(window_start, domain_id)
            .await;

        let mut report = DetectionReport {
            logs_scanned: logs.len(),
            ..Default::default()
        };

        self.detect_traffic_spikes(&logs, window_start, window_end, &mut report)
            .await;
        self.detect_block_rate_sources(&logs, window_start, window_end, &mut report)
            .await;
        self.detect_sensitive_path_probing(&logs, window_start, window_end, &mut report)
            .await;

        info!(
            "Detection run scanned {} log(s): {} anomaly(ies) created, {} deduplicated",
            report.logs_scanned,
            report.created.len(),
            report.deduplicated
        );
        Ok(report)
    }

    /// Any IP whose request count in the window exceeds the spike threshold
    /// yields one TrafficSpike anomaly per domain it touched,
    /// score = min(50 + count/10, 95).
    async fn detect_traffic_spikes(
        &self,
        logs: &[RequestLog],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        report: &mut DetectionReport,
    ) {
        for (ip, entries) in group_by_ip(logs) {
            let count = entries.len() as u64;
            if count <= self.config.spike_threshold {
                continue;
            }

            let score = (50.0 + count as f64 / 10.0).min(MAX_SCORE);
            for domain_id in touched_domains(&entries) {
                self.emit(
                    Anomaly {
                        id: Uuid::new_v4(),
                        anomaly_type: AnomalyType::TrafficSpike,
                        score,
                        domain_id,
                        source: Some(ip.to_string()),
                        status: AnomalyStatus::Active,
                        details: json!({
                            "request_count": count,
                            "threshold": self.config.spike_threshold,
                        }),
                        ml_model_type: "count-threshold".to_string(),
                        detected_at: Utc::now(),
                        window_start,
                        window_end,
                        resolved_by: None,
                        resolved_at: None,
                        notes: None,
                    },
                    report,
                )
                .await;
            }
        }
    }

    /// IPs with more than `min_requests_for_block_rate` requests and a block
    /// rate above the threshold yield RequestPattern anomalies,
    /// score = min(60 + rate*35, 95).
    async fn detect_block_rate_sources(
        &self,
        logs: &[RequestLog],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        report: &mut DetectionReport,
    ) {
        for (ip, entries) in group_by_ip(logs) {
            let total = entries.len() as u64;
            if total <= self.config.min_requests_for_block_rate {
                continue;
            }

            let blocked = entries.iter().filter(|log| log.is_blocked).count() as u64;
            let block_rate = blocked as f64 / total as f64;
            if block_rate <= self.config.block_rate_threshold {
                continue;
            }

            let score = (60.0 + block_rate * 35.0).min(MAX_SCORE);
            for domain_id in touched_domains(&entries) {
                self.emit(
                    Anomaly {
                        id: Uuid::new_v4(),
                        anomaly_type: AnomalyType::RequestPattern,
                        score,
                        domain_id,
                        source: Some(ip.to_string()),
                        status: AnomalyStatus::Active,
                        details: json!({
                            "total_requests": total,
                            "blocked_requests": blocked,
                            "block_rate": block_rate,
                        }),
                        ml_model_type: "block-rate".to_string(),
                        detected_at: Utc::now(),
                        window_start,
                        window_end,
                        resolved_by: None,
                        resolved_at: None,
                        notes: None,
                    },
                    report,
                )
                .await;
            }
        }
    }

    /// Any access to the sensitive-path vocabulary yields one flat-score
    /// ApiAbuse anomaly per touched domain. Source stays unset because several
    /// IPs may contribute.
    async fn detect_sensitive_path_probing(
        &self,
        logs: &[RequestLog],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        report: &mut DetectionReport,
    ) {
        let probes: Vec<&RequestLog> = logs
            .iter()
            .filter(|log| {
                let path = log.path.split('?').next().unwrap_or(&log.path);
                self.config
                    .sensitive_paths
                    .iter()
                    .any(|prefix| path.starts_with(prefix.as_str()))
            })
            .collect();

        if probes.is_empty() {
            return;
        }

        let mut per_domain: BTreeMap<Option<u64>, Vec<&&RequestLog>> = BTreeMap::new();
        for probe in &probes {
            per_domain.entry(probe.domain_id).or_default().push(probe);
        }

        for (domain_id, entries) in per_domain {
            let paths: BTreeSet<&str> = entries
                .iter()
                .map(|log| log.path.split('?').next().unwrap_or(&log.path))
                .collect();
            let sources: BTreeSet<&str> =
                entries.iter().map(|log| log.ip_address.as_str()).collect();

            self.emit(
                Anomaly {
                    id: Uuid::new_v4(),
                    anomaly_type: AnomalyType::ApiAbuse,
                    score: PROBE_SCORE,
                    domain_id,
                    source: None,
                    status: AnomalyStatus::Active,
                    details: json!({
                        "access_count": entries.len(),
                        "paths": paths,
                        "source_count": sources.len(),
                    }),
                    ml_model_type: "path-heuristic".to_string(),
                    detected_at: Utc::now(),
                    window_start,
                    window_end,
                    resolved_by: None,
                    resolved_at: None,
                    notes: None,
                },
                report,
            )
            .await;
        }
    }

    async fn emit(&self, anomaly: Anomaly, report: &mut DetectionReport) {
        let duplicate = self
            .store
            .has_open_anomaly(
                anomaly.anomaly_type,
                anomaly.source.as_deref(),
                anomaly.domain_id,
            )
            .await;
        if duplicate {
            report.deduplicated += 1;
            return;
        }

        self.metrics.inc_anomaly(&anomaly.anomaly_type.to_string());
        let created = self.store.create_anomaly(anomaly).await;
        report.created.push(created);
    }
}

fn group_by_ip(logs: &[RequestLog]) -> BTreeMap<&str, Vec<&RequestLog>> {
    let mut groups: BTreeMap<&str, Vec<&RequestLog>> = BTreeMap::new();
    for log in logs {
        groups.entry(log.ip_address.as_str()).or_default().push(log);
    }
    groups
}

fn touched_domains(entries: &[&RequestLog]) -> BTreeSet<Option<u64>> {
    entries.iter().map(|log| log.domain_id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(store: &Arc<MemoryStore>) -> AnomalyDetector {
        AnomalyDetector::new(
            Arc::clone(store),
            Arc::new(MetricsCollector::new()),
            AnomalyConfig::default(),
        )
    }

    fn log(ip: &str, path: &str, domain_id: Option<u64>, blocked: bool) -> RequestLog {
        RequestLog {
            id: 0,
            ip_address: ip.to_string(),
            method: "GET".to_string(),
            path: path.to_string(),
            headers: Default::default(),
            body: String::new(),
            is_blocked: blocked,
            attack_type: blocked.then(|| "XSS".to_string()),
            rule_id: None,
            response_status: if blocked { 403 } else { 200 },
            response_time_ms: 4,
            domain_id,
            country_code: None,
            timestamp: Utc::now(),
        }
    }

    async fn seed(store: &MemoryStore, logs: Vec<RequestLog>) {
        for entry in logs {
            store.create_request_log(entry).await;
        }
    }

    #[tokio::test]
    async fn test_traffic_spike_scenario() {
        // 150 requests from one IP with threshold 100: exactly one anomaly,
        // score 50 + 150/10 = 65.
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            (0..150).map(|_| log("203.0.113.7", "/", Some(1), false)).collect(),
        )
        .await;

        let report = detector(&store).run(None).await.unwrap();
        let spikes: Vec<&Anomaly> = report
            .created
            .iter()
            .filter(|a| a.anomaly_type == AnomalyType::TrafficSpike)
            .collect();
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].domain_id, Some(1));
        assert_eq!(spikes[0].source.as_deref(), Some("203.0.113.7"));
        assert!((spikes[0].score - 65.0).abs() < 1e-9);
        assert_eq!(spikes[0].status, AnomalyStatus::Active);
    }

    #[tokio::test]
    async fn test_spike_score_caps_at_95() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            (0..900).map(|_| log("203.0.113.7", "/", Some(1), false)).collect(),
        )
        .await;

        let report = detector(&store).run(None).await.unwrap();
        let spike = report
            .created
            .iter()
            .find(|a| a.anomaly_type == AnomalyType::TrafficSpike)
            .unwrap();
        assert!((spike.score - 95.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_block_rate_scenario() {
        // 20 requests, 12 blocked: rate 0.6, score 60 + 0.6*35 = 81.
        let store = Arc::new(MemoryStore::new());
        let mut logs = Vec::new();
        for i in 0..20 {
            logs.push(log("198.51.100.2", "/login", Some(1), i < 12));
        }
        seed(&store, logs).await;

        let report = detector(&store).run(None).await.unwrap();
        let patterns: Vec<&Anomaly> = report
            .created
            .iter()
            .filter(|a| a.anomaly_type == AnomalyType::RequestPattern)
            .collect();
        assert_eq!(patterns.len(), 1);
        assert!((patterns[0].score - 81.0).abs() < 1e-9);
        assert_eq!(patterns[0].source.as_deref(), Some("198.51.100.2"));
    }

    #[tokio::test]
    async fn test_block_rate_needs_volume_and_rate() {
        let store = Arc::new(MemoryStore::new());
        // 8 requests all blocked: too few to qualify
        seed(
            &store,
            (0..8).map(|_| log("198.51.100.2", "/", Some(1), true)).collect(),
        )
        .await;
        // 20 requests, 6 blocked: rate 0.3, below the threshold
        seed(
            &store,
            (0..20).map(|i| log("198.51.100.3", "/", Some(1), i < 6)).collect(),
        )
        .await;

        let report = detector(&store).run(None).await.unwrap();
        assert!(report
            .created
            .iter()
            .all(|a| a.anomaly_type != AnomalyType::RequestPattern));
    }

    #[tokio::test]
    async fn test_sensitive_path_probing_spans_sources() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            vec![
                log("1.1.1.1", "/.env", Some(1), true),
                log("2.2.2.2", "/wp-admin/setup.php", Some(1), false),
                log("3.3.3.3", "/index.html", Some(1), false),
            ],
        )
        .await;

        let report = detector(&store).run(None).await.unwrap();
        let probes: Vec<&Anomaly> = report
            .created
            .iter()
            .filter(|a| a.anomaly_type == AnomalyType::ApiAbuse)
            .collect();
        assert_eq!(probes.len(), 1);
        assert!((probes[0].score - 80.0).abs() < 1e-9);
        assert!(probes[0].source.is_none());
        assert_eq!(probes[0].details["access_count"], 2);
        assert_eq!(probes[0].details["source_count"], 2);
    }

    #[tokio::test]
    async fn test_rerun_dedups_against_open_anomaly() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            (0..150).map(|_| log("203.0.113.7", "/", Some(1), false)).collect(),
        )
        .await;

        let detector = detector(&store);
        let first = detector.run(None).await.unwrap();
        assert_eq!(first.created.len(), 1);

        let second = detector.run(None).await.unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.deduplicated, 1);

        // resolving the finding re-arms detection
        let id = first.created[0].id;
        store.resolve_anomaly(id, "admin", None).await.unwrap();
        let third = detector.run(None).await.unwrap();
        assert_eq!(third.created.len(), 1);
    }

    #[tokio::test]
    async fn test_domain_scoped_run_ignores_other_domains() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            (0..150).map(|_| log("203.0.113.7", "/", Some(2), false)).collect(),
        )
        .await;

        let report = detector(&store).run(Some(1)).await.unwrap();
        assert!(report.created.is_empty());
        assert_eq!(report.logs_scanned, 0);
    }

    #[tokio::test]
    async fn test_spike_touching_two_domains_emits_per_domain() {
        let store = Arc::new(MemoryStore::new());
        let mut logs: Vec<RequestLog> =
            (0..80).map(|_| log("203.0.113.7", "/", Some(1), false)).collect();
        logs.extend((0..80).map(|_| log("203.0.113.7", "/", Some(2), false)));
        seed(&store, logs).await;

        let report = detector(&store).run(None).await.unwrap();
        let mut domains: Vec<Option<u64>> = report
            .created
            .iter()
            .filter(|a| a.anomaly_type == AnomalyType::TrafficSpike)
            .map(|a| a.domain_id)
            .collect();
        domains.sort();
        assert_eq!(domains, vec![Some(1), Some(2)]);
    }
}
