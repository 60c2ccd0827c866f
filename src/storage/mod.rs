//! In-memory backing store for domains, rules, geo blocks, audit logs and
//! anomalies.
//!
//! Collections sit behind `tokio::sync::RwLock`; the audit log can be mirrored
//! to a JSONL file so `fe-waf detect` can run out-of-process over the same
//! stream.

pub mod seed;

use crate::error::{Result, WafError};
use crate::model::{
    Anomaly, AnomalyStatus, AnomalyType, Domain, GeoBlock, RequestLog, Rule, WafState,
    WafStatePatch,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Weight of the newest sample in the smoothed response-time metric
const EWMA_NEW_WEIGHT: f64 = 0.3;
const EWMA_OLD_WEIGHT: f64 = 0.7;

#[derive(Debug, Clone, Default)]
pub struct AnomalyFilter {
    pub status: Option<AnomalyStatus>,
    pub anomaly_type: Option<AnomalyType>,
    pub domain_id: Option<u64>,
}

pub struct MemoryStore {
    domains: RwLock<Vec<Domain>>,
    rules: RwLock<Vec<Rule>>,
    geo_blocks: RwLock<Vec<GeoBlock>>,
    logs: RwLock<Vec<RequestLog>>,
    anomalies: RwLock<Vec<Anomaly>>,
    state: RwLock<WafState>,
    log_mirror: Mutex<Option<File>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            domains: RwLock::new(Vec::new()),
            rules: RwLock::new(Vec::new()),
            geo_blocks: RwLock::new(Vec::new()),
            logs: RwLock::new(Vec::new()),
            anomalies: RwLock::new(Vec::new()),
            state: RwLock::new(WafState::default()),
            log_mirror: Mutex::new(None),
        }
    }

    /// Mirror every audit log entry to `path` as one JSON object per line.
    pub fn with_log_mirror(self, path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                WafError::StorageUnavailable(format!(
                    "cannot open log file {}: {}",
                    path.display(),
                    e
                ))
            })?;
        *self.log_mirror.lock() = Some(file);
        Ok(self)
    }

    // Domains

    pub async fn insert_domain(&self, domain: Domain) {
        let mut domains = self.domains.write().await;
        domains.push(domain);
        domains.sort_by_key(|d| d.id);
    }

    pub async fn get_domain(&self, id: u64) -> Option<Domain> {
        self.domains.read().await.iter().find(|d| d.id == id).cloned()
    }

    pub async fn get_all_domains(&self) -> Vec<Domain> {
        self.domains.read().await.clone()
    }

    // Rules

    pub async fn insert_rule(&self, rule: Rule) {
        let mut rules = self.rules.write().await;
        rules.push(rule);
        rules.sort_by_key(|r| r.id);
    }

    pub async fn get_all_rules(&self) -> Vec<Rule> {
        self.rules.read().await.clone()
    }

    /// Rules that can apply to a request bound to `domain_id`: that domain's
    /// own rules plus every global rule. Precedence is the engine's concern.
    pub async fn get_rules_for_domain(&self, domain_id: Option<u64>) -> Vec<Rule> {
        self.rules
            .read()
            .await
            .iter()
            .filter(|r| r.is_global() || r.domain_id == domain_id)
            .cloned()
            .collect()
    }

    // Geo blocks

    pub async fn insert_geo_block(&self, geo_block: GeoBlock) {
        let mut geo_blocks = self.geo_blocks.write().await;
        geo_blocks.push(geo_block);
        geo_blocks.sort_by_key(|g| g.id);
    }

    pub async fn get_all_geo_blocks(&self) -> Vec<GeoBlock> {
        self.geo_blocks.read().await.clone()
    }

    // Audit logs

    pub async fn create_request_log(&self, mut entry: RequestLog) -> RequestLog {
        let mut logs = self.logs.write().await;
        entry.id = logs.len() as u64 + 1;
        logs.push(entry.clone());
        drop(logs);

        let mut mirror = self.log_mirror.lock();
        if let Some(file) = mirror.as_mut() {
            match serde_json::to_string(&entry) {
                Ok(line) => {
                    if let Err(e) = writeln!(file, "{}", line) {
                        warn!("Failed to mirror request log: {}", e);
                    }
                }
                Err(e) => warn!("Failed to serialize request log: {}", e),
            }
        }

        entry
    }

    pub async fn get_request_logs_since(
        &self,
        cutoff: DateTime<Utc>,
        domain_id: Option<u64>,
    ) -> Vec<RequestLog> {
        self.logs
            .read()
            .await
            .iter()
            .filter(|log| log.timestamp >= cutoff)
            .filter(|log| domain_id.is_none() || log.domain_id == domain_id)
            .cloned()
            .collect()
    }

    pub async fn request_log_count(&self) -> usize {
        self.logs.read().await.len()
    }

    /// Hydrate the audit log from a JSONL mirror written by a serving process.
    pub async fn load_request_logs(&self, path: &Path) -> Result<usize> {
        let file = File::open(path).map_err(|e| {
            WafError::StorageUnavailable(format!(
                "cannot read log file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut loaded = 0;
        let mut logs = self.logs.write().await;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| WafError::StorageUnavailable(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RequestLog>(&line) {
                Ok(entry) => {
                    logs.push(entry);
                    loaded += 1;
                }
                Err(e) => warn!("Skipping malformed log line: {}", e),
            }
        }
        Ok(loaded)
    }

    // Telemetry

    pub async fn get_waf_state(&self) -> WafState {
        self.state.read().await.clone()
    }

    pub async fn update_waf_state(&self, patch: WafStatePatch) -> WafState {
        let mut state = self.state.write().await;
        if let Some(avg) = patch.avg_response_time_ms {
            state.avg_response_time_ms = avg;
        }
        if let Some(total) = patch.total_requests {
            state.total_requests = total;
        }
        if let Some(blocked) = patch.total_blocked {
            state.total_blocked = blocked;
        }
        state.updated_at = Utc::now();
        state.clone()
    }

    /// Fold one response-time sample into the smoothed metric. The blend runs
    /// inside the write lock, so concurrent samples are serialized.
    pub async fn record_request(&self, elapsed_ms: f64, blocked: bool) {
        let mut state = self.state.write().await;
        state.avg_response_time_ms = if state.total_requests == 0 {
            elapsed_ms
        } else {
            EWMA_NEW_WEIGHT * elapsed_ms + EWMA_OLD_WEIGHT * state.avg_response_time_ms
        };
        state.total_requests += 1;
        if blocked {
            state.total_blocked += 1;
        }
        state.updated_at = Utc::now();
    }

    // Anomalies

    pub async fn create_anomaly(&self, anomaly: Anomaly) -> Anomaly {
        let mut anomalies = self.anomalies.write().await;
        anomalies.push(anomaly.clone());
        anomaly
    }

    pub async fn get_all_anomalies(&self, filter: &AnomalyFilter) -> Vec<Anomaly> {
        self.anomalies
            .read()
            .await
            .iter()
            .filter(|a| filter.status.map_or(true, |s| a.status == s))
            .filter(|a| filter.anomaly_type.map_or(true, |t| a.anomaly_type == t))
            .filter(|a| filter.domain_id.map_or(true, |d| a.domain_id == Some(d)))
            .cloned()
            .collect()
    }

    /// Dedup probe for the detection engine: is there a non-terminal anomaly
    /// carrying the same signal already?
    pub async fn has_open_anomaly(
        &self,
        anomaly_type: AnomalyType,
        source: Option<&str>,
        domain_id: Option<u64>,
    ) -> bool {
        self.anomalies.read().await.iter().any(|a| {
            !a.status.is_terminal()
                && a.anomaly_type == anomaly_type
                && a.source.as_deref() == source
                && a.domain_id == domain_id
        })
    }

    pub async fn resolve_anomaly(
        &self,
        id: Uuid,
        user: &str,
        notes: Option<String>,
    ) -> Result<Anomaly> {
        self.transition_anomaly(id, AnomalyStatus::Resolved, user, notes)
            .await
    }

    pub async fn mark_anomaly_false_positive(
        &self,
        id: Uuid,
        user: &str,
        notes: Option<String>,
    ) -> Result<Anomaly> {
        self.transition_anomaly(id, AnomalyStatus::FalsePositive, user, notes)
            .await
    }

    pub async fn mark_anomaly_investigating(&self, id: Uuid) -> Result<Anomaly> {
        let mut anomalies = self.anomalies.write().await;
        let anomaly = anomalies
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(WafError::AnomalyNotFound(id))?;
        if anomaly.status.is_terminal() {
            return Err(WafError::AnomalyTerminal {
                id,
                status: anomaly.status,
            });
        }
        anomaly.status = AnomalyStatus::Investigating;
        Ok(anomaly.clone())
    }

    async fn transition_anomaly(
        &self,
        id: Uuid,
        status: AnomalyStatus,
        user: &str,
        notes: Option<String>,
    ) -> Result<Anomaly> {
        let mut anomalies = self.anomalies.write().await;
        let anomaly = anomalies
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(WafError::AnomalyNotFound(id))?;
        if anomaly.status.is_terminal() {
            return Err(WafError::AnomalyTerminal {
                id,
                status: anomaly.status,
            });
        }
        anomaly.status = status;
        anomaly.resolved_by = Some(user.to_string());
        anomaly.resolved_at = Some(Utc::now());
        anomaly.notes = notes;
        Ok(anomaly.clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
