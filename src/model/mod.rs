//! Core entities shared by the pipeline, storage and detection engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Request location a rule pattern is matched against
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchLocation {
    Path,
    Query,
    Body,
    Headers,
    Cookies,
}

impl fmt::Display for MatchLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchLocation::Path => write!(f, "path"),
            MatchLocation::Query => write!(f, "query"),
            MatchLocation::Body => write!(f, "body"),
            MatchLocation::Headers => write!(f, "headers"),
            MatchLocation::Cookies => write!(f, "cookies"),
        }
    }
}

/// What to do when a rule pattern matches
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Block,
    Log,
    Allow,
}

impl Default for RuleAction {
    fn default() -> Self {
        RuleAction::Block
    }
}

/// A firewall rule. `domain_id = None` makes the rule global; a set id scopes
/// it to one domain, and scoped rules always outrank global ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: u64,
    pub name: String,
    /// Regex source, compiled case-insensitively at evaluation time
    pub pattern: String,
    pub attack_type: String,
    /// Locations tried in declared order; first hit wins the rule
    pub match_locations: Vec<MatchLocation>,
    #[serde(default)]
    pub action: RuleAction,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub domain_id: Option<u64>,
}

impl Rule {
    pub fn is_global(&self) -> bool {
        self.domain_id.is_none()
    }
}

/// A protected site fronted by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: u64,
    /// Registered host, compared case-insensitively without port
    pub host: String,
    /// Origin this domain's traffic is forwarded to; the configured default
    /// upstream is used when unset
    #[serde(default)]
    pub proxy_target: Option<String>,
    #[serde(default = "default_true")]
    pub apply_rules: bool,
    #[serde(default)]
    pub enable_geo_blocking: bool,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
}

/// Country directive for the geo stage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GeoAction {
    Block,
    Allow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoBlock {
    pub id: u64,
    /// ISO 3166-1 alpha-2, stored uppercase
    pub country_code: String,
    /// `None` applies the entry to every domain
    #[serde(default)]
    pub domain_id: Option<u64>,
    pub action: GeoAction,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
}

/// Extracted view of one inbound request. Ephemeral; only the sanitized form
/// ever reaches a persisted log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestData {
    pub ip_address: String,
    pub method: String,
    /// Path including the query string
    pub path: String,
    pub headers: HashMap<String, String>,
    /// Raw body text (lossy UTF-8)
    pub body: String,
    /// Parsed JSON payload when the body is JSON
    pub payload: Option<Value>,
    pub query_params: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
}

/// Result of a successful rule evaluation. At most one per request.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub rule_id: u64,
    pub rule_name: String,
    pub attack_type: String,
    pub action: RuleAction,
    pub matched_location: MatchLocation,
    pub matched_value: String,
}

/// Append-only audit record, written exactly once per request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLog {
    /// Assigned by the store on insert
    #[serde(default)]
    pub id: u64,
    pub ip_address: String,
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub is_blocked: bool,
    #[serde(default)]
    pub attack_type: Option<String>,
    #[serde(default)]
    pub rule_id: Option<u64>,
    pub response_status: u16,
    pub response_time_ms: u64,
    #[serde(default)]
    pub domain_id: Option<u64>,
    #[serde(default)]
    pub country_code: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AnomalyType {
    TrafficSpike,
    RequestPattern,
    ApiAbuse,
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyType::TrafficSpike => write!(f, "traffic_spike"),
            AnomalyType::RequestPattern => write!(f, "request_pattern"),
            AnomalyType::ApiAbuse => write!(f, "api_abuse"),
        }
    }
}

/// Anomaly lifecycle. Resolved and FalsePositive are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AnomalyStatus {
    Active,
    Investigating,
    Resolved,
    FalsePositive,
}

impl AnomalyStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnomalyStatus::Resolved | AnomalyStatus::FalsePositive)
    }
}

/// Statistically derived security signal, created only by detection runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: Uuid,
    pub anomaly_type: AnomalyType,
    /// 0–100
    pub score: f64,
    pub domain_id: Option<u64>,
    /// Offending source IP; unset when several sources contribute
    pub source: Option<String>,
    pub status: AnomalyStatus,
    /// Structured evidence backing the signal
    pub details: Value,
    /// Detector that produced the signal
    pub ml_model_type: String,
    pub detected_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Shared runtime telemetry, read-modify-written only inside the store lock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WafState {
    pub avg_response_time_ms: f64,
    pub total_requests: u64,
    pub total_blocked: u64,
    pub updated_at: DateTime<Utc>,
}

impl Default for WafState {
    fn default() -> Self {
        Self {
            avg_response_time_ms: 0.0,
            total_requests: 0,
            total_blocked: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Partial update for [`WafState`]; unset fields keep their value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WafStatePatch {
    pub avg_response_time_ms: Option<f64>,
    pub total_requests: Option<u64>,
    pub total_blocked: Option<u64>,
}

pub(crate) fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_scope() {
        let global = Rule {
            id: 1,
            name: "xss".to_string(),
            pattern: "<script>".to_string(),
            attack_type: "XSS".to_string(),
            match_locations: vec![MatchLocation::Body],
            action: RuleAction::Block,
            is_enabled: true,
            domain_id: None,
        };
        assert!(global.is_global());

        let scoped = Rule {
            domain_id: Some(7),
            ..global
        };
        assert!(!scoped.is_global());
    }

    #[test]
    fn test_match_location_serde() {
        let locations: Vec<MatchLocation> =
            serde_json::from_str(r#"["path","query","body","headers","cookies"]"#).unwrap();
        assert_eq!(locations.len(), 5);
        assert_eq!(locations[0], MatchLocation::Path);
        assert_eq!(locations[4], MatchLocation::Cookies);
    }

    #[test]
    fn test_anomaly_status_terminal() {
        assert!(!AnomalyStatus::Active.is_terminal());
        assert!(!AnomalyStatus::Investigating.is_terminal());
        assert!(AnomalyStatus::Resolved.is_terminal());
        assert!(AnomalyStatus::FalsePositive.is_terminal());
    }

    #[test]
    fn test_rule_deserialize_defaults() {
        let rule: Rule = toml::from_str(
            r#"
id = 3
name = "sqli"
pattern = "union.+select"
attack_type = "SQL Injection"
match_locations = ["query", "body"]
"#,
        )
        .unwrap();

        assert!(rule.is_enabled);
        assert!(rule.is_global());
        assert_eq!(rule.action, RuleAction::Block);
        assert_eq!(rule.match_locations.len(), 2);
    }
}
