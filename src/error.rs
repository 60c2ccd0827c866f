//! Unified error types for the mediation pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WafError {
    /// A rule pattern failed to compile. The rule is skipped, never fatal.
    #[error("Rule {rule_id} pattern failed to compile: {source}")]
    PatternCompile {
        rule_id: u64,
        source: regex::Error,
    },

    /// Storage could not serve a read or write. The pipeline fails open.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Country lookup failed. Treated as unknown country, never blocks.
    #[error("Geolocation unavailable for {ip}: {reason}")]
    GeolocationUnavailable { ip: String, reason: String },

    /// The origin could not be reached. Maps to a 502 toward the client.
    #[error("Origin unreachable at {target}: {reason}")]
    ProxyUnreachable { target: String, reason: String },

    /// Anything unexpected caught at the orchestrator boundary.
    #[error("Pipeline fault in {stage}: {reason}")]
    PipelineFault { stage: &'static str, reason: String },

    #[error("Anomaly {0} not found")]
    AnomalyNotFound(uuid::Uuid),

    /// Resolved/FalsePositive anomalies are terminal and reject transitions.
    #[error("Anomaly {id} is already {status:?} and cannot transition")]
    AnomalyTerminal {
        id: uuid::Uuid,
        status: crate::model::AnomalyStatus,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, WafError>;
