pub mod parser;
pub mod validator;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub waf: WafConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub geoip: GeoIpConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub enable_http2: bool,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Origin used when the matched domain has no proxy_target of its own,
    /// and for requests that resolve to no domain at all
    pub default_upstream: String,
    #[serde(default = "default_proxy_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WafConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Install the built-in global ruleset when no seed file provides rules
    #[serde(default = "default_true")]
    pub default_rules: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_rate_limit")]
    pub requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoIpConfig {
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Header carrying a CDN-resolved country code (e.g. "cf-ipcountry"),
    /// trusted over the database lookup when present
    #[serde(default)]
    pub trusted_header: Option<String>,
    /// Static ip -> country overrides, applied before the database
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,
    #[serde(default = "default_spike_threshold")]
    pub spike_threshold: u64,
    #[serde(default = "default_block_rate_threshold")]
    pub block_rate_threshold: f64,
    #[serde(default = "default_min_requests")]
    pub min_requests_for_block_rate: u64,
    #[serde(default = "default_sensitive_paths")]
    pub sensitive_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// TOML file seeding rules/domains/geo-blocks at startup
    #[serde(default)]
    pub seed_path: Option<PathBuf>,
    /// JSONL mirror of the audit log; `fe-waf detect` reads it back
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_proxy_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_rate_limit() -> u32 {
    100
}

fn default_window_seconds() -> u64 {
    60
}

fn default_window_hours() -> i64 {
    24
}

fn default_spike_threshold() -> u64 {
    100
}

fn default_block_rate_threshold() -> f64 {
    0.5
}

fn default_min_requests() -> u64 {
    10
}

fn default_sensitive_paths() -> Vec<String> {
    [
        "/admin",
        "/wp-admin",
        "/wp-login.php",
        "/phpmyadmin",
        "/.env",
        "/.git",
        "/config",
        "/backup",
        "/etc/passwd",
        "/actuator",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_metrics_endpoint() -> String {
    "/_metrics".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_http2: false,
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for WafConfig {
    fn default() -> Self {
        Self {
            enable: true,
            default_rules: true,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enable: false,
            requests_per_window: default_rate_limit(),
            window_seconds: default_window_seconds(),
        }
    }
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            trusted_header: None,
            overrides: HashMap::new(),
        }
    }
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            spike_threshold: default_spike_threshold(),
            block_rate_threshold: default_block_rate_threshold(),
            min_requests_for_block_rate: default_min_requests(),
            sensitive_paths: default_sensitive_paths(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            seed_path: None,
            log_file: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable: true,
            endpoint: default_metrics_endpoint(),
        }
    }
}

impl Config {
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        parser::parse_config(path)
    }

    pub fn validate(&self) -> Result<Vec<String>> {
        validator::validate_config(self)
    }
}
