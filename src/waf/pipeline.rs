//! The mediation pipeline: resolve domain, geo check, rule check, then allow
//! or block.
//!
//! Stage order within one request is strict; internal faults fail open so a
//! broken WAF never takes the protected sites down.

use crate::config::Config;
use crate::error::{Result, WafError};
use crate::geoip::GeoLocator;
use crate::inspector;
use crate::metrics::MetricsCollector;
use crate::model::{RequestData, RequestLog, RuleAction, RuleMatch};
use crate::storage::MemoryStore;
use crate::waf::engine::RuleEngine;
use crate::waf::geo::{self, GeoVerdict};
use crate::waf::rate_limit::RateLimiter;
use crate::waf::resolver;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

pub const ATTACK_TYPE_GEO: &str = "Geo Blocking";
pub const ATTACK_TYPE_RATE_LIMIT: &str = "Rate Limit";
pub const ATTACK_TYPE_ERROR: &str = "Error";

/// Decision for one request.
#[derive(Debug)]
pub enum Outcome {
    Allowed,
    Blocked {
        status: u16,
        body: Value,
        attack_type: String,
        rule_id: Option<u64>,
    },
}

/// Pipeline result handed to the server. Carries everything the audit log and
/// the proxy need so no stage runs twice.
#[derive(Debug)]
pub struct Verdict {
    pub outcome: Outcome,
    pub domain_id: Option<u64>,
    /// Origin for the proxy, from the matched domain when it has one
    pub proxy_target: Option<String>,
    pub country: Option<String>,
    /// A rule match with action=Log: the request proceeds but the match is
    /// carried into the audit entry
    pub log_match: Option<RuleMatch>,
    /// Redacted copy for persistence
    pub sanitized: RequestData,
    /// False when the pipeline already wrote its own (fail-open) audit entry
    pub audit_armed: bool,
}

pub struct Pipeline {
    store: Arc<MemoryStore>,
    engine: RuleEngine,
    locator: Arc<GeoLocator>,
    limiter: Option<RateLimiter>,
    metrics: Arc<MetricsCollector>,
    waf_enabled: bool,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        store: Arc<MemoryStore>,
        locator: Arc<GeoLocator>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let limiter = config
            .rate_limit
            .enable
            .then(|| RateLimiter::new(&config.rate_limit));

        Self {
            store,
            engine: RuleEngine::new(),
            locator,
            limiter,
            metrics,
            waf_enabled: config.waf.enable,
        }
    }

    /// Run the pipeline. Never fails: any internal fault is logged with
    /// attack_type "Error" and the request proceeds to the origin.
    pub async fn decide(&self, request: &RequestData) -> Verdict {
        let sanitized = inspector::sanitize(request);

        match self.run(request, &sanitized).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("Pipeline fault, failing open: {}", e);
                self.metrics.inc_pipeline_fault(fault_stage(&e));

                let entry = RequestLog {
                    id: 0,
                    ip_address: sanitized.ip_address.clone(),
                    method: sanitized.method.clone(),
                    path: sanitized.path.clone(),
                    headers: sanitized.headers.clone(),
                    body: sanitized.body.clone(),
                    is_blocked: false,
                    attack_type: Some(ATTACK_TYPE_ERROR.to_string()),
                    rule_id: None,
                    response_status: 500,
                    response_time_ms: 0,
                    domain_id: None,
                    country_code: None,
                    timestamp: Utc::now(),
                };
                let store = Arc::clone(&self.store);
                tokio::spawn(async move {
                    store.create_request_log(entry).await;
                    store.record_request(0.0, false).await;
                });

                Verdict {
                    outcome: Outcome::Allowed,
                    domain_id: None,
                    proxy_target: None,
                    country: None,
                    log_match: None,
                    sanitized,
                    audit_armed: false,
                }
            }
        }
    }

    async fn run(&self, request: &RequestData, sanitized: &RequestData) -> Result<Verdict> {
        let mut verdict = Verdict {
            outcome: Outcome::Allowed,
            domain_id: None,
            proxy_target: None,
            country: None,
            log_match: None,
            sanitized: sanitized.clone(),
            audit_armed: true,
        };

        // Rate limiting sits ahead of the state machine proper.
        if let Some(ref limiter) = self.limiter {
            let path_only = request.path.split('?').next().unwrap_or(&request.path);
            if !limiter.check(&request.ip_address, path_only) {
                self.metrics.inc_rate_limit_triggered();
                self.metrics.inc_blocked(ATTACK_TYPE_RATE_LIMIT);
                verdict.outcome = Outcome::Blocked {
                    status: 429,
                    body: json!({
                        "error": "Too Many Requests",
                        "message": "Rate limit exceeded, slow down and retry later",
                    }),
                    attack_type: ATTACK_TYPE_RATE_LIMIT.to_string(),
                    rule_id: None,
                };
                return Ok(verdict);
            }
        }

        // RESOLVE_DOMAIN
        let host = request.headers.get("host").cloned().unwrap_or_default();
        let domains = self.store.get_all_domains().await;
        let domain = resolver::resolve(&domains, &host).cloned();

        if let Some(ref domain) = domain {
            verdict.domain_id = Some(domain.id);
            if let Some(ref target) = domain.proxy_target {
                // A target the proxy cannot parse is an operator mistake, not
                // the client's; fail open toward the default upstream.
                target
                    .parse::<hyper::Uri>()
                    .map_err(|e| WafError::PipelineFault {
                        stage: "resolve_domain",
                        reason: format!(
                            "domain {} has an unusable proxy target {:?}: {}",
                            domain.id, target, e
                        ),
                    })?;
                verdict.proxy_target = Some(target.clone());
            }
        } else {
            debug!("No domain registered for host {:?}", host);
        }

        // GEO_CHECK gates on enable_geo_blocking alone, independent of
        // apply_rules.
        if let Some(ref domain) = domain {
            if domain.enable_geo_blocking {
                let country = self.locator.country_for_request(request);
                verdict.country = country.clone();

                let geo_blocks = self.store.get_all_geo_blocks().await;
                if let GeoVerdict::Blocked { country, .. } =
                    geo::evaluate(&geo_blocks, domain, country.as_deref())
                {
                    self.metrics.inc_blocked(ATTACK_TYPE_GEO);
                    verdict.outcome = Outcome::Blocked {
                        status: 403,
                        body: json!({
                            "error": "Access denied",
                            "reason": format!("Traffic from {} is not allowed", country),
                            "message": "This request was blocked by a geographic restriction",
                        }),
                        attack_type: ATTACK_TYPE_GEO.to_string(),
                        rule_id: None,
                    };
                    verdict.country = Some(country);
                    return Ok(verdict);
                }
            }
        }

        // RULE_CHECK runs for domains with apply_rules=true, and over global
        // rules for untracked hosts.
        let apply_rules = domain.as_ref().map_or(true, |d| d.apply_rules);
        if self.waf_enabled && apply_rules {
            let domain_id = domain.as_ref().map(|d| d.id);
            let rules = self.store.get_rules_for_domain(domain_id).await;

            if let Some(matched) = self.engine.evaluate(request, &rules, domain_id) {
                match matched.action {
                    RuleAction::Block => {
                        self.metrics.inc_blocked(&matched.attack_type);
                        verdict.outcome = Outcome::Blocked {
                            status: 403,
                            body: json!({
                                "blocked": true,
                                "message": "Request blocked by security rule",
                                "rule": matched.rule_name,
                                "attackType": matched.attack_type,
                            }),
                            attack_type: matched.attack_type.clone(),
                            rule_id: Some(matched.rule_id),
                        };
                        return Ok(verdict);
                    }
                    RuleAction::Log => {
                        debug!(
                            "Rule {} matched with log action, forwarding",
                            matched.rule_id
                        );
                        verdict.log_match = Some(matched);
                    }
                    RuleAction::Allow => {
                        debug!("Rule {} whitelisted the request", matched.rule_id);
                    }
                }
            }
        }

        Ok(verdict)
    }
}

fn fault_stage(error: &WafError) -> &'static str {
    match error {
        WafError::PatternCompile { .. } => "rule_check",
        WafError::StorageUnavailable(_) => "storage",
        WafError::GeolocationUnavailable { .. } => "geo_check",
        WafError::ProxyUnreachable { .. } => "proxy",
        WafError::PipelineFault { stage, .. } => stage,
        WafError::AnomalyNotFound(_) | WafError::AnomalyTerminal { .. } => "anomaly",
        WafError::Config(_) => "config",
    }
}
