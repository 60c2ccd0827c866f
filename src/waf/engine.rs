//! Canonical rule evaluation.
//!
//! Precedence: rules scoped to the request's domain first, then global rules,
//! each group in ascending id order. Within a rule, match locations are tried
//! in declared order. The first match anywhere ends the evaluation, so at most
//! one [`RuleMatch`] is ever produced per request.

use crate::error::WafError;
use crate::model::{MatchLocation, RequestData, Rule, RuleMatch};
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use tracing::warn;

pub struct RuleEngine {
    /// pattern source -> compiled regex; a failed compile is cached as `None`
    /// so a broken rule is only reported once
    cache: RwLock<HashMap<String, Option<Regex>>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Evaluate `rules` against one request. Disabled rules and rules scoped
    /// to another domain never participate; uncompilable patterns are skipped.
    pub fn evaluate(
        &self,
        request: &RequestData,
        rules: &[Rule],
        domain_id: Option<u64>,
    ) -> Option<RuleMatch> {
        let mut ordered: Vec<&Rule> = Vec::with_capacity(rules.len());

        if let Some(domain_id) = domain_id {
            let mut scoped: Vec<&Rule> = rules
                .iter()
                .filter(|r| r.is_enabled && r.domain_id == Some(domain_id))
                .collect();
            scoped.sort_by_key(|r| r.id);
            ordered.extend(scoped);
        }

        let mut global: Vec<&Rule> = rules
            .iter()
            .filter(|r| r.is_enabled && r.is_global())
            .collect();
        global.sort_by_key(|r| r.id);
        ordered.extend(global);

        for rule in ordered {
            let regex = match self.compile(rule) {
                Some(regex) => regex,
                None => continue,
            };

            for location in &rule.match_locations {
                let value = location_value(request, *location);
                if let Some(found) = regex.find(&value) {
                    return Some(RuleMatch {
                        rule_id: rule.id,
                        rule_name: rule.name.clone(),
                        attack_type: rule.attack_type.clone(),
                        action: rule.action,
                        matched_location: *location,
                        matched_value: found.as_str().to_string(),
                    });
                }
            }
        }

        None
    }

    fn compile(&self, rule: &Rule) -> Option<Regex> {
        if let Some(cached) = self.cache.read().get(&rule.pattern) {
            return cached.clone();
        }

        let compiled = RegexBuilder::new(&rule.pattern)
            .case_insensitive(true)
            .build();

        let entry = match compiled {
            Ok(regex) => Some(regex),
            Err(e) => {
                let fault = WafError::PatternCompile {
                    rule_id: rule.id,
                    source: e,
                };
                warn!("{}; skipping rule {}", fault, rule.name);
                None
            }
        };

        self.cache
            .write()
            .insert(rule.pattern.clone(), entry.clone());
        entry
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Comparable string for one match location. Maps are JSON-serialized so a
/// pattern can match either keys or values.
fn location_value(request: &RequestData, location: MatchLocation) -> String {
    match location {
        MatchLocation::Path => request.path.clone(),
        MatchLocation::Query => {
            serde_json::to_string(&request.query_params).unwrap_or_default()
        }
        MatchLocation::Body => request.body.clone(),
        MatchLocation::Headers => serde_json::to_string(&request.headers).unwrap_or_default(),
        MatchLocation::Cookies => serde_json::to_string(&request.cookies).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RuleAction;

    fn request_with_body(body: &str) -> RequestData {
        RequestData {
            ip_address: "203.0.113.7".to_string(),
            method: "POST".to_string(),
            path: "/comment?page=2".to_string(),
            headers: Default::default(),
            body: body.to_string(),
            payload: None,
            query_params: Default::default(),
            cookies: Default::default(),
        }
    }

    fn rule(id: u64, pattern: &str, locations: Vec<MatchLocation>, domain_id: Option<u64>) -> Rule {
        Rule {
            id,
            name: format!("rule-{id}"),
            pattern: pattern.to_string(),
            attack_type: "XSS".to_string(),
            match_locations: locations,
            action: RuleAction::Block,
            is_enabled: true,
            domain_id,
        }
    }

    #[test]
    fn test_script_tag_in_body_blocks() {
        let engine = RuleEngine::new();
        let request = request_with_body("<script>alert(1)</script>");
        let rules = vec![rule(1, "<script>", vec![MatchLocation::Body], None)];

        let matched = engine.evaluate(&request, &rules, None).unwrap();
        assert_eq!(matched.rule_id, 1);
        assert_eq!(matched.attack_type, "XSS");
        assert_eq!(matched.matched_location, MatchLocation::Body);
        assert!(matched.matched_value.contains("<script>"));
    }

    #[test]
    fn test_domain_scoped_rules_outrank_global() {
        let engine = RuleEngine::new();
        let request = request_with_body("<script>alert(1)</script>");
        // storage order deliberately lists the global rule first
        let rules = vec![
            rule(1, "<script>", vec![MatchLocation::Body], None),
            rule(9, "<script>", vec![MatchLocation::Body], Some(4)),
        ];

        let matched = engine.evaluate(&request, &rules, Some(4)).unwrap();
        assert_eq!(matched.rule_id, 9);

        // without a domain binding only the global rule applies
        let matched = engine.evaluate(&request, &rules, None).unwrap();
        assert_eq!(matched.rule_id, 1);
    }

    #[test]
    fn test_other_domains_rules_never_apply() {
        let engine = RuleEngine::new();
        let request = request_with_body("<script>");
        let rules = vec![rule(1, "<script>", vec![MatchLocation::Body], Some(2))];

        assert!(engine.evaluate(&request, &rules, Some(4)).is_none());
        assert!(engine.evaluate(&request, &rules, None).is_none());
    }

    #[test]
    fn test_at_most_one_match() {
        let engine = RuleEngine::new();
        let request = request_with_body("<script>union select");
        let rules = vec![
            rule(1, "<script>", vec![MatchLocation::Body], None),
            rule(2, "union.+select", vec![MatchLocation::Body], None),
        ];

        let matched = engine.evaluate(&request, &rules, None).unwrap();
        assert_eq!(matched.rule_id, 1);
    }

    #[test]
    fn test_location_order_within_rule() {
        let engine = RuleEngine::new();
        let mut request = request_with_body("attack");
        request.path = "/attack".to_string();
        let rules = vec![rule(
            1,
            "attack",
            vec![MatchLocation::Body, MatchLocation::Path],
            None,
        )];

        let matched = engine.evaluate(&request, &rules, None).unwrap();
        assert_eq!(matched.matched_location, MatchLocation::Body);
    }

    #[test]
    fn test_uncompilable_pattern_is_skipped() {
        let engine = RuleEngine::new();
        let request = request_with_body("<script>");
        let rules = vec![
            rule(1, "([unclosed", vec![MatchLocation::Body], None),
            rule(2, "<script>", vec![MatchLocation::Body], None),
        ];

        let matched = engine.evaluate(&request, &rules, None).unwrap();
        assert_eq!(matched.rule_id, 2);

        // cached failure stays a skip on re-evaluation
        let matched = engine.evaluate(&request, &rules, None).unwrap();
        assert_eq!(matched.rule_id, 2);
    }

    #[test]
    fn test_disabled_rules_do_not_participate() {
        let engine = RuleEngine::new();
        let request = request_with_body("<script>");
        let mut disabled = rule(1, "<script>", vec![MatchLocation::Body], None);
        disabled.is_enabled = false;

        assert!(engine.evaluate(&request, &[disabled], None).is_none());
    }

    #[test]
    fn test_case_insensitive_matching() {
        let engine = RuleEngine::new();
        let request = request_with_body("<SCRIPT>alert(1)</SCRIPT>");
        let rules = vec![rule(1, "<script>", vec![MatchLocation::Body], None)];

        assert!(engine.evaluate(&request, &rules, None).is_some());
    }

    #[test]
    fn test_query_params_matchable() {
        let engine = RuleEngine::new();
        let mut request = request_with_body("");
        request
            .query_params
            .insert("q".to_string(), "1 union select password".to_string());
        let rules = vec![rule(3, "union.+select", vec![MatchLocation::Query], None)];

        let matched = engine.evaluate(&request, &rules, None).unwrap();
        assert_eq!(matched.matched_location, MatchLocation::Query);
    }
}
