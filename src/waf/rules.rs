//! Built-in starter ruleset, installed when no seed file provides rules.

use crate::model::{MatchLocation, Rule, RuleAction};

fn rule(
    id: u64,
    name: &str,
    pattern: &str,
    attack_type: &str,
    match_locations: Vec<MatchLocation>,
) -> Rule {
    Rule {
        id,
        name: name.to_string(),
        pattern: pattern.to_string(),
        attack_type: attack_type.to_string(),
        match_locations,
        action: RuleAction::Block,
        is_enabled: true,
        domain_id: None,
    }
}

/// OWASP-flavored global defaults. Patterns compile case-insensitively.
pub fn default_rules() -> Vec<Rule> {
    use MatchLocation::{Body, Cookies, Headers, Path, Query};

    vec![
        rule(
            1,
            "sqli-union-select",
            r"union.+select",
            "SQL Injection",
            vec![Query, Body],
        ),
        rule(
            2,
            "sqli-boolean-probe",
            r"('|%27)\s*(or|and)\s*('|%27)?\d",
            "SQL Injection",
            vec![Query, Body],
        ),
        rule(
            3,
            "xss-script-tag",
            r"<script[^>]*>",
            "XSS",
            vec![Body, Query],
        ),
        rule(
            4,
            "xss-event-handler",
            r"on(load|error|click|mouseover)\s*=",
            "XSS",
            vec![Body, Query],
        ),
        rule(
            5,
            "path-traversal",
            r"\.\.[\\/]",
            "Path Traversal",
            vec![Path, Query],
        ),
        rule(
            6,
            "cmd-injection",
            r"(;|\|\||&&|`|\$\()\s*(cat|ls|id|whoami|wget|curl)\b",
            "Command Injection",
            vec![Query, Body],
        ),
        rule(
            7,
            "log4shell-probe",
            r"\$\{jndi:(ldap|rmi|dns)",
            "RCE Probe",
            vec![Headers, Body, Query],
        ),
        rule(
            8,
            "cookie-tamper-admin",
            r#""(role|is_admin)"\s*:\s*"?(admin|true)"#,
            "Session Tampering",
            vec![Cookies],
        ),
    ]
}
