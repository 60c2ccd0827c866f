use super::Config;
use anyhow::Result;

pub fn validate_config(config: &Config) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    if config.server.port < 1024 {
        warnings.push(format!(
            "[!] Port {} requires root privileges. Consider using a port >= 1024",
            config.server.port
        ));
    }

    if config.proxy.default_upstream.parse::<hyper::Uri>().is_err() {
        warnings.push(format!(
            "[X] Invalid default_upstream URL: {}",
            config.proxy.default_upstream
        ));
    }

    if config.proxy.timeout_secs == 0 {
        warnings.push("[X] Proxy timeout cannot be 0".to_string());
    }

    if !config.waf.enable {
        warnings.push(
            "[!] WAF is disabled. All traffic will be forwarded without rule evaluation"
                .to_string(),
        );
    }

    if config.rate_limit.enable && config.rate_limit.requests_per_window == 0 {
        warnings.push("[!] Rate limit is 0. Every request will be rejected.".to_string());
    }

    if let Some(ref db_path) = config.geoip.database_path {
        if !db_path.exists() {
            warnings.push(format!(
                "[!] GeoIP database not found: {}. All traffic will resolve to unknown country",
                db_path.display()
            ));
        }
    }

    for (ip, country) in &config.geoip.overrides {
        if country.len() != 2 {
            warnings.push(format!(
                "[X] GeoIP override for {} is not a two-letter country code: {}",
                ip, country
            ));
        }
    }

    if let Some(ref seed_path) = config.storage.seed_path {
        if !seed_path.exists() {
            warnings.push(format!(
                "[X] Seed file not found: {}",
                seed_path.display()
            ));
        }
    }

    if config.anomaly.window_hours <= 0 {
        warnings.push("[X] Anomaly window must be at least 1 hour".to_string());
    }

    if config.anomaly.spike_threshold == 0 {
        warnings.push(
            "[!] Spike threshold is 0. Every source IP will register as a traffic spike"
                .to_string(),
        );
    }

    if !(0.0..=1.0).contains(&config.anomaly.block_rate_threshold) {
        warnings.push(format!(
            "[X] Block rate threshold must be within 0.0..=1.0, got {}",
            config.anomaly.block_rate_threshold
        ));
    }

    if !["trace", "debug", "info", "warn", "error"].contains(&config.logging.level.as_str()) {
        warnings.push(format!(
            "[X] Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
            config.logging.level
        ));
    }

    if !["json", "pretty", "compact"].contains(&config.logging.format.as_str()) {
        warnings.push(format!(
            "[X] Invalid log format: {}. Must be 'json', 'pretty' or 'compact'",
            config.logging.format
        ));
    }

    if config.logging.level == "debug" || config.logging.level == "trace" {
        warnings
            .push("[*] Recommendation: Use 'info' or 'warn' log level in production".to_string());
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;

    fn base_config() -> Config {
        toml::from_str(
            r#"
[proxy]
default_upstream = "http://127.0.0.1:3000"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_config_has_no_errors() {
        let config = base_config();
        let warnings = validate_config(&config).unwrap();
        assert!(warnings.iter().all(|w| !w.starts_with("[X]")), "{warnings:?}");
    }

    #[test]
    fn test_invalid_upstream_flagged() {
        let mut config = base_config();
        config.proxy = ProxyConfig {
            default_upstream: "not a url".to_string(),
            timeout_secs: 30,
        };
        let warnings = validate_config(&config).unwrap();
        assert!(warnings.iter().any(|w| w.contains("default_upstream")));
    }

    #[test]
    fn test_bad_block_rate_threshold_flagged() {
        let mut config = base_config();
        config.anomaly.block_rate_threshold = 1.5;
        let warnings = validate_config(&config).unwrap();
        assert!(warnings.iter().any(|w| w.contains("Block rate threshold")));
    }
}
