//! Host to protected-domain resolution.

use crate::model::Domain;

/// Match the inbound host against registered domains: exact, registered host
/// containing the inbound host, or inbound host being a subdomain of the
/// registered one. The lowest-id enabled match wins. `None` means untracked
/// traffic; the pipeline then skips the geo stage and runs global rules only.
pub fn resolve<'a>(domains: &'a [Domain], host: &str) -> Option<&'a Domain> {
    let inbound = normalize_host(host);
    if inbound.is_empty() {
        return None;
    }

    let mut candidates: Vec<&Domain> = domains.iter().filter(|d| d.is_enabled).collect();
    candidates.sort_by_key(|d| d.id);

    candidates.into_iter().find(|domain| {
        let registered = normalize_host(&domain.host);
        registered == inbound
            || registered.contains(&inbound)
            || inbound.ends_with(&format!(".{}", registered))
    })
}

/// Lowercase and strip the port, leaving IPv6 brackets intact.
fn normalize_host(host: &str) -> String {
    let host = host.trim().to_lowercase();
    if host.starts_with('[') {
        match host.find(']') {
            Some(end) => host[..=end].to_string(),
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
            _ => host,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(id: u64, host: &str) -> Domain {
        Domain {
            id,
            host: host.to_string(),
            proxy_target: None,
            apply_rules: true,
            enable_geo_blocking: false,
            is_enabled: true,
        }
    }

    #[test]
    fn test_exact_match() {
        let domains = vec![domain(1, "shop.example.com")];
        assert_eq!(resolve(&domains, "shop.example.com").unwrap().id, 1);
    }

    #[test]
    fn test_port_and_case_ignored() {
        let domains = vec![domain(1, "shop.example.com")];
        assert_eq!(resolve(&domains, "Shop.Example.COM:8443").unwrap().id, 1);
    }

    #[test]
    fn test_subdomain_matches_registered_parent() {
        let domains = vec![domain(1, "example.com")];
        assert_eq!(resolve(&domains, "api.example.com").unwrap().id, 1);
    }

    #[test]
    fn test_registered_superstring_matches() {
        let domains = vec![domain(1, "www.example.com")];
        assert_eq!(resolve(&domains, "example.com").unwrap().id, 1);
    }

    #[test]
    fn test_lowest_id_wins() {
        let domains = vec![domain(5, "example.com"), domain(2, "api.example.com")];
        assert_eq!(resolve(&domains, "api.example.com").unwrap().id, 2);
    }

    #[test]
    fn test_disabled_domains_skipped() {
        let mut d = domain(1, "example.com");
        d.is_enabled = false;
        assert!(resolve(&[d], "example.com").is_none());
    }

    #[test]
    fn test_unrelated_host_resolves_to_none() {
        let domains = vec![domain(1, "example.com")];
        assert!(resolve(&domains, "other.net").is_none());
        assert!(resolve(&domains, "").is_none());
    }
}
