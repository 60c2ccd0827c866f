//! IP geolocation collaborator.
//!
//! Resolution order: trusted CDN header (when configured), static overrides,
//! MaxMind database. Every failure mode collapses to `None` ("unknown
//! country"), which never satisfies a geo block.

use crate::config::GeoIpConfig;
use crate::error::WafError;
use crate::model::RequestData;
use maxminddb::{geoip2, Reader};
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::{debug, warn};

pub struct GeoLocator {
    reader: Option<Reader<Vec<u8>>>,
    overrides: HashMap<String, String>,
    trusted_header: Option<String>,
}

impl GeoLocator {
    /// A missing or unreadable database is not fatal; the locator then only
    /// answers from overrides and the trusted header.
    pub fn new(config: &GeoIpConfig) -> Self {
        let reader = match &config.database_path {
            Some(path) => match Reader::open_readfile(path) {
                Ok(reader) => {
                    debug!("GeoIP database loaded from {}", path.display());
                    Some(reader)
                }
                Err(e) => {
                    warn!(
                        "Failed to open GeoIP database {}: {}. Country lookups will return unknown",
                        path.display(),
                        e
                    );
                    None
                }
            },
            None => None,
        };

        let overrides = config
            .overrides
            .iter()
            .map(|(ip, country)| (ip.clone(), country.to_uppercase()))
            .collect();

        Self {
            reader,
            overrides,
            trusted_header: config.trusted_header.as_ref().map(|h| h.to_lowercase()),
        }
    }

    /// Country code for an extracted request: trusted header first, then the
    /// client IP.
    pub fn country_for_request(&self, request: &RequestData) -> Option<String> {
        if let Some(ref header) = self.trusted_header {
            if let Some(value) = request.headers.get(header) {
                let code = value.trim().to_uppercase();
                if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
                    return Some(code);
                }
            }
        }

        self.locate(&request.ip_address)
    }

    /// Country code for one IP, or `None` when it cannot be determined.
    pub fn locate(&self, ip: &str) -> Option<String> {
        if let Some(country) = self.overrides.get(ip) {
            return Some(country.clone());
        }

        let addr: IpAddr = match ip.parse() {
            Ok(addr) => addr,
            Err(_) => {
                debug!("Unparseable client IP {:?}, country unknown", ip);
                return None;
            }
        };

        let reader = self.reader.as_ref()?;
        match reader.lookup::<geoip2::Country>(addr) {
            Ok(country) => country
                .country
                .and_then(|c| c.iso_code)
                .map(|code| code.to_uppercase()),
            Err(e) => {
                let fault = WafError::GeolocationUnavailable {
                    ip: addr.to_string(),
                    reason: e.to_string(),
                };
                debug!("{}", fault);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeoIpConfig;
    use std::path::PathBuf;

    fn locator_with_overrides() -> GeoLocator {
        let mut config = GeoIpConfig::default();
        config.overrides.insert("203.0.113.7".to_string(), "cn".to_string());
        config.trusted_header = Some("CF-IPCountry".to_string());
        GeoLocator::new(&config)
    }

    fn request_from(ip: &str) -> RequestData {
        RequestData {
            ip_address: ip.to_string(),
            method: "GET".to_string(),
            path: "/".to_string(),
            headers: Default::default(),
            body: String::new(),
            payload: None,
            query_params: Default::default(),
            cookies: Default::default(),
        }
    }

    #[test]
    fn test_override_wins_and_uppercases() {
        let locator = locator_with_overrides();
        assert_eq!(locator.locate("203.0.113.7").as_deref(), Some("CN"));
    }

    #[test]
    fn test_unknown_without_database() {
        let locator = locator_with_overrides();
        assert_eq!(locator.locate("198.51.100.1"), None);
        assert_eq!(locator.locate("unknown"), None);
    }

    #[test]
    fn test_missing_database_is_not_fatal() {
        let config = GeoIpConfig {
            database_path: Some(PathBuf::from("/nonexistent/GeoLite2-Country.mmdb")),
            ..Default::default()
        };
        let locator = GeoLocator::new(&config);
        assert_eq!(locator.locate("198.51.100.1"), None);
    }

    #[test]
    fn test_trusted_header_preferred() {
        let locator = locator_with_overrides();
        let mut request = request_from("203.0.113.7");
        request
            .headers
            .insert("cf-ipcountry".to_string(), "de".to_string());
        assert_eq!(locator.country_for_request(&request).as_deref(), Some("DE"));

        // malformed header values fall back to the IP path
        request
            .headers
            .insert("cf-ipcountry".to_string(), "XX1".to_string());
        assert_eq!(locator.country_for_request(&request).as_deref(), Some("CN"));
    }
}
