//! Geo-block evaluation for the pipeline's geo stage.

use crate::model::{Domain, GeoAction, GeoBlock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoVerdict {
    /// An enabled block entry matched; the country named goes into the
    /// response and the audit log.
    Blocked { geo_block_id: u64, country: String },
    /// An enabled allow entry matched; the request is exempt from the stage.
    Exempt,
    /// Nothing matched. An unknown country always lands here.
    NoMatch,
}

/// Decide the geo stage for a request bound to `domain`. Domain-scoped entries
/// outrank global ones, ascending id within each group; the first match wins.
pub fn evaluate(
    geo_blocks: &[GeoBlock],
    domain: &Domain,
    country: Option<&str>,
) -> GeoVerdict {
    let country = match country {
        Some(code) if !code.is_empty() => code.to_uppercase(),
        _ => return GeoVerdict::NoMatch,
    };

    let mut applicable: Vec<&GeoBlock> = geo_blocks
        .iter()
        .filter(|g| g.is_enabled)
        .filter(|g| g.country_code.eq_ignore_ascii_case(&country))
        .filter(|g| g.domain_id.is_none() || g.domain_id == Some(domain.id))
        .collect();
    applicable.sort_by_key(|g| (g.domain_id.is_none(), g.id));

    match applicable.first() {
        Some(entry) => match entry.action {
            GeoAction::Block => GeoVerdict::Blocked {
                geo_block_id: entry.id,
                country,
            },
            GeoAction::Allow => GeoVerdict::Exempt,
        },
        None => GeoVerdict::NoMatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(id: u64) -> Domain {
        Domain {
            id,
            host: "example.com".to_string(),
            proxy_target: None,
            apply_rules: true,
            enable_geo_blocking: true,
            is_enabled: true,
        }
    }

    fn geo_block(id: u64, country: &str, domain_id: Option<u64>, action: GeoAction) -> GeoBlock {
        GeoBlock {
            id,
            country_code: country.to_string(),
            domain_id,
            action,
            is_enabled: true,
        }
    }

    #[test]
    fn test_global_block_matches_any_domain() {
        let blocks = vec![geo_block(1, "CN", None, GeoAction::Block)];
        let verdict = evaluate(&blocks, &domain(7), Some("CN"));
        assert_eq!(
            verdict,
            GeoVerdict::Blocked {
                geo_block_id: 1,
                country: "CN".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_country_never_matches() {
        let blocks = vec![geo_block(1, "CN", None, GeoAction::Block)];
        assert_eq!(evaluate(&blocks, &domain(7), None), GeoVerdict::NoMatch);
        assert_eq!(evaluate(&blocks, &domain(7), Some("")), GeoVerdict::NoMatch);
    }

    #[test]
    fn test_scoped_allow_overrides_global_block() {
        let blocks = vec![
            geo_block(1, "CN", None, GeoAction::Block),
            geo_block(2, "CN", Some(7), GeoAction::Allow),
        ];
        assert_eq!(evaluate(&blocks, &domain(7), Some("CN")), GeoVerdict::Exempt);
        // other domains still see the global block
        assert!(matches!(
            evaluate(&blocks, &domain(8), Some("CN")),
            GeoVerdict::Blocked { .. }
        ));
    }

    #[test]
    fn test_case_insensitive_country_compare() {
        let blocks = vec![geo_block(1, "CN", None, GeoAction::Block)];
        assert!(matches!(
            evaluate(&blocks, &domain(1), Some("cn")),
            GeoVerdict::Blocked { .. }
        ));
    }

    #[test]
    fn test_disabled_and_foreign_scoped_entries_skipped() {
        let mut disabled = geo_block(1, "CN", None, GeoAction::Block);
        disabled.is_enabled = false;
        let foreign = geo_block(2, "CN", Some(99), GeoAction::Block);

        assert_eq!(
            evaluate(&[disabled, foreign], &domain(7), Some("CN")),
            GeoVerdict::NoMatch
        );
    }
}
