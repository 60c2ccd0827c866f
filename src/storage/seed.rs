//! Startup seeding of domains, rules and geo blocks from a TOML file.
//!
//! ```toml
//! [[domains]]
//! id = 1
//! host = "shop.example.com"
//! proxy_target = "http://10.0.1.20:8080"
//! enable_geo_blocking = true
//!
//! [[rules]]
//! id = 1
//! name = "xss-script-tag"
//! pattern = "<script[^>]*>"
//! attack_type = "XSS"
//! match_locations = ["body", "query"]
//!
//! [[geo_blocks]]
//! id = 1
//! country_code = "CN"
//! action = "block"
//! ```

use crate::model::{Domain, GeoBlock, Rule};
use crate::storage::MemoryStore;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub domains: Vec<Domain>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub geo_blocks: Vec<GeoBlock>,
}

pub fn parse_seed_file(path: &Path) -> Result<SeedFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
    let seed: SeedFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse seed file: {}", path.display()))?;
    Ok(seed)
}

pub async fn apply_seed(store: &MemoryStore, seed: SeedFile) {
    let (domains, rules, geo_blocks) = (
        seed.domains.len(),
        seed.rules.len(),
        seed.geo_blocks.len(),
    );

    for domain in seed.domains {
        store.insert_domain(domain).await;
    }
    for rule in seed.rules {
        store.insert_rule(rule).await;
    }
    for geo_block in seed.geo_blocks {
        store.insert_geo_block(geo_block).await;
    }

    info!(
        "Seeded {} domain(s), {} rule(s), {} geo block(s)",
        domains, rules, geo_blocks
    );
}
