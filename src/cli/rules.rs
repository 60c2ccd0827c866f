use crate::model::{RequestData, Rule};
use crate::storage::seed;
use crate::waf::engine::RuleEngine;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Args)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub command: RulesCommand,
}

#[derive(Subcommand)]
pub enum RulesCommand {
    /// List the rules that would be loaded
    List {
        /// Seed file to read; omit for the built-in ruleset
        #[arg(short, long)]
        seed: Option<PathBuf>,
    },

    /// Evaluate the rules against a synthetic request
    Test {
        /// Request path, including the query string
        #[arg(short, long, default_value = "/")]
        path: String,

        /// Request body
        #[arg(short, long)]
        body: Option<String>,

        /// Bind the request to a domain id for scoped-rule precedence
        #[arg(short, long)]
        domain: Option<u64>,

        /// Seed file to read; omit for the built-in ruleset
        #[arg(short, long)]
        seed: Option<PathBuf>,
    },
}

fn load_rules(seed_path: Option<&PathBuf>) -> Result<Vec<Rule>> {
    match seed_path {
        Some(path) => Ok(seed::parse_seed_file(path)?.rules),
        None => Ok(crate::waf::rules::default_rules()),
    }
}

pub async fn run(args: RulesArgs) -> Result<()> {
    match args.command {
        RulesCommand::List { seed } => {
            let rules = load_rules(seed.as_ref())?;
            println!("{:<4} {:<22} {:<18} {:<8} SCOPE", "ID", "NAME", "ATTACK", "ACTION");
            for rule in &rules {
                println!(
                    "{:<4} {:<22} {:<18} {:<8} {}",
                    rule.id,
                    rule.name,
                    rule.attack_type,
                    format!("{:?}", rule.action).to_lowercase(),
                    rule.domain_id
                        .map(|id| format!("domain {id}"))
                        .unwrap_or_else(|| "global".to_string()),
                );
            }
            println!();
            println!("{} rule(s)", rules.len());
            Ok(())
        }

        RulesCommand::Test {
            path,
            body,
            domain,
            seed,
        } => {
            let rules = load_rules(seed.as_ref())?;

            let query_params = path
                .split_once('?')
                .map(|(_, query)| {
                    query
                        .split('&')
                        .filter_map(|pair| pair.split_once('='))
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect()
                })
                .unwrap_or_default();

            let body = body.unwrap_or_default();
            let request = RequestData {
                ip_address: "127.0.0.1".to_string(),
                method: "GET".to_string(),
                path: path.clone(),
                headers: Default::default(),
                body: body.clone(),
                payload: serde_json::from_str(&body).ok(),
                query_params,
                cookies: Default::default(),
            };

            let engine = RuleEngine::new();
            match engine.evaluate(&request, &rules, domain) {
                Some(matched) => {
                    println!("[!] Rule matched: {} ({})", matched.rule_name, matched.rule_id);
                    println!("    Attack type: {}", matched.attack_type);
                    println!("    Location: {}", matched.matched_location);
                    println!("    Matched value: {}", matched.matched_value);
                    println!("    Action: {:?}", matched.action);
                }
                None => {
                    println!("[OK] No rule matched");
                }
            }
            Ok(())
        }
    }
}
