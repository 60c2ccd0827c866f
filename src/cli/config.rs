use anyhow::Result;
use clap::{Args, Subcommand};
use crate::Config;
use std::path::PathBuf;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Parse and validate a configuration file
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Write a starter configuration file
    Init {
        #[arg(short, long, default_value = "fe-waf.toml")]
        output: PathBuf,
    },
}

pub async fn run(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Check { config } => {
            println!("Checking configuration: {}", config.display());

            let cfg = Config::from_file(&config)?;
            let warnings = cfg.validate()?;

            if warnings.is_empty() {
                println!("Configuration is valid!");
            } else {
                println!("Configuration loaded with warnings:\n");
                for warning in warnings {
                    println!("{}", warning);
                }
            }

            Ok(())
        }

        ConfigCommand::Init { output } => {
            let starter: Config = toml::from_str(
                r#"
[proxy]
default_upstream = "http://127.0.0.1:3000"
"#,
            )?;
            crate::config::parser::save_config(&starter, &output)?;
            println!("Wrote starter configuration to {}", output.display());
            println!("Adjust proxy.default_upstream and add a storage.seed_path to get going.");
            Ok(())
        }
    }
}
