use anyhow::Result;
use clap::Args;
use crate::{Config, Server};
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct ServeArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "fe-waf.toml")]
    pub config: PathBuf,
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let config = Config::from_file(&args.config)?;

    crate::logging::init_logging(&config.logging.level, &config.logging.format)?;

    info!("Starting fe-waf gateway v{}", crate::VERSION);
    info!("Loading configuration from: {}", args.config.display());

    let warnings = config.validate()?;
    for warning in warnings {
        println!("{}", warning);
    }

    let server = Server::new(config).await?;
    info!("Gateway starting...");

    server.serve().await?;

    Ok(())
}
