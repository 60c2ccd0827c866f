use anyhow::Result;
use clap::{Parser, Subcommand};
use fe_waf::cli;

#[derive(Parser)]
#[command(name = "fe-waf")]
#[command(version = fe_waf::VERSION)]
#[command(about = "Traffic-filtering reverse proxy with audit logging and anomaly detection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Serve(cli::serve::ServeArgs),

    /// Run anomaly detection over recorded request logs
    Detect(cli::detect::DetectArgs),

    /// Inspect and test firewall rules
    Rules(cli::rules::RulesArgs),

    /// Configuration management
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => cli::serve::run(args).await,
        Commands::Detect(args) => cli::detect::run(args).await,
        Commands::Rules(args) => cli::rules::run(args).await,
        Commands::Config(args) => cli::config::run(args).await,
    }
}
