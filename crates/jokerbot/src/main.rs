mod cli;
mod config;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use config::BotConfig;

const DEFAULT_LOG_FILTER: &str = "jokerbot=info,jokerbot_core=info";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = BotConfig::from_env()?;

    dispatch(cli.command, &config).await
}

async fn dispatch(command: Commands, config: &BotConfig) -> Result<()> {
    match command {
        Commands::Run => cli::run::run_bot(config).await,
        Commands::Import { path, delimiter } => {
            cli::catalog::run_import(config, &path, delimiter).await
        }
        Commands::Names => cli::catalog::run_names(config).await,
        Commands::Show { name } => cli::catalog::run_show(config, &name).await,
        Commands::Delete { name } => cli::catalog::run_delete(config, &name).await,
        Commands::Reply { event_id } => cli::run::run_reply(config, &event_id).await,
    }
}
