#![forbid(unsafe_code)]

mod cli;
mod commands;
mod error;
mod signals;

use clap::Parser;
use cli::{Cli, Command};
use config::Config;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::builder()
        .with_default_directive(cli.verbosity.tracing_level_filter().into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    debug!(config = ?cli);

    let config = Config::load_layered(cli.config_files()?)?;

    match cli.command {
        Command::Run => commands::run(config).await?,
        Command::Probe { pid, interval } => commands::probe(&config, pid, interval).await?,
        Command::Children { pid } => commands::children(&config, pid)?,
        Command::ShowConfig => commands::show_config(&config)?,
    }
    Ok(())
}
