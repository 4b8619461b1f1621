mod backends;
mod cli;
mod commands;
mod config;

use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Command, ConfigCommand, KeysCommand};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = match &cli.config {
        Some(path) => config::load_from_path(path)?,
        None => config::load()?,
    };

    match cli.command.unwrap_or_default() {
        Command::Run { names, keep_going } => {
            commands::run(names, keep_going, &config).await?;
        }
        Command::Seed { names } => {
            commands::seed(names, &config).await?;
        }
        Command::Encrypt { input, output } => commands::encrypt(&input, &output, &config)?,
        Command::Decrypt { input } => commands::decrypt(&input, &config)?,
        Command::Keys(KeysCommand::Init) => commands::init_keys(&config)?,
        Command::Config(ConfigCommand::Init) => init_config(&config, cli.config)?,
        Command::Version => print_version(),
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("cipherload {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config, path: Option<PathBuf>) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => config::default_path()?,
    };
    let path = config::write_if_missing(config, &path)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
