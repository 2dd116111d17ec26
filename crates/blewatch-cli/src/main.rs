use std::path::Path;

use anyhow::{Context, Result};
use blewatch_core::Config;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod format;
mod util;

use cli::{Cli, Commands};
use commands::{cmd_decode, cmd_inspect, cmd_replay};
use format::FormatOptions;

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_validated(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => {
            let config = Config::load_default()?;
            config.validate()?;
            config
        }
    };
    debug!("Loaded config: {:?}", config);
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        verbose,
        quiet,
        config,
        output,
        no_color,
        compact,
        command,
    } = Cli::parse();

    let filter = if quiet {
        EnvFilter::new("warn")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let no_color = no_color || std::env::var_os("NO_COLOR").is_some();
    let opts = FormatOptions::new(no_color, compact);

    match command {
        Commands::Replay(args) => {
            let config = load_config(config.as_deref())?;
            cmd_replay(args, &config, output.as_ref(), &opts, quiet).await?;
        }
        Commands::Inspect(args) => {
            cmd_inspect(args, output.as_ref(), &opts)?;
        }
        Commands::Decode(args) => {
            cmd_decode(args, output.as_ref(), &opts)?;
        }
    }

    Ok(())
}
