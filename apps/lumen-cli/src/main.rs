//! `lumen`: command-line host for the Lumen inference session engine.
//!
//! Loads a backend plugin, opens one session and drives it through one-shot
//! completions, an interactive chat loop, embeddings or a device profile report.

use anyhow::Result;
use clap::Parser;
use tracing::{Level, debug};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod plugin;

use cli::{Cli, Commands};

fn init_logging(cli: &Cli) {
    let level: Level = cli.default_level().parse().unwrap_or(Level::INFO);
    let filter = match cli.log_filter.as_deref() {
        Some(directives) => EnvFilter::builder()
            .with_default_directive(level.into())
            .parse_lossy(directives),
        None => EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    debug!("lumen starting");

    match cli.command {
        Commands::Run(args) => commands::run(args),
        Commands::Chat(args) => commands::chat(args),
        Commands::Embed(args) => commands::embed(args),
        Commands::Profile(args) => commands::profile(args),
    }
}
