use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod settings;

use cli::{CacheAction, Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "kenshi_bridge=info",
        1 => "kenshi_bridge=debug",
        _ => "kenshi_bridge=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = settings::load(cli.config.as_deref())?;
    debug!("Using {:?}", config);

    match cli.command {
        Command::Fetch {
            game_version,
            server,
            output,
            save,
        } => commands::fetch::run(
            &config,
            game_version.as_deref(),
            server.as_deref(),
            output.as_deref(),
            save,
        ),
        Command::Cache { action } => match action {
            CacheAction::Show { any_age } => commands::cache::show(&config, any_age),
            CacheAction::Clear => commands::cache::clear(&config),
        },
        Command::Scan {
            dump,
            base,
            document,
            json,
        } => commands::scan::run(&dump, &base, document.as_deref(), json),
        Command::Export { from, output } => commands::export::run(&config, from, output.as_deref()),
    }
}
