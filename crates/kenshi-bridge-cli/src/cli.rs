//! Command line definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "kbridge")]
#[command(about = "Offset tooling for the Kenshi state bridge", version)]
pub struct Cli {
    /// Bridge configuration (TOML); defaults to <config dir>/kenshi-bridge/config.toml
    #[arg(short, long, global = true, env = "KBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Fetch the remote offset document from the configured servers
    Fetch {
        /// Host build to request; overrides the configured version
        #[arg(long)]
        game_version: Option<String>,

        /// Server tried before the configured ones
        #[arg(long)]
        server: Option<String>,

        /// Write the document as JSON instead of printing a summary
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Store the fetched tables in the local cache
        #[arg(long)]
        save: bool,
    },

    /// Inspect or delete the local offset cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Run the anchor patterns against a raw image dump
    Scan {
        /// Image dump file
        dump: PathBuf,

        /// Address the dump was taken from (hex)
        #[arg(long, default_value = "0x140000000")]
        base: String,

        /// Remote document whose patterns are scanned as well
        #[arg(long)]
        document: Option<PathBuf>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export offset tables as a remote-format document
    Export {
        /// Table to export
        #[arg(long, value_enum, default_value_t = ExportSource::Builtin)]
        from: ExportSource,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Print the cached tables
    Show {
        /// Accept a cache regardless of its age
        #[arg(long)]
        any_age: bool,
    },
    /// Delete the cache file
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ExportSource {
    /// Compiled-in table
    Builtin,
    /// Local cache
    Cache,
}
