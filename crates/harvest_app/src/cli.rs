use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::settings::DEFAULT_SETTINGS_FILE;

#[derive(Parser, Debug)]
#[command(
    name = "giftharvest",
    version,
    about = "Resumable, rate-limited harvester for gift collections"
)]
pub struct Cli {
    /// Settings file with overrides; a missing file is ignored
    #[arg(global = true, long, default_value = DEFAULT_SETTINGS_FILE)]
    pub config: PathBuf,

    /// Defaults to `run` when omitted
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Subcommand to execute, `run` when none was given.
    pub fn action(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run(RunArgs::default()))
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch and ingest the listed collections
    Run(RunArgs),
    /// Recreate the resume cache from the saved collections
    RebuildCache,
    /// Forget cached outcomes older than a number of days
    Prune {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Fetch one URL and report whether the source answers
    HealthCheck { url: String },
    /// Print the URLs of a saved collection
    Export {
        collection: String,
        /// Only records with this status
        #[arg(long)]
        status: Option<String>,
    },
    /// Print resume cache statistics as JSON
    Report,
    /// Print totals across every saved collection as JSON
    Stats,
    /// Fold the records of SOURCES into TARGET
    Merge {
        target: String,
        #[arg(required = true)]
        sources: Vec<String>,
    },
    /// Report duplicate ids and blank columns in every saved collection
    CheckIntegrity,
    /// Remove duplicates and fill blank columns in one collection
    Fix {
        collection: String,
        /// Keep a timestamped copy of the file before fixing it
        #[arg(long)]
        backup: bool,
    },
    /// Delete all but the newest backup files
    CleanupBackups {
        #[arg(long, default_value_t = 5)]
        keep: usize,
    },
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArgs {
    /// Ignore the resume cache and fetch every URL
    #[arg(long)]
    pub full: bool,
    /// Process only this collection
    #[arg(long)]
    pub collection: Option<String>,
}
