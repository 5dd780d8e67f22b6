// src/cli.rs

use crate::config::Overrides;
use crate::instrument::RunOptions;
use crate::model::{DiffStrategy, Granularity};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the git repository to instrument
    #[arg(short, long, default_value = ".")]
    pub repo: PathBuf,

    /// Base revision; without it every source file counts as new
    #[arg(short, long)]
    pub base: Option<String>,

    /// Target revision, must be the one checked out
    #[arg(short, long, default_value = "HEAD")]
    pub target: String,

    /// Config file (defaults to .canary-track.toml in the repository)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// How many probes represent a changed region
    #[arg(short, long, value_enum)]
    pub granularity: Option<Granularity>,

    /// How changed lines are attributed
    #[arg(long, value_enum)]
    pub strategy: Option<DiffStrategy>,

    /// Worker threads for the diff and planning stages
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,

    /// Read a JSON change record instead of diffing revisions
    #[arg(long, conflicts_with = "base")]
    pub changes: Option<PathBuf>,

    /// Write the computed change record as JSON
    #[arg(long)]
    pub emit_changes: Option<PathBuf>,

    /// Debug logging (overridden by CANARY_TRACK_LOG)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            granularity: self.granularity,
            strategy: self.strategy,
            threads: self.threads,
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            repo: self.repo.clone(),
            base: self.base.clone(),
            target: self.target.clone(),
            changes: self.changes.clone(),
            emit_changes: self.emit_changes.clone(),
        }
    }
}
