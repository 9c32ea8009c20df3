use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{LedgerKey, RepoNameRule, SourceKind};

#[derive(Parser)]
#[command(
    name = "codeharvest",
    version,
    about = "Turn source repositories into a normalized JSONL text corpus",
    after_help = "State (config.toml, resume ledgers, decode-issues.log) lives in \
                  .codeharvest/ under the current directory. An interrupted run \
                  resumes where it stopped when started again with the same input."
)]
pub struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Process every repository under INPUT.
    ///
    /// With `--kind zip` (default) every `*.zip` found recursively is one
    /// repository; with `--kind dir` every immediate subdirectory is.
    Run {
        /// Directory holding the repositories
        input: PathBuf,
        #[command(flatten)]
        harvest: HarvestArgs,
    },

    /// Process a single repository (directory or zip archive)
    Repo {
        /// Repository directory or archive
        path: PathBuf,
        #[command(flatten)]
        harvest: HarvestArgs,
    },

    /// Write the given flags to .codeharvest/config.toml as new defaults
    Init {
        #[command(flatten)]
        harvest: HarvestArgs,
    },

    /// Detect encoding and digest of a single file
    Detect {
        /// File to inspect
        file: PathBuf,
    },

    /// Inspect the decode diagnostic log
    Issues {
        /// Show summary statistics
        #[arg(long)]
        summary: bool,
        /// Clear the log
        #[arg(long)]
        clear: bool,
    },

    /// List repositories with an unfinished resume ledger
    Status,
}

/// Options shared by `run` and `repo`. Unset flags fall back to config.toml.
#[derive(Args, Debug, Default)]
pub struct HarvestArgs {
    /// Directory receiving the JSONL segments
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Platform label written into every record
    #[arg(long)]
    pub platform: Option<String>,

    /// Segment file base name (defaults to the platform label)
    #[arg(long)]
    pub prefix: Option<String>,

    /// How repositories are laid out under the input
    #[arg(long, value_enum)]
    pub kind: Option<SourceKind>,

    /// How repository names are derived
    #[arg(long, value_enum)]
    pub repo_name: Option<RepoNameRule>,

    /// Prefix repository names with `OWNER/`
    #[arg(long)]
    pub owner: Option<String>,

    /// Delete each source archive/directory after it completes
    #[arg(long)]
    pub clean: bool,

    /// Where archives are extracted (default: next to the archive)
    #[arg(long)]
    pub extract_dir: Option<PathBuf>,

    /// Repositories processed in parallel (0 = one per core)
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,

    /// Rotate segments once they grow past this many MiB
    #[arg(long)]
    pub max_segment_mb: Option<u64>,

    /// Skip files larger than this many MiB
    #[arg(long)]
    pub max_file_mb: Option<u32>,

    /// Encoding every record must be representable in
    #[arg(long)]
    pub target_encoding: Option<String>,

    /// Skip paths containing this substring (repeatable)
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// What identifies a processed file in the resume ledger
    #[arg(long, value_enum)]
    pub ledger_key: Option<LedgerKey>,

    /// Add a `date` (YYYYMMDD) field to every record
    #[arg(long)]
    pub stamp_date: bool,
}
